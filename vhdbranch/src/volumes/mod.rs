//! Physical disk operations.
//!
//! Script generation for the partitioning tool, parsers for every tool's
//! text output, scoped mount/attach guards and the orchestrator that ties
//! them together.

mod mount;
mod orchestrator;
pub mod parse;
pub mod script;

pub use mount::{AttachedDisk, DriveLetter, MountPoint};
pub use orchestrator::{BootFileTarget, CreateSpec, DiskOrchestrator};
pub(crate) use orchestrator::remove_mount_dir;
pub use parse::bcdedit::BootEntry;
pub use parse::diskpart::{DiskVolumes, VdiskDetail, VolumeInfo};
