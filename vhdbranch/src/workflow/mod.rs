//! Workflow Engine: the end-to-end sagas.
//!
//! Each saga is linear and halts on the first failing step. Physical steps
//! go through the [`DiskOrchestrator`], whose guards have already released
//! their resources by the time an error reaches this layer. The Node Store
//! is written only after the physical steps of a saga have all succeeded.

mod boot;
mod create;
mod delete;
mod mount;

use std::path::Path;

use crate::db::NodeStore;
use crate::volumes::{AttachedDisk, BootFileTarget, DiskOrchestrator};
use vhdbranch_shared::errors::VhdbranchError;
use vhdbranch_shared::errors::VhdbranchResult;

pub use create::CreateBaseRequest;
pub(crate) use delete::post_order;

pub struct WorkflowEngine<'a> {
    store: &'a NodeStore,
    disks: &'a DiskOrchestrator,
}

impl<'a> WorkflowEngine<'a> {
    pub fn new(store: &'a NodeStore, disks: &'a DiskOrchestrator) -> Self {
        Self { store, disks }
    }

    /// Mount the system and EFI volumes of `disk`, optionally deploy an
    /// image, then write boot files. Both mounts are gone on return.
    ///
    /// A differencing disk inherits its parent's partition layout, so its
    /// EFI volume already carries the parent's boot payload and is reused.
    fn install_boot_files(
        &self,
        disk: &AttachedDisk<'_>,
        image: Option<(&Path, u32)>,
    ) -> VhdbranchResult<BootFileTarget> {
        let volumes = self.disks.volumes(disk)?;
        let system = self.disks.mount_volume(volumes.system.number, "sys")?;
        let efi = self.disks.mount_volume(volumes.efi.number, "efi")?;

        if let Some((image, index)) = image {
            self.disks.apply_image(image, index, system.dir())?;
        }
        let target = self.disks.write_boot_files(&system, &efi)?;

        efi.release()?;
        system.release()?;
        Ok(target)
    }

    /// Label the firmware menu entry with the node name. Cosmetic.
    fn describe_entry(&self, guid: &str, name: &str) {
        if let Err(e) = self.disks.set_boot_entry_description(guid, name) {
            tracing::warn!("Failed to set description of boot entry {}: {}", guid, e);
        }
    }
}

/// Error text stored in failure records: kind, message and raw tool output.
pub(crate) fn describe(e: &VhdbranchError) -> String {
    match e.raw_output().map(str::trim).filter(|raw| !raw.is_empty()) {
        Some(raw) => format!("[{}] {} | output: {}", e.kind(), e, raw),
        None => format!("[{}] {}", e.kind(), e),
    }
}
