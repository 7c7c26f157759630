//! vhdbranch: trees of bootable differencing VHDX system variants.
//!
//! A workspace root holds base disks, differencing children and a SQLite
//! node store. Physical work is delegated to `diskpart`, `dism`, `bcdboot`
//! and `bcdedit` through [`ToolRunner`]; [`Workspace`] is the entry point.

mod db;
mod reconcile;
pub mod runtime;
pub mod util;
pub mod volumes;
mod workflow;

pub use runtime::Workspace;
pub use runtime::layout::WorkspaceLayout;
pub use runtime::options::{ToolPaths, WorkspaceOptions};
pub use runtime::types::{
    ImageInfo, Node, NodeId, NodeStatus, OpResult, OperationRecord, Settings,
};
pub use util::{CommandOutput, SystemRunner, ToolRunner};
pub use vhdbranch_shared::errors::{VhdbranchError, VhdbranchResult};
pub use workflow::CreateBaseRequest;
