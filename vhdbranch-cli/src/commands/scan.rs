use std::sync::Arc;

use clap::Args;
use vhdbranch::{SystemRunner, Workspace};

use crate::cli::GlobalFlags;

/// Recompute node statuses from disk files and boot entries
#[derive(Args, Debug)]
pub struct ScanArgs {}

pub fn execute(_args: ScanArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let mut options = global.load_options();
    options.reconcile_on_open = false;

    let workspace = Workspace::open(options, Arc::new(SystemRunner))?;
    let nodes = workspace.scan()?;
    super::list::print_nodes(&nodes, global)
}
