use clap::Args;

use crate::cli::GlobalFlags;

/// Rewrite boot files and recreate the boot entry of a node
#[derive(Args, Debug)]
pub struct RepairArgs {
    /// Node id or name
    pub node: String,
}

pub fn execute(args: RepairArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let workspace = global.open_workspace()?;
    let node = super::resolve_node(&workspace, &args.node)?;

    match workspace.repair_boot_entry(&node.id)? {
        Some(guid) => println!("Repaired {}: boot entry {}", node.name, guid),
        None => println!("Repaired {}: no boot entry was registered", node.name),
    }
    Ok(())
}
