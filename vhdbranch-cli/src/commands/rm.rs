use clap::Args;

use crate::cli::GlobalFlags;

/// Remove a node and all of its descendants
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Node id or name
    pub node: String,
}

pub fn execute(args: RmArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let workspace = global.open_workspace()?;
    let node = super::resolve_node(&workspace, &args.node)?;

    let removed = workspace.delete_subtree(&node.id)?;
    for id in &removed {
        println!("{}", id);
    }
    Ok(())
}
