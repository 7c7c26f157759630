use clap::Args;

use crate::cli::GlobalFlags;

/// Create a differencing child of an existing node
#[derive(Args, Debug)]
pub struct BranchArgs {
    /// Parent node id or name
    pub parent: String,

    /// Display name of the new node
    pub name: String,

    /// Free-form description
    #[arg(long)]
    pub desc: Option<String>,
}

pub fn execute(args: BranchArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let workspace = global.open_workspace()?;
    let parent = super::resolve_node(&workspace, &args.parent)?;

    let node = workspace.create_diff(&parent.id, &args.name, args.desc)?;
    super::list::print_nodes(std::slice::from_ref(&node), global)
}
