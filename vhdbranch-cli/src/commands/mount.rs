use clap::Args;

use crate::cli::GlobalFlags;

#[derive(Args, Debug)]
pub struct MountArgs {
    /// Node id or name
    pub node: String,
}

pub fn execute(args: MountArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let workspace = global.open_workspace()?;
    let node = super::resolve_node(&workspace, &args.node)?;

    let dir = workspace.mount(&node.id)?;
    println!("{}", dir);
    Ok(())
}

pub fn execute_unmount(args: MountArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let workspace = global.open_workspace()?;
    let node = super::resolve_node(&workspace, &args.node)?;

    workspace.unmount(&node.id)?;
    println!("Unmounted {}", node.name);
    Ok(())
}
