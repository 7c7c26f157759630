use std::path::PathBuf;

use clap::Args;
use vhdbranch::CreateBaseRequest;

use crate::cli::GlobalFlags;

/// Create a bootable base disk from an image
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Display name of the new node
    pub name: String,

    /// WIM or ESD file to deploy
    #[arg(long)]
    pub image: PathBuf,

    /// Image index inside the file (see `vhdbranch images`)
    #[arg(long)]
    pub index: u32,

    /// Maximum size of the disk in GB
    #[arg(long = "size-gb", default_value_t = 64)]
    pub size_gb: u64,

    /// Free-form description
    #[arg(long)]
    pub desc: Option<String>,
}

pub fn execute(args: CreateArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let workspace = global.open_workspace()?;
    let request = CreateBaseRequest {
        name: args.name,
        desc: args.desc,
        image: args.image,
        index: args.index,
        size_gb: args.size_gb,
    };

    let node = workspace.create_base(&request)?;
    super::list::print_nodes(std::slice::from_ref(&node), global)
}
