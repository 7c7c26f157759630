use std::path::Path;

use clap::Args;
use vhdbranch::{SystemRunner, ToolRunner, VhdbranchError};

use crate::cli::GlobalFlags;

/// Boot a node on the next restart
#[derive(Args, Debug)]
pub struct BootArgs {
    /// Node id or name
    pub node: String,

    /// Restart the machine once the boot entry is armed
    #[arg(long)]
    pub restart: bool,
}

pub fn execute(args: BootArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let workspace = global.open_workspace()?;
    let node = super::resolve_node(&workspace, &args.node)?;

    let guid = workspace.arm_next_boot(&node.id)?;
    println!("Next boot: {} {}", node.name, guid);

    if args.restart {
        restart()?;
    }
    Ok(())
}

fn restart() -> anyhow::Result<()> {
    let args = ["/r".to_string(), "/t".to_string(), "0".to_string()];
    let output = SystemRunner.run(Path::new("shutdown"), &args)?;
    if !output.success() {
        return Err(VhdbranchError::CommandExecution {
            tool: "shutdown".to_string(),
            exit_code: output.exit_code,
            summary: "shutdown /r /t 0".to_string(),
            output: output.combined(),
        }
        .into());
    }
    tracing::info!("Restart requested");
    Ok(())
}
