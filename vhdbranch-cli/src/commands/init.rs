use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use vhdbranch::{SystemRunner, Workspace};

use crate::cli::GlobalFlags;
use crate::formatter;

/// Initialize a workspace root
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory that will hold base/, diff/ and meta/
    pub root: PathBuf,

    /// UI locale stored in the workspace settings
    #[arg(long)]
    pub locale: Option<String>,
}

pub fn execute(args: InitArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let mut options = global.load_options();
    options.root = args.root;
    if args.locale.is_some() {
        options.locale = args.locale;
    }

    let workspace = Workspace::initialize(options, Arc::new(SystemRunner))?;
    crate::config::save_root(&global.home_dir(), workspace.layout().root())?;

    let settings = workspace.settings()?;
    formatter::print_output(&mut std::io::stdout(), &settings, global.output_format()?, |w, s| {
        writeln!(
            w,
            "Initialized workspace at {} (locale {})",
            s.root_path, s.locale
        )?;
        Ok(())
    })
}
