//! CLI definition and argument parsing for vhdbranch-cli.
//! This module contains the main CLI structure, the subcommand list and the
//! global flags shared by every subcommand.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use vhdbranch::runtime::constants::envs;
use vhdbranch::{SystemRunner, Workspace, WorkspaceOptions};

use crate::formatter::OutputFormat;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser, Debug)]
#[command(
    name = "vhdbranch",
    author,
    version,
    about = "Manage trees of bootable differencing VHDX disks"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
#[non_exhaustive]
pub enum Commands {
    /// Initialize a workspace root
    Init(crate::commands::init::InitArgs),

    /// List the images inside a WIM or ESD file
    Images(crate::commands::images::ImagesArgs),

    /// Create a bootable base disk from an image
    Create(crate::commands::create::CreateArgs),

    /// Create a differencing child of an existing node
    Branch(crate::commands::branch::BranchArgs),

    /// List nodes in tree order
    #[command(visible_alias = "ls")]
    List(crate::commands::list::ListArgs),

    /// Recompute node statuses from disk files and boot entries
    Scan(crate::commands::scan::ScanArgs),

    /// Boot a node on the next restart
    Boot(crate::commands::boot::BootArgs),

    /// Remove a node and all of its descendants
    Rm(crate::commands::rm::RmArgs),

    /// Rewrite boot files and recreate the boot entry of a node
    Repair(crate::commands::repair::RepairArgs),

    /// Mount the system volume of a node
    Mount(crate::commands::mount::MountArgs),

    /// Release a mounted node
    Unmount(crate::commands::mount::MountArgs),

    /// Show the operation history
    Log(crate::commands::log::LogArgs),

    /// Generate shell completion script
    #[command(hide = true)]
    Completion(crate::commands::completion::CompletionArgs),
}

// ============================================================================
// GLOBAL FLAGS
// ============================================================================

#[derive(Args, Debug, Clone)]
pub struct GlobalFlags {
    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,

    /// Directory holding config.json (default: ~/.vhdbranch)
    #[arg(long, global = true, env = envs::VHDBRANCH_HOME)]
    pub home: Option<PathBuf>,

    /// Workspace root, overriding the configured one
    #[arg(long, global = true, env = envs::VHDBRANCH_ROOT)]
    pub root: Option<PathBuf>,

    /// Skip status reconciliation when opening the workspace
    #[arg(long, global = true)]
    pub no_scan: bool,

    /// Output format: table, json or yaml
    #[arg(long, global = true, default_value = "table")]
    pub format: String,
}

impl GlobalFlags {
    pub fn home_dir(&self) -> PathBuf {
        self.home.clone().unwrap_or_else(|| {
            let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
            path.push(".vhdbranch");
            path
        })
    }

    /// Options from config.json with command-line overrides applied.
    pub fn load_options(&self) -> WorkspaceOptions {
        let mut options = crate::config::load_config(&self.home_dir());
        if let Some(root) = &self.root {
            options.root = root.clone();
        }
        if self.no_scan {
            options.reconcile_on_open = false;
        }
        options
    }

    pub fn open_workspace(&self) -> anyhow::Result<Workspace> {
        Workspace::open(self.load_options(), Arc::new(SystemRunner)).map_err(Into::into)
    }

    pub fn output_format(&self) -> anyhow::Result<OutputFormat> {
        OutputFormat::from_str(&self.format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_root_flag_overrides_config() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let cli = Cli::parse_from([
            "vhdbranch",
            "--home",
            temp_dir.path().to_str().unwrap(),
            "--root",
            "/ws/override",
            "--no-scan",
            "list",
        ]);
        let options = cli.global.load_options();
        assert_eq!(options.root, PathBuf::from("/ws/override"));
        assert!(!options.reconcile_on_open);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["vhdbranch", "log", "--format", "json", "--limit", "5"]);
        assert_eq!(cli.global.output_format().unwrap(), OutputFormat::Json);
        match cli.command {
            Commands::Log(args) => assert_eq!(args.limit, Some(5)),
            other => panic!("unexpected command {:?}", other),
        }
    }
}
