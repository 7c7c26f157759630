mod cli;
mod commands;
mod config;
mod formatter;

use std::process;

use clap::Parser;
use cli::{Cli, Commands};
use vhdbranch::util::init_logging;
use vhdbranch::{VhdbranchError, WorkspaceLayout};

fn main() {
    let cli = Cli::parse();

    // File logging only once the workspace root exists; `init` and
    // `completion` log to stderr alone.
    let level = if cli.global.debug { "debug" } else { "info" };
    let logs_dir = match &cli.command {
        Commands::Init(_) | Commands::Completion(_) => None,
        _ => {
            let layout = WorkspaceLayout::new(cli.global.load_options().root);
            layout.meta_dir().is_dir().then(|| layout.logs_dir())
        }
    };
    let _log_guard = init_logging(logs_dir.as_deref(), level);

    let result = match cli.command {
        Commands::Init(args) => commands::init::execute(args, &cli.global),
        Commands::Images(args) => commands::images::execute(args, &cli.global),
        Commands::Create(args) => commands::create::execute(args, &cli.global),
        Commands::Branch(args) => commands::branch::execute(args, &cli.global),
        Commands::List(args) => commands::list::execute(args, &cli.global),
        Commands::Scan(args) => commands::scan::execute(args, &cli.global),
        Commands::Boot(args) => commands::boot::execute(args, &cli.global),
        Commands::Rm(args) => commands::rm::execute(args, &cli.global),
        Commands::Repair(args) => commands::repair::execute(args, &cli.global),
        Commands::Mount(args) => commands::mount::execute(args, &cli.global),
        Commands::Unmount(args) => commands::mount::execute_unmount(args, &cli.global),
        Commands::Log(args) => commands::log::execute(args, &cli.global),
        Commands::Completion(args) => commands::completion::execute(args),
    };

    if let Err(error) = result {
        report(&error);
        process::exit(1);
    }
}

/// Print the error kind and any captured tool output.
fn report(error: &anyhow::Error) {
    match error.downcast_ref::<VhdbranchError>() {
        Some(err) => {
            eprintln!("Error [{}]: {:#}", err.kind(), error);
            if let Some(output) = err.raw_output().filter(|o| !o.trim().is_empty()) {
                eprintln!("--- tool output ---");
                eprintln!("{}", output.trim_end());
            }
        }
        None => eprintln!("Error: {:#}", error),
    }
}
