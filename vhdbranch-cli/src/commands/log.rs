use std::io::Write;

use clap::Args;
use tabled::Tabled;
use vhdbranch::OperationRecord;

use crate::cli::GlobalFlags;
use crate::formatter::{self, or_dash};

/// Show the operation history
#[derive(Args, Debug)]
pub struct LogArgs {
    /// Show only the newest N operations
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Tabled)]
struct OperationRow {
    #[tabled(rename = "SEQ")]
    seq: i64,
    #[tabled(rename = "TIME")]
    time: String,
    #[tabled(rename = "ACTION")]
    action: String,
    #[tabled(rename = "RESULT")]
    result: String,
    #[tabled(rename = "NODE")]
    node: String,
    #[tabled(rename = "DETAIL")]
    detail: String,
}

impl From<&OperationRecord> for OperationRow {
    fn from(op: &OperationRecord) -> Self {
        Self {
            seq: op.seq,
            time: formatter::format_time(&op.ts),
            action: op.action.clone(),
            result: op.result.as_str().to_string(),
            node: or_dash(op.node_id.as_deref()),
            detail: op.detail.clone(),
        }
    }
}

pub fn execute(args: LogArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let workspace = global.open_workspace()?;
    let operations = workspace.operations(args.limit)?;

    formatter::print_output(
        &mut std::io::stdout(),
        &operations,
        global.output_format()?,
        |w, ops| {
            writeln!(
                w,
                "{}",
                formatter::create_table(ops.iter().map(OperationRow::from))
            )?;
            Ok(())
        },
    )
}
