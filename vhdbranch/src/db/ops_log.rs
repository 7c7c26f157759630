//! Append-only textual mirror of the `ops` table (`meta/ops.log`).

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::runtime::types::OperationRecord;
use vhdbranch_shared::errors::VhdbranchResult;

/// One line per operation:
/// `<rfc3339> <action> <result> node=<id|-> <detail>`.
#[derive(Clone)]
pub struct OpsLog {
    file: Arc<Mutex<File>>,
}

impl OpsLog {
    pub fn open(path: &Path) -> VhdbranchResult<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Append a record. The database row is authoritative, so a failed
    /// write is only logged.
    pub fn append(&self, record: &OperationRecord) {
        let line = format_line(record);
        let mut file = self.file.lock();
        if let Err(e) = writeln!(file, "{line}").and_then(|_| file.flush()) {
            tracing::warn!("Failed to append to ops log: {}", e);
        }
    }
}

fn format_line(record: &OperationRecord) -> String {
    // Keep one record per line.
    let detail = record.detail.replace(['\r', '\n'], " ");
    format!(
        "{} {} {} node={} {}",
        record.ts.to_rfc3339(),
        record.action,
        record.result.as_str(),
        record.node_id.as_deref().unwrap_or("-"),
        detail.trim()
    )
}
