//! Public data model: nodes, settings, operation records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Identifier of a node. ULID text, sortable by creation time.
pub type NodeId = String;

/// Derived classification of a node.
///
/// Only `Mounted` is set directly by a workflow; everything else is
/// recomputed by the reconciler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Normal,
    MissingFile,
    MissingParent,
    MissingBcd,
    Mounted,
    Error,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Normal => "normal",
            NodeStatus::MissingFile => "missing_file",
            NodeStatus::MissingParent => "missing_parent",
            NodeStatus::MissingBcd => "missing_bcd",
            NodeStatus::Mounted => "mounted",
            NodeStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(NodeStatus::Normal),
            "missing_file" => Some(NodeStatus::MissingFile),
            "missing_parent" => Some(NodeStatus::MissingParent),
            "missing_bcd" => Some(NodeStatus::MissingBcd),
            "mounted" => Some(NodeStatus::Mounted),
            "error" => Some(NodeStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A versioned disk image in the tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Absent only for base nodes.
    pub parent_id: Option<NodeId>,
    pub name: String,
    #[serde(default)]
    pub desc: Option<String>,
    /// Absolute path of the backing disk file. Immutable.
    pub path: String,
    /// Boot entry bound to this node.
    #[serde(default)]
    pub bcd_guid: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default)]
    pub boot_files_ready: bool,
    /// Mount-point directory while `status` is `Mounted`.
    #[serde(default)]
    pub mount_path: Option<String>,
}

impl Node {
    pub fn is_base(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn disk_path(&self) -> &Path {
        Path::new(&self.path)
    }
}

/// Field-level mutation applied by `NodeStore::update_node`.
///
/// `None` leaves a field untouched; `Some(None)` clears an optional field.
#[derive(Clone, Debug, Default)]
pub struct NodePatch {
    pub name: Option<String>,
    pub desc: Option<Option<String>>,
    pub bcd_guid: Option<Option<String>>,
    pub status: Option<NodeStatus>,
    pub boot_files_ready: Option<bool>,
    pub mount_path: Option<Option<String>>,
}

impl NodePatch {
    pub(crate) fn apply(self, node: &mut Node) {
        if let Some(name) = self.name {
            node.name = name;
        }
        if let Some(desc) = self.desc {
            node.desc = desc;
        }
        if let Some(bcd_guid) = self.bcd_guid {
            node.bcd_guid = bcd_guid;
        }
        if let Some(status) = self.status {
            node.status = status;
        }
        if let Some(ready) = self.boot_files_ready {
            node.boot_files_ready = ready;
        }
        if let Some(mount_path) = self.mount_path {
            node.mount_path = mount_path;
        }
    }
}

/// Single settings row of a workspace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub root_path: String,
    pub locale: String,
    /// Next sequence number to issue.
    pub seq_counter: u64,
    pub last_boot_guid: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpResult {
    Success,
    Failure,
}

impl OpResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpResult::Success => "success",
            OpResult::Failure => "failure",
        }
    }

    pub(crate) fn parse(s: &str) -> Self {
        if s == "success" {
            OpResult::Success
        } else {
            OpResult::Failure
        }
    }
}

/// Append-only audit entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Position in the workspace-wide total order.
    pub seq: i64,
    pub id: String,
    pub node_id: Option<NodeId>,
    pub ts: DateTime<Utc>,
    pub action: String,
    pub result: OpResult,
    pub detail: String,
}

/// One image inside a WIM/ESD file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub index: u32,
    pub name: String,
    pub description: Option<String>,
    pub size_bytes: Option<u64>,
}
