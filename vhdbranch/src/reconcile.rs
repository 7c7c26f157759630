//! Reconciler: recompute node statuses from physical state.
//!
//! Reads files, disk reports and the boot store, and writes back only the
//! derived `status` column. Paths, parents and rows are never touched.

use std::collections::HashMap;

use crate::db::NodeStore;
use crate::runtime::types::{Node, NodeId, NodeStatus};
use crate::util::normalize_disk_path;
use crate::volumes::DiskOrchestrator;
use crate::volumes::parse::bcdedit::BootEntry;
use vhdbranch_shared::errors::VhdbranchResult;

pub struct Reconciler<'a> {
    store: &'a NodeStore,
    disks: &'a DiskOrchestrator,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a NodeStore, disks: &'a DiskOrchestrator) -> Self {
        Self { store, disks }
    }

    /// Recompute every node's status and persist the result.
    ///
    /// The boot store is enumerated once per scan. If that fails, nodes bound
    /// to an entry are marked `Error` instead of `MissingBcd`.
    pub fn scan(&self) -> VhdbranchResult<Vec<Node>> {
        let nodes = self.store.list()?;
        let by_id: HashMap<&str, &Node> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        let entries = match self.disks.boot_entries() {
            Ok((entries, _)) => Some(entries),
            Err(e) => {
                tracing::warn!("Boot entry enumeration failed during scan: {}", e);
                None
            }
        };
        let boot_index: Option<HashMap<String, &BootEntry>> = entries.as_ref().map(|entries| {
            entries
                .iter()
                .map(|e| (e.identifier.to_ascii_lowercase(), e))
                .collect()
        });

        let statuses: Vec<(NodeId, NodeStatus)> = nodes
            .iter()
            .map(|node| (node.id.clone(), self.status_of(node, &by_id, boot_index.as_ref())))
            .collect();

        for ((id, status), node) in statuses.iter().zip(&nodes) {
            if *status != node.status {
                tracing::info!(node_id = %id, from = %node.status, to = %status, "Status changed");
            }
        }

        self.store.apply_statuses(&statuses)
    }

    /// Precedence: missing file, missing parent, missing boot entry, normal.
    fn status_of(
        &self,
        node: &Node,
        by_id: &HashMap<&str, &Node>,
        boot_index: Option<&HashMap<String, &BootEntry>>,
    ) -> NodeStatus {
        if !node.disk_path().is_file() {
            return NodeStatus::MissingFile;
        }

        if let Some(parent_id) = &node.parent_id {
            let Some(parent) = by_id.get(parent_id.as_str()) else {
                return NodeStatus::MissingParent;
            };
            match self.disks.vdisk_detail(node.disk_path()) {
                Ok(detail) => {
                    let physical = detail.parent.as_deref().map(normalize_disk_path);
                    if physical.as_deref() != Some(normalize_disk_path(&parent.path).as_str()) {
                        tracing::warn!(
                            node_id = %node.id,
                            "Parent chain mismatch: disk reports {:?}, store expects {}",
                            detail.parent,
                            parent.path
                        );
                        return NodeStatus::MissingParent;
                    }
                }
                Err(e) => {
                    tracing::warn!(node_id = %node.id, "Parent chain check failed: {}", e);
                    return NodeStatus::Error;
                }
            }
        }

        // The entry must still exist and still boot this node's disk.
        if let Some(guid) = &node.bcd_guid {
            let Some(index) = boot_index else {
                return NodeStatus::Error;
            };
            match index.get(&guid.to_ascii_lowercase()) {
                Some(entry) if entry.references_disk(&node.path) => {}
                Some(_) => {
                    tracing::warn!(
                        node_id = %node.id,
                        "Boot entry {} points at another disk",
                        guid
                    );
                    return NodeStatus::MissingBcd;
                }
                None => return NodeStatus::MissingBcd,
            }
        }

        if node.mount_path.is_some() {
            NodeStatus::Mounted
        } else {
            NodeStatus::Normal
        }
    }
}
