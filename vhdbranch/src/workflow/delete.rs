//! Cascading delete.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use super::{WorkflowEngine, describe};
use crate::runtime::constants::actions;
use crate::runtime::types::{Node, NodeId, OpResult};
use vhdbranch_shared::errors::{VhdbranchError, VhdbranchResult};

impl WorkflowEngine<'_> {
    /// Remove `node_id` and every descendant, leaves first.
    ///
    /// Stops at the first node that cannot be removed. Nodes removed before
    /// that stay removed; the error is a `PartialFailure` naming them and the
    /// failing node.
    pub fn delete_subtree(&self, node_id: &str) -> VhdbranchResult<Vec<NodeId>> {
        let nodes = self.store.list()?;
        let order = post_order(&nodes, node_id)?;
        tracing::info!(node_id, count = order.len(), "Deleting subtree");

        let mut removed: Vec<NodeId> = Vec::with_capacity(order.len());
        for node in order {
            if let Err(e) = self.remove_node(node) {
                let detail = format!("removed={} {}", removed.len(), describe(&e));
                if let Err(record_err) = self.store.record(
                    Some(&node.id),
                    actions::DELETE_SUBTREE,
                    OpResult::Failure,
                    &detail,
                ) {
                    tracing::warn!("Failed to record halted delete: {}", record_err);
                }
                return Err(VhdbranchError::PartialFailure {
                    removed,
                    failed: node.id.clone(),
                    source: Box::new(e),
                });
            }
            removed.push(node.id.clone());
        }

        self.store.record(
            Some(node_id),
            actions::DELETE_SUBTREE,
            OpResult::Success,
            &format!("removed {} node(s)", removed.len()),
        )?;
        Ok(removed)
    }

    fn remove_node(&self, node: &Node) -> VhdbranchResult<()> {
        let path = node.disk_path();

        if let Some(dir) = &node.mount_path {
            self.release_mount(path, Path::new(dir))?;
        } else if path.is_file() && self.disks.detach_if_attached(path)? {
            tracing::info!(node_id = %node.id, "Detached before delete");
        }

        if let Some(guid) = &node.bcd_guid
            && !self.disks.delete_boot_entry(guid)?
        {
            tracing::warn!(node_id = %node.id, "Boot entry {} already absent", guid);
        }

        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(node_id = %node.id, "Disk {} already absent", node.path);
            }
            Err(e) => {
                return Err(VhdbranchError::Storage(format!(
                    "cannot delete {}: {}",
                    node.path, e
                )));
            }
        }

        self.store.delete_node(&node.id)?;
        tracing::info!(node_id = %node.id, "Removed node {}", node.name);
        Ok(())
    }
}

/// `root` and its descendants, every node after all of its descendants.
///
/// Siblings are visited oldest first.
pub(crate) fn post_order<'n>(nodes: &'n [Node], root: &str) -> VhdbranchResult<Vec<&'n Node>> {
    let root = nodes
        .iter()
        .find(|n| n.id == root)
        .ok_or_else(|| VhdbranchError::NotFound(format!("node {root}")))?;

    let mut children: HashMap<&str, Vec<&Node>> = HashMap::new();
    for node in nodes {
        if let Some(parent) = &node.parent_id {
            children.entry(parent.as_str()).or_default().push(node);
        }
    }
    for siblings in children.values_mut() {
        siblings.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    }

    let mut order = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<(&Node, bool)> = vec![(root, false)];
    while let Some((node, expanded)) = stack.pop() {
        if expanded {
            order.push(node);
            continue;
        }
        if !visited.insert(node.id.as_str()) {
            continue;
        }
        stack.push((node, true));
        if let Some(kids) = children.get(node.id.as_str()) {
            stack.extend(kids.iter().rev().map(|kid| (*kid, false)));
        }
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::types::NodeStatus;
    use chrono::{Duration, Utc};

    fn node(id: &str, parent: Option<&str>, age: i64) -> Node {
        Node {
            id: id.into(),
            parent_id: parent.map(str::to_string),
            name: id.into(),
            desc: None,
            path: format!(r"D:\ws\diff\{id}.vhdx"),
            bcd_guid: None,
            created_at: Utc::now() - Duration::seconds(age),
            status: NodeStatus::Normal,
            boot_files_ready: true,
            mount_path: None,
        }
    }

    fn ids(order: &[&Node]) -> Vec<String> {
        order.iter().map(|n| n.id.clone()).collect()
    }

    #[test]
    fn test_post_order_leaves_first() {
        //   base
        //   ├── a (older)
        //   │   └── a1
        //   └── b
        let nodes = vec![
            node("b", Some("base"), 10),
            node("base", None, 100),
            node("a1", Some("a"), 20),
            node("a", Some("base"), 50),
            node("other", None, 90),
        ];
        let order = post_order(&nodes, "base").unwrap();
        assert_eq!(ids(&order), vec!["a1", "a", "b", "base"]);

        let order = post_order(&nodes, "a").unwrap();
        assert_eq!(ids(&order), vec!["a1", "a"]);
    }

    #[test]
    fn test_post_order_unknown_root() {
        let nodes = vec![node("base", None, 1)];
        assert_eq!(post_order(&nodes, "nope").unwrap_err().kind(), "not_found");
    }

    #[test]
    fn test_every_node_after_its_descendants() {
        let nodes = vec![
            node("r", None, 100),
            node("c1", Some("r"), 90),
            node("c2", Some("r"), 80),
            node("g1", Some("c1"), 70),
            node("g2", Some("c1"), 60),
            node("g3", Some("c2"), 50),
        ];
        let order = post_order(&nodes, "r").unwrap();
        assert_eq!(order.len(), nodes.len());

        let position: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();
        for n in &nodes {
            if let Some(parent) = &n.parent_id {
                assert!(position[n.id.as_str()] < position[parent.as_str()]);
            }
        }
    }
}
