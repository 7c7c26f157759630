pub mod boot;
pub mod branch;
pub mod completion;
pub mod create;
pub mod images;
pub mod init;
pub mod list;
pub mod log;
pub mod mount;
pub mod repair;
pub mod rm;
pub mod scan;

use anyhow::bail;
use vhdbranch::{Node, Workspace};

/// Find a node by exact id, id prefix, or unique name.
pub(crate) fn resolve_node(workspace: &Workspace, key: &str) -> anyhow::Result<Node> {
    let nodes = workspace.list_nodes()?;

    if let Some(node) = nodes.iter().find(|n| n.id == key) {
        return Ok(node.clone());
    }

    let matches: Vec<&Node> = nodes
        .iter()
        .filter(|n| n.name == key || n.id.starts_with(&key.to_ascii_uppercase()))
        .collect();
    match matches.as_slice() {
        [node] => Ok((*node).clone()),
        [] => Err(vhdbranch::VhdbranchError::NotFound(format!("node {}", key)).into()),
        many => bail!(
            "'{}' matches {} nodes ({}); use the node id",
            key,
            many.len(),
            many.iter()
                .map(|n| n.id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}
