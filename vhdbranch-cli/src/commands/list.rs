use std::collections::{HashMap, HashSet};
use std::io::Write;

use clap::Args;
use tabled::Tabled;
use vhdbranch::Node;

use crate::cli::GlobalFlags;
use crate::formatter::{self, or_dash};

/// List nodes in tree order
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only display node IDs
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "BOOT ENTRY")]
    boot_entry: String,
    #[tabled(rename = "CREATED")]
    created: String,
    #[tabled(rename = "PATH")]
    path: String,
}

impl NodeRow {
    fn new(depth: usize, node: &Node) -> Self {
        let name = match depth {
            0 => node.name.clone(),
            _ => format!("{}└─ {}", "   ".repeat(depth - 1), node.name),
        };
        Self {
            name,
            id: node.id.clone(),
            status: node.status.to_string(),
            boot_entry: or_dash(node.bcd_guid.as_deref()),
            created: formatter::format_time(&node.created_at),
            path: node.path.clone(),
        }
    }
}

pub fn execute(args: ListArgs, global: &GlobalFlags) -> anyhow::Result<()> {
    let workspace = global.open_workspace()?;
    let nodes = workspace.list_nodes()?;

    if args.quiet {
        for (_, node) in tree_order(&nodes) {
            println!("{}", node.id);
        }
        return Ok(());
    }
    print_nodes(&nodes, global)
}

/// Print nodes as an indented tree, or as a flat array for JSON/YAML.
pub(crate) fn print_nodes(nodes: &[Node], global: &GlobalFlags) -> anyhow::Result<()> {
    let ordered = tree_order(nodes);
    let flat: Vec<&Node> = ordered.iter().map(|(_, node)| *node).collect();

    formatter::print_output(
        &mut std::io::stdout(),
        &flat,
        global.output_format()?,
        |w, _| {
            if ordered.is_empty() {
                writeln!(w, "No nodes. Create one with `vhdbranch create`.")?;
                return Ok(());
            }
            let rows = ordered.iter().map(|(depth, node)| NodeRow::new(*depth, node));
            writeln!(w, "{}", formatter::create_table(rows))?;
            Ok(())
        },
    )
}

/// Pre-order walk with depths. Nodes whose parent is absent from `nodes`
/// are listed as roots; siblings are ordered oldest first.
pub(crate) fn tree_order(nodes: &[Node]) -> Vec<(usize, &Node)> {
    let ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let mut children: HashMap<Option<&str>, Vec<&Node>> = HashMap::new();
    for node in nodes {
        let parent = node.parent_id.as_deref().filter(|p| ids.contains(p));
        children.entry(parent).or_default().push(node);
    }
    for siblings in children.values_mut() {
        siblings.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
    }

    let mut ordered = Vec::with_capacity(nodes.len());
    let mut stack: Vec<(usize, &Node)> = children
        .get(&None::<&str>)
        .map(|roots| roots.iter().rev().map(|n| (0, *n)).collect())
        .unwrap_or_default();
    let mut seen = HashSet::new();

    while let Some((depth, node)) = stack.pop() {
        if !seen.insert(node.id.as_str()) {
            continue;
        }
        ordered.push((depth, node));
        if let Some(kids) = children.get(&Some(node.id.as_str())) {
            stack.extend(kids.iter().rev().map(|n| (depth + 1, *n)));
        }
    }
    ordered
}
