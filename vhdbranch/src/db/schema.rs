//! Database schema definitions.
//!
//! Nodes use queryable columns for lookups and ordering plus a JSON blob
//! holding the full `Node` struct.

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Schema version tracking table.
pub const SCHEMA_VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Settings table schema.
///
/// Single row. `seq_counter` is the next sequence number to issue and only
/// ever grows.
pub const SETTINGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS settings (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    root_path TEXT NOT NULL,
    locale TEXT NOT NULL,
    seq_counter INTEGER NOT NULL DEFAULT 1 CHECK (seq_counter >= 1),
    last_boot_guid TEXT,
    updated_at TEXT NOT NULL
);
"#;

/// Nodes table schema.
///
/// `parent_id` references an already persisted node; `path` is unique.
pub const NODES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    id TEXT PRIMARY KEY NOT NULL,
    parent_id TEXT,
    path TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    json TEXT NOT NULL,
    FOREIGN KEY (parent_id) REFERENCES nodes(id)
);

CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_id);
"#;

/// Operation history schema.
///
/// Append-only. `seq` gives the workspace-wide total order. No foreign key on
/// `node_id`: history outlives deleted nodes.
pub const OPS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS ops (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    node_id TEXT,
    ts TEXT NOT NULL,
    action TEXT NOT NULL,
    result TEXT NOT NULL,
    detail TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_ops_node ON ops(node_id);
"#;

/// Get all schema creation statements.
pub fn all_schemas() -> Vec<&'static str> {
    vec![SCHEMA_VERSION_TABLE, SETTINGS_TABLE, NODES_TABLE, OPS_TABLE]
}
