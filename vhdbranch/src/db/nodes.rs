//! Node Store: the persisted tree, the operation history and the settings row.
//!
//! Every mutation runs in one SQLite transaction and inserts exactly one
//! `ops` row. After commit the row is mirrored into the textual ops log.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{OptionalExtension, Transaction, params};
use ulid::Ulid;
use uuid::Uuid;

use super::{Database, OpsLog, db_err};
use crate::runtime::constants::{actions, defaults};
use crate::runtime::layout::WorkspaceLayout;
use crate::runtime::types::{
    Node, NodeId, NodePatch, NodeStatus, OpResult, OperationRecord, Settings,
};
use crate::util::{slugify, truncate};
use vhdbranch_shared::errors::{VhdbranchError, VhdbranchResult};

/// User input for a node about to be created.
#[derive(Clone, Debug)]
pub struct NodeDraft {
    pub parent_id: Option<NodeId>,
    pub name: String,
    pub desc: Option<String>,
}

/// A consumed sequence number and the disk path derived from it.
///
/// Not visible to readers until passed to [`NodeStore::commit_node`].
#[derive(Debug)]
pub struct NodeReservation {
    id: NodeId,
    seq: u64,
    path: PathBuf,
    draft: NodeDraft,
}

impl NodeReservation {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn draft(&self) -> &NodeDraft {
        &self.draft
    }

    pub fn is_base(&self) -> bool {
        self.draft.parent_id.is_none()
    }

    fn create_action(&self) -> &'static str {
        if self.is_base() {
            actions::CREATE_BASE
        } else {
            actions::CREATE_DIFF
        }
    }
}

/// Facts only known after the physical steps of a creation succeeded.
#[derive(Clone, Debug, Default)]
pub struct FinalizedNode {
    pub bcd_guid: Option<String>,
    pub boot_files_ready: bool,
    pub detail: String,
}

/// Transactional access to nodes, operations and settings.
#[derive(Clone)]
pub struct NodeStore {
    db: Database,
    layout: WorkspaceLayout,
    ops_log: OpsLog,
    detail_limit: usize,
}

impl NodeStore {
    pub fn new(db: Database, layout: WorkspaceLayout, ops_log: OpsLog) -> Self {
        Self {
            db,
            layout,
            ops_log,
            detail_limit: defaults::OUTPUT_LIMIT,
        }
    }

    /// Cap stored operation detail at `limit` bytes.
    pub fn with_detail_limit(mut self, limit: usize) -> Self {
        self.detail_limit = limit;
        self
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Create the settings row, or update root and locale in place.
    ///
    /// The sequence counter and last boot entry survive re-initialization.
    pub fn initialize_settings(&self, root: &str, locale: &str) -> VhdbranchResult<Settings> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.db.conn();
        let tx = db_err!(conn.transaction())?;

        db_err!(tx.execute(
            "INSERT INTO settings (id, root_path, locale, seq_counter, last_boot_guid, updated_at)
             VALUES (1, ?1, ?2, 1, NULL, ?3)
             ON CONFLICT(id) DO UPDATE SET
                 root_path = excluded.root_path,
                 locale = excluded.locale,
                 updated_at = excluded.updated_at",
            params![root, locale, now],
        ))?;

        let record = self.insert_op(
            &tx,
            None,
            actions::INIT_WORKSPACE,
            OpResult::Success,
            &format!("root={root} locale={locale}"),
        )?;
        let settings = read_settings(&tx)?.ok_or_else(|| {
            VhdbranchError::Internal("settings row missing after initialization".into())
        })?;
        db_err!(tx.commit())?;
        drop(conn);

        self.ops_log.append(&record);
        Ok(settings)
    }

    pub fn settings(&self) -> VhdbranchResult<Settings> {
        let conn = self.db.conn();
        read_settings(&conn)?.ok_or_else(|| {
            VhdbranchError::NotInitialized(format!(
                "workspace at {} has no settings",
                self.layout.root().display()
            ))
        })
    }

    /// Record `guid` as the armed next-boot entry.
    pub fn record_next_boot(&self, node_id: &str, guid: &str) -> VhdbranchResult<OperationRecord> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.db.conn();
        let tx = db_err!(conn.transaction())?;

        let updated = db_err!(tx.execute(
            "UPDATE settings SET last_boot_guid = ?1, updated_at = ?2 WHERE id = 1",
            params![guid, now],
        ))?;
        if updated == 0 {
            return Err(VhdbranchError::NotInitialized(
                "workspace has no settings".into(),
            ));
        }

        let record = self.insert_op(
            &tx,
            Some(node_id),
            actions::ARM_NEXT_BOOT,
            OpResult::Success,
            &format!("bootsequence {guid}"),
        )?;
        db_err!(tx.commit())?;
        drop(conn);

        self.ops_log.append(&record);
        Ok(record)
    }

    // ========================================================================
    // Node lifecycle
    // ========================================================================

    /// Consume the next sequence number and compute the disk path.
    ///
    /// The counter bump commits immediately, so the number stays consumed
    /// whatever happens to the creation afterwards.
    pub fn begin_node(&self, draft: NodeDraft) -> VhdbranchResult<NodeReservation> {
        let id = Ulid::new().to_string();
        let mut conn = self.db.conn();
        let tx = db_err!(conn.transaction())?;

        let seq: i64 = db_err!(
            tx.query_row("SELECT seq_counter FROM settings WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()
        )?
        .ok_or_else(|| VhdbranchError::NotInitialized("workspace has no settings".into()))?;

        db_err!(tx.execute(
            "UPDATE settings SET seq_counter = seq_counter + 1, updated_at = ?1 WHERE id = 1",
            params![Utc::now().to_rfc3339()],
        ))?;

        let seq = seq as u64;
        let path = self
            .layout
            .disk_path(draft.parent_id.is_none(), seq, &slugify(&draft.name));

        let record = self.insert_op(
            &tx,
            Some(&id),
            actions::RESERVE_SEQUENCE,
            OpResult::Success,
            &format!("seq={seq} path={}", path.display()),
        )?;
        db_err!(tx.commit())?;
        drop(conn);

        self.ops_log.append(&record);
        tracing::debug!(node_id = %id, seq, path = %path.display(), "Reserved sequence");

        Ok(NodeReservation {
            id,
            seq,
            path,
            draft,
        })
    }

    /// Make a reserved node visible, together with its creation record.
    pub fn commit_node(
        &self,
        reservation: NodeReservation,
        finalized: FinalizedNode,
    ) -> VhdbranchResult<Node> {
        let action = reservation.create_action();
        let NodeReservation {
            id, path, draft, ..
        } = reservation;

        let node = Node {
            id,
            parent_id: draft.parent_id,
            name: draft.name,
            desc: draft.desc,
            path: path.to_string_lossy().into_owned(),
            bcd_guid: finalized.bcd_guid,
            created_at: Utc::now(),
            status: NodeStatus::Normal,
            boot_files_ready: finalized.boot_files_ready,
            mount_path: None,
        };

        let mut conn = self.db.conn();
        let tx = db_err!(conn.transaction())?;

        if let Some(parent_id) = &node.parent_id
            && read_node(&tx, parent_id)?.is_none()
        {
            return Err(VhdbranchError::NotFound(format!(
                "parent node {parent_id}"
            )));
        }

        let path_taken: bool = db_err!(tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM nodes WHERE path = ?1)",
            params![node.path],
            |row| row.get(0),
        ))?;
        if path_taken {
            return Err(VhdbranchError::AlreadyExists(format!(
                "a node already owns {}",
                node.path
            )));
        }

        let json = serde_json::to_string(&node)?;
        db_err!(tx.execute(
            "INSERT INTO nodes (id, parent_id, path, status, created_at, json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                node.id,
                node.parent_id,
                node.path,
                node.status.as_str(),
                node.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
                json,
            ],
        ))?;

        let detail = if finalized.detail.is_empty() {
            format!("{} -> {}", node.name, node.path)
        } else {
            finalized.detail
        };
        let record = self.insert_op(&tx, Some(&node.id), action, OpResult::Success, &detail)?;
        db_err!(tx.commit())?;
        drop(conn);

        self.ops_log.append(&record);
        tracing::info!(node_id = %node.id, path = %node.path, "Committed node");
        Ok(node)
    }

    /// Drop a reservation after a failed creation.
    ///
    /// Writes the failure record; the sequence number stays consumed.
    pub fn abort_node(
        &self,
        reservation: NodeReservation,
        reason: &str,
    ) -> VhdbranchResult<OperationRecord> {
        tracing::warn!(
            node_id = %reservation.id,
            seq = reservation.seq,
            "Aborting node creation: {}",
            truncate(reason, self.detail_limit)
        );
        self.record(
            Some(&reservation.id),
            reservation.create_action(),
            OpResult::Failure,
            reason,
        )
    }

    /// Remove one node row. The node must not have children.
    pub fn delete_node(&self, id: &str) -> VhdbranchResult<Node> {
        let mut conn = self.db.conn();
        let tx = db_err!(conn.transaction())?;

        let node = read_node(&tx, id)?
            .ok_or_else(|| VhdbranchError::NotFound(format!("node {id}")))?;

        let children: i64 = db_err!(tx.query_row(
            "SELECT COUNT(*) FROM nodes WHERE parent_id = ?1",
            params![id],
            |row| row.get(0),
        ))?;
        if children > 0 {
            return Err(VhdbranchError::InvalidState(format!(
                "node {id} still has {children} child node(s)"
            )));
        }

        db_err!(tx.execute("DELETE FROM nodes WHERE id = ?1", params![id]))?;
        let record = self.insert_op(
            &tx,
            Some(id),
            actions::DELETE_NODE,
            OpResult::Success,
            &format!("{} -> {}", node.name, node.path),
        )?;
        db_err!(tx.commit())?;
        drop(conn);

        self.ops_log.append(&record);
        Ok(node)
    }

    /// Apply a field-level patch, recorded under `action`.
    pub fn update_node(
        &self,
        id: &str,
        patch: NodePatch,
        action: &str,
        detail: &str,
    ) -> VhdbranchResult<Node> {
        let mut conn = self.db.conn();
        let tx = db_err!(conn.transaction())?;

        let mut node = read_node(&tx, id)?
            .ok_or_else(|| VhdbranchError::NotFound(format!("node {id}")))?;
        patch.apply(&mut node);
        write_node(&tx, &node)?;

        let record = self.insert_op(&tx, Some(id), action, OpResult::Success, detail)?;
        db_err!(tx.commit())?;
        drop(conn);

        self.ops_log.append(&record);
        Ok(node)
    }

    /// Write recomputed statuses in one transaction with one `reconcile` row.
    ///
    /// Ids that vanished since the scan started are skipped.
    pub fn apply_statuses(&self, statuses: &[(NodeId, NodeStatus)]) -> VhdbranchResult<Vec<Node>> {
        let mut conn = self.db.conn();
        let tx = db_err!(conn.transaction())?;

        let mut changed = 0usize;
        for (id, status) in statuses {
            let Some(mut node) = read_node(&tx, id)? else {
                continue;
            };
            if node.status != *status {
                node.status = *status;
                write_node(&tx, &node)?;
                changed += 1;
            }
        }

        let record = self.insert_op(
            &tx,
            None,
            actions::RECONCILE,
            OpResult::Success,
            &format!("scanned={} changed={changed}", statuses.len()),
        )?;
        let nodes = list_nodes(&tx)?;
        db_err!(tx.commit())?;
        drop(conn);

        self.ops_log.append(&record);
        Ok(nodes)
    }

    /// Append an operation row without touching the tree.
    pub fn record(
        &self,
        node_id: Option<&str>,
        action: &str,
        result: OpResult,
        detail: &str,
    ) -> VhdbranchResult<OperationRecord> {
        let mut conn = self.db.conn();
        let tx = db_err!(conn.transaction())?;
        let record = self.insert_op(&tx, node_id, action, result, detail)?;
        db_err!(tx.commit())?;
        drop(conn);

        self.ops_log.append(&record);
        Ok(record)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn get(&self, id: &str) -> VhdbranchResult<Option<Node>> {
        let conn = self.db.conn();
        read_node(&conn, id)
    }

    /// Like [`get`](Self::get), but a missing node is `NotFound`.
    pub fn require(&self, id: &str) -> VhdbranchResult<Node> {
        self.get(id)?
            .ok_or_else(|| VhdbranchError::NotFound(format!("node {id}")))
    }

    /// All nodes, oldest first.
    pub fn list(&self) -> VhdbranchResult<Vec<Node>> {
        let conn = self.db.conn();
        list_nodes(&conn)
    }

    /// Direct children of `id`, oldest first.
    pub fn children(&self, id: &str) -> VhdbranchResult<Vec<Node>> {
        let conn = self.db.conn();
        let mut stmt = db_err!(conn.prepare(
            "SELECT json FROM nodes WHERE parent_id = ?1 ORDER BY created_at, id"
        ))?;
        let rows = db_err!(stmt.query_map(params![id], |row| row.get::<_, String>(0)))?;

        let mut nodes = Vec::new();
        for json in rows {
            nodes.push(serde_json::from_str(&db_err!(json)?)?);
        }
        Ok(nodes)
    }

    /// Operation history in execution order, limited to the newest `limit`.
    pub fn operations(&self, limit: Option<usize>) -> VhdbranchResult<Vec<OperationRecord>> {
        let conn = self.db.conn();
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = db_err!(conn.prepare(
            "SELECT seq, id, node_id, ts, action, result, detail FROM (
                 SELECT * FROM ops ORDER BY seq DESC LIMIT ?1
             ) ORDER BY seq ASC"
        ))?;
        let rows = db_err!(stmt.query_map(params![limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        }))?;

        let mut records = Vec::new();
        for row in rows {
            let (seq, id, node_id, ts, action, result, detail) = db_err!(row)?;
            records.push(OperationRecord {
                seq,
                id,
                node_id,
                ts: parse_ts(&ts)?,
                action,
                result: OpResult::parse(&result),
                detail,
            });
        }
        Ok(records)
    }

    fn insert_op(
        &self,
        tx: &Transaction<'_>,
        node_id: Option<&str>,
        action: &str,
        result: OpResult,
        detail: &str,
    ) -> VhdbranchResult<OperationRecord> {
        let id = Uuid::new_v4().to_string();
        let ts = Utc::now();
        let detail = truncate(detail, self.detail_limit);

        db_err!(tx.execute(
            "INSERT INTO ops (id, node_id, ts, action, result, detail)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, node_id, ts.to_rfc3339(), action, result.as_str(), detail],
        ))?;

        Ok(OperationRecord {
            seq: tx.last_insert_rowid(),
            id,
            node_id: node_id.map(str::to_string),
            ts,
            action: action.to_string(),
            result,
            detail,
        })
    }
}

fn read_settings(conn: &rusqlite::Connection) -> VhdbranchResult<Option<Settings>> {
    db_err!(
        conn.query_row(
            "SELECT root_path, locale, seq_counter, last_boot_guid FROM settings WHERE id = 1",
            [],
            |row| {
                Ok(Settings {
                    root_path: row.get(0)?,
                    locale: row.get(1)?,
                    seq_counter: row.get::<_, i64>(2)? as u64,
                    last_boot_guid: row.get(3)?,
                })
            },
        )
        .optional()
    )
}

fn read_node(conn: &rusqlite::Connection, id: &str) -> VhdbranchResult<Option<Node>> {
    let json: Option<String> = db_err!(
        conn.query_row(
            "SELECT json FROM nodes WHERE id = ?1",
            params![id],
            |row| row.get(0)
        )
        .optional()
    )?;
    match json {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

fn write_node(conn: &rusqlite::Connection, node: &Node) -> VhdbranchResult<()> {
    let json = serde_json::to_string(node)?;
    db_err!(conn.execute(
        "UPDATE nodes SET status = ?2, json = ?3 WHERE id = ?1",
        params![node.id, node.status.as_str(), json],
    ))?;
    Ok(())
}

fn list_nodes(conn: &rusqlite::Connection) -> VhdbranchResult<Vec<Node>> {
    let mut stmt = db_err!(conn.prepare("SELECT json FROM nodes ORDER BY created_at, id"))?;
    let rows = db_err!(stmt.query_map([], |row| row.get::<_, String>(0)))?;

    let mut nodes = Vec::new();
    for json in rows {
        nodes.push(serde_json::from_str(&db_err!(json)?)?);
    }
    Ok(nodes)
}

fn parse_ts(ts: &str) -> VhdbranchResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| VhdbranchError::Database(format!("invalid timestamp {ts:?}: {e}")))
}
