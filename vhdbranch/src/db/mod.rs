//! Database layer for vhdbranch.
//!
//! SQLite persistence for the node tree, the operation history and the
//! workspace settings row. `NodeStore` wraps the raw handle and owns every
//! transactional invariant.

mod nodes;
mod ops_log;
mod schema;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OptionalExtension};

use vhdbranch_shared::errors::{VhdbranchError, VhdbranchResult};

pub use nodes::{FinalizedNode, NodeDraft, NodeReservation, NodeStore};
pub use ops_log::OpsLog;

/// Helper macro to convert rusqlite errors to VhdbranchError.
macro_rules! db_err {
    ($result:expr) => {
        $result.map_err(|e| VhdbranchError::Database(e.to_string()))
    };
}

pub(crate) use db_err;

/// SQLite database handle.
///
/// Thread-safe via `parking_lot::Mutex`. `NodeStore` wraps this to provide
/// the domain API.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database.
    pub fn open(db_path: &Path) -> VhdbranchResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = db_err!(Connection::open(db_path))?;

        // - WAL mode: readers never block the single writer
        // - FULL sync: fsync after each transaction
        // - Foreign keys: parent_id must reference a persisted node
        // - Busy timeout: image applies hold the workspace for minutes
        db_err!(conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;
            PRAGMA foreign_keys=ON;
            PRAGMA busy_timeout=100000;
            "
        ))?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Acquire the database connection.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Initialize database schema.
    ///
    /// New DB: apply full schema. Same version: nothing to do.
    /// Any other version is an error.
    fn init_schema(conn: &Connection) -> VhdbranchResult<()> {
        db_err!(conn.execute_batch(schema::SCHEMA_VERSION_TABLE))?;

        let current_version: Option<i32> = db_err!(
            conn.query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
        )?;

        match current_version {
            None => Self::apply_full_schema(conn)?,
            Some(v) if v == schema::SCHEMA_VERSION => {}
            Some(v) => {
                return Err(VhdbranchError::Database(format!(
                    "Schema version mismatch: database has v{}, process expects v{}",
                    v,
                    schema::SCHEMA_VERSION
                )));
            }
        }

        Ok(())
    }

    fn apply_full_schema(conn: &Connection) -> VhdbranchResult<()> {
        for sql in schema::all_schemas() {
            db_err!(conn.execute_batch(sql))?;
        }

        let now = Utc::now().to_rfc3339();
        db_err!(conn.execute(
            "INSERT INTO schema_version (id, version, updated_at) VALUES (1, ?1, ?2)",
            rusqlite::params![schema::SCHEMA_VERSION, now],
        ))?;

        tracing::info!(
            "Initialized database schema version {}",
            schema::SCHEMA_VERSION
        );
        Ok(())
    }
}
