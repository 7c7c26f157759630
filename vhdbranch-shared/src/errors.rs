//! Error types used across the vhdbranch engine.

use thiserror::Error;

/// Result type for vhdbranch operations.
pub type VhdbranchResult<T> = Result<T, VhdbranchError>;

#[derive(Debug, Error)]
pub enum VhdbranchError {
    /// External tool exited nonzero or printed explicit failure text.
    #[error("{tool} failed (exit code {exit_code:?}): {summary}")]
    CommandExecution {
        tool: String,
        exit_code: Option<i32>,
        summary: String,
        output: String,
    },

    /// Expected fact absent, malformed, or ambiguous in tool output.
    #[error("cannot parse {target} output: {reason}")]
    Parse {
        target: String,
        reason: String,
        output: String,
    },

    /// Persisted tree disagrees with the physical disk or boot state.
    #[error("consistency error: {0}")]
    Consistency(String),

    #[error("administrator privileges required: {0}")]
    Privilege(String),

    /// Mount point, drive letter or workspace lock already in use.
    #[error("resource busy: {0}")]
    ResourceBusy(String),

    /// Cascading delete halted mid-tree.
    #[error(
        "delete halted at node {failed} after removing {} node(s): {source}",
        .removed.len()
    )]
    PartialFailure {
        removed: Vec<String>,
        failed: String,
        source: Box<VhdbranchError>,
    },

    /// Node, image or boot entry not found.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Node is in wrong state for the requested operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("workspace root is not initialized: {0}")]
    NotInitialized(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl VhdbranchError {
    /// Stable snake_case name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            VhdbranchError::CommandExecution { .. } => "command_execution",
            VhdbranchError::Parse { .. } => "parse",
            VhdbranchError::Consistency(_) => "consistency",
            VhdbranchError::Privilege(_) => "privilege",
            VhdbranchError::ResourceBusy(_) => "resource_busy",
            VhdbranchError::PartialFailure { .. } => "partial_failure",
            VhdbranchError::NotFound(_) => "not_found",
            VhdbranchError::AlreadyExists(_) => "already_exists",
            VhdbranchError::InvalidState(_) => "invalid_state",
            VhdbranchError::InvalidArgument(_) => "invalid_argument",
            VhdbranchError::Database(_) => "database",
            VhdbranchError::Storage(_) => "storage",
            VhdbranchError::Config(_) => "config",
            VhdbranchError::NotInitialized(_) => "not_initialized",
            VhdbranchError::Internal(_) => "internal",
        }
    }

    /// Raw tool output captured with the error, if any.
    ///
    /// For a partial failure this is the output of the step that halted it.
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            VhdbranchError::CommandExecution { output, .. }
            | VhdbranchError::Parse { output, .. } => Some(output.as_str()),
            VhdbranchError::PartialFailure { source, .. } => source.raw_output(),
            _ => None,
        }
    }

    pub fn parse(
        target: impl Into<String>,
        reason: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        VhdbranchError::Parse {
            target: target.into(),
            reason: reason.into(),
            output: output.into(),
        }
    }
}

// Implement From for common error types to enable `?` operator
impl From<std::io::Error> for VhdbranchError {
    fn from(err: std::io::Error) -> Self {
        VhdbranchError::Storage(format!("I/O error: {}", err))
    }
}

impl From<serde_json::Error> for VhdbranchError {
    fn from(err: serde_json::Error) -> Self {
        VhdbranchError::Internal(format!("JSON error: {}", err))
    }
}

impl From<String> for VhdbranchError {
    fn from(err: String) -> Self {
        VhdbranchError::Internal(err)
    }
}

impl From<&str> for VhdbranchError {
    fn from(err: &str) -> Self {
        VhdbranchError::Internal(err.to_string())
    }
}
