//! Filesystem layout of a workspace root.
//!
//! ```text
//! <root>/
//!   base/            base disk files
//!   diff/            differencing disk files
//!   meta/
//!     state.db       node store
//!     ops.log        append-only operation log
//!     workspace.lock held while a workflow runs
//!     tmp/           disk-tool scratch scripts
//!     mnt/           temporary mount-point directories
//!     locales/       UI locale resources
//!     logs/          diagnostic logs
//! ```

use std::path::{Path, PathBuf};

use vhdbranch_shared::errors::VhdbranchResult;

pub mod dirs {
    pub const BASE_DIR: &str = "base";
    pub const DIFF_DIR: &str = "diff";
    pub const META_DIR: &str = "meta";
    pub const TMP_DIR: &str = "tmp";
    pub const MOUNT_DIR: &str = "mnt";
    pub const LOCALES_DIR: &str = "locales";
    pub const LOGS_DIR: &str = "logs";
}

pub mod files {
    pub const STATE_DB: &str = "state.db";
    pub const OPS_LOG: &str = "ops.log";
    pub const LOCK: &str = "workspace.lock";
    pub const DISK_EXTENSION: &str = "vhdx";
}

#[derive(Clone, Debug)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn base_dir(&self) -> PathBuf {
        self.root.join(dirs::BASE_DIR)
    }

    pub fn diff_dir(&self) -> PathBuf {
        self.root.join(dirs::DIFF_DIR)
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.root.join(dirs::META_DIR)
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.meta_dir().join(dirs::TMP_DIR)
    }

    pub fn mount_root(&self) -> PathBuf {
        self.meta_dir().join(dirs::MOUNT_DIR)
    }

    pub fn locales_dir(&self) -> PathBuf {
        self.meta_dir().join(dirs::LOCALES_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.meta_dir().join(dirs::LOGS_DIR)
    }

    pub fn db_path(&self) -> PathBuf {
        self.meta_dir().join(files::STATE_DB)
    }

    pub fn ops_log_path(&self) -> PathBuf {
        self.meta_dir().join(files::OPS_LOG)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.meta_dir().join(files::LOCK)
    }

    /// Disk file for sequence `seq`: `<dir>/<seq:04>-<slug>.vhdx`.
    pub fn disk_path(&self, is_base: bool, seq: u64, slug: &str) -> PathBuf {
        let dir = if is_base {
            self.base_dir()
        } else {
            self.diff_dir()
        };
        dir.join(format!("{seq:04}-{slug}.{}", files::DISK_EXTENSION))
    }

    /// Whether the store of this workspace has been created.
    pub fn is_initialized(&self) -> bool {
        self.db_path().is_file()
    }

    /// Create every directory of the layout.
    pub fn prepare(&self) -> VhdbranchResult<()> {
        for dir in [
            self.root.clone(),
            self.base_dir(),
            self.diff_dir(),
            self.meta_dir(),
            self.tmp_dir(),
            self.mount_root(),
            self.locales_dir(),
            self.logs_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prepare_creates_layout() {
        let temp_dir = TempDir::new().unwrap();
        let layout = WorkspaceLayout::new(temp_dir.path().join("ws"));
        layout.prepare().unwrap();

        assert!(layout.base_dir().is_dir());
        assert!(layout.diff_dir().is_dir());
        assert!(layout.tmp_dir().is_dir());
        assert!(layout.mount_root().is_dir());
        assert!(layout.locales_dir().is_dir());
        assert!(!layout.is_initialized());
    }

    #[test]
    fn test_disk_path_uses_sequence_and_slug() {
        let layout = WorkspaceLayout::new("/ws");
        assert_eq!(
            layout.disk_path(true, 7, "win11-pro"),
            PathBuf::from("/ws/base/0007-win11-pro.vhdx")
        );
        assert_eq!(
            layout.disk_path(false, 12345, "child"),
            PathBuf::from("/ws/diff/12345-child.vhdx")
        );
    }
}
