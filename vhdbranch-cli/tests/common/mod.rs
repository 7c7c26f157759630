#![allow(dead_code)]

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::TempDir;

/// Isolated home (config.json) and workspace root for one test.
pub struct CliContext {
    pub home: PathBuf,
    pub root: PathBuf,
    _temp_dir: TempDir,
}

impl CliContext {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let home = temp_dir.path().join("home");
        let root = temp_dir.path().join("workspace");
        Self {
            home,
            root,
            _temp_dir: temp_dir,
        }
    }

    /// Context with `vhdbranch init` already run against `root`.
    pub fn initialized() -> Self {
        let ctx = Self::new();
        ctx.cmd()
            .args(["init", ctx.root.to_str().unwrap()])
            .assert()
            .success();
        ctx
    }

    /// A command bound to this context's home, ignoring the caller's environment.
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("vhdbranch"));
        cmd.env("VHDBRANCH_HOME", &self.home)
            .env_remove("VHDBRANCH_ROOT")
            .env_remove("RUST_LOG");
        cmd
    }

    pub fn config_path(&self) -> PathBuf {
        self.home.join("config.json")
    }

    pub fn stdout_of(&self, args: &[&str]) -> String {
        let assert = self.cmd().args(args).assert().success();
        String::from_utf8(assert.get_output().stdout.clone()).unwrap()
    }
}

pub fn exists(path: &Path) -> bool {
    path.try_exists().unwrap_or(false)
}
