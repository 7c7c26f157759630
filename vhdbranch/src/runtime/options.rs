//! Configuration for a vhdbranch workspace.

use crate::runtime::constants::{defaults, envs as const_envs};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use vhdbranch_shared::errors::{VhdbranchError, VhdbranchResult};

// ============================================================================
// Tool Paths
// ============================================================================

/// Programs the disk orchestrator invokes.
///
/// Bare names are resolved through `PATH`. Override them to point at a
/// specific build of the tools (e.g. from a WinPE image).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolPaths {
    #[serde(default = "default_diskpart")]
    pub diskpart: PathBuf,

    #[serde(default = "default_dism")]
    pub dism: PathBuf,

    #[serde(default = "default_bcdboot")]
    pub bcdboot: PathBuf,

    #[serde(default = "default_bcdedit")]
    pub bcdedit: PathBuf,

    /// Used for the administrator check (`net session`).
    #[serde(default = "default_net")]
    pub net: PathBuf,
}

fn default_diskpart() -> PathBuf {
    PathBuf::from("diskpart")
}

fn default_dism() -> PathBuf {
    PathBuf::from("dism")
}

fn default_bcdboot() -> PathBuf {
    PathBuf::from("bcdboot")
}

fn default_bcdedit() -> PathBuf {
    PathBuf::from("bcdedit")
}

fn default_net() -> PathBuf {
    PathBuf::from("net")
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            diskpart: default_diskpart(),
            dism: default_dism(),
            bcdboot: default_bcdboot(),
            bcdedit: default_bcdedit(),
            net: default_net(),
        }
    }
}

// ============================================================================
// Workspace Options
// ============================================================================

/// Configuration options for a workspace.
///
/// Users can create it with defaults and modify fields as needed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkspaceOptions {
    /// Workspace root holding `base/`, `diff/` and `meta/`.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// UI locale stored in the settings row. `None` keeps the stored value.
    #[serde(default)]
    pub locale: Option<String>,

    #[serde(default)]
    pub tools: ToolPaths,

    /// Inclusive range of drive letters used for the boot-file fallback.
    #[serde(default = "default_drive_letters")]
    pub drive_letters: (char, char),

    /// Bytes of tool output kept in operation rows and logs.
    #[serde(default = "default_output_limit")]
    pub output_limit: usize,

    /// Run the reconciler when the workspace is opened.
    #[serde(default = "default_true")]
    pub reconcile_on_open: bool,

    /// Refuse destructive workflows without administrator rights.
    #[serde(default = "default_true")]
    pub require_admin: bool,
}

fn default_root() -> PathBuf {
    std::env::var(const_envs::VHDBRANCH_ROOT)
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let mut path = home_dir().unwrap_or_else(|| PathBuf::from("."));
            path.push(".vhdbranch");
            path.push("workspace");
            path
        })
}

fn default_drive_letters() -> (char, char) {
    (defaults::FIRST_DRIVE_LETTER, defaults::LAST_DRIVE_LETTER)
}

fn default_output_limit() -> usize {
    defaults::OUTPUT_LIMIT
}

fn default_true() -> bool {
    true
}

impl Default for WorkspaceOptions {
    fn default() -> Self {
        Self {
            root: default_root(),
            locale: None,
            tools: ToolPaths::default(),
            drive_letters: default_drive_letters(),
            output_limit: default_output_limit(),
            reconcile_on_open: true,
            require_admin: true,
        }
    }
}

impl WorkspaceOptions {
    /// Options rooted at `root`, everything else defaulted.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Validate option values.
    pub fn sanitize(&self) -> VhdbranchResult<()> {
        if self.root.as_os_str().is_empty() {
            return Err(VhdbranchError::Config(
                "workspace root must not be empty".to_string(),
            ));
        }

        let (first, last) = self.drive_letters;
        if !first.is_ascii_alphabetic() || !last.is_ascii_alphabetic() {
            return Err(VhdbranchError::Config(format!(
                "drive letter range {first}..{last} must be alphabetic"
            )));
        }
        if first.to_ascii_uppercase() > last.to_ascii_uppercase() {
            return Err(VhdbranchError::Config(format!(
                "drive letter range {first}..{last} is reversed"
            )));
        }

        if self.output_limit == 0 {
            return Err(VhdbranchError::Config(
                "output_limit must be greater than zero".to_string(),
            ));
        }

        if let Some(locale) = &self.locale
            && locale.trim().is_empty()
        {
            return Err(VhdbranchError::Config(
                "locale must not be blank".to_string(),
            ));
        }
        Ok(())
    }

    /// Drive letters to try, in order, uppercased.
    pub fn letter_candidates(&self) -> Vec<char> {
        let (first, last) = self.drive_letters;
        (first.to_ascii_uppercase()..=last.to_ascii_uppercase()).collect()
    }
}
