//! Configuration loading for vhdbranch CLI.
//!
//! Handles loading `WorkspaceOptions` from `<home>/config.json` and recording
//! the workspace root chosen by `init`.

use anyhow::Context;
use std::path::Path;
use tracing::warn;
use vhdbranch::WorkspaceOptions;

const CONFIG_FILE_JSON: &str = "config.json";

/// Load WorkspaceOptions from the configuration file in the given home directory.
///
/// Returns options with defaults if no config file is found or it cannot be parsed.
pub fn load_config(home_dir: &Path) -> WorkspaceOptions {
    try_load_json(home_dir).unwrap_or_default()
}

fn try_load_json(home_dir: &Path) -> Option<WorkspaceOptions> {
    let config_path = home_dir.join(CONFIG_FILE_JSON);
    if !config_path.exists() {
        return None;
    }

    let content = match std::fs::read_to_string(&config_path) {
        Ok(c) => c,
        Err(e) => {
            warn!(
                "Failed to read config file {}: {}",
                config_path.display(),
                e
            );
            return None;
        }
    };

    match serde_json::from_str::<WorkspaceOptions>(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!(
                "Failed to parse config file {}: {}",
                config_path.display(),
                e
            );
            None
        }
    }
}

/// Write `root` into config.json, keeping every other key already there.
pub fn save_root(home_dir: &Path, root: &Path) -> anyhow::Result<()> {
    let config_path = home_dir.join(CONFIG_FILE_JSON);

    let mut config = std::fs::read_to_string(&config_path)
        .ok()
        .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
        .filter(|value| value.is_object())
        .unwrap_or_else(|| serde_json::json!({}));
    config["root"] = serde_json::Value::String(root.to_string_lossy().into_owned());

    std::fs::create_dir_all(home_dir)
        .with_context(|| format!("cannot create {}", home_dir.display()))?;
    std::fs::write(&config_path, serde_json::to_string_pretty(&config)?)
        .with_context(|| format!("cannot write {}", config_path.display()))?;
    Ok(())
}
