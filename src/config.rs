use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{MigrateError, Result};
use crate::patch::Dialect;

fn default_worklog_activity() -> u64 {
    9
}

/// Migration run configuration, loaded from a single YAML file.
///
/// Everything the reconciliation engine is parameterised by lives here:
/// name alias tables, the custom-field map (including the two synthetic
/// keys, see [`crate::taxonomy`]), target credentials, and the paths the
/// run reads from and writes to.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Target tracker base URL, trailing slash optional.
    pub target_url: String,
    pub target_api_key: String,

    /// JSON dump of the source export graph.
    pub export_file: PathBuf,
    /// Root directory holding the source attachment binaries.
    pub attachments_dir: PathBuf,
    /// Directory the staged attachment copies are written to.
    pub attachments_output_dir: PathBuf,
    /// Append-only patch script for API-unreachable fields.
    pub patch_script: PathBuf,
    /// SQLite file backing the durable store.
    pub store_file: PathBuf,

    #[serde(default)]
    pub patch_dialect: Dialect,

    /// Source project keys to migrate in this run (case-insensitive).
    pub projects: Vec<String>,

    #[serde(default)]
    pub status_aliases: HashMap<String, String>,
    #[serde(default)]
    pub tracker_aliases: HashMap<String, String>,
    #[serde(default)]
    pub priority_aliases: HashMap<String, String>,

    /// Source custom-field display name (or a synthetic key) mapped to the
    /// destination custom-field display name.
    #[serde(default)]
    pub custom_fields: HashMap<String, String>,

    /// Role granted when an assignee lacks project membership.
    pub default_role: String,
    /// Destination user id substituted for unknown authors.
    pub anonymous_user_id: u64,

    /// Non-empty value enables the "(internal)" companion project per project.
    #[serde(default)]
    pub internal_project_postfix: String,
    /// Appended to every normalized source mail address.
    #[serde(default)]
    pub mail_domain_postfix: String,

    /// Destination status ids that count as finished (drives done_ratio).
    #[serde(default)]
    pub done_status_ids: Vec<u64>,

    /// Destination time-entry activity id used for migrated worklogs.
    #[serde(default = "default_worklog_activity")]
    pub worklog_activity_id: u64,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            MigrateError::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        let config: Config = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.projects.is_empty() {
            return Err(MigrateError::Config(
                "'projects' must list at least one source project key".into(),
            ));
        }
        if self.target_url.is_empty() || self.target_api_key.is_empty() {
            return Err(MigrateError::Config(
                "'target_url' and 'target_api_key' must be set".into(),
            ));
        }
        for (name, dir) in [
            ("attachments_dir", &self.attachments_dir),
            ("attachments_output_dir", &self.attachments_output_dir),
        ] {
            if !dir.is_dir() {
                return Err(MigrateError::Config(format!(
                    "'{name}' is not a directory: {}",
                    dir.display()
                )));
            }
        }
        for (name, file) in [
            ("patch_script", &self.patch_script),
            ("store_file", &self.store_file),
        ] {
            match file.parent() {
                Some(parent) if parent.as_os_str().is_empty() || parent.is_dir() => {}
                _ => {
                    return Err(MigrateError::Config(format!(
                        "parent directory of '{name}' does not exist: {}",
                        file.display()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Lowercased project keys selected for this run.
    pub fn project_keys_lower(&self) -> Vec<String> {
        self.projects.iter().map(|k| k.to_lowercase()).collect()
    }

    pub fn has_internal_projects(&self) -> bool {
        !self.internal_project_postfix.is_empty()
    }
}
