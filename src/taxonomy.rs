use std::collections::{BTreeMap, HashMap};

use colored::Colorize;

use crate::client::{RemoteItem, TargetClient};
use crate::config::Config;
use crate::error::{MigrateError, Result};
use crate::model::{EnumItem, ExportDataset};

/// Synthetic custom-field keys: these have no backing source field and
/// render their values at migration time instead.
pub const ISSUE_KEY_FIELD: &str = "issue-key";
pub const LABEL_FIELD: &str = "label";

/// Source enum id -> destination enum id maps for every enumerated value
/// space. Built once per run, before any record is created; never mutated
/// afterwards.
#[derive(Debug, Default)]
pub struct TaxonomyBinding {
    pub statuses: HashMap<String, u64>,
    pub trackers: HashMap<String, u64>,
    pub priorities: HashMap<String, u64>,
    /// Keyed by source custom-field id, plus the two synthetic keys.
    pub custom_fields: HashMap<String, u64>,
    pub default_role_id: u64,
    done_status_ids: Vec<u64>,
}

impl TaxonomyBinding {
    /// Resolve every enumerated value space against the live target.
    /// Any unresolved name aborts the run: an unmapped enum would
    /// propagate as an invalid foreign reference into every issue.
    pub fn resolve(
        config: &Config,
        dataset: &ExportDataset,
        client: &dyn TargetClient,
    ) -> Result<Self> {
        println!("{}", "Resolving statuses...".green());
        let (statuses, missing) = resolve_enum(
            &dataset.statuses,
            &config.status_aliases,
            &client.statuses()?,
        );
        if missing > 0 {
            return Err(MigrateError::UnresolvedTaxonomy {
                kind: "status",
                count: missing,
            });
        }

        println!("{}", "Resolving trackers...".green());
        let (trackers, missing) = resolve_enum(
            &dataset.trackers,
            &config.tracker_aliases,
            &client.trackers()?,
        );
        if missing > 0 {
            return Err(MigrateError::UnresolvedTaxonomy {
                kind: "tracker",
                count: missing,
            });
        }

        println!("{}", "Resolving priorities...".green());
        let (priorities, missing) = resolve_enum(
            &dataset.priorities,
            &config.priority_aliases,
            &client.priorities()?,
        );
        if missing > 0 {
            return Err(MigrateError::UnresolvedTaxonomy {
                kind: "priority",
                count: missing,
            });
        }

        println!("{}", "Resolving custom fields...".green());
        let (custom_fields, missing) =
            resolve_custom_fields(config, dataset, &client.custom_fields()?);
        if missing > 0 {
            return Err(MigrateError::UnresolvedTaxonomy {
                kind: "custom field",
                count: missing,
            });
        }

        let default_role_id = resolve_role(config, &client.roles()?)?;

        Ok(Self {
            statuses,
            trackers,
            priorities,
            custom_fields,
            default_role_id,
            done_status_ids: config.done_status_ids.clone(),
        })
    }

    /// Whether a destination status id counts as finished.
    pub fn is_done(&self, status_dest_id: u64) -> bool {
        self.done_status_ids.contains(&status_dest_id)
    }

    pub fn has_issue_key_field(&self) -> bool {
        self.custom_fields.contains_key(ISSUE_KEY_FIELD)
    }

    pub fn has_label_field(&self) -> bool {
        self.custom_fields.contains_key(LABEL_FIELD)
    }

    #[cfg(test)]
    pub(crate) fn for_tests(
        statuses: HashMap<String, u64>,
        trackers: HashMap<String, u64>,
        priorities: HashMap<String, u64>,
        custom_fields: HashMap<String, u64>,
        done_status_ids: Vec<u64>,
    ) -> Self {
        Self {
            statuses,
            trackers,
            priorities,
            custom_fields,
            default_role_id: 1,
            done_status_ids,
        }
    }
}

/// First destination item whose lowercased name equals the (post-alias)
/// lowercased source name wins. No fuzzy or partial matching.
pub fn resolve_enum(
    source: &BTreeMap<String, EnumItem>,
    aliases: &HashMap<String, String>,
    remote: &[RemoteItem],
) -> (HashMap<String, u64>, usize) {
    let mut binding = HashMap::new();
    let mut unresolved = 0;
    for item in source.values() {
        let lowered = item.name.to_lowercase();
        let search = aliases.get(&lowered).unwrap_or(&lowered);
        match remote.iter().find(|r| r.name.to_lowercase() == *search) {
            Some(found) => {
                println!(" - '{}' -> '{}' ({})", item.name, found.name, found.id);
                binding.insert(item.id.clone(), found.id);
            }
            None => {
                println!(" - {} '{}'", "no match for".red(), item.name);
                unresolved += 1;
            }
        }
    }
    (binding, unresolved)
}

fn resolve_custom_fields(
    config: &Config,
    dataset: &ExportDataset,
    remote: &[RemoteItem],
) -> (HashMap<String, u64>, usize) {
    let mut binding = HashMap::new();
    let mut unresolved = 0;
    for (source_name, dest_name) in &config.custom_fields {
        println!(" - mapping '{source_name}' -> '{dest_name}'");
        let Some(dest) = remote
            .iter()
            .find(|r| r.name.to_lowercase() == dest_name.to_lowercase())
        else {
            println!("   {} '{dest_name}'", "destination field not found:".red());
            unresolved += 1;
            continue;
        };

        let lowered = source_name.to_lowercase();
        if lowered == ISSUE_KEY_FIELD || lowered == LABEL_FIELD {
            // synthetic source: values are rendered per issue, not copied
            binding.insert(lowered, dest.id);
            continue;
        }

        let mut matched = false;
        for (id, field) in &dataset.custom_fields {
            if field.name.to_lowercase() == lowered {
                binding.insert(id.clone(), dest.id);
                matched = true;
            }
        }
        if !matched {
            println!("   {} '{source_name}'", "source field not found:".red());
            unresolved += 1;
        }
    }
    (binding, unresolved)
}

fn resolve_role(config: &Config, remote: &[RemoteItem]) -> Result<u64> {
    remote
        .iter()
        .find(|r| r.name.to_lowercase() == config.default_role.to_lowercase())
        .map(|r| r.id)
        .ok_or_else(|| MigrateError::RoleNotFound(config.default_role.clone()))
}
