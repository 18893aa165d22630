use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};

/// An enumerated source value (status, tracker, priority).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumItem {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomFieldDef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomFieldValue {
    pub issue: String,
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub login: String,
    pub mail: String,
    pub first_name: String,
    pub last_name: String,
    pub active: bool,
    pub display_name: String,
}

/// Login indirection: some source records reference users through an
/// opaque user key rather than the login itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAlias {
    pub user_key: String,
    pub lower_user_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub key: String,
    pub name: String,
    pub description: String,
    pub lead: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub project: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub key: String,
    pub project: String,
    pub creator: Option<String>,
    pub assignee: Option<String>,
    pub kind: String,
    pub summary: String,
    pub description: Option<String>,
    pub priority: String,
    pub status: String,
    pub created: NaiveDateTime,
    pub updated: NaiveDateTime,
    /// Non-empty marker routes the issue into the internal companion project.
    pub security: Option<String>,
    pub original_estimate_secs: Option<i64>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueLink {
    pub link_type: String,
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub issue: String,
    pub author: Option<String>,
    pub body: String,
    pub created: NaiveDateTime,
    pub role_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Worklog {
    pub issue: String,
    pub author: Option<String>,
    pub body: Option<String>,
    pub started: NaiveDateTime,
    pub seconds: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub issue: String,
    pub author: Option<String>,
    pub mime_type: String,
    pub file_name: String,
    pub created: NaiveDateTime,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryGroup {
    pub issue: String,
    pub author: Option<String>,
    pub created: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEvent {
    pub group: String,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAssociation {
    pub source: String,
    pub source_entity: String,
    pub sink: String,
    pub sink_entity: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub issue: String,
    pub label: String,
}

/// The fully-loaded, immutable source export, scoped to the projects
/// selected for this run. Collections are keyed by source id; BTreeMap
/// keeps iteration deterministic across runs.
#[derive(Debug, Default)]
pub struct ExportDataset {
    pub statuses: BTreeMap<String, EnumItem>,
    pub trackers: BTreeMap<String, EnumItem>,
    pub priorities: BTreeMap<String, EnumItem>,
    pub custom_fields: BTreeMap<String, CustomFieldDef>,
    pub users: BTreeMap<String, User>,
    pub user_aliases: BTreeMap<String, UserAlias>,
    pub projects: BTreeMap<String, Project>,
    pub versions: BTreeMap<String, Version>,
    pub issues: BTreeMap<String, Issue>,
    pub issue_links: BTreeMap<String, IssueLink>,
    pub comments: BTreeMap<String, Comment>,
    pub worklogs: BTreeMap<String, Worklog>,
    pub attachments: BTreeMap<String, Attachment>,
    pub history_groups: BTreeMap<String, HistoryGroup>,
    pub history_events: BTreeMap<String, HistoryEvent>,
    pub node_associations: Vec<NodeAssociation>,
    pub custom_field_values: BTreeMap<String, CustomFieldValue>,
    pub labels: BTreeMap<String, Label>,
    /// Issue id -> issue key for *every* issue in the export, including
    /// projects outside this run's scope. Deferred relations are keyed by
    /// these natural keys so a later run can resolve them.
    pub issue_keys: BTreeMap<String, String>,
}

impl ExportDataset {
    /// Resolve a login to the source user id, following the alias table
    /// when the raw login is actually an opaque user key.
    pub fn user_id_by_login(&self, login: &str) -> Option<&str> {
        if let Some((id, _)) = self.users.iter().find(|(_, u)| u.login == login) {
            return Some(id.as_str());
        }
        let alias = self
            .user_aliases
            .values()
            .find(|a| a.user_key == login)?;
        self.users
            .iter()
            .find(|(_, u)| u.login == alias.lower_user_name)
            .map(|(id, _)| id.as_str())
    }

    pub fn issue_key(&self, issue_id: &str) -> Option<&str> {
        self.issue_keys.get(issue_id).map(String::as_str)
    }

    pub fn versions_for<'a>(
        &'a self,
        project_id: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Version)> {
        self.versions
            .iter()
            .filter(move |(_, v)| v.project == project_id)
    }

    pub fn comments_for<'a>(&'a self, issue_id: &'a str) -> impl Iterator<Item = &'a Comment> {
        self.comments
            .values()
            .filter(move |c| c.issue == issue_id)
    }

    pub fn worklogs_for<'a>(&'a self, issue_id: &'a str) -> impl Iterator<Item = &'a Worklog> {
        self.worklogs
            .values()
            .filter(move |w| w.issue == issue_id)
    }

    pub fn attachments_for<'a>(
        &'a self,
        issue_id: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Attachment)> {
        self.attachments
            .iter()
            .filter(move |(_, a)| a.issue == issue_id)
    }

    pub fn labels_for<'a>(&'a self, issue_id: &'a str) -> impl Iterator<Item = &'a Label> {
        self.labels.values().filter(move |l| l.issue == issue_id)
    }

    pub fn custom_values_for<'a>(
        &'a self,
        issue_id: &'a str,
    ) -> impl Iterator<Item = &'a CustomFieldValue> {
        self.custom_field_values
            .values()
            .filter(move |v| v.issue == issue_id)
    }

    pub fn history_groups_for<'a>(
        &'a self,
        issue_id: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a HistoryGroup)> {
        self.history_groups
            .iter()
            .filter(move |(_, g)| g.issue == issue_id)
    }

    pub fn history_events_for<'a>(
        &'a self,
        group_id: &'a str,
    ) -> impl Iterator<Item = &'a HistoryEvent> {
        self.history_events
            .values()
            .filter(move |e| e.group == group_id)
    }

    /// The single fix-version association for an issue, if any.
    pub fn fix_version_for(&self, issue_id: &str) -> Option<&str> {
        self.node_associations
            .iter()
            .find(|a| a.source == issue_id)
            .map(|a| a.sink.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(login: &str) -> User {
        User {
            login: login.into(),
            mail: format!("{login}@example.org"),
            first_name: String::new(),
            last_name: String::new(),
            active: true,
            display_name: login.into(),
        }
    }

    #[test]
    fn user_lookup_follows_alias_table() {
        let mut dataset = ExportDataset::default();
        dataset.users.insert("u1".into(), user("jdoe"));
        dataset.user_aliases.insert(
            "a1".into(),
            UserAlias {
                user_key: "USERKEY100".into(),
                lower_user_name: "jdoe".into(),
            },
        );

        assert_eq!(dataset.user_id_by_login("jdoe"), Some("u1"));
        assert_eq!(dataset.user_id_by_login("USERKEY100"), Some("u1"));
        assert_eq!(dataset.user_id_by_login("ghost"), None);
    }

    #[test]
    fn fix_version_resolves_single_association() {
        let mut dataset = ExportDataset::default();
        dataset.node_associations.push(NodeAssociation {
            source: "i1".into(),
            source_entity: "Issue".into(),
            sink: "v9".into(),
            sink_entity: "Version".into(),
            kind: "IssueFixVersion".into(),
        });

        assert_eq!(dataset.fix_version_for("i1"), Some("v9"));
        assert_eq!(dataset.fix_version_for("i2"), None);
    }
}
