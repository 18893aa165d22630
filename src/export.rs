use std::fs;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;

use crate::config::Config;
use crate::error::{MigrateError, Result};
use crate::model::{
    Attachment, Comment, CustomFieldDef, CustomFieldValue, EnumItem, ExportDataset, HistoryEvent,
    HistoryGroup, Issue, IssueLink, Label, NodeAssociation, Project, User, UserAlias, Version,
    Worklog,
};

const FIX_VERSION_ASSOCIATION: &str = "IssueFixVersion";

#[derive(Debug, Deserialize)]
struct RawExport {
    #[serde(default)]
    statuses: Vec<RawEnum>,
    #[serde(default)]
    issue_types: Vec<RawEnum>,
    #[serde(default)]
    priorities: Vec<RawEnum>,
    #[serde(default)]
    custom_fields: Vec<RawEnum>,
    #[serde(default)]
    users: Vec<RawUser>,
    #[serde(default)]
    user_aliases: Vec<RawUserAlias>,
    #[serde(default)]
    projects: Vec<RawProject>,
    #[serde(default)]
    versions: Vec<RawVersion>,
    #[serde(default)]
    issues: Vec<RawIssue>,
    #[serde(default)]
    issue_links: Vec<RawIssueLink>,
    #[serde(default)]
    comments: Vec<RawComment>,
    #[serde(default)]
    worklogs: Vec<RawWorklog>,
    #[serde(default)]
    attachments: Vec<RawAttachment>,
    #[serde(default)]
    history_groups: Vec<RawHistoryGroup>,
    #[serde(default)]
    history_events: Vec<RawHistoryEvent>,
    #[serde(default)]
    node_associations: Vec<RawNodeAssociation>,
    #[serde(default)]
    custom_field_values: Vec<RawCustomFieldValue>,
    #[serde(default)]
    labels: Vec<RawLabel>,
}

#[derive(Debug, Deserialize)]
struct RawEnum {
    id: String,
    name: String,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RawUser {
    id: String,
    login: String,
    #[serde(default)]
    mail: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default = "default_true")]
    active: bool,
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct RawUserAlias {
    id: String,
    user_key: String,
    lower_user_name: String,
}

#[derive(Debug, Deserialize)]
struct RawProject {
    id: String,
    key: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    lead: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawVersion {
    id: String,
    project: String,
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    id: String,
    key: String,
    project: String,
    #[serde(default)]
    creator: Option<String>,
    #[serde(default)]
    assignee: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    summary: String,
    #[serde(default)]
    description: Option<String>,
    priority: String,
    status: String,
    created: String,
    updated: String,
    #[serde(default)]
    security: Option<String>,
    #[serde(default)]
    original_estimate_secs: Option<i64>,
    #[serde(default)]
    due_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawIssueLink {
    id: String,
    link_type: String,
    source: String,
    destination: String,
}

#[derive(Debug, Deserialize)]
struct RawComment {
    id: String,
    issue: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    body: String,
    created: String,
    #[serde(default)]
    role_level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawWorklog {
    id: String,
    issue: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    body: Option<String>,
    started: String,
    #[serde(default)]
    seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawAttachment {
    id: String,
    issue: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    mime_type: String,
    file_name: String,
    created: String,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct RawHistoryGroup {
    id: String,
    issue: String,
    #[serde(default)]
    author: Option<String>,
    created: String,
}

#[derive(Debug, Deserialize)]
struct RawHistoryEvent {
    id: String,
    group: String,
    field: String,
    #[serde(default)]
    old_value: Option<String>,
    #[serde(default)]
    new_value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawNodeAssociation {
    source: String,
    source_entity: String,
    sink: String,
    sink_entity: String,
    kind: String,
}

#[derive(Debug, Deserialize)]
struct RawCustomFieldValue {
    id: String,
    issue: String,
    field: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct RawLabel {
    id: String,
    issue: String,
    label: String,
}

fn parse_timestamp(path: &Path, raw: &str) -> Result<NaiveDateTime> {
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(ts);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN));
    }
    Err(MigrateError::ExportUnreadable {
        path: path.display().to_string(),
        reason: format!("unparseable timestamp '{raw}'"),
    })
}

fn parse_date(path: &Path, raw: &str) -> Result<NaiveDate> {
    // due dates sometimes carry a time component in source exports
    Ok(parse_timestamp(path, raw)?.date())
}

/// Load and scope the source export: only the configured projects survive,
/// along with every record hanging off their issues. The full issue id ->
/// key index is retained unscoped so deferred relations can reference
/// issues in projects outside this run.
pub fn load(path: &Path, config: &Config) -> Result<ExportDataset> {
    let data = fs::read_to_string(path).map_err(|e| MigrateError::ExportUnreadable {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let raw: RawExport = serde_json::from_str(&data)?;

    if raw.statuses.is_empty() && raw.users.is_empty() && raw.projects.is_empty() {
        return Err(MigrateError::ExportUnreadable {
            path: path.display().to_string(),
            reason: "export contains no records".into(),
        });
    }

    let selected = config.project_keys_lower();
    let mut dataset = ExportDataset::default();

    for item in raw.statuses {
        dataset.statuses.insert(
            item.id.clone(),
            EnumItem {
                id: item.id,
                name: item.name,
            },
        );
    }
    for item in raw.issue_types {
        dataset.trackers.insert(
            item.id.clone(),
            EnumItem {
                id: item.id,
                name: item.name,
            },
        );
    }
    for item in raw.priorities {
        dataset.priorities.insert(
            item.id.clone(),
            EnumItem {
                id: item.id,
                name: item.name,
            },
        );
    }
    for item in raw.custom_fields {
        dataset.custom_fields.insert(
            item.id.clone(),
            CustomFieldDef {
                id: item.id,
                name: item.name,
            },
        );
    }
    for user in raw.users {
        dataset.users.insert(
            user.id,
            User {
                login: user.login,
                mail: user.mail,
                first_name: user.first_name,
                last_name: user.last_name,
                active: user.active,
                display_name: user.display_name,
            },
        );
    }
    for alias in raw.user_aliases {
        dataset.user_aliases.insert(
            alias.id,
            UserAlias {
                user_key: alias.user_key,
                lower_user_name: alias.lower_user_name,
            },
        );
    }

    for project in raw.projects {
        if !selected.contains(&project.key.to_lowercase()) {
            continue;
        }
        dataset.projects.insert(
            project.id,
            Project {
                key: project.key,
                name: project.name,
                description: project.description,
                lead: project.lead,
            },
        );
    }
    for version in raw.versions {
        if !dataset.projects.contains_key(&version.project) {
            continue;
        }
        dataset.versions.insert(
            version.id,
            Version {
                project: version.project,
                name: version.name,
                description: version.description,
            },
        );
    }

    for issue in &raw.issues {
        dataset
            .issue_keys
            .insert(issue.id.clone(), issue.key.clone());
    }
    for issue in raw.issues {
        if !dataset.projects.contains_key(&issue.project) {
            continue;
        }
        let due_date = match &issue.due_date {
            Some(raw_date) if !raw_date.is_empty() => Some(parse_date(path, raw_date)?),
            _ => None,
        };
        dataset.issues.insert(
            issue.id,
            Issue {
                key: issue.key,
                project: issue.project,
                creator: issue.creator,
                assignee: issue.assignee,
                kind: issue.kind,
                summary: issue.summary,
                description: issue.description,
                priority: issue.priority,
                status: issue.status,
                created: parse_timestamp(path, &issue.created)?,
                updated: parse_timestamp(path, &issue.updated)?,
                security: issue.security.filter(|s| !s.is_empty()),
                original_estimate_secs: issue.original_estimate_secs,
                due_date,
            },
        );
    }

    for link in raw.issue_links {
        if !dataset.issues.contains_key(&link.source) {
            continue;
        }
        dataset.issue_links.insert(
            link.id,
            IssueLink {
                link_type: link.link_type,
                source: link.source,
                destination: link.destination,
            },
        );
    }
    for comment in raw.comments {
        if comment.body.is_empty() || !dataset.issues.contains_key(&comment.issue) {
            continue;
        }
        let created = parse_timestamp(path, &comment.created)?;
        dataset.comments.insert(
            comment.id,
            Comment {
                issue: comment.issue,
                author: comment.author,
                body: comment.body,
                created,
                role_level: comment.role_level,
            },
        );
    }
    for worklog in raw.worklogs {
        if !dataset.issues.contains_key(&worklog.issue) {
            continue;
        }
        let started = parse_timestamp(path, &worklog.started)?;
        dataset.worklogs.insert(
            worklog.id,
            Worklog {
                issue: worklog.issue,
                author: worklog.author,
                body: worklog.body,
                started,
                seconds: worklog.seconds,
            },
        );
    }
    for attachment in raw.attachments {
        if !dataset.issues.contains_key(&attachment.issue) {
            continue;
        }
        let created = parse_timestamp(path, &attachment.created)?;
        dataset.attachments.insert(
            attachment.id,
            Attachment {
                issue: attachment.issue,
                author: attachment.author,
                mime_type: attachment.mime_type,
                file_name: attachment.file_name,
                created,
                size: attachment.size,
            },
        );
    }
    for group in raw.history_groups {
        if !dataset.issues.contains_key(&group.issue) {
            continue;
        }
        let created = parse_timestamp(path, &group.created)?;
        dataset.history_groups.insert(
            group.id,
            HistoryGroup {
                issue: group.issue,
                author: group.author,
                created,
            },
        );
    }
    for event in raw.history_events {
        if event.field.to_lowercase() != "status"
            || !dataset.history_groups.contains_key(&event.group)
        {
            continue;
        }
        dataset.history_events.insert(
            event.id,
            HistoryEvent {
                group: event.group,
                field: event.field,
                old_value: event.old_value,
                new_value: event.new_value,
            },
        );
    }
    for assoc in raw.node_associations {
        if assoc.kind != FIX_VERSION_ASSOCIATION || !dataset.issues.contains_key(&assoc.source) {
            continue;
        }
        dataset.node_associations.push(NodeAssociation {
            source: assoc.source,
            source_entity: assoc.source_entity,
            sink: assoc.sink,
            sink_entity: assoc.sink_entity,
            kind: assoc.kind,
        });
    }
    for value in raw.custom_field_values {
        if !dataset.issues.contains_key(&value.issue) {
            continue;
        }
        dataset.custom_field_values.insert(
            value.id,
            CustomFieldValue {
                issue: value.issue,
                field: value.field,
                value: value.value,
            },
        );
    }
    for label in raw.labels {
        if !dataset.issues.contains_key(&label.issue) {
            continue;
        }
        dataset.labels.insert(
            label.id,
            Label {
                issue: label.issue,
                label: label.label,
            },
        );
    }

    Ok(dataset)
}
