use std::collections::BTreeMap;

use colored::Colorize;

use crate::attach;
use crate::client::{CustomFieldPayload, IssueUpdate, NewIssue};
use crate::error::{MigrateError, Result};
use crate::migrate::{IdentityBinding, RunContext, RunSummary};
use crate::model::Issue;
use crate::patch::{
    AttachmentPatch, CommentPatch, IssueCorePatch, StatusChangePatch, WorklogPatch,
};
use crate::taxonomy::{ISSUE_KEY_FIELD, LABEL_FIELD};

const EMPTY_WORKLOG_COMMENT: &str = "< No comment >";

/// Create every issue of the run on the target and emit the patch groups
/// the creation API cannot express: authors, timestamps, comments,
/// worklogs, attachments and the status trail.
pub fn migrate(
    ctx: &RunContext,
    binding: &mut IdentityBinding,
    summary: &mut RunSummary,
) -> Result<()> {
    println!("{}", "Migrating issues...".green());
    let total = ctx.dataset.issues.len();
    for (position, (id, issue)) in ctx.dataset.issues.iter().enumerate() {
        println!(" - processing '{}' ({} of {total})", issue.key, position + 1);

        let project_id = route_project(ctx, binding, issue)?;
        let status_id = lookup(&ctx.taxonomy.statuses, &issue.status, "status")?;
        let tracker_id = lookup(&ctx.taxonomy.trackers, &issue.kind, "tracker")?;
        let priority_id = lookup(&ctx.taxonomy.priorities, &issue.priority, "priority")?;

        let destination = ctx
            .client
            .create_issue(&NewIssue {
                project_id,
                tracker_id,
                priority_id,
                subject: sanitize(&issue.summary),
                custom_fields: render_custom_fields(ctx, id, issue),
                is_private: issue.security.is_some(),
                estimated_hours: round2(
                    issue.original_estimate_secs.unwrap_or(0) as f64 / 3600.0,
                ),
                fixed_version_id: ctx
                    .dataset
                    .fix_version_for(id)
                    .and_then(|v| binding.versions.get(v))
                    .copied(),
            })
            .map_err(|e| MigrateError::CreateFailed {
                kind: "issue",
                key: issue.key.clone(),
                source: Box::new(e),
            })?;
        summary.issues_created += 1;
        binding.issues.insert(id.clone(), destination);
        ctx.store
            .upsert_issue_link(id, &issue.project, &issue.key, destination)?;

        let author_id = binding.user_for_login(
            ctx.dataset,
            issue.creator.as_deref(),
            ctx.config.anonymous_user_id,
        );
        let description = sanitize(issue.description.as_deref().unwrap_or_default());
        ctx.patch.borrow_mut().issue_core(
            destination,
            &IssueCorePatch {
                status_id,
                author_id,
                done_ratio: if ctx.taxonomy.is_done(status_id) { 100 } else { 0 },
                created: issue.created,
                updated: issue.updated,
                due_date: issue.due_date,
                description: &description,
            },
        )?;

        migrate_comments(ctx, binding, id, destination)?;
        migrate_worklogs(ctx, binding, id, destination, project_id)?;
        migrate_attachments(ctx, binding, id, issue, destination, summary)?;
        migrate_status_trail(ctx, binding, id, destination)?;
        assign(ctx, binding, issue, destination, project_id)?;
    }
    Ok(())
}

/// Issues carrying a security marker land in the internal companion
/// project when one is configured.
fn route_project(ctx: &RunContext, binding: &IdentityBinding, issue: &Issue) -> Result<u64> {
    let routed = if issue.security.is_some() {
        binding
            .internal_projects
            .get(&issue.project)
            .or_else(|| binding.projects.get(&issue.project))
    } else {
        binding.projects.get(&issue.project)
    };
    routed.copied().ok_or_else(|| MigrateError::MissingBinding {
        kind: "project",
        key: issue.project.clone(),
    })
}

fn lookup(
    map: &std::collections::HashMap<String, u64>,
    key: &str,
    kind: &'static str,
) -> Result<u64> {
    map.get(key).copied().ok_or_else(|| MigrateError::MissingBinding {
        kind,
        key: key.to_string(),
    })
}

/// Destination custom-field payload: the synthetic issue-key and label
/// fields are rendered here, every bound source field value is copied.
/// BTreeMap keeps the payload order stable.
fn render_custom_fields(ctx: &RunContext, issue_id: &str, issue: &Issue) -> Vec<CustomFieldPayload> {
    let mut fields: BTreeMap<u64, String> = BTreeMap::new();
    if let Some(&field_id) = ctx.taxonomy.custom_fields.get(ISSUE_KEY_FIELD) {
        fields.insert(field_id, format!("[{}]", issue.key));
    }
    if let Some(&field_id) = ctx.taxonomy.custom_fields.get(LABEL_FIELD) {
        let labels: String = ctx
            .dataset
            .labels_for(issue_id)
            .map(|l| format!("[{}]", l.label))
            .collect();
        if !labels.is_empty() {
            fields.insert(field_id, labels);
        }
    }
    for value in ctx.dataset.custom_values_for(issue_id) {
        if let Some(&field_id) = ctx.taxonomy.custom_fields.get(&value.field) {
            fields.insert(field_id, value.value.clone());
        }
    }
    fields
        .into_iter()
        .map(|(id, value)| CustomFieldPayload { id, value })
        .collect()
}

fn migrate_comments(
    ctx: &RunContext,
    binding: &IdentityBinding,
    issue_id: &str,
    destination: u64,
) -> Result<()> {
    for comment in ctx.dataset.comments_for(issue_id) {
        let body = sanitize(&comment.body);
        ctx.patch.borrow_mut().comment(
            destination,
            &CommentPatch {
                user_id: binding.user_for_login(
                    ctx.dataset,
                    comment.author.as_deref(),
                    ctx.config.anonymous_user_id,
                ),
                body: &body,
                created: comment.created,
                private: comment.role_level.is_some(),
            },
        )?;
    }
    Ok(())
}

fn migrate_worklogs(
    ctx: &RunContext,
    binding: &IdentityBinding,
    issue_id: &str,
    destination: u64,
    project_id: u64,
) -> Result<()> {
    for worklog in ctx.dataset.worklogs_for(issue_id) {
        let comment = match worklog.body.as_deref() {
            Some(body) if !body.is_empty() => sanitize(body),
            _ => EMPTY_WORKLOG_COMMENT.to_string(),
        };
        ctx.patch.borrow_mut().worklog(
            destination,
            &WorklogPatch {
                project_id,
                user_id: binding.user_for_login(
                    ctx.dataset,
                    worklog.author.as_deref(),
                    ctx.config.anonymous_user_id,
                ),
                comment: &comment,
                created: worklog.started,
                hours: round2(worklog.seconds.unwrap_or(0) as f64 / 3600.0),
                activity_id: ctx.config.worklog_activity_id,
            },
        )?;
    }
    Ok(())
}

/// Stage each attachment binary and patch its metadata rows. A binary
/// missing from the export directory is logged and skipped; the issue
/// itself is unaffected.
fn migrate_attachments(
    ctx: &RunContext,
    binding: &IdentityBinding,
    issue_id: &str,
    issue: &Issue,
    destination: u64,
    summary: &mut RunSummary,
) -> Result<()> {
    let Some(project) = ctx.dataset.projects.get(&issue.project) else {
        return Ok(());
    };
    for (attachment_id, attachment) in ctx.dataset.attachments_for(issue_id) {
        let staged = attach::stage(
            &ctx.config.attachments_dir,
            &ctx.config.attachments_output_dir,
            &project.key,
            &issue.key,
            attachment_id,
            attachment,
        )?;
        let Some(staged) = staged else {
            println!(
                " - {} '{}' for '{}'",
                "attachment binary not found, skipped:".yellow(),
                attachment.file_name,
                issue.key
            );
            summary
                .attachments_skipped
                .push(format!("{}: {}", issue.key, attachment.file_name));
            continue;
        };
        ctx.patch.borrow_mut().attachment(
            destination,
            &AttachmentPatch {
                user_id: binding.user_for_login(
                    ctx.dataset,
                    attachment.author.as_deref(),
                    ctx.config.anonymous_user_id,
                ),
                file_name: &staged.file_name,
                disk_name: &staged.disk_name,
                size: staged.size,
                mime_type: &attachment.mime_type,
                digest: &staged.digest,
                created: attachment.created,
            },
        )?;
    }
    Ok(())
}

/// Replay the status history as back-dated journal pairs. Only changes
/// where both sides map to destination statuses and actually differ are
/// kept.
fn migrate_status_trail(
    ctx: &RunContext,
    binding: &IdentityBinding,
    issue_id: &str,
    destination: u64,
) -> Result<()> {
    for (group_id, group) in ctx.dataset.history_groups_for(issue_id) {
        let user_id = binding.user_for_login(
            ctx.dataset,
            group.author.as_deref(),
            ctx.config.anonymous_user_id,
        );
        for event in ctx.dataset.history_events_for(group_id) {
            let old = event
                .old_value
                .as_deref()
                .and_then(|v| ctx.taxonomy.statuses.get(v));
            let new = event
                .new_value
                .as_deref()
                .and_then(|v| ctx.taxonomy.statuses.get(v));
            let (Some(&old), Some(&new)) = (old, new) else {
                continue;
            };
            if old == new {
                continue;
            }
            ctx.patch.borrow_mut().status_change(
                destination,
                &StatusChangePatch {
                    user_id,
                    old_value: old,
                    new_value: new,
                    created: group.created,
                },
            )?;
        }
    }
    Ok(())
}

/// Assign the issue, granting the default role first when the assignee is
/// not yet a member of the destination project.
fn assign(
    ctx: &RunContext,
    binding: &IdentityBinding,
    issue: &Issue,
    destination: u64,
    project_id: u64,
) -> Result<()> {
    let Some(login) = issue.assignee.as_deref() else {
        return Ok(());
    };
    let Some(user_id) = ctx
        .dataset
        .user_id_by_login(login)
        .and_then(|id| binding.users.get(id))
        .copied()
    else {
        println!(
            " - {} '{login}' for '{}'",
            "assignee has no destination user, left unassigned:".yellow(),
            issue.key
        );
        return Ok(());
    };

    if !ctx.client.memberships(project_id)?.contains(&user_id) {
        ctx.client
            .create_membership(project_id, user_id, ctx.taxonomy.default_role_id)?;
    }
    ctx.client.update_issue(
        destination,
        &IssueUpdate {
            assigned_to_id: Some(user_id),
            ..Default::default()
        },
    )
}

/// Drop characters outside the basic multilingual plane; the target's
/// storage rejects 4-byte UTF-8 sequences.
fn sanitize(raw: &str) -> String {
    raw.chars().filter(|c| (*c as u32) <= 0xFFFF).collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeClient;
    use crate::export::fixtures::config_for;
    use crate::migrate::RunContext;
    use crate::model::{
        Comment, CustomFieldValue, ExportDataset, HistoryEvent, HistoryGroup, Issue, Label,
        Project, User, Worklog,
    };
    use crate::patch::{Dialect, PatchEmitter};
    use crate::store::Store;
    use crate::taxonomy::TaxonomyBinding;
    use chrono::NaiveDateTime;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn ts(raw: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn issue(key: &str, project: &str) -> Issue {
        Issue {
            key: key.into(),
            project: project.into(),
            creator: Some("jdoe".into()),
            assignee: None,
            kind: "t1".into(),
            summary: "Something broke".into(),
            description: Some("see log".into()),
            priority: "pr1".into(),
            status: "s1".into(),
            created: ts("2021-03-01 09:00:00"),
            updated: ts("2021-03-02 10:00:00"),
            security: None,
            original_estimate_secs: Some(5400),
            due_date: None,
        }
    }

    fn base_dataset() -> ExportDataset {
        let mut dataset = ExportDataset::default();
        dataset.projects.insert(
            "p1".into(),
            Project {
                key: "ALPHA".into(),
                name: "Alpha".into(),
                description: String::new(),
                lead: None,
            },
        );
        dataset.users.insert(
            "u1".into(),
            User {
                login: "jdoe".into(),
                mail: "jdoe@example.org".into(),
                first_name: "Jane".into(),
                last_name: "Doe".into(),
                active: true,
                display_name: "Jane Doe".into(),
            },
        );
        dataset.issues.insert("i1".into(), issue("ALPHA-1", "p1"));
        dataset.issue_keys.insert("i1".into(), "ALPHA-1".into());
        dataset
    }

    fn taxonomy() -> TaxonomyBinding {
        TaxonomyBinding::for_tests(
            HashMap::from([("s1".to_string(), 7), ("s0".to_string(), 1)]),
            HashMap::from([("t1".to_string(), 2)]),
            HashMap::from([("pr1".to_string(), 4)]),
            HashMap::new(),
            vec![7],
        )
    }

    fn base_binding() -> IdentityBinding {
        let mut binding = IdentityBinding::default();
        binding.projects.insert("p1".into(), 50);
        binding.users.insert("u1".into(), 12);
        binding
    }

    struct Run {
        summary: RunSummary,
        binding: IdentityBinding,
        script: String,
    }

    fn run(dir: &Path, dataset: &ExportDataset, client: &FakeClient) -> Run {
        run_with(dir, dataset, client, taxonomy(), base_binding())
    }

    fn run_with(
        dir: &Path,
        dataset: &ExportDataset,
        client: &FakeClient,
        taxonomy: TaxonomyBinding,
        mut binding: IdentityBinding,
    ) -> Run {
        let config = config_for(dir, &["alpha"]);
        let store = Store::open_memory().unwrap();
        let patch_path = dir.join("patch.sql");
        let patch = PatchEmitter::open(&patch_path, Dialect::Mysql).unwrap();
        let ctx = RunContext {
            config: &config,
            dataset,
            taxonomy: &taxonomy,
            client,
            store: &store,
            patch: RefCell::new(patch),
        };
        let mut summary = RunSummary::default();
        migrate(&ctx, &mut binding, &mut summary).unwrap();
        let script = fs::read_to_string(&patch_path).unwrap();
        Run {
            summary,
            binding,
            script,
        }
    }

    #[test]
    fn creates_issue_and_patches_core_fields() {
        let dir = tempdir().unwrap();
        let dataset = base_dataset();
        let client = FakeClient::new();

        let run = run(dir.path(), &dataset, &client);

        assert_eq!(run.summary.issues_created, 1);
        let created = client.created_issues.borrow();
        assert_eq!(created[0].project_id, 50);
        assert_eq!(created[0].tracker_id, 2);
        assert_eq!(created[0].priority_id, 4);
        assert_eq!(created[0].estimated_hours, 1.5);
        assert!(!created[0].is_private);

        let destination = *run.binding.issues.get("i1").unwrap();
        assert!(run.script.contains(&format!("WHERE id = {destination};")));
        assert!(run.script.contains("`status_id` = 7"));
        assert!(run.script.contains("`author_id` = 12"));
        // s1 is a done status, the ratio follows
        assert!(run.script.contains("`done_ratio` = 100"));
    }

    #[test]
    fn security_marker_routes_to_internal_project_and_private_flag() {
        let dir = tempdir().unwrap();
        let mut dataset = base_dataset();
        dataset.issues.get_mut("i1").unwrap().security = Some("level-2".into());
        let client = FakeClient::new();
        let mut binding = base_binding();
        binding.internal_projects.insert("p1".into(), 51);

        run_with(dir.path(), &dataset, &client, taxonomy(), binding);

        let created = client.created_issues.borrow();
        assert_eq!(created[0].project_id, 51);
        assert!(created[0].is_private);
    }

    #[test]
    fn renders_synthetic_and_copied_custom_fields() {
        let dir = tempdir().unwrap();
        let mut dataset = base_dataset();
        dataset.labels.insert(
            "lb1".into(),
            Label {
                issue: "i1".into(),
                label: "backend".into(),
            },
        );
        dataset.labels.insert(
            "lb2".into(),
            Label {
                issue: "i1".into(),
                label: "urgent".into(),
            },
        );
        dataset.custom_field_values.insert(
            "cv1".into(),
            CustomFieldValue {
                issue: "i1".into(),
                field: "cf1".into(),
                value: "high".into(),
            },
        );
        let client = FakeClient::new();
        let taxonomy = TaxonomyBinding::for_tests(
            HashMap::from([("s1".to_string(), 7)]),
            HashMap::from([("t1".to_string(), 2)]),
            HashMap::from([("pr1".to_string(), 4)]),
            HashMap::from([
                (ISSUE_KEY_FIELD.to_string(), 18),
                (LABEL_FIELD.to_string(), 19),
                ("cf1".to_string(), 30),
            ]),
            vec![],
        );

        run_with(dir.path(), &dataset, &client, taxonomy, base_binding());

        let created = client.created_issues.borrow();
        let fields = &created[0].custom_fields;
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].id, 18);
        assert_eq!(fields[0].value, "[ALPHA-1]");
        assert_eq!(fields[1].id, 19);
        assert_eq!(fields[1].value, "[backend][urgent]");
        assert_eq!(fields[2].id, 30);
        assert_eq!(fields[2].value, "high");
    }

    #[test]
    fn comments_and_worklogs_are_patched_with_fallbacks() {
        let dir = tempdir().unwrap();
        let mut dataset = base_dataset();
        dataset.comments.insert(
            "c1".into(),
            Comment {
                issue: "i1".into(),
                author: Some("ghost".into()),
                body: "what happened \u{1F600} here".into(),
                created: ts("2021-03-01 09:30:00"),
                role_level: Some("Developers".into()),
            },
        );
        dataset.worklogs.insert(
            "w1".into(),
            Worklog {
                issue: "i1".into(),
                author: Some("jdoe".into()),
                body: None,
                started: ts("2021-03-01 10:00:00"),
                seconds: Some(5400),
            },
        );
        let client = FakeClient::new();

        let run = run(dir.path(), &dataset, &client);

        // unknown author falls back to the anonymous user (4 in fixtures),
        // and the emoji never reaches the script
        let encoded = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            "what happened  here",
        );
        assert!(run.script.contains(&encoded));
        assert!(run.script.contains("VALUES (101, 'Issue', 4,"));
        assert!(run.script.contains("`private_notes`"));

        let worklog_comment = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            EMPTY_WORKLOG_COMMENT,
        );
        assert!(run.script.contains(&worklog_comment));
        assert!(run.script.contains("1.5"));
    }

    #[test]
    fn missing_attachment_binary_is_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        let mut dataset = base_dataset();
        dataset.attachments.insert(
            "a1".into(),
            crate::model::Attachment {
                issue: "i1".into(),
                author: Some("jdoe".into()),
                mime_type: "application/pdf".into(),
                file_name: "plan.pdf".into(),
                created: ts("2021-03-01 11:00:00"),
                size: 10,
            },
        );
        let client = FakeClient::new();

        let run = run(dir.path(), &dataset, &client);

        assert_eq!(run.summary.issues_created, 1);
        assert_eq!(run.summary.attachments_skipped, vec!["ALPHA-1: plan.pdf"]);
        assert!(!run.script.contains("`attachments`"));
    }

    #[test]
    fn staged_attachment_is_patched_with_digest() {
        let dir = tempdir().unwrap();
        let mut dataset = base_dataset();
        dataset.attachments.insert(
            "a1".into(),
            crate::model::Attachment {
                issue: "i1".into(),
                author: Some("jdoe".into()),
                mime_type: "application/pdf".into(),
                file_name: "plan.pdf".into(),
                created: ts("2021-03-01 11:00:00"),
                size: 10,
            },
        );
        let binaries = dir.path().join("ALPHA/ALPHA-1");
        fs::create_dir_all(&binaries).unwrap();
        fs::write(binaries.join("a1"), b"pdf bytes").unwrap();
        let client = FakeClient::new();

        let run = run(dir.path(), &dataset, &client);

        assert!(run.summary.attachments_skipped.is_empty());
        assert!(run.script.contains("INSERT INTO `attachments`"));
        assert!(run.script.contains("'migrated'"));
        assert!(dir.path().join("a1_plan.pdf").is_file());
    }

    #[test]
    fn status_trail_keeps_only_mapped_differing_transitions() {
        let dir = tempdir().unwrap();
        let mut dataset = base_dataset();
        dataset.history_groups.insert(
            "g1".into(),
            HistoryGroup {
                issue: "i1".into(),
                author: Some("jdoe".into()),
                created: ts("2021-03-02 08:00:00"),
            },
        );
        for (id, old, new) in [
            ("e1", Some("s0"), Some("s1")),
            ("e2", Some("s1"), Some("s1")),
            ("e3", Some("unmapped"), Some("s1")),
        ] {
            dataset.history_events.insert(
                id.into(),
                HistoryEvent {
                    group: "g1".into(),
                    field: "status".into(),
                    old_value: old.map(String::from),
                    new_value: new.map(String::from),
                },
            );
        }
        let client = FakeClient::new();

        let run = run(dir.path(), &dataset, &client);

        let detail_rows = run
            .script
            .lines()
            .filter(|l| l.contains("journal_details"))
            .count();
        assert_eq!(detail_rows, 1);
        assert!(run.script.contains("'1', '7'"));
    }

    #[test]
    fn assignee_gains_membership_before_assignment() {
        let dir = tempdir().unwrap();
        let mut dataset = base_dataset();
        dataset.issues.get_mut("i1").unwrap().assignee = Some("jdoe".into());
        let client = FakeClient::new();

        run(dir.path(), &dataset, &client);

        assert_eq!(*client.created_memberships.borrow(), vec![(50, 12, 1)]);
        {
            let updates = client.issue_updates.borrow();
            assert_eq!(updates.len(), 1);
            assert_eq!(updates[0].1.assigned_to_id, Some(12));
        }

        // a second issue by the same assignee reuses the membership
        let mut dataset2 = base_dataset();
        dataset2.issues.get_mut("i1").unwrap().assignee = Some("jdoe".into());
        let dir2 = tempdir().unwrap();
        run(dir2.path(), &dataset2, &client);
        assert_eq!(client.created_memberships.borrow().len(), 1);
    }

    #[test]
    fn unknown_assignee_leaves_issue_unassigned() {
        let dir = tempdir().unwrap();
        let mut dataset = base_dataset();
        dataset.issues.get_mut("i1").unwrap().assignee = Some("ghost".into());
        let client = FakeClient::new();

        run(dir.path(), &dataset, &client);

        assert!(client.created_memberships.borrow().is_empty());
        assert!(client.issue_updates.borrow().is_empty());
    }
}
