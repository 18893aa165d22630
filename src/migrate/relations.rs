use colored::Colorize;

use crate::client::{IssueUpdate, TargetClient};
use crate::error::Result;
use crate::migrate::{RunContext, RunSummary};
use crate::store::{PendingRelation, Store};

/// Subtask links set the parent field on the child instead of creating a
/// relation record.
const SUBTASK_LINK: &str = "10001";

fn map_link_type(raw: &str) -> Option<&'static str> {
    match raw {
        "10000" => Some("duplicates"),
        "10010" => Some("relates"),
        "10020" => Some("blocked"),
        "10030" => Some("copied_from"),
        "10130" => Some("follows"),
        _ => None,
    }
}

fn relation_kind(raw: &str, summary: &mut RunSummary) -> &'static str {
    match map_link_type(raw) {
        Some(kind) => kind,
        None => {
            println!(
                " - {} '{raw}', falling back to 'relates'",
                "no mapping for link type".yellow()
            );
            summary.unmapped_link_types += 1;
            "relates"
        }
    }
}

enum LinkOutcome {
    Applied,
    Deferred,
    Failed,
}

/// The single transition rule: a queued relation becomes resolved exactly
/// when both endpoints exist in the issue cache and the target accepts the
/// write. Anything else leaves the row pending.
fn apply_link(
    client: &dyn TargetClient,
    store: &Store,
    relation: &PendingRelation,
    summary: &mut RunSummary,
) -> Result<LinkOutcome> {
    let from = store.issue_destination(&relation.source_key)?;
    let to = store.issue_destination(&relation.target_key)?;
    let (Some(from), Some(to)) = (from, to) else {
        return Ok(LinkOutcome::Deferred);
    };

    let write = if relation.link_type == SUBTASK_LINK {
        println!(" - setting issue {to} to parent {from}");
        client.update_issue(
            to,
            &IssueUpdate {
                parent_issue_id: Some(from),
                ..Default::default()
            },
        )
    } else {
        let kind = relation_kind(&relation.link_type, summary);
        println!(" - linking issue {from} -> {to} as '{kind}'");
        client.create_relation(from, to, kind)
    };

    match write {
        Ok(()) => {
            store.mark_resolved(&relation.id)?;
            Ok(LinkOutcome::Applied)
        }
        Err(e) => {
            // the target rejects some relation writes (closed projects,
            // circular dependencies); the row stays pending for a retry
            println!(" - {} {e}", "relation write failed, kept pending:".red());
            Ok(LinkOutcome::Failed)
        }
    }
}

/// Queue every issue link of this run by natural keys, then resolve the
/// ones whose endpoints are already cached.
pub fn migrate(ctx: &RunContext, summary: &mut RunSummary) -> Result<()> {
    println!("{}", "Processing issue relations...".green());
    for (id, link) in &ctx.dataset.issue_links {
        let (Some(source_key), Some(target_key)) = (
            ctx.dataset.issue_key(&link.source),
            ctx.dataset.issue_key(&link.destination),
        ) else {
            println!(
                " - {} {} -> {}",
                "link references unknown issue, skipped:".red(),
                link.source,
                link.destination
            );
            continue;
        };
        ctx.store
            .enqueue_relation(id, source_key, target_key, &link.link_type)?;

        let relation = PendingRelation {
            id: id.clone(),
            source_key: source_key.to_string(),
            target_key: target_key.to_string(),
            link_type: link.link_type.clone(),
            status: crate::store::RelationStatus::Pending,
        };
        match apply_link(ctx.client, ctx.store, &relation, summary)? {
            LinkOutcome::Applied => summary.relations_created += 1,
            LinkOutcome::Deferred => {
                println!(
                    " - relation {source_key} -> {target_key} deferred, run the drain phase later"
                );
                summary.relations_deferred += 1;
            }
            LinkOutcome::Failed => summary.relations_failed += 1,
        }
    }
    Ok(())
}

/// Retry every still-pending relation against the accumulated issue cache.
/// Draining twice is harmless: resolved rows are filtered out at read time.
pub fn drain_pending(
    client: &dyn TargetClient,
    store: &Store,
    summary: &mut RunSummary,
) -> Result<()> {
    println!("{}", "Draining deferred relations...".green());
    for relation in store.pending_relations()? {
        match apply_link(client, store, &relation, summary)? {
            LinkOutcome::Applied => summary.relations_resolved += 1,
            LinkOutcome::Deferred => {
                summary
                    .still_pending
                    .push(format!("{} -> {}", relation.source_key, relation.target_key));
            }
            LinkOutcome::Failed => summary.relations_failed += 1,
        }
    }
    println!(
        " - {} relation(s) remain pending",
        store.pending_count()?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeClient;
    use crate::export::fixtures::config_for;
    use crate::migrate::RunContext;
    use crate::model::{ExportDataset, IssueLink};
    use crate::patch::{Dialect, PatchEmitter};
    use crate::store::Store;
    use crate::taxonomy::TaxonomyBinding;
    use std::cell::RefCell;
    use tempfile::tempdir;

    fn dataset_with_link(link_type: &str) -> ExportDataset {
        let mut dataset = ExportDataset::default();
        dataset.issue_keys.insert("i1".into(), "ALPHA-1".into());
        dataset.issue_keys.insert("i2".into(), "BETA-1".into());
        dataset.issue_links.insert(
            "l1".into(),
            IssueLink {
                link_type: link_type.into(),
                source: "i1".into(),
                destination: "i2".into(),
            },
        );
        dataset
    }

    fn run_migrate(
        dataset: &ExportDataset,
        client: &FakeClient,
        store: &Store,
    ) -> RunSummary {
        let dir = tempdir().unwrap();
        let config = config_for(dir.path(), &["alpha"]);
        let taxonomy = TaxonomyBinding::default();
        let patch = PatchEmitter::open(&dir.path().join("patch.sql"), Dialect::Mysql).unwrap();
        let ctx = RunContext {
            config: &config,
            dataset,
            taxonomy: &taxonomy,
            client,
            store,
            patch: RefCell::new(patch),
        };
        let mut summary = RunSummary::default();
        migrate(&ctx, &mut summary).unwrap();
        summary
    }

    #[test]
    fn link_with_one_missing_endpoint_defers_then_drains() {
        let dataset = dataset_with_link("10020");
        let client = FakeClient::new();
        let store = Store::open_memory().unwrap();
        store.upsert_issue_link("i1", "p1", "ALPHA-1", 100).unwrap();

        let summary = run_migrate(&dataset, &client, &store);
        assert_eq!(summary.relations_deferred, 1);
        assert_eq!(summary.relations_created, 0);
        assert!(client.created_relations.borrow().is_empty());

        // a later run migrates the other project and caches its issues
        store.upsert_issue_link("i2", "p2", "BETA-1", 200).unwrap();
        let mut drained = RunSummary::default();
        drain_pending(&client, &store, &mut drained).unwrap();

        assert_eq!(drained.relations_resolved, 1);
        assert_eq!(
            *client.created_relations.borrow(),
            vec![(100, 200, "blocked".to_string())]
        );
        assert_eq!(store.pending_count().unwrap(), 0);

        // draining again touches nothing
        let mut again = RunSummary::default();
        drain_pending(&client, &store, &mut again).unwrap();
        assert_eq!(again.relations_resolved, 0);
        assert_eq!(client.created_relations.borrow().len(), 1);
    }

    #[test]
    fn resolvable_link_is_applied_immediately() {
        let dataset = dataset_with_link("10000");
        let client = FakeClient::new();
        let store = Store::open_memory().unwrap();
        store.upsert_issue_link("i1", "p1", "ALPHA-1", 100).unwrap();
        store.upsert_issue_link("i2", "p2", "BETA-1", 200).unwrap();

        let summary = run_migrate(&dataset, &client, &store);

        assert_eq!(summary.relations_created, 1);
        assert_eq!(summary.relations_deferred, 0);
        assert_eq!(
            *client.created_relations.borrow(),
            vec![(100, 200, "duplicates".to_string())]
        );
        assert_eq!(store.pending_count().unwrap(), 0);
    }

    #[test]
    fn subtask_link_sets_parent_on_the_child() {
        let dataset = dataset_with_link("10001");
        let client = FakeClient::new();
        let store = Store::open_memory().unwrap();
        store.upsert_issue_link("i1", "p1", "ALPHA-1", 100).unwrap();
        store.upsert_issue_link("i2", "p1", "BETA-1", 200).unwrap();

        let summary = run_migrate(&dataset, &client, &store);

        assert_eq!(summary.relations_created, 1);
        assert!(client.created_relations.borrow().is_empty());
        let updates = client.issue_updates.borrow();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, 200);
        assert_eq!(updates[0].1.parent_issue_id, Some(100));
    }

    #[test]
    fn unmapped_link_type_falls_back_to_relates() {
        let dataset = dataset_with_link("99999");
        let client = FakeClient::new();
        let store = Store::open_memory().unwrap();
        store.upsert_issue_link("i1", "p1", "ALPHA-1", 100).unwrap();
        store.upsert_issue_link("i2", "p2", "BETA-1", 200).unwrap();

        let summary = run_migrate(&dataset, &client, &store);

        assert_eq!(summary.unmapped_link_types, 1);
        assert_eq!(
            *client.created_relations.borrow(),
            vec![(100, 200, "relates".to_string())]
        );
    }

    #[test]
    fn rejected_write_keeps_the_relation_pending() {
        let dataset = dataset_with_link("10020");
        let client = FakeClient::new();
        *client.fail_relations.borrow_mut() = true;
        let store = Store::open_memory().unwrap();
        store.upsert_issue_link("i1", "p1", "ALPHA-1", 100).unwrap();
        store.upsert_issue_link("i2", "p2", "BETA-1", 200).unwrap();

        let summary = run_migrate(&dataset, &client, &store);
        assert_eq!(summary.relations_failed, 1);
        assert_eq!(store.pending_count().unwrap(), 1);

        // once the target recovers, a drain resolves it
        *client.fail_relations.borrow_mut() = false;
        let mut drained = RunSummary::default();
        drain_pending(&client, &store, &mut drained).unwrap();
        assert_eq!(drained.relations_resolved, 1);
        assert_eq!(store.pending_count().unwrap(), 0);
    }
}
