use std::cell::RefCell;
use std::collections::HashMap;

use colored::Colorize;

use crate::client::TargetClient;
use crate::config::Config;
use crate::error::Result;
use crate::export;
use crate::model::ExportDataset;
use crate::patch::PatchEmitter;
use crate::store::Store;
use crate::taxonomy::TaxonomyBinding;

pub mod issues;
pub mod projects;
pub mod relations;
pub mod users;

/// Immutable-after-construction run state threaded through every phase:
/// the resolved taxonomy plus handles to the collaborators. The patch
/// emitter is the one mutable collaborator, hence the RefCell.
pub struct RunContext<'a> {
    pub config: &'a Config,
    pub dataset: &'a ExportDataset,
    pub taxonomy: &'a TaxonomyBinding,
    pub client: &'a dyn TargetClient,
    pub store: &'a Store,
    pub patch: RefCell<PatchEmitter>,
}

/// Source id -> destination id maps accumulated over the run. Re-derived
/// every run; only project and issue entries are mirrored into the durable
/// store for cross-run relation resolution.
#[derive(Debug, Default)]
pub struct IdentityBinding {
    pub users: HashMap<String, u64>,
    pub projects: HashMap<String, u64>,
    /// Internal companion project per source project, when configured.
    pub internal_projects: HashMap<String, u64>,
    pub versions: HashMap<String, u64>,
    pub issues: HashMap<String, u64>,
}

impl IdentityBinding {
    /// Destination user for a source login, falling back to the configured
    /// anonymous user for unknown authors.
    pub fn user_for_login(
        &self,
        dataset: &ExportDataset,
        login: Option<&str>,
        anonymous_user_id: u64,
    ) -> u64 {
        login
            .and_then(|l| dataset.user_id_by_login(l))
            .and_then(|id| self.users.get(id))
            .copied()
            .unwrap_or(anonymous_user_id)
    }
}

/// Recoverable-condition tallies, reported at end of run. Fatal errors
/// never land here; they abort through [`crate::error::MigrateError`].
#[derive(Debug, Default)]
pub struct RunSummary {
    pub users_created: usize,
    pub users_existing: usize,
    pub decorated_mails: usize,
    pub projects_created: usize,
    pub versions_created: usize,
    pub issues_created: usize,
    pub relations_created: usize,
    pub relations_deferred: usize,
    pub relations_failed: usize,
    pub relations_resolved: usize,
    pub unmapped_link_types: usize,
    /// "<issue key>: <file name>" per skipped attachment.
    pub attachments_skipped: Vec<String>,
    /// Natural keys of relations still pending after a drain.
    pub still_pending: Vec<String>,
}

impl RunSummary {
    pub fn print(&self) {
        println!("{}", "Run summary:".green());
        println!(
            " - users: {} created, {} already present, {} decorated mails",
            self.users_created, self.users_existing, self.decorated_mails
        );
        println!(
            " - projects: {} created, versions: {} created",
            self.projects_created, self.versions_created
        );
        println!(" - issues: {} created", self.issues_created);
        println!(
            " - relations: {} created, {} deferred, {} resolved from queue, {} failed",
            self.relations_created,
            self.relations_deferred,
            self.relations_resolved,
            self.relations_failed
        );
        if self.unmapped_link_types > 0 {
            println!(
                " - {} link(s) with unmapped type defaulted to 'relates'",
                self.unmapped_link_types.to_string().yellow()
            );
        }
        if !self.attachments_skipped.is_empty() {
            println!(
                " - {} attachment(s) skipped:",
                self.attachments_skipped.len().to_string().yellow()
            );
            for skipped in &self.attachments_skipped {
                println!("   - {skipped}");
            }
        }
        if !self.still_pending.is_empty() {
            println!(
                " - {} relation(s) still pending: {}",
                self.still_pending.len().to_string().yellow(),
                self.still_pending.join(", ")
            );
        }
    }
}

/// Load the export and resolve the taxonomy. Gate for every other phase.
pub fn validate(
    config: &Config,
    client: &dyn TargetClient,
) -> Result<(ExportDataset, TaxonomyBinding)> {
    println!("{}", "Loading source export...".green());
    let dataset = export::load(&config.export_file, config)?;
    println!(
        " - {} project(s), {} issue(s), {} user(s)",
        dataset.projects.len(),
        dataset.issues.len(),
        dataset.users.len()
    );
    let taxonomy = TaxonomyBinding::resolve(config, &dataset, client)?;
    Ok((dataset, taxonomy))
}

/// Validate plus user binding only (original "user migration" mode).
pub fn run_users(
    config: &Config,
    client: &dyn TargetClient,
    patch_existing: bool,
) -> Result<RunSummary> {
    let (dataset, taxonomy) = validate(config, client)?;
    let store = Store::open(&config.store_file)?;
    let patch = PatchEmitter::open(&config.patch_script, config.patch_dialect)?;
    let ctx = RunContext {
        config,
        dataset: &dataset,
        taxonomy: &taxonomy,
        client,
        store: &store,
        patch: RefCell::new(patch),
    };
    let mut binding = IdentityBinding::default();
    let mut summary = RunSummary::default();
    users::migrate(&ctx, &mut binding, &mut summary, patch_existing)?;
    Ok(summary)
}

/// The full pipeline: taxonomy gate, then users, projects/versions,
/// issues (with patch emission), then immediate relation handling.
pub fn run_full(config: &Config, client: &dyn TargetClient) -> Result<RunSummary> {
    let (dataset, taxonomy) = validate(config, client)?;
    let store = Store::open(&config.store_file)?;
    let patch = PatchEmitter::open(&config.patch_script, config.patch_dialect)?;
    let ctx = RunContext {
        config,
        dataset: &dataset,
        taxonomy: &taxonomy,
        client,
        store: &store,
        patch: RefCell::new(patch),
    };
    let mut binding = IdentityBinding::default();
    let mut summary = RunSummary::default();
    users::migrate(&ctx, &mut binding, &mut summary, false)?;
    projects::migrate(&ctx, &mut binding, &mut summary)?;
    issues::migrate(&ctx, &mut binding, &mut summary)?;
    relations::migrate(&ctx, &mut summary)?;
    Ok(summary)
}

/// Drain the deferred relation queue against the accumulated issue cache.
pub fn run_drain(config: &Config, client: &dyn TargetClient) -> Result<RunSummary> {
    let store = Store::open(&config.store_file)?;
    let mut summary = RunSummary::default();
    relations::drain_pending(client, &store, &mut summary)?;
    Ok(summary)
}

/// Forget previously-migrated projects so they can be re-migrated.
pub fn run_cleanup(config: &Config, codes: &[String]) -> Result<()> {
    let store = Store::open(&config.store_file)?;
    for code in codes {
        println!(" - cleaning project '{code}'");
        store.cleanup_project(code)?;
    }
    Ok(())
}
