use colored::Colorize;

use crate::client::{NewProject, RemoteProject};
use crate::error::{MigrateError, Result};
use crate::migrate::{IdentityBinding, RunContext, RunSummary};

/// Bind every selected source project (plus its internal companion when
/// configured) and create its versions. The destination identifier is the
/// lowercased source key, which makes the lookup idempotent across runs.
pub fn migrate(
    ctx: &RunContext,
    binding: &mut IdentityBinding,
    summary: &mut RunSummary,
) -> Result<()> {
    println!("{}", "Migrating projects...".green());
    let remote = ctx.client.projects()?;

    for (id, project) in &ctx.dataset.projects {
        let identifier = project.key.to_lowercase();
        let destination = match remote.iter().find(|r| r.identifier == identifier) {
            Some(found) => {
                println!(" - '{}' already present ({})", project.key, found.id);
                found.clone()
            }
            None => {
                let created = create(
                    ctx,
                    &NewProject {
                        name: project.name.clone(),
                        identifier: identifier.clone(),
                        description: project.description.clone(),
                        is_public: false,
                        parent_id: None,
                    },
                    &project.key,
                )?;
                summary.projects_created += 1;
                created
            }
        };

        if ctx.config.has_internal_projects() {
            let internal_identifier = format!(
                "{identifier}{}",
                ctx.config.internal_project_postfix.to_lowercase()
            );
            let internal = match remote.iter().find(|r| r.identifier == internal_identifier) {
                Some(found) => found.clone(),
                None => {
                    let created = create(
                        ctx,
                        &NewProject {
                            name: format!("{} (internal)", project.name),
                            identifier: internal_identifier,
                            description: project.description.clone(),
                            is_public: false,
                            parent_id: Some(destination.id),
                        },
                        &project.key,
                    )?;
                    summary.projects_created += 1;
                    created
                }
            };
            binding.internal_projects.insert(id.clone(), internal.id);
        }

        binding.projects.insert(id.clone(), destination.id);
        ctx.store.upsert_project_link(id, &identifier, destination.id)?;

        for (version_id, version) in ctx.dataset.versions_for(id) {
            let created =
                ctx.client
                    .create_version(destination.id, &version.name, &version.description)?;
            binding.versions.insert(version_id.clone(), created);
            summary.versions_created += 1;
        }
    }
    Ok(())
}

fn create(ctx: &RunContext, project: &NewProject, key: &str) -> Result<RemoteProject> {
    let created = ctx
        .client
        .create_project(project)
        .map_err(|e| MigrateError::CreateFailed {
            kind: "project",
            key: key.to_string(),
            source: Box::new(e),
        })?;
    println!(" - created '{}' ({})", project.identifier, created.id);
    Ok(created)
}
