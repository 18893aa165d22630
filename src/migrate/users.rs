use std::collections::HashSet;

use colored::Colorize;

use crate::client::NewUser;
use crate::error::{MigrateError, Result};
use crate::migrate::{IdentityBinding, RunContext, RunSummary};
use crate::model::User;

const ACTIVE_STATUS: u8 = 1;
const LOCKED_STATUS: u8 = 3;

/// Bind every source user to a destination user, creating the ones that
/// do not exist yet. Lookup is by lowercased login; a mail address is
/// never allowed to reach the target twice.
pub fn migrate(
    ctx: &RunContext,
    binding: &mut IdentityBinding,
    summary: &mut RunSummary,
    patch_existing: bool,
) -> Result<()> {
    println!("{}", "Migrating users...".green());
    let remote_users = ctx.client.users()?;
    let mut used_mails: HashSet<String> = HashSet::new();

    for (id, user) in &ctx.dataset.users {
        let login = user.login.trim().to_lowercase();
        let mut mail = format!(
            "{}{}",
            user.mail.trim().to_lowercase(),
            ctx.config.mail_domain_postfix
        );
        let existing = remote_users.iter().find(|r| r.login.to_lowercase() == login);

        let claimed = used_mails.contains(&mail)
            || existing.is_some_and(|found| {
                remote_users.iter().any(|r| r.mail == mail && r.id != found.id)
            });
        if claimed {
            mail = format!("{}_{mail}", random_token()?);
            println!(
                " - {} '{mail}' for '{login}'",
                "mail already claimed, using".yellow()
            );
            summary.decorated_mails += 1;
        }

        let status = if user.active { ACTIVE_STATUS } else { LOCKED_STATUS };
        let destination_id = match existing {
            Some(found) => {
                if patch_existing {
                    ctx.client.update_user_status(found.id, status)?;
                }
                summary.users_existing += 1;
                found.id
            }
            None => {
                let (firstname, lastname) = derive_names(user);
                let created = ctx
                    .client
                    .create_user(&NewUser {
                        login: login.clone(),
                        mail: mail.clone(),
                        firstname,
                        lastname,
                        status,
                    })
                    .map_err(|e| MigrateError::CreateFailed {
                        kind: "user",
                        key: login.clone(),
                        source: Box::new(e),
                    })?;
                println!(" - created '{login}' ({})", created.id);
                summary.users_created += 1;
                created.id
            }
        };

        used_mails.insert(mail);
        binding.users.insert(id.clone(), destination_id);
    }
    Ok(())
}

/// First/last name, falling back to splitting the display name once and
/// finally to "Unknown". The target rejects empty name fields.
fn derive_names(user: &User) -> (String, String) {
    let mut first = user.first_name.trim().to_string();
    let mut last = user.last_name.trim().to_string();
    if first.is_empty() {
        let mut parts = user.display_name.trim().splitn(2, ' ');
        first = parts.next().unwrap_or_default().to_string();
        if last.is_empty() {
            if let Some(rest) = parts.next() {
                last = rest.trim().to_string();
            }
        }
    }
    if first.is_empty() {
        first = "Unknown".into();
    }
    if last.is_empty() {
        last = "Unknown".into();
    }
    (first, last)
}

fn random_token() -> Result<String> {
    let mut bytes = [0u8; 8];
    getrandom::fill(&mut bytes).map_err(|e| MigrateError::Io(std::io::Error::other(e)))?;
    Ok(bytes.iter().map(|b| format!("{b:02x}")).collect())
}
