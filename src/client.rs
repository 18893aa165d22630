use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

/// An enumerated destination value (status, tracker, priority, role,
/// custom field), as returned by the target's list endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteItem {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteUser {
    pub id: u64,
    pub login: String,
    #[serde(default)]
    pub mail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteProject {
    pub id: u64,
    pub name: String,
    pub identifier: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
    pub login: String,
    pub mail: String,
    pub firstname: String,
    pub lastname: String,
    pub status: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewProject {
    pub name: String,
    pub identifier: String,
    pub description: String,
    pub is_public: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomFieldPayload {
    pub id: u64,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewIssue {
    pub project_id: u64,
    pub tracker_id: u64,
    pub priority_id: u64,
    pub subject: String,
    pub custom_fields: Vec<CustomFieldPayload>,
    pub is_private: bool,
    pub estimated_hours: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_version_id: Option<u64>,
}

/// Partial issue update; only set fields are sent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IssueUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_issue_id: Option<u64>,
}

/// Synchronous operations against the live target tracker. Every call
/// blocks the pipeline; a transport failure surfaces as
/// [`MigrateError::Transport`] and the caller decides whether it is fatal.
pub trait TargetClient {
    fn statuses(&self) -> Result<Vec<RemoteItem>>;
    fn trackers(&self) -> Result<Vec<RemoteItem>>;
    fn priorities(&self) -> Result<Vec<RemoteItem>>;
    fn roles(&self) -> Result<Vec<RemoteItem>>;
    fn custom_fields(&self) -> Result<Vec<RemoteItem>>;
    fn users(&self) -> Result<Vec<RemoteUser>>;
    fn projects(&self) -> Result<Vec<RemoteProject>>;
    /// User ids holding membership in a destination project.
    fn memberships(&self, project_id: u64) -> Result<Vec<u64>>;

    fn create_user(&self, user: &NewUser) -> Result<RemoteUser>;
    fn update_user_status(&self, id: u64, status: u8) -> Result<()>;
    fn create_project(&self, project: &NewProject) -> Result<RemoteProject>;
    fn create_version(&self, project_id: u64, name: &str, description: &str) -> Result<u64>;
    fn create_issue(&self, issue: &NewIssue) -> Result<u64>;
    fn update_issue(&self, id: u64, update: &IssueUpdate) -> Result<()>;
    fn create_membership(&self, project_id: u64, user_id: u64, role_id: u64) -> Result<()>;
    fn create_relation(&self, from: u64, to: u64, kind: &str) -> Result<()>;
}

/// REST connector for the target tracker's JSON API.
pub struct RestClient {
    http: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
}

const LIST_LIMIT: u32 = 1000;

#[derive(Debug, Deserialize)]
struct ItemList {
    #[serde(
        alias = "issue_statuses",
        alias = "trackers",
        alias = "issue_priorities",
        alias = "roles",
        alias = "custom_fields"
    )]
    items: Vec<RemoteItem>,
}

#[derive(Debug, Deserialize)]
struct UserList {
    users: Vec<RemoteUser>,
}

#[derive(Debug, Deserialize)]
struct ProjectList {
    projects: Vec<RemoteProject>,
}

#[derive(Debug, Deserialize)]
struct MembershipList {
    memberships: Vec<Membership>,
}

#[derive(Debug, Deserialize)]
struct Membership {
    user: MembershipUser,
}

#[derive(Debug, Deserialize)]
struct MembershipUser {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct UserWrap {
    user: RemoteUser,
}

#[derive(Debug, Deserialize)]
struct ProjectWrap {
    project: RemoteProject,
}

#[derive(Debug, Deserialize)]
struct CreatedWrap {
    #[serde(alias = "issue", alias = "version", alias = "membership")]
    created: CreatedId,
}

#[derive(Debug, Deserialize)]
struct CreatedId {
    id: u64,
}

impl RestClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            http: reqwest::blocking::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let sep = if path.contains('?') { '&' } else { '?' };
        let url = format!("{}{path}{sep}limit={LIST_LIMIT}", self.base_url);
        let response = self
            .http
            .get(url)
            .header("X-Api-Key", &self.api_key)
            .send()?;
        Self::check(&response.status(), path)?;
        Ok(response.json()?)
    }

    fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(url)
            .header("X-Api-Key", &self.api_key)
            .json(body)
            .send()?;
        Self::check(&response.status(), path)?;
        Ok(response.json()?)
    }

    fn put(&self, path: &str, body: &serde_json::Value) -> Result<()> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .put(url)
            .header("X-Api-Key", &self.api_key)
            .json(body)
            .send()?;
        Self::check(&response.status(), path)
    }

    fn check(status: &reqwest::StatusCode, path: &str) -> Result<()> {
        if status.is_success() {
            Ok(())
        } else {
            Err(MigrateError::Transport(format!(
                "{path} returned HTTP {status}"
            )))
        }
    }
}

impl TargetClient for RestClient {
    fn statuses(&self) -> Result<Vec<RemoteItem>> {
        Ok(self.get::<ItemList>("/issue_statuses.json")?.items)
    }

    fn trackers(&self) -> Result<Vec<RemoteItem>> {
        Ok(self.get::<ItemList>("/trackers.json")?.items)
    }

    fn priorities(&self) -> Result<Vec<RemoteItem>> {
        Ok(self
            .get::<ItemList>("/enumerations/issue_priorities.json")?
            .items)
    }

    fn roles(&self) -> Result<Vec<RemoteItem>> {
        Ok(self.get::<ItemList>("/roles.json")?.items)
    }

    fn custom_fields(&self) -> Result<Vec<RemoteItem>> {
        Ok(self.get::<ItemList>("/custom_fields.json")?.items)
    }

    fn users(&self) -> Result<Vec<RemoteUser>> {
        // "status=" asks for users in every state, not just active ones
        Ok(self.get::<UserList>("/users.json?status=")?.users)
    }

    fn projects(&self) -> Result<Vec<RemoteProject>> {
        Ok(self.get::<ProjectList>("/projects.json")?.projects)
    }

    fn memberships(&self, project_id: u64) -> Result<Vec<u64>> {
        let list: MembershipList = self.get(&format!("/projects/{project_id}/memberships.json"))?;
        Ok(list.memberships.into_iter().map(|m| m.user.id).collect())
    }

    fn create_user(&self, user: &NewUser) -> Result<RemoteUser> {
        let wrap: UserWrap = self.post("/users.json", &serde_json::json!({ "user": user }))?;
        Ok(wrap.user)
    }

    fn update_user_status(&self, id: u64, status: u8) -> Result<()> {
        self.put(
            &format!("/users/{id}.json"),
            &serde_json::json!({ "user": { "status": status } }),
        )
    }

    fn create_project(&self, project: &NewProject) -> Result<RemoteProject> {
        let wrap: ProjectWrap =
            self.post("/projects.json", &serde_json::json!({ "project": project }))?;
        Ok(wrap.project)
    }

    fn create_version(&self, project_id: u64, name: &str, description: &str) -> Result<u64> {
        let wrap: CreatedWrap = self.post(
            &format!("/projects/{project_id}/versions.json"),
            &serde_json::json!({ "version": { "name": name, "description": description } }),
        )?;
        Ok(wrap.created.id)
    }

    fn create_issue(&self, issue: &NewIssue) -> Result<u64> {
        let wrap: CreatedWrap = self.post("/issues.json", &serde_json::json!({ "issue": issue }))?;
        Ok(wrap.created.id)
    }

    fn update_issue(&self, id: u64, update: &IssueUpdate) -> Result<()> {
        self.put(
            &format!("/issues/{id}.json"),
            &serde_json::json!({ "issue": update }),
        )
    }

    fn create_membership(&self, project_id: u64, user_id: u64, role_id: u64) -> Result<()> {
        let _: CreatedWrap = self.post(
            &format!("/projects/{project_id}/memberships.json"),
            &serde_json::json!({ "membership": { "user_id": user_id, "role_ids": [role_id] } }),
        )?;
        Ok(())
    }

    fn create_relation(&self, from: u64, to: u64, kind: &str) -> Result<()> {
        let _: serde_json::Value = self.post(
            &format!("/issues/{from}/relations.json"),
            &serde_json::json!({ "relation": { "issue_to_id": to, "relation_type": kind } }),
        )?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// In-memory stand-in for the target tracker, recording every mutation.
    #[derive(Default)]
    pub(crate) struct FakeClient {
        pub statuses: Vec<RemoteItem>,
        pub trackers: Vec<RemoteItem>,
        pub priorities: Vec<RemoteItem>,
        pub roles: Vec<RemoteItem>,
        pub custom_fields: Vec<RemoteItem>,
        pub users: RefCell<Vec<RemoteUser>>,
        pub projects: RefCell<Vec<RemoteProject>>,
        pub memberships: RefCell<HashMap<u64, Vec<u64>>>,
        pub next_id: RefCell<u64>,
        pub created_users: RefCell<Vec<NewUser>>,
        pub created_projects: RefCell<Vec<NewProject>>,
        pub created_versions: RefCell<Vec<(u64, String)>>,
        pub created_issues: RefCell<Vec<NewIssue>>,
        pub issue_updates: RefCell<Vec<(u64, IssueUpdate)>>,
        pub status_updates: RefCell<Vec<(u64, u8)>>,
        pub created_memberships: RefCell<Vec<(u64, u64, u64)>>,
        pub created_relations: RefCell<Vec<(u64, u64, String)>>,
        pub fail_relations: RefCell<bool>,
    }

    impl FakeClient {
        pub(crate) fn new() -> Self {
            Self {
                next_id: RefCell::new(100),
                ..Self::default()
            }
        }

        pub(crate) fn with_items(
            statuses: &[(u64, &str)],
            trackers: &[(u64, &str)],
            priorities: &[(u64, &str)],
        ) -> Self {
            let items = |pairs: &[(u64, &str)]| {
                pairs
                    .iter()
                    .map(|(id, name)| RemoteItem {
                        id: *id,
                        name: name.to_string(),
                    })
                    .collect()
            };
            Self {
                statuses: items(statuses),
                trackers: items(trackers),
                priorities: items(priorities),
                roles: items(&[(1, "Reporter")]),
                ..Self::new()
            }
        }

        fn allocate(&self) -> u64 {
            let mut next = self.next_id.borrow_mut();
            *next += 1;
            *next
        }
    }

    impl TargetClient for FakeClient {
        fn statuses(&self) -> Result<Vec<RemoteItem>> {
            Ok(self.statuses.clone())
        }

        fn trackers(&self) -> Result<Vec<RemoteItem>> {
            Ok(self.trackers.clone())
        }

        fn priorities(&self) -> Result<Vec<RemoteItem>> {
            Ok(self.priorities.clone())
        }

        fn roles(&self) -> Result<Vec<RemoteItem>> {
            Ok(self.roles.clone())
        }

        fn custom_fields(&self) -> Result<Vec<RemoteItem>> {
            Ok(self.custom_fields.clone())
        }

        fn users(&self) -> Result<Vec<RemoteUser>> {
            Ok(self.users.borrow().clone())
        }

        fn projects(&self) -> Result<Vec<RemoteProject>> {
            Ok(self.projects.borrow().clone())
        }

        fn memberships(&self, project_id: u64) -> Result<Vec<u64>> {
            Ok(self
                .memberships
                .borrow()
                .get(&project_id)
                .cloned()
                .unwrap_or_default())
        }

        fn create_user(&self, user: &NewUser) -> Result<RemoteUser> {
            let created = RemoteUser {
                id: self.allocate(),
                login: user.login.clone(),
                mail: user.mail.clone(),
            };
            self.users.borrow_mut().push(created.clone());
            self.created_users.borrow_mut().push(user.clone());
            Ok(created)
        }

        fn update_user_status(&self, id: u64, status: u8) -> Result<()> {
            self.status_updates.borrow_mut().push((id, status));
            Ok(())
        }

        fn create_project(&self, project: &NewProject) -> Result<RemoteProject> {
            let created = RemoteProject {
                id: self.allocate(),
                name: project.name.clone(),
                identifier: project.identifier.clone(),
            };
            self.projects.borrow_mut().push(created.clone());
            self.created_projects.borrow_mut().push(project.clone());
            Ok(created)
        }

        fn create_version(&self, project_id: u64, name: &str, _description: &str) -> Result<u64> {
            let id = self.allocate();
            self.created_versions
                .borrow_mut()
                .push((project_id, name.to_string()));
            Ok(id)
        }

        fn create_issue(&self, issue: &NewIssue) -> Result<u64> {
            let id = self.allocate();
            self.created_issues.borrow_mut().push(issue.clone());
            Ok(id)
        }

        fn update_issue(&self, id: u64, update: &IssueUpdate) -> Result<()> {
            self.issue_updates.borrow_mut().push((id, update.clone()));
            Ok(())
        }

        fn create_membership(&self, project_id: u64, user_id: u64, role_id: u64) -> Result<()> {
            self.memberships
                .borrow_mut()
                .entry(project_id)
                .or_default()
                .push(user_id);
            self.created_memberships
                .borrow_mut()
                .push((project_id, user_id, role_id));
            Ok(())
        }

        fn create_relation(&self, from: u64, to: u64, kind: &str) -> Result<()> {
            if *self.fail_relations.borrow() {
                return Err(MigrateError::Transport("relation endpoint down".into()));
            }
            self.created_relations
                .borrow_mut()
                .push((from, to, kind.to_string()));
            Ok(())
        }
    }
}
