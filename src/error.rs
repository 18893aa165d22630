use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("source export at {path} is unusable: {reason}")]
    ExportUnreadable { path: String, reason: String },

    #[error("{count} unresolved {kind} binding(s); fix the alias table or the target enumeration")]
    UnresolvedTaxonomy { kind: &'static str, count: usize },

    #[error("default role '{0}' not found on the target")]
    RoleNotFound(String),

    #[error("target API transport error: {0}")]
    Transport(String),

    #[error("failed to create {kind} '{key}': {source}")]
    CreateFailed {
        kind: &'static str,
        key: String,
        #[source]
        source: Box<MigrateError>,
    },

    #[error("no {kind} binding for source id '{key}' (binding phases ran out of order?)")]
    MissingBinding { kind: &'static str, key: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

impl MigrateError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::ExportUnreadable { .. } => "export_unreadable",
            Self::UnresolvedTaxonomy { .. } => "unresolved_taxonomy",
            Self::RoleNotFound(_) => "role_not_found",
            Self::Transport(_) => "transport",
            Self::CreateFailed { .. } => "create_failed",
            Self::MissingBinding { .. } => "missing_binding",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::Yaml(_) => "yaml_error",
            Self::Db(_) => "db_error",
        }
    }
}

impl From<reqwest::Error> for MigrateError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MigrateError>;
