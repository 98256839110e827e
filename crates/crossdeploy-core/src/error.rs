use thiserror::Error;

#[derive(Debug, Error)]
pub enum StackError {
    #[error("not initialized: run 'crossdeploy init'")]
    NotInitialized,

    #[error("invalid account id '{0}': must be exactly 12 digits")]
    InvalidAccountId(String),

    #[error("invalid branch '{0}': expected one of main, master, develop")]
    InvalidBranch(String),

    #[error("invalid environment '{0}': expected one of dev, staging, prod")]
    InvalidEnvironment(String),

    #[error("invalid reference event '{0}': expected one of created, updated, deleted")]
    InvalidEvent(String),

    #[error("invalid {kind} '{value}': {reason}")]
    InvalidName {
        kind: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid pipeline definition: {0}")]
    InvalidDefinition(String),

    #[error("invalid trigger rules: {0}")]
    InvalidTrigger(String),

    #[error("unresolved reference '{0}'")]
    UnresolvedReference(String),

    #[error("access denied: {principal} is not allowed to perform {action} on {resource}")]
    AccessDenied {
        principal: String,
        action: String,
        resource: String,
    },

    #[error("object '{key}' must be encrypted with {expected}, got {actual}")]
    KeyMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("no active execution")]
    NoActiveExecution,

    #[error("build failed: {0}")]
    BuildFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StackError>;
