use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BasaltError {
    #[error("Kube error: {0}")]
    Kube(#[from] kube::Error),
    #[error("Conflict updating {kind} {name}: resource version is stale")]
    Conflict { kind: String, name: String },
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("{0}")]
    Command(CommandFailure),
    #[error("No reachable member in replica set {replica_set} ({members} probed)")]
    NoReachableMember { replica_set: String, members: usize },
    #[error("Timed out after {timeout:?} waiting for replica set {replica_set} to elect a primary")]
    ElectionTimeout {
        replica_set: String,
        timeout: Duration,
    },
    #[error("Invalid shard key {0:?}")]
    InvalidShardKey(String),
    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Reconciliation exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("General error: {0}")]
    Other(String),
}

impl BasaltError {
    /// Stable, machine-readable reason written into status conditions.
    pub fn reason(&self) -> &'static str {
        match self {
            BasaltError::Kube(_) => "KubeApiError",
            BasaltError::Conflict { .. } => "Conflict",
            BasaltError::Mongo(_) => "DatabaseUnreachable",
            BasaltError::Command(_) => "CommandFailed",
            BasaltError::NoReachableMember { .. } => "NoReachableMember",
            BasaltError::ElectionTimeout { .. } => "ElectionTimeout",
            BasaltError::InvalidShardKey(_) => "InvalidShardKey",
            BasaltError::MissingObjectKey(_) => "MissingObjectKey",
            BasaltError::Serde(_) => "SerializationError",
            BasaltError::DeadlineExceeded(_) => "DeadlineExceeded",
            BasaltError::Config(_) => "ConfigError",
            BasaltError::Other(_) => "Error",
        }
    }

    /// Connectivity and timing failures that usually clear up on their own
    /// while pods are still starting.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BasaltError::Mongo(_)
                | BasaltError::NoReachableMember { .. }
                | BasaltError::ElectionTimeout { .. }
                | BasaltError::DeadlineExceeded(_)
        )
    }

    pub fn command_failure(&self) -> Option<&CommandFailure> {
        match self {
            BasaltError::Command(failure) => Some(failure),
            _ => None,
        }
    }
}

/// A database command that the server answered with `ok: 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub command: String,
    pub code: Option<i32>,
    pub code_name: Option<String>,
    pub message: String,
}

impl CommandFailure {
    pub fn new(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            code: None,
            code_name: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: i32, code_name: impl Into<String>) -> Self {
        self.code = Some(code);
        self.code_name = Some(code_name.into());
        self
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command {} failed", self.command)?;
        if let Some(code) = self.code {
            match &self.code_name {
                Some(name) => write!(f, " ({name}, code {code})")?,
                None => write!(f, " (code {code})")?,
            }
        }
        write!(f, ": {}", self.message)
    }
}

impl From<CommandFailure> for BasaltError {
    fn from(failure: CommandFailure) -> Self {
        BasaltError::Command(failure)
    }
}

pub type Result<T> = std::result::Result<T, BasaltError>;
