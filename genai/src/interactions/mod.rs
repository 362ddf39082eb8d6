use crate::Result;
use async_trait::async_trait;

mod gemini;
pub use gemini::GeminiInteractions;

/// Remote status of an interaction.
///
/// Only `completed` and `failed` are terminal. Every other value, including
/// ones this client has never seen, means the interaction is still running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Completed,
    Failed,
    InProgress(String),
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::InProgress(_))
    }
}

impl From<&str> for Status {
    fn from(status: &str) -> Self {
        match status {
            "completed" => Status::Completed,
            "failed" => Status::Failed,
            other => Status::InProgress(other.to_string()),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Completed => write!(f, "completed"),
            Status::Failed => write!(f, "failed"),
            Status::InProgress(status) => write!(f, "{}", status),
        }
    }
}

/// Snapshot of a remote interaction. `content` is empty until the
/// interaction has completed.
#[derive(Debug, Clone)]
pub struct Interaction {
    pub id: String,
    pub status: Status,
    pub content: String,
}

pub struct CreateRequest<'a> {
    pub input: &'a str,
    pub agent: &'a str,
}

/// Client side of the asynchronous interactions API.
#[async_trait]
pub trait Interactions {
    /// Submits a background interaction and returns its id.
    async fn create<'a>(&self, request: CreateRequest<'a>) -> Result<String>;

    async fn get(&self, interaction_id: &str) -> Result<Interaction>;

    async fn cancel(&self, interaction_id: &str) -> Result<()>;
}
