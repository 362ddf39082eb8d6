use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid poll configuration: {0}")]
    InvalidPollConfig(String),

    #[error("failed to start research: {0}")]
    Submission(String),

    #[error("failed to poll research (interaction {interaction_id}): {message}")]
    Transport {
        interaction_id: String,
        message: String,
    },

    #[error("research failed. Interaction ID: {0}")]
    RemoteFailure(String),

    #[error(
        "polling timeout after {} seconds (interaction {interaction_id})",
        elapsed.as_secs()
    )]
    PollTimeout {
        interaction_id: String,
        elapsed: Duration,
    },

    #[error(
        "cancelled while {phase} (interaction {})",
        interaction_id.as_deref().unwrap_or("none")
    )]
    Cancelled {
        phase: &'static str,
        interaction_id: Option<String>,
    },

    #[error("failed to cancel research (interaction {interaction_id}): {message}")]
    Cancellation {
        interaction_id: String,
        message: String,
    },

    #[error("failed to save result to {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image generation failed: {0}")]
    ImageGeneration(String),

    #[error("Json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Http error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
}
