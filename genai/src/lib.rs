mod error;
pub mod image;
pub mod interactions;
mod research;
pub mod sanitize;
pub mod storage;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

pub use research::{DeepResearch, PollConfig, ResearchResult};

/// Base URL of the Gemini API.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// API version segment used by every endpoint.
pub(crate) const API_VERSION: &str = "v1beta";

/// Header carrying the API key on every request.
pub(crate) const API_KEY_HEADER: &str = "x-goog-api-key";
