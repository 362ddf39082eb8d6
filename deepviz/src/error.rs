use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("either --prompt or --file must be specified")]
    MissingPrompt,

    #[error("prompt file is empty: {}", .0.display())]
    EmptyPromptFile(PathBuf),

    #[error("failed to read prompt file {}: {source}", path.display())]
    PromptFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("API key is not set (use DEEPVIZ_API_KEY, GEMINI_API_KEY or api_key in config.yaml)")]
    MissingApiKey,

    #[error("Config error: {0}")]
    Config(String),

    #[error("failed to create directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to initialize logging: {0}")]
    Logging(String),

    #[error(transparent)]
    Genai(#[from] genai::Error),

    #[error("Yaml error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
