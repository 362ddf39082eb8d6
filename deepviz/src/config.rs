use crate::error::{Error, Result};
use genai::PollConfig;
use genai::image::ImageConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_NAME: &str = "deepviz";
const CONFIG_FILE: &str = "config.yaml";
const ENV_PREFIX: &str = "DEEPVIZ_";
const FALLBACK_OUTPUT_DIR: &str = "/tmp/deepviz-output";

/// Environment lookup, injectable so tests never touch the process env.
pub type Env<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Reads a process environment variable, treating empty values as unset.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub output_dir: PathBuf,
    pub api_key: String,
    pub deep_research_agent: String,
    /// Seconds between two status checks.
    pub poll_interval: u64,
    /// Seconds from submission until research is abandoned.
    pub poll_timeout: u64,
    pub model: String,
    pub aspect_ratio: String,
    pub image_size: String,
    pub image_lang: String,
    pub auto_open: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    output_dir: Option<PathBuf>,
    api_key: Option<String>,
    deep_research_agent: Option<String>,
    poll_interval: Option<u64>,
    poll_timeout: Option<u64>,
    model: Option<String>,
    aspect_ratio: Option<String>,
    image_size: Option<String>,
    image_lang: Option<String>,
    auto_open: Option<bool>,
}

impl Config {
    pub fn defaults(env: Env) -> Self {
        Self {
            output_dir: default_output_dir(env),
            api_key: String::new(),
            deep_research_agent: "deep-research-pro-preview-12-2025".to_string(),
            poll_interval: 10,
            poll_timeout: 600,
            model: "gemini-3-pro-image-preview".to_string(),
            aspect_ratio: "16:9".to_string(),
            image_size: "2K".to_string(),
            image_lang: "Japanese".to_string(),
            auto_open: true,
        }
    }

    pub fn load(config_dir: Option<&Path>) -> Result<Self> {
        Self::load_with(config_dir, &process_env)
    }

    /// Builds the configuration from defaults, then `config.yaml` in
    /// `config_dir` (if present), then the environment.
    pub fn load_with(config_dir: Option<&Path>, env: Env) -> Result<Self> {
        let dir = match config_dir {
            Some(dir) => dir.to_path_buf(),
            None => default_config_dir(env)?,
        };

        let mut config = Self::defaults(env);
        if let Some(file) = ConfigFile::read(&dir.join(CONFIG_FILE))? {
            config.merge(file);
        }
        config.apply_env(env)?;
        config.validate()?;

        Ok(config)
    }

    fn merge(&mut self, file: ConfigFile) {
        let ConfigFile {
            output_dir,
            api_key,
            deep_research_agent,
            poll_interval,
            poll_timeout,
            model,
            aspect_ratio,
            image_size,
            image_lang,
            auto_open,
        } = file;

        if let Some(v) = output_dir {
            self.output_dir = v;
        }
        if let Some(v) = api_key {
            self.api_key = v;
        }
        if let Some(v) = deep_research_agent {
            self.deep_research_agent = v;
        }
        if let Some(v) = poll_interval {
            self.poll_interval = v;
        }
        if let Some(v) = poll_timeout {
            self.poll_timeout = v;
        }
        if let Some(v) = model {
            self.model = v;
        }
        if let Some(v) = aspect_ratio {
            self.aspect_ratio = v;
        }
        if let Some(v) = image_size {
            self.image_size = v;
        }
        if let Some(v) = image_lang {
            self.image_lang = v;
        }
        if let Some(v) = auto_open {
            self.auto_open = v;
        }
    }

    fn apply_env(&mut self, env: Env) -> Result<()> {
        let var = |key: &str| env(&format!("{ENV_PREFIX}{}", key.to_uppercase()));
        // DEEPVIZ_* wins over GEMINI_*
        let var_or = |key: &str, fallback: &str| var(key).or_else(|| env(fallback));

        if let Some(v) = var("output_dir") {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = var_or("api_key", "GEMINI_API_KEY") {
            self.api_key = v;
        }
        if let Some(v) = var_or("deep_research_agent", "GEMINI_DEEP_RESEARCH_AGENT") {
            self.deep_research_agent = v;
        }
        if let Some(v) = var("poll_interval") {
            self.poll_interval = parse_number("poll_interval", &v)?;
        }
        if let Some(v) = var("poll_timeout") {
            self.poll_timeout = parse_number("poll_timeout", &v)?;
        }
        if let Some(v) = var_or("model", "GEMINI_MODEL") {
            self.model = v;
        }
        if let Some(v) = var("aspect_ratio") {
            self.aspect_ratio = v;
        }
        if let Some(v) = var("image_size") {
            self.image_size = v;
        }
        if let Some(v) = var("image_lang") {
            self.image_lang = v;
        }
        if let Some(v) = var("auto_open") {
            self.auto_open = parse_bool("auto_open", &v)?;
        }

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval == 0 {
            return Err(Error::Config(
                "poll_interval must be at least 1 second".to_string(),
            ));
        }
        if self.poll_timeout == 0 {
            return Err(Error::Config(
                "poll_timeout must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }

    /// Writes this configuration to `<config_dir>/config.yaml`.
    pub fn save(&self, config_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(config_dir).map_err(|source| Error::Directory {
            path: config_dir.to_path_buf(),
            source,
        })?;

        let path = config_dir.join(CONFIG_FILE);
        std::fs::write(&path, serde_yaml::to_string(self)?)?;
        Ok(path)
    }

    pub fn research_dir(&self) -> PathBuf {
        self.output_dir.join("research")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.output_dir.join("images")
    }

    pub fn responses_dir(&self) -> PathBuf {
        self.output_dir.join("responses")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.output_dir.join("logs")
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            self.research_dir(),
            self.images_dir(),
            self.responses_dir(),
            self.logs_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|source| Error::Directory { path: dir, source })?;
        }
        Ok(())
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(self.poll_interval),
            timeout: Duration::from_secs(self.poll_timeout),
            ..PollConfig::default()
        }
    }

    pub fn image_config(&self) -> ImageConfig {
        ImageConfig {
            model: self.model.clone(),
            aspect_ratio: self.aspect_ratio.clone(),
            image_size: self.image_size.clone(),
        }
    }

    /// Human-readable listing for `config show`, with the API key masked.
    pub fn show(&self) -> String {
        format!(
            "Current Configuration:\n  output_dir: {}\n  api_key: {}\n  deep_research_agent: {}\n  poll_interval: {}\n  poll_timeout: {}\n  model: {}\n  aspect_ratio: {}\n  image_size: {}\n  image_lang: {}\n  auto_open: {}\n",
            self.output_dir.display(),
            mask_api_key(&self.api_key),
            self.deep_research_agent,
            self.poll_interval,
            self.poll_timeout,
            self.model,
            self.aspect_ratio,
            self.image_size,
            self.image_lang,
            self.auto_open,
        )
    }
}

impl ConfigFile {
    fn read(path: &Path) -> Result<Option<Self>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        // an empty file parses as null
        if content.trim().is_empty() {
            return Ok(Some(Self::default()));
        }

        serde_yaml::from_str(&content)
            .map(Some)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))
    }
}

fn home_dir(env: Env) -> Option<PathBuf> {
    env("HOME").or_else(|| env("USERPROFILE")).map(PathBuf::from)
}

/// `$XDG_DATA_HOME/deepviz`, falling back to `~/.local/share/deepviz`.
pub fn default_output_dir(env: Env) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| home_dir(env).map(|home| home.join(".local").join("share")))
        .map(|data_home| data_home.join(APP_NAME))
        .unwrap_or_else(|| PathBuf::from(FALLBACK_OUTPUT_DIR))
}

/// `$XDG_CONFIG_HOME/deepviz`, falling back to `~/.config/deepviz`.
pub fn default_config_dir(env: Env) -> Result<PathBuf> {
    let config_home = match env("XDG_CONFIG_HOME") {
        Some(dir) => PathBuf::from(dir),
        None => home_dir(env)
            .ok_or_else(|| Error::Config("failed to get home directory".to_string()))?
            .join(".config"),
    };
    Ok(config_home.join(APP_NAME))
}

pub fn mask_api_key(api_key: &str) -> String {
    let chars: Vec<char> = api_key.chars().collect();
    match chars.len() {
        0 => "(not set)".to_string(),
        1..=8 => "****".to_string(),
        n => format!(
            "{}****{}",
            chars[..4].iter().collect::<String>(),
            chars[n - 4..].iter().collect::<String>()
        ),
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key}: invalid number {value:?}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => Err(Error::Config(format!("{key}: invalid boolean {value:?}"))),
    }
}
