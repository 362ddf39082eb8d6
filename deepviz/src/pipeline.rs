use crate::config::Config;
use crate::error::{Error, Result};
use crate::util;
use genai::image::{GeminiImages, ImageResult};
use genai::interactions::GeminiInteractions;
use genai::{DeepResearch, ResearchResult};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Full,
    ResearchOnly,
    ImageOnly,
}

impl Mode {
    pub fn from_flags(research_only: bool, image_only: bool) -> Self {
        match (research_only, image_only) {
            (true, _) => Mode::ResearchOnly,
            (false, true) => Mode::ImageOnly,
            (false, false) => Mode::Full,
        }
    }

    fn runs_research(self) -> bool {
        self != Mode::ImageOnly
    }

    fn runs_image(self) -> bool {
        self != Mode::ResearchOnly
    }
}

#[derive(Debug)]
pub struct Summary {
    pub timestamp: String,
    pub research_path: Option<PathBuf>,
    pub image_path: Option<PathBuf>,
    pub output_dir: PathBuf,
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Pipeline Completed ===")?;
        writeln!(f, "Timestamp: {}", self.timestamp)?;
        if let Some(path) = &self.research_path {
            writeln!(f, "Research: {}", path.display())?;
        }
        if let Some(path) = &self.image_path {
            writeln!(f, "Image: {}", path.display())?;
        }
        write!(f, "Output directory: {}", self.output_dir.display())
    }
}

/// Research followed by infographic generation, for one timestamped run.
pub struct Orchestrator {
    config: Config,
    mode: Mode,
    open_image: bool,
    base_url: String,
}

impl Orchestrator {
    pub fn new(config: Config, mode: Mode, open_image: bool) -> Self {
        Self {
            config,
            mode,
            open_image,
            base_url: genai::DEFAULT_BASE_URL.to_string(),
        }
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    pub async fn run(
        self,
        prompt: &str,
        timestamp: &str,
        cancel: &CancellationToken,
    ) -> Result<Summary> {
        if self.config.api_key.is_empty() {
            return Err(Error::MissingApiKey);
        }

        tracing::info!("Pipeline started");
        tracing::info!(
            timestamp,
            output_dir = %self.config.output_dir.display(),
            mode = ?self.mode,
            "Configuration"
        );

        let research = if self.mode.runs_research() {
            Some(self.research(prompt, timestamp, cancel).await?)
        } else {
            None
        };

        let image = if self.mode.runs_image() {
            // image-only mode draws the raw prompt
            let content = research
                .as_ref()
                .map(|research| research.content.as_str())
                .unwrap_or(prompt);
            Some(self.image(content, timestamp, cancel).await?)
        } else {
            None
        };

        tracing::info!("Pipeline completed");

        Ok(Summary {
            timestamp: timestamp.to_string(),
            research_path: research.map(|research| research.markdown_path),
            image_path: image.map(|image| image.image_path),
            output_dir: self.config.output_dir,
        })
    }

    async fn research(
        &self,
        prompt: &str,
        timestamp: &str,
        cancel: &CancellationToken,
    ) -> Result<ResearchResult> {
        tracing::info!("Starting Deep Research");

        let research = DeepResearch::new(
            GeminiInteractions::with_base_url(self.config.api_key.clone(), self.base_url.clone()),
            self.config.deep_research_agent.clone(),
            self.config.poll_config(),
            self.config.research_dir(),
        );
        let result = research.execute(prompt, timestamp, cancel).await?;

        tracing::info!(path = %result.markdown_path.display(), "Deep Research completed");
        Ok(result)
    }

    async fn image(
        &self,
        content: &str,
        timestamp: &str,
        cancel: &CancellationToken,
    ) -> Result<ImageResult> {
        tracing::info!("Starting image generation");

        let client = GeminiImages::new(
            self.config.api_key.clone(),
            self.config.image_lang.clone(),
            self.config.images_dir(),
            self.config.responses_dir(),
        )?
        .with_base_url(&self.base_url);
        let prompt = client.build_infographic_prompt(content);
        let image_config = self.config.image_config();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(genai::Error::Cancelled {
                    phase: "generating image",
                    interaction_id: None,
                }
                .into());
            }
            result = client.generate(&prompt, &image_config, timestamp) => result?,
        };

        tracing::info!(image_path = %result.image_path.display(), "Image generation completed");

        if self.open_image && self.config.auto_open {
            if let Err(err) = util::open_file(&result.image_path) {
                tracing::info!(error = %err, "Failed to open image");
            }
        }

        Ok(result)
    }
}
