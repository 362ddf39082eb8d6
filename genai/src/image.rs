//! Infographic generation through the Gemini `generateContent` endpoint.

use crate::sanitize::sanitize_prompt;
use crate::storage::write_file;
use crate::{API_KEY_HEADER, API_VERSION, DEFAULT_BASE_URL};
use crate::{Error, Result};
use base64::{Engine as _, engine::general_purpose};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// image generation is slow
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct ImageConfig {
    pub model: String,
    pub aspect_ratio: String,
    pub image_size: String,
}

#[derive(Debug, Clone)]
pub struct ImageResult {
    pub image_path: PathBuf,
    pub response_path: PathBuf,
}

pub struct GeminiImages {
    client: Client,
    api_key: String,
    base_url: String,
    image_lang: String,
    images_dir: PathBuf,
    responses_dir: PathBuf,
}

impl GeminiImages {
    pub fn new(
        api_key: String,
        image_lang: String,
        images_dir: impl Into<PathBuf>,
        responses_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            image_lang,
            images_dir: images_dir.into(),
            responses_dir: responses_dir.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Wraps markdown content in the infographic instruction, in the
    /// configured image language.
    pub fn build_infographic_prompt(&self, markdown: &str) -> String {
        format!(
            "Take a good look at the content below and turn it into a single infographic image in {}.\n```\n{}\n```",
            self.image_lang,
            sanitize_prompt(markdown)
        )
    }

    /// Generates an image and saves it as `<images_dir>/<timestamp>.png`,
    /// alongside the raw response in `<responses_dir>/<timestamp>_image.json`.
    pub async fn generate(
        &self,
        prompt: &str,
        config: &ImageConfig,
        timestamp: &str,
    ) -> Result<ImageResult> {
        let prompt = sanitize_prompt(prompt);
        let request = GenerateContentRequest::new(&prompt, config);
        let url = format!(
            "{}/{}/models/{}:generateContent",
            self.base_url, API_VERSION, config.model
        );

        tracing::info!(
            model = %config.model,
            aspect_ratio = %config.aspect_ratio,
            size = %config.image_size,
            "Generating image"
        );
        tracing::trace!(url = %url, method = "POST", body = %serde_json::to_string(&request)?, "HTTP Request");

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        tracing::trace!(
            url = %url,
            status_code = status.as_u16(),
            body = %String::from_utf8_lossy(&body),
            "HTTP Response"
        );

        if status != StatusCode::OK {
            return Err(Error::ImageGeneration(format!(
                "unexpected status code: {}, body: {}",
                status.as_u16(),
                String::from_utf8_lossy(&body)
            )));
        }

        let image = decode_image(&body)?;

        let image_path = self.images_dir.join(format!("{timestamp}.png"));
        let response_path = self.responses_dir.join(format!("{timestamp}_image.json"));

        save(&image_path, &image).await?;
        tracing::info!(path = %image_path.display(), "Image saved");

        save(&response_path, &body).await?;
        tracing::info!(path = %response_path.display(), "Raw response saved");

        Ok(ImageResult {
            image_path,
            response_path,
        })
    }
}

async fn save(path: &Path, data: &[u8]) -> Result<()> {
    write_file(path, data)
        .await
        .map_err(|source| Error::Persistence {
            path: path.to_path_buf(),
            source,
        })
}

fn decode_image(body: &[u8]) -> Result<Vec<u8>> {
    let response: GenerateContentResponse = serde_json::from_slice(body)?;
    let data = response
        .first_inline_data()
        .ok_or_else(|| Error::ImageGeneration("no image data found in response".to_string()))?;

    general_purpose::STANDARD
        .decode(data)
        .map_err(|e| Error::ImageGeneration(format!("failed to decode base64 image data: {e}")))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    tools: Vec<SearchTool>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<TextPart<'a>>,
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct SearchTool {
    google_search: EmptyObject,
}

#[derive(Serialize)]
struct EmptyObject {}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: [&'static str; 2],
    image_config: ImageOptions<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageOptions<'a> {
    aspect_ratio: &'a str,
    image_size: &'a str,
}

impl<'a> GenerateContentRequest<'a> {
    fn new(prompt: &'a str, config: &'a ImageConfig) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![TextPart { text: prompt }],
            }],
            tools: vec![SearchTool {
                google_search: EmptyObject {},
            }],
            generation_config: GenerationConfig {
                response_modalities: ["TEXT", "IMAGE"],
                image_config: ImageOptions {
                    aspect_ratio: &config.aspect_ratio,
                    image_size: &config.image_size,
                },
            },
        }
    }
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
struct InlineData {
    #[serde(default)]
    data: String,
}

impl GenerateContentResponse {
    fn first_inline_data(&self) -> Option<&str> {
        self.candidates
            .iter()
            .filter_map(|candidate| candidate.content.as_ref())
            .flat_map(|content| content.parts.iter())
            .filter_map(|part| part.inline_data.as_ref())
            .map(|inline| inline.data.as_str())
            .find(|data| !data.is_empty())
    }
}
