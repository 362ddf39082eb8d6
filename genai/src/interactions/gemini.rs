use crate::interactions::{CreateRequest, Interaction, Interactions, Status};
use crate::sanitize::sanitize_prompt;
use crate::{API_KEY_HEADER, API_VERSION, DEFAULT_BASE_URL};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Deep Research client for the Gemini Interactions API.
pub struct GeminiInteractions {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiInteractions {
    pub fn new(api_key: String) -> Arc<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Arc<Self> {
        Arc::new(Self {
            client: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/interactions{}", self.base_url, API_VERSION, path)
    }
}

#[derive(Serialize)]
struct CreateInteractionBody<'a> {
    input: &'a str,
    agent: &'a str,
    background: bool,
    store: bool,
    agent_config: AgentConfig,
    tools: Vec<ToolDeclaration>,
}

#[derive(Serialize)]
struct AgentConfig {
    // the API expects "deep-research", with a hyphen
    #[serde(rename = "type")]
    kind: &'static str,
    thinking_summaries: &'static str,
}

#[derive(Serialize)]
struct ToolDeclaration {
    #[serde(rename = "type")]
    kind: &'static str,
}

impl<'a> CreateInteractionBody<'a> {
    fn deep_research(input: &'a str, agent: &'a str) -> Self {
        Self {
            input,
            agent,
            background: true,
            store: true,
            agent_config: AgentConfig {
                kind: "deep-research",
                thinking_summaries: "auto",
            },
            tools: vec![
                ToolDeclaration {
                    kind: "google_search",
                },
                ToolDeclaration {
                    kind: "url_context",
                },
            ],
        }
    }
}

#[derive(Deserialize)]
struct InteractionBody {
    id: Option<String>,
    status: Option<String>,
    outputs: Option<Vec<OutputBody>>,
}

#[derive(Deserialize)]
struct OutputBody {
    #[serde(rename = "type")]
    kind: Option<String>,
    text: Option<String>,
}

impl InteractionBody {
    /// First text-typed output segment, or an empty string.
    fn text_content(&self) -> String {
        self.outputs
            .iter()
            .flatten()
            .filter(|output| output.kind.as_deref() == Some("text"))
            .find_map(|output| output.text.clone())
            .unwrap_or_default()
    }

    fn into_interaction(self, interaction_id: &str) -> Interaction {
        Interaction {
            id: interaction_id.to_string(),
            content: self.text_content(),
            status: Status::from(self.status.as_deref().unwrap_or_default()),
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    status: Option<String>,
    message: Option<String>,
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            error:
                ApiError {
                    status: Some(status),
                    message,
                },
        }) => format!("code={}, message={}", status, message.unwrap_or_default()),
        Ok(ErrorBody {
            error: ApiError {
                message: Some(message),
                ..
            },
        }) => message,
        _ => body.to_string(),
    }
}

#[async_trait]
impl Interactions for GeminiInteractions {
    async fn create<'a>(&self, request: CreateRequest<'a>) -> Result<String> {
        let input = sanitize_prompt(request.input);
        let body = CreateInteractionBody::deep_research(&input, request.agent);

        tracing::debug!(agent = request.agent, "Sending request");
        tracing::trace!(method = "POST", body = %serde_json::to_string(&body)?, "HTTP Request");

        let response = self
            .client
            .post(self.url(""))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Submission(format!("failed to create interaction: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Submission(format!("failed to read response body: {e}")))?;

        tracing::trace!(status_code = status.as_u16(), body = %text, "HTTP Response");
        tracing::debug!(status_code = status.as_u16(), "Response received");

        if status != StatusCode::OK {
            let message = error_message(&text);
            tracing::error!(status_code = status.as_u16(), error = %message, "API request failed");
            return Err(Error::Submission(format!(
                "API error (status {}): {}",
                status.as_u16(),
                message
            )));
        }

        let interaction: InteractionBody = serde_json::from_str(&text)
            .map_err(|e| Error::Submission(format!("invalid response body: {e}")))?;

        match interaction.id {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(Error::Submission(
                "empty interaction ID in response".to_string(),
            )),
        }
    }

    async fn get(&self, interaction_id: &str) -> Result<Interaction> {
        let transport = |message: String| Error::Transport {
            interaction_id: interaction_id.to_string(),
            message,
        };

        let response = self
            .client
            .get(self.url(&format!("/{interaction_id}")))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| transport(format!("failed to get interaction: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| transport(format!("failed to read response body: {e}")))?;

        tracing::trace!(status_code = status.as_u16(), body = %text, "HTTP Response");

        if status != StatusCode::OK {
            return Err(transport(format!(
                "unexpected status code: {}, body: {}",
                status.as_u16(),
                text
            )));
        }

        let body: InteractionBody = serde_json::from_str(&text)
            .map_err(|e| transport(format!("invalid response body: {e}")))?;

        Ok(body.into_interaction(interaction_id))
    }

    async fn cancel(&self, interaction_id: &str) -> Result<()> {
        let cancellation = |message: String| Error::Cancellation {
            interaction_id: interaction_id.to_string(),
            message,
        };

        let response = self
            .client
            .post(self.url(&format!("/{interaction_id}/cancel")))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| cancellation(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        tracing::trace!(status_code = status.as_u16(), body = %text, "HTTP Response");

        if status != StatusCode::OK {
            return Err(cancellation(format!(
                "cancel failed with status {}: {}",
                status.as_u16(),
                text
            )));
        }

        Ok(())
    }
}
