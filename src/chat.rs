use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::database::Store;
use crate::error::AppError;
use crate::models::ChatMessage;

const API_KEY_ENV: &str = "FITTRACK_LLM_API_KEY";
const BASE_URL_ENV: &str = "FITTRACK_LLM_BASE_URL";
const MODEL_ENV: &str = "FITTRACK_LLM_MODEL";

/// Default endpoint (OpenAI-compatible).
const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

/// Messages of history sent with each completion request.
const HISTORY_LIMIT: usize = 20;

const IMAGE_TAG_PREFIX: &str = "[IMAGE:";

/// The persona/topic restriction is enforced here, by prompt
/// construction; the response is not validated against it.
const PERSONA_PROMPT: &str = "You are FitBot, a friendly personal fitness coach inside a \
fitness-tracking app. Only answer questions about fitness, exercise, nutrition, recovery, \
and healthy habits; politely steer any other topic back to fitness. Keep answers short and \
practical. If a picture would help, end your reply with a tag of the form [IMAGE: keyword] \
naming a single search keyword.";

#[derive(Debug, Clone, Copy)]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

impl PromptRole {
    pub fn as_str(&self) -> &str {
        match self {
            PromptRole::System => "system",
            PromptRole::User => "user",
            PromptRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Assistant,
            content: content.into(),
        }
    }
}

/// Seam to the hosted language model: one free-text completion per call.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, AppError>;
}

// ---------------------------------------------------------------------
// Wire types (OpenAI-compatible format)
// ---------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

impl From<&PromptMessage> for WireMessage {
    fn from(msg: &PromptMessage) -> Self {
        Self {
            role: msg.role.as_str().to_owned(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

/// Chat backend over any OpenAI-compatible completions endpoint.
pub struct OpenAiCompatibleBackend {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiCompatibleBackend {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url,
            model,
        }
    }

    pub fn from_env() -> Result<Self, AppError> {
        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| AppError::Internal(format!("{} environment variable not set", API_KEY_ENV)))?;
        let base_url =
            std::env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var(MODEL_ENV).unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Ok(Self::new(api_key, base_url, model))
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatibleBackend {
    #[instrument(skip_all)]
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, AppError> {
        let request = CompletionRequest {
            model: &self.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            temperature: Some(0.7),
            max_tokens: Some(512),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "Chat completion request rejected");
            return Err(AppError::ExternalService(format!(
                "Chat API returned {}: {}",
                status, body
            )));
        }

        let completion: CompletionResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| {
                AppError::ExternalService("Chat API returned an empty completion".to_string())
            })
    }
}

/// The in-app assistant: persists both sides of the conversation and
/// passes prompts through to the hosted model.
#[derive(Clone)]
pub struct ChatAssistant {
    store: Store,
    backend: Arc<dyn ChatBackend>,
}

impl ChatAssistant {
    pub fn new(store: Store, backend: Arc<dyn ChatBackend>) -> Self {
        Self { store, backend }
    }

    /// Submit a prompt and persist the exchange. The user message is
    /// stored before the network call; a failed completion surfaces as an
    /// `ExternalService` value, never a crash.
    #[instrument(skip(self, text))]
    pub async fn send(&self, user_id: i64, text: &str) -> Result<ChatMessage, AppError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::Validation(
                "Message must not be blank".to_string(),
            ));
        }

        self.store
            .insert_chat_message(user_id, text, true, None)
            .await?;

        let history = self.store.chat_history(user_id).await?;
        let skip = history.len().saturating_sub(HISTORY_LIMIT);

        let mut messages = vec![PromptMessage::system(PERSONA_PROMPT)];
        for message in history.iter().skip(skip) {
            messages.push(if message.is_from_user {
                PromptMessage::user(&message.text)
            } else {
                PromptMessage::assistant(&message.text)
            });
        }

        let raw = self.backend.complete(&messages).await?;
        let (reply, keyword) = extract_image_keyword(&raw);
        debug!(keyword = ?keyword, "Assistant reply received");
        let image_url = keyword.as_deref().map(image_url_for);

        self.store
            .insert_chat_message(user_id, &reply, false, image_url.as_deref())
            .await
    }

    pub async fn history(&self, user_id: i64) -> Result<Vec<ChatMessage>, AppError> {
        self.store.chat_history(user_id).await
    }
}

/// Split an `[IMAGE: keyword]` tag out of the reply text.
fn extract_image_keyword(reply: &str) -> (String, Option<String>) {
    let trimmed = reply.trim();

    if let Some(start) = trimmed.rfind(IMAGE_TAG_PREFIX) {
        let tail = &trimmed[start..];
        if let Some(end) = tail.find(']') {
            let keyword = tail[IMAGE_TAG_PREFIX.len()..end].trim().to_string();
            if !keyword.is_empty() {
                let spliced = format!("{}{}", &trimmed[..start], &tail[end + 1..]);
                return (spliced.trim().to_string(), Some(keyword));
            }
        }
    }

    (trimmed.to_string(), None)
}

fn image_url_for(keyword: &str) -> String {
    let slug: String = keyword
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    format!(
        "https://source.unsplash.com/featured/?{}",
        slug.trim_matches('-')
    )
}
