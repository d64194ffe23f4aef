use super::llm_client::LlmClientChat;
use super::retry::{FailureKind, RetryPolicy, RetryableError};
use crate::chat::{ChatTurn, Content, ContentItem};
use image::{DynamicImage, ImageFormat};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "0000/ui-tars-1.5-7b-q8_0:7b";
pub const DEFAULT_TEMPERATURE: f32 = 0.0;
pub const DEFAULT_NUM_PREDICT: u32 = 100;

const DATA_URI_PREFIX: &str = "data:image";
// Ollama rejects messages with an empty content field.
const EMPTY_TEXT_PLACEHOLDER: &str = " ";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OllamaMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Serialize)]
pub struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [OllamaMessage],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Deserialize)]
pub struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
pub struct OllamaResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    error: String,
}

#[derive(Debug, Error)]
pub enum OllamaError {
    #[error("API Error: {status}, {message}")]
    ApiError {
        status: reqwest::StatusCode,
        message: String,
    },
    #[error("Request Error: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Response Error: {0}")]
    ResponseError(serde_json::Error),
    #[error("Ollama only supports local path or base64, got: {0}")]
    UnsupportedImageReference(String),
    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Image Error: {0}")]
    ImageError(#[from] image::ImageError),
}

impl RetryableError for OllamaError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            OllamaError::ApiError { .. } => FailureKind::Status,
            OllamaError::RequestError(_) => FailureKind::Transport,
            OllamaError::ResponseError(_) => FailureKind::MalformedResponse,
            OllamaError::UnsupportedImageReference(_)
            | OllamaError::IoError(_)
            | OllamaError::ImageError(_) => FailureKind::Fatal,
        }
    }
}

/// Messages in Ollama form, together with the temporary files backing any
/// in-memory images. The files are deleted when this is dropped.
#[derive(Debug)]
pub struct PreparedChat {
    messages: Vec<OllamaMessage>,
    temp_images: Vec<NamedTempFile>,
}

impl PreparedChat {
    pub fn messages(&self) -> &[OllamaMessage] {
        &self.messages
    }
}

pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    num_predict: u32,
    retry: RetryPolicy,
}

impl OllamaClient {
    fn get_or_default_url(url: Option<&str>) -> String {
        match url {
            Some(val) => val.trim_end_matches('/').to_string(),
            None => DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn new(base_url: Option<&str>) -> Self {
        Self {
            client: Client::new(),
            base_url: Self::get_or_default_url(base_url),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            num_predict: DEFAULT_NUM_PREDICT,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_num_predict(mut self, num_predict: u32) -> Self {
        self.num_predict = num_predict;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Converts every turn into an Ollama message.
    ///
    /// Text items are joined with newlines. Image urls must be an existing
    /// local path (forwarded as is) or a `data:image` URI (its base64 payload
    /// is forwarded). In-memory images are written to their own PNG temp file.
    pub async fn prepare_messages(chat: &[ChatTurn]) -> Result<PreparedChat, OllamaError> {
        let mut messages = Vec::with_capacity(chat.len());
        let mut temp_images = Vec::new();

        for turn in chat {
            let mut text_parts: Vec<&str> = Vec::new();
            let mut images = Vec::new();

            match &turn.content {
                Content::Text(text) => text_parts.push(text),
                Content::Parts(items) => {
                    for item in items {
                        match item {
                            ContentItem::Text(text) => text_parts.push(text),
                            ContentItem::ImageUrl(url) => images.push(image_reference(url).await?),
                            ContentItem::Image(image) => {
                                let file = write_temp_png(image)?;
                                images.push(file.path().to_string_lossy().into_owned());
                                temp_images.push(file);
                            }
                        }
                    }
                }
            }

            let content = if text_parts.is_empty() {
                EMPTY_TEXT_PLACEHOLDER.to_string()
            } else {
                text_parts.join("\n")
            };

            messages.push(OllamaMessage {
                role: turn.role.clone(),
                content,
                images,
            });
        }

        Ok(PreparedChat {
            messages,
            temp_images,
        })
    }

    pub fn create_payload(&self, messages: &[OllamaMessage]) -> serde_json::Value {
        let request = OllamaChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
                num_predict: self.num_predict,
            },
        };
        serde_json::json!(request)
    }

    async fn create_chat(&self, payload: &serde_json::Value) -> Result<String, OllamaError> {
        let url = format!("{}/api/chat", self.base_url);
        tracing::debug!(%url, model = %self.model, "Sending Ollama chat request");

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|error_response| error_response.error)
                .unwrap_or(body);
            return Err(OllamaError::ApiError { status, message });
        }

        let result: OllamaResponse =
            serde_json::from_str(&body).map_err(OllamaError::ResponseError)?;
        Ok(result.message.content)
    }
}

async fn image_reference(url: &str) -> Result<String, OllamaError> {
    if tokio::fs::try_exists(url).await.unwrap_or(false) {
        return Ok(url.to_string());
    }
    if url.starts_with(DATA_URI_PREFIX) {
        if let Some((_, payload)) = url.split_once(',') {
            return Ok(payload.to_string());
        }
    }
    Err(OllamaError::UnsupportedImageReference(url.to_string()))
}

fn write_temp_png(image: &DynamicImage) -> Result<NamedTempFile, OllamaError> {
    let mut file = tempfile::Builder::new()
        .prefix("chat-image-")
        .suffix(".png")
        .tempfile()?;
    image.write_to(file.as_file_mut(), ImageFormat::Png)?;
    Ok(file)
}

impl LlmClientChat for OllamaClient {
    type Error = OllamaError;

    async fn inference_chat(&self, chat: &[ChatTurn]) -> Result<String, OllamaError> {
        let prepared = Self::prepare_messages(chat).await?;
        let payload = self.create_payload(prepared.messages());
        tracing::debug!(
            messages = chat.len(),
            temp_images = prepared.temp_images.len(),
            "Built Ollama chat payload"
        );

        // `prepared` owns the temp files and must outlive every attempt.
        let result = self.retry.run(|| self.create_chat(&payload)).await;
        drop(prepared);
        result
    }
}

/// Sends `chat` to the local Ollama server and returns the reply text.
///
/// `_api_token` is accepted so the signature matches
/// [`crate::llm::openai::inference_chat`]; Ollama needs no authentication.
pub async fn inference_chat_ollama(
    chat: &[ChatTurn],
    _api_token: Option<&str>,
) -> Result<String, OllamaError> {
    OllamaClient::new(None).inference_chat(chat).await
}
