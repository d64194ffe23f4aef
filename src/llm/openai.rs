use super::llm_client::LlmClientChat;
use super::retry::{FailureKind, RetryPolicy, RetryableError};
use crate::chat::ChatTurn;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-4-vision-preview";
pub const DEFAULT_MAX_TOKENS: u32 = 2048;

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
pub struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
pub struct OpenAIResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    error: MessageError,
}

#[derive(Debug, Deserialize)]
pub struct MessageError {
    message: String,
}

#[derive(Debug, Error)]
pub enum OpenAIError {
    #[error("API Error: {status}, {message}")]
    ApiError {
        status: reqwest::StatusCode,
        message: String,
    },
    #[error("Request Error: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Response Error: {0}")]
    ResponseError(serde_json::Error),
    #[error("Response has no choices")]
    MissingContent,
    #[error("Serialization Error: {0}")]
    SerializationError(serde_json::Error),
}

impl RetryableError for OpenAIError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            OpenAIError::ApiError { .. } => FailureKind::Status,
            OpenAIError::RequestError(_) => FailureKind::Transport,
            OpenAIError::ResponseError(_) | OpenAIError::MissingContent => {
                FailureKind::MalformedResponse
            }
            OpenAIError::SerializationError(_) => FailureKind::Fatal,
        }
    }
}

pub struct OpenAIClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    retry: RetryPolicy,
}

impl OpenAIClient {
    fn get_or_default_url(url: Option<&str>) -> String {
        match url {
            Some(val) => val.trim_end_matches('/').to_string(),
            None => DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn new(base_url: Option<&str>, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: Self::get_or_default_url(base_url),
            api_key: api_key.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Turn contents are passed through as-is, structured or not.
    pub fn create_payload(
        &self,
        chat: &[ChatTurn],
    ) -> Result<serde_json::Value, OpenAIError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: chat,
            max_tokens: self.max_tokens,
        };
        serde_json::to_value(&request).map_err(OpenAIError::SerializationError)
    }

    async fn create_chat_completion(
        &self,
        payload: &serde_json::Value,
    ) -> Result<String, OpenAIError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        tracing::debug!(%url, model = %self.model, "Sending chat completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|error_response| error_response.error.message)
                .unwrap_or(body);
            return Err(OpenAIError::ApiError { status, message });
        }

        let result: OpenAIResponse =
            serde_json::from_str(&body).map_err(OpenAIError::ResponseError)?;
        result
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(OpenAIError::MissingContent)
    }
}

impl LlmClientChat for OpenAIClient {
    type Error = OpenAIError;

    async fn inference_chat(&self, chat: &[ChatTurn]) -> Result<String, OpenAIError> {
        let payload = self.create_payload(chat)?;
        tracing::debug!(messages = chat.len(), "Built chat completion payload");
        self.retry
            .run(|| self.create_chat_completion(&payload))
            .await
    }
}

/// Sends `chat` to the OpenAI vision model and returns the reply text.
///
/// Failures are logged and retried forever. Only a history that cannot be
/// serialized returns an error.
pub async fn inference_chat(chat: &[ChatTurn], api_token: &str) -> Result<String, OpenAIError> {
    OpenAIClient::new(None, api_token).inference_chat(chat).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ContentItem;
    use mockito::Matcher;
    use serde_json::json;

    fn completion_body(content: &str) -> String {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-4-vision-preview",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }]
        })
        .to_string()
    }

    #[test]
    fn test_create_payload_single_turn() {
        let client = OpenAIClient::new(None, "t");
        let chat = [ChatTurn::user("Hello")];
        let request = ChatCompletionRequest {
            model: &client.model,
            messages: &chat,
            max_tokens: client.max_tokens,
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"model":"gpt-4-vision-preview","messages":[{"role":"user","content":"Hello"}],"max_tokens":2048}"#
        );

        let payload = client.create_payload(&chat).unwrap();
        assert_eq!(
            payload,
            json!({
                "model": "gpt-4-vision-preview",
                "messages": [{"role": "user", "content": "Hello"}],
                "max_tokens": 2048
            })
        );
    }

    #[test]
    fn test_create_payload_preserves_order_and_content() {
        let chat = vec![
            ChatTurn::system("You are a phone operator."),
            ChatTurn::user(vec![
                ContentItem::text("Describe the screen"),
                ContentItem::image_url("data:image/jpeg;base64,AAAA"),
            ]),
            ChatTurn::assistant("A home screen."),
            ChatTurn::new("user", ""),
        ];
        let payload = OpenAIClient::new(None, "t").create_payload(&chat).unwrap();

        let messages = payload["messages"].as_array().unwrap();
        assert_eq!(messages.len(), chat.len());
        for (message, turn) in messages.iter().zip(&chat) {
            assert_eq!(message["role"], turn.role.as_str());
            assert_eq!(message["content"], serde_json::to_value(&turn.content).unwrap());
        }
    }

    #[tokio::test]
    async fn test_in_memory_image_fails_before_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .expect(0)
            .create_async()
            .await;

        let client = OpenAIClient::new(Some(&server.url()), "t");
        let chat = vec![ChatTurn::user(vec![ContentItem::image(
            image::DynamicImage::new_rgb8(1, 1),
        )])];
        let err = client.inference_chat(&chat).await.unwrap_err();

        assert!(matches!(err, OpenAIError::SerializationError(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_inference_chat_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("content-type", "application/json")
            .match_header("authorization", "Bearer t")
            .match_body(Matcher::Json(json!({
                "model": "gpt-4-vision-preview",
                "messages": [{"role": "user", "content": "Hello"}],
                "max_tokens": 2048
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body("Hi there"))
            .create_async()
            .await;

        let client = OpenAIClient::new(Some(&server.url()), "t");
        let response = client
            .inference_chat(&[ChatTurn::user("Hello")])
            .await
            .unwrap();

        assert_eq!(response, "Hi there");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_inference_chat_retries_after_failure() {
        let mut server = mockito::Server::new_async().await;
        let failure = server
            .mock("POST", "/v1/chat/completions")
            .with_status(503)
            .with_body(r#"{"error": {"message": "overloaded", "type": "server_error"}}"#)
            .expect(1)
            .create_async()
            .await;
        let success = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(completion_body("second attempt"))
            .expect(1)
            .create_async()
            .await;

        let client = OpenAIClient::new(Some(&server.url()), "t");
        let response = client
            .inference_chat(&[ChatTurn::user("Hello")])
            .await
            .unwrap();

        assert_eq!(response, "second attempt");
        failure.assert_async().await;
        success.assert_async().await;
    }

    #[tokio::test]
    async fn test_bounded_policy_reports_api_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(401)
            .with_body(r#"{"error": {"message": "Incorrect API key provided", "type": "invalid_request_error", "code": "invalid_api_key"}}"#)
            .expect(2)
            .create_async()
            .await;

        let client = OpenAIClient::new(Some(&server.url()), "bad")
            .with_retry_policy(RetryPolicy::default().with_max_attempts(2));
        let err = client
            .inference_chat(&[ChatTurn::user("Hello")])
            .await
            .unwrap_err();

        match err {
            OpenAIError::ApiError { status, message } => {
                assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED);
                assert_eq!(message, "Incorrect API key provided");
            }
            other => panic!("unexpected error: {other}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_choices_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices": []}"#)
            .expect(1)
            .create_async()
            .await;

        let client = OpenAIClient::new(Some(&server.url()), "t")
            .with_retry_policy(RetryPolicy::default().retry_malformed(false));
        let err = client
            .inference_chat(&[ChatTurn::user("Hello")])
            .await
            .unwrap_err();

        assert!(matches!(err, OpenAIError::MissingContent));
        assert_eq!(err.failure_kind(), FailureKind::MalformedResponse);
        mock.assert_async().await;
    }
}
