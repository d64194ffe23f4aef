use crate::chat::ChatTurn;
use std::error::Error;

/// A chat backend that turns a conversation into one reply.
pub trait LlmClientChat {
    type Error: Error + Send + Sync + 'static;

    async fn inference_chat(&self, chat: &[ChatTurn]) -> Result<String, Self::Error>;
}
