pub mod chat;
pub mod llm;
pub mod utils;

pub use chat::{ChatTurn, Content, ContentItem};
pub use llm::ollama::inference_chat_ollama;
pub use llm::openai::inference_chat;
