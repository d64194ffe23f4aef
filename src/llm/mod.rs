pub mod llm_client;
pub mod ollama;
pub mod openai;
pub mod retry;
