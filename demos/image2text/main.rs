use mobile_agent_chat::llm::llm_client::LlmClientChat;
use mobile_agent_chat::llm::ollama::OllamaClient;
use mobile_agent_chat::llm::openai::OpenAIClient;
use mobile_agent_chat::utils::load_image_as_base64;
use mobile_agent_chat::{ChatTurn, ContentItem};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mobile_agent_chat=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let image_path = "images/screenshot.png";
    let image_base64 = load_image_as_base64(image_path).await?;

    let chat = vec![
        ChatTurn::system("You are a helpful assistant operating a mobile phone."),
        ChatTurn::user(vec![
            ContentItem::text("What is on the screen?"),
            ContentItem::image_url(format!("data:image/png;base64,{image_base64}")),
        ]),
    ];

    // Run with OPENAI_API_KEY set, otherwise against a local Ollama server
    let response = match std::env::var("OPENAI_API_KEY") {
        Ok(api_key) => OpenAIClient::new(None, &api_key).inference_chat(&chat).await?,
        Err(_) => OllamaClient::new(None).inference_chat(&chat).await?,
    };

    println!("Response: {}", response);
    Ok(())
}
