//! Taleweaver Engine - Main entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taleweaver_engine::app::App;
use taleweaver_engine::infrastructure::{
    clock::{SystemClock, SystemRandom},
    comfyui::ComfyUIClient,
    memory_store::MemoryStoryStore,
    ollama::OllamaClient,
    ports::{AdvisorPort, ImageGenPort, NarrativePort, SummarizerPort},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taleweaver_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Taleweaver Engine");

    // Load configuration
    let server_host = std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let server_port: u16 = std::env::var("SERVER_PORT")
        .or_else(|_| std::env::var("PORT"))
        .unwrap_or_else(|_| "3000".into())
        .parse()
        .unwrap_or(3000);

    // Create infrastructure clients
    let llm = Arc::new(OllamaClient::from_env());
    let image_gen = Arc::new(ComfyUIClient::from_env());
    match image_gen.check_health().await {
        Ok(true) => tracing::info!("ComfyUI reachable"),
        _ => tracing::warn!("ComfyUI unreachable, image generation will fail until it is up"),
    }

    let store = Arc::new(MemoryStoryStore::new());

    // One chat client backs all three LLM contracts.
    let narrative: Arc<dyn NarrativePort> = llm.clone();
    let summarizer: Arc<dyn SummarizerPort> = llm.clone();
    let advisor: Arc<dyn AdvisorPort> = llm;

    let app = Arc::new(App::new(
        store,
        narrative,
        summarizer,
        advisor,
        image_gen,
        Arc::new(SystemClock::new()),
        Arc::new(SystemRandom::new()),
    ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = taleweaver_engine::api::routes()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app);

    let addr: SocketAddr = format!("{}:{}", server_host, server_port).parse()?;
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
