use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use kansei_design_proxy::{
    api,
    config,
    credentials::CredentialLoader,
    DesignPipeline,
    GeminiClient,
    ImageBackend,
    MediaStore,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn")),
        )
        .init();

    // Load configuration
    config::Config::dotenv_load();
    let config = config::Config::new()?;
    config::Config::print_env_vars();

    let store = MediaStore::new(config.media_dir.clone());
    store.ensure_dirs().await?;

    let gemini = GeminiClient::new(config.gemini_base_url.clone(), CredentialLoader::new(config.env_file.clone()));
    let images = ImageBackend::detect(&config).await;

    let state = Arc::new(api::routes::AppState {
        pipeline: DesignPipeline::new(Arc::new(gemini), images, store, config.gemini_model.clone()),
    });
    let app = api::routes::router(state, Some(config.frontend_dir.clone()));

    // Run our application with safe parsing
    let host_str = config.api_host.clone();
    let port_str = config.api_port.clone();
    let ip: std::net::IpAddr = host_str.parse().unwrap_or_else(|_| {
        tracing::warn!("Invalid API_HOST '{}', falling back to 127.0.0.1", host_str);
        std::net::IpAddr::from([127, 0, 0, 1])
    });
    let port: u16 = port_str.parse().unwrap_or_else(|_| {
        tracing::warn!("Invalid API_PORT '{}', falling back to 8000", port_str);
        8000
    });
    let socket_address = SocketAddr::new(ip, port);
    tracing::info!("listening on {}", socket_address);
    axum::Server::bind(&socket_address)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}
