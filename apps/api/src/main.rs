mod config;
mod db;
mod errors;
mod llm_client;
mod portfolio;
mod routes;
mod state;
mod templates;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::{create_pool, ensure_schema};
use crate::llm_client::LlmClient;
use crate::portfolio::packager::run_expiry_sweeper;
use crate::routes::build_router;
use crate::state::AppState;
use crate::templates::catalog::{InMemoryTemplateCatalog, PgTemplateCatalog, TemplateCatalog};
use crate::templates::registry::TemplateRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Portfolio API v{}", env!("CARGO_PKG_VERSION"));

    // Template catalog: Postgres when configured, otherwise process-local
    let catalog: Arc<dyn TemplateCatalog> = match &config.database_url {
        Some(url) => {
            let pool = create_pool(url).await?;
            ensure_schema(&pool).await?;
            Arc::new(PgTemplateCatalog::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set; template catalog is in-memory only");
            Arc::new(InMemoryTemplateCatalog::default())
        }
    };

    // Resume parsing is optional
    let llm = match &config.anthropic_api_key {
        Some(key) => {
            let client = LlmClient::new(key.clone(), config.llm_model.clone())?;
            info!("LLM client initialized (model: {})", client.model());
            Some(client)
        }
        None => {
            warn!("ANTHROPIC_API_KEY not set; resume parsing is disabled");
            None
        }
    };

    let state = AppState::new(config.clone(), catalog, llm);

    tokio::fs::create_dir_all(config.templates_dir()).await?;
    tokio::fs::create_dir_all(config.template_uploads_dir()).await?;
    tokio::fs::create_dir_all(config.downloads_dir()).await?;

    if !tokio::fs::try_exists(state.registry.path()).await? {
        state.registry.save(&mut TemplateRegistry::default()).await?;
        info!("Created template registry at {}", state.registry.path().display());
    }
    let installed = state.registry.load().await?.templates.len();
    info!("Template registry loaded ({installed} templates)");

    info!(
        "Portfolio archives stored in {} (expire after {}s)",
        state.downloads.dir().display(),
        config.download_ttl.as_secs()
    );
    tokio::spawn(run_expiry_sweeper(
        state.downloads.clone(),
        config.download_ttl,
        config.download_sweep_interval,
    ));

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
