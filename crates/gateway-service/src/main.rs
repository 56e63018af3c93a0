mod errors;
mod handlers;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use gateway_core::config::{ConfigStore, GatewayConfig};
use gateway_core::TokenManager;
use gateway_responses::ResponseCache;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use state::ServerState;

#[derive(Parser, Debug)]
#[command(author, version, about = "LLM API compatibility gateway")]
struct Args {
    /// Path to the `.env`-style configuration file.
    #[arg(long, default_value = "./gateway.env")]
    config: PathBuf,
    /// Address to bind the service to.
    #[arg(long, default_value = "0.0.0.0:8080")]
    addr: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let store = ConfigStore::load(&args.config).await?;
    let config = GatewayConfig::from_store(&store)?;
    init_tracing(&config);

    info!(addr = %args.addr, config = %args.config.display(), "starting gateway");

    let token_manager = Arc::new(TokenManager::new(store).await?);
    let response_cache = ResponseCache::new();
    let passthrough_client = reqwest::Client::builder().build()?;

    let state = ServerState {
        token_manager,
        response_cache,
        config_path: args.config.clone(),
        config,
        passthrough_client,
    };

    let app = Router::new()
        .route("/v1/models", get(handlers::models::list_models))
        .route("/v1/model/info", get(handlers::models::model_info))
        .route("/v1/chat/completions", post(handlers::openai::chat_completions))
        .route("/v1/messages", post(handlers::anthropic::messages))
        .route("/v1/responses", post(handlers::responses::create))
        .route(
            "/v1/responses/:id",
            get(handlers::responses::retrieve).delete(handlers::responses::delete),
        )
        .route("/v1/spend/calculate", post(handlers::spend::calculate))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&args.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Structured logging setup (spec.md's ambient-stack expansion, SPEC_FULL.md
/// §"Error handling design"): `EnvFilter` wins when `RUST_LOG` is set,
/// otherwise falls back to the configured `log_level`, then a quiet default.
/// A non-blocking file layer is added when `log_file_path` is configured, so
/// the process also logs to stdout either way.
fn init_tracing(config: &GatewayConfig) {
    let default_directive = config.log_level.clone().unwrap_or_else(|| "gateway_service=info,tower_http=info".into());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let registry = tracing_subscriber::registry().with(filter).with(fmt::layer());

    if let Some(path) = &config.log_file_path {
        let path = PathBuf::from(path);
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
        let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "gateway.log".into());
        let file_appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Leaked deliberately: the guard must outlive the process to flush
        // the background writer, and the process never constructs a second one.
        Box::leak(Box::new(guard));
        registry.with(fmt::layer().with_writer(non_blocking).with_ansi(false)).init();
    } else {
        registry.init();
    }
}
