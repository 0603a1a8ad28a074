use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vllm_handler_service::{AppConfig, CompletionHandler, ModelConfig, build_router, engine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!(
        model_dir = %config.model_dir.display(),
        model_config = %config.model_config_path.display(),
        "initializing handler"
    );

    let model_config = ModelConfig::load(&config.model_config_path)?;
    let handler = CompletionHandler::initialize(&config.model_dir, &model_config.handler, |args| {
        engine::load_engine(args, config.as_ref())
    })?;
    let router = build_router(config.clone(), Arc::new(handler));

    let listener = TcpListener::bind(config.listen_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, model = %config.model_name, "REST server ready");

    axum::serve(listener, router).await?;

    Ok(())
}

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hyper=warn,axum::rejection=trace".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
