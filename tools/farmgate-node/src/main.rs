use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use farmgate_common::store::MessageStore;
use farmgate_node::{router, AppState, Backend, Cli};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.init_tracing();

    let backend = Backend::from_config(&cli)
        .await
        .context("failed to open store")?;
    info!(backend = backend.backend_name(), "store ready");

    let app = router(Arc::new(AppState::new(backend)));

    let listener = tokio::net::TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("failed to bind {}", cli.listen))?;
    info!("farmgate node listening on {}", cli.listen);

    axum::serve(listener, app).await.context("server failed")?;
    Ok(())
}
