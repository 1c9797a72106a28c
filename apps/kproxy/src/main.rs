use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use kproxy_core::CredentialRegistry;
use kproxy_gateway::{Dispatcher, HttpTransport};

mod cli;
mod routes;

use crate::cli::Cli;
use crate::routes::AppState;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("kproxy failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();

    let registry = Arc::new(CredentialRegistry::new(cli.machine_id.clone()));
    let transport = Arc::new(HttpTransport::new(cli.upstream_url.clone()));
    let dispatcher = Dispatcher::new(registry, transport);
    info!(
        upstream = %cli.upstream_url,
        default_machine_id = cli.machine_id.is_some(),
        "gateway ready"
    );

    let app = routes::router(Arc::new(AppState { dispatcher }));

    let bind = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("kproxy=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
