//! In-memory registry served over HTTP on the paths the client uses.

pub mod handlers;

use crate::registry::InMemoryRegistry;
use anyhow::Result;
use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

pub fn router(registry: InMemoryRegistry) -> Router {
    handlers::apps::apps_router(registry)
}

pub async fn start_server(registry: InMemoryRegistry, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Fake registry listening on {}", listener.local_addr()?);
    axum::serve(listener, router(registry)).await?;
    Ok(())
}
