//! HTTP status surface
//!
//! Read access to the event store and pipeline counters, plus runtime
//! administration of the block list. Served by axum on its own TCP port.

use crate::blocklist::{BlockList, BlockListSnapshot};
use crate::config::StatusConfig;
use crate::event_store::{EventStore, EventsDocument};
use crate::relay_queue::RelaySender;
use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Serialize;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Shared handles the handlers read from
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<EventStore>,
    pub blocklist: Arc<BlockList>,
    pub queue: RelaySender,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub events: usize,
    pub queued: usize,
    pub dropped: u64,
}

#[derive(Debug, Serialize)]
pub struct ChangeResponse {
    pub changed: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/events", get(list_events))
        .route("/api/blocklist", get(show_blocklist))
        .route("/api/blocklist/oids/{oid}", put(block_oid).delete(unblock_oid))
        .route(
            "/api/blocklist/senders/{sender}",
            put(block_sender).delete(unblock_sender),
        )
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        events: state.store.len(),
        queued: state.queue.len(),
        dropped: state.queue.dropped(),
    })
}

async fn list_events(State(state): State<AppState>) -> Json<EventsDocument> {
    Json(state.store.to_document())
}

async fn show_blocklist(State(state): State<AppState>) -> Json<BlockListSnapshot> {
    Json(state.blocklist.snapshot())
}

async fn block_oid(State(state): State<AppState>, Path(oid): Path<String>) -> Json<ChangeResponse> {
    Json(ChangeResponse {
        changed: state.blocklist.block_oid(&oid),
    })
}

async fn unblock_oid(State(state): State<AppState>, Path(oid): Path<String>) -> Json<ChangeResponse> {
    Json(ChangeResponse {
        changed: state.blocklist.unblock_oid(&oid),
    })
}

async fn block_sender(
    State(state): State<AppState>,
    Path(sender): Path<String>,
) -> Result<Json<ChangeResponse>, ApiError> {
    if sender.parse::<IpAddr>().is_err() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("'{}' is not an IP address", sender),
            }),
        ));
    }

    Ok(Json(ChangeResponse {
        changed: state.blocklist.block_sender(&sender),
    }))
}

async fn unblock_sender(
    State(state): State<AppState>,
    Path(sender): Path<String>,
) -> Json<ChangeResponse> {
    Json(ChangeResponse {
        changed: state.blocklist.unblock_sender(&sender),
    })
}

pub struct StatusServer;

impl StatusServer {
    /// Serve the status router until `shutdown` resolves
    pub async fn run(
        config: StatusConfig,
        state: AppState,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
            .parse()
            .with_context(|| format!("Invalid status address {}:{}", config.bind_address, config.port))?;

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind status server to {}", addr))?;

        info!("Status server listening on {}", addr);

        axum::serve(listener, router(state))
            .with_graceful_shutdown(shutdown)
            .await
            .context("Status server failed")?;

        info!("Status server stopped");
        Ok(())
    }
}
