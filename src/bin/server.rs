//! Rostrum HTTP server binary.
//!
//! Starts an axum HTTP server exposing agent registration, floor control,
//! and utterance routing.
//!
//! # Environment Variables
//!
//! - `ROSTRUM_PORT` — HTTP port (default: 8080)
//! - `ROSTRUM_MAX_HOLD_SECS` — max floor hold before forced release (default: 120)
//! - `ROSTRUM_LIVENESS_SECS` — heartbeat age before an agent counts as dead (default: 60)
//! - `ROSTRUM_ENFORCE_LIVENESS` — deny requests from non-live agents (default: true)
//! - `ROSTRUM_REGISTRATION_POLICY` — `upsert` (default) or `reject`
//! - `ROSTRUM_REQUEUE_POLICY` — `upsert` (default) or `keep`
//! - `ROSTRUM_FLOOR_GATED_SEND` — require senders to hold the floor (default: false)
//! - `RUST_LOG` — tracing filter (default: "info,rostrum=debug")
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin server
//! ```

use rostrum::server::{app_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rostrum=debug".into()),
        )
        .init();

    let port = std::env::var("ROSTRUM_PORT").unwrap_or_else(|_| "8080".to_string());
    let bind_addr = format!("0.0.0.0:{}", port);

    let state = AppState::from_env();
    let app = app_router(state);

    tracing::info!("rostrum server starting on {}", bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health              — liveness probe");
    tracing::info!("  POST /agents/register     — register an agent");
    tracing::info!("  GET  /agents/             — list agents");
    tracing::info!("  POST /agents/heartbeat    — refresh liveness");
    tracing::info!("  POST /floor/request       — request the floor");
    tracing::info!("  POST /floor/release       — release the floor");
    tracing::info!("  GET  /floor/holder/{{id}}   — current holder");
    tracing::info!("  POST /envelopes/utterance — send an utterance");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
