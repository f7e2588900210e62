//! HTTP server for the floor control service.
//!
//! Exposes agent registration, floor control, and utterance routing as an
//! HTTP service that conversation participants talk to.
//!
//! # Endpoints
//!
//! - `GET  /health`              — Liveness probe
//! - `POST /agents/register`     — Register an agent
//! - `GET  /agents/`             — List all agents
//! - `GET  /agents/capability/{cap}` — Discovery by capability
//! - `POST /agents/heartbeat`    — Refresh an agent's liveness
//! - `POST /floor/request`       — Request the floor
//! - `POST /floor/release`       — Release the floor
//! - `POST /floor/withdraw`      — Cancel a queued request
//! - `GET  /floor/holder/{conversation_id}` — Current holder
//! - `GET  /floor/queue/{conversation_id}`  — Ordered wait queue
//! - `POST /envelopes/utterance` — Send an utterance

pub mod routes;

pub use routes::{app_router, AppState};
