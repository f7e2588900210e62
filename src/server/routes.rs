//! Axum route handlers for the floor control service.
//!
//! Request bodies are explicit records with the wire field spellings the
//! agent clients use (`speakerUri`, `conversation_id`, `sender_speakerUri`,
//! ...), validated by serde before anything reaches the core. Each error
//! kind maps to a distinct non-success response; an unseen conversation is
//! never an error.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use tower_http::cors::CorsLayer;

use crate::config::FloorPolicy;
use crate::envelope::{EnvelopeRouter, HttpTransport, UtteranceTransport};
use crate::error::FloorError;
use crate::floor::FloorManager;
use crate::registry::{AgentInfo, AgentRegistry, Registered};

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    /// Agent registry, with its own lock independent of conversation locks.
    pub registry: Arc<RwLock<AgentRegistry>>,
    /// Floor control manager owning all per-conversation state.
    pub floor: Arc<FloorManager>,
    /// Utterance router.
    pub envelopes: Arc<EnvelopeRouter>,
}

impl AppState {
    /// Build state with the given policy and outbound transport.
    pub fn new(policy: FloorPolicy, transport: Arc<dyn UtteranceTransport>) -> Self {
        let registry = Arc::new(RwLock::new(AgentRegistry::new()));
        let floor = Arc::new(FloorManager::new(registry.clone(), policy));
        let envelopes = Arc::new(EnvelopeRouter::new(
            floor.clone(),
            registry.clone(),
            transport,
        ));
        Self {
            registry,
            floor,
            envelopes,
        }
    }

    /// Default state: env-derived policy, HTTP utterance forwarding.
    pub fn from_env() -> Self {
        Self::new(FloorPolicy::from_env(), Arc::new(HttpTransport::new()))
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/agents/register", post(register_handler))
        .route("/agents", get(list_agents_handler))
        .route("/agents/", get(list_agents_handler))
        .route("/agents/capability/{cap}", get(capability_handler))
        .route("/agents/heartbeat", post(heartbeat_handler))
        .route("/floor/request", post(floor_request_handler))
        .route("/floor/release", post(floor_release_handler))
        .route("/floor/withdraw", post(floor_withdraw_handler))
        .route("/floor/holder/{conversation_id}", get(floor_holder_handler))
        .route("/floor/queue/{conversation_id}", get(floor_queue_handler))
        .route("/envelopes/utterance", post(utterance_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Map an error kind to its status and structured body.
fn error_response(err: FloorError) -> (StatusCode, Json<Value>) {
    let status = match err {
        FloorError::UnknownAgent { .. } => StatusCode::NOT_FOUND,
        FloorError::AgentNotLive { .. } => StatusCode::CONFLICT,
        FloorError::NotHolder { .. } => StatusCode::FORBIDDEN,
        FloorError::NoEligibleTarget { .. } => StatusCode::CONFLICT,
        FloorError::DuplicateAgent { .. } => StatusCode::CONFLICT,
    };
    (
        status,
        Json(serde_json::json!({
            "error": err.code(),
            "message": err.to_string(),
        })),
    )
}

// ---------------------------------------------------------------------------
// Request records
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    #[serde(rename = "speakerUri")]
    speaker_uri: String,
    agent_name: String,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(rename = "serviceUrl")]
    service_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HeartbeatRequest {
    #[serde(rename = "speakerUri")]
    speaker_uri: String,
}

#[derive(Debug, Deserialize)]
struct FloorRequestBody {
    conversation_id: String,
    #[serde(rename = "speakerUri")]
    speaker_uri: String,
    #[serde(default)]
    priority: i32,
}

#[derive(Debug, Deserialize)]
struct FloorReleaseBody {
    conversation_id: String,
    #[serde(rename = "speakerUri")]
    speaker_uri: String,
}

#[derive(Debug, Deserialize)]
struct UtteranceRequest {
    conversation_id: String,
    #[serde(rename = "sender_speakerUri")]
    sender: String,
    #[serde(rename = "target_speakerUri")]
    target: Option<String>,
    text: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /health — liveness probe of the service itself.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "rostrum",
        "version": crate::VERSION,
    }))
}

/// POST /agents/register — register an agent (policy: upsert or reject).
async fn register_handler(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let info = AgentInfo::new(
        request.speaker_uri.clone(),
        request.agent_name,
        request.capabilities,
        request.service_url,
    );
    let policy = state.floor.policy().registration;
    let outcome = state
        .registry
        .write()
        .register(info, policy)
        .map_err(error_response)?;

    Ok(Json(serde_json::json!({
        "speakerUri": request.speaker_uri,
        "status": match outcome {
            Registered::New => "registered",
            Registered::Updated => "updated",
        },
    })))
}

fn agent_summary(info: &AgentInfo, alive: bool) -> Value {
    serde_json::json!({
        "speakerUri": info.speaker_uri,
        "agent_name": info.display_name,
        "capabilities": info.capabilities,
        "serviceUrl": info.service_endpoint,
        "alive": alive,
    })
}

/// GET /agents/ — list all registered agents with their liveness.
async fn list_agents_handler(State(state): State<AppState>) -> Json<Value> {
    let now = chrono::Utc::now();
    let threshold = state.floor.policy().liveness_threshold;
    let registry = state.registry.read();
    let agents: Vec<Value> = registry
        .list()
        .into_iter()
        .map(|info| agent_summary(info, registry.is_alive(&info.speaker_uri, now, threshold)))
        .collect();
    Json(serde_json::json!({ "agents": agents }))
}

/// GET /agents/capability/{cap} — discovery by capability.
async fn capability_handler(
    State(state): State<AppState>,
    Path(cap): Path<String>,
) -> Json<Value> {
    let now = chrono::Utc::now();
    let threshold = state.floor.policy().liveness_threshold;
    let registry = state.registry.read();
    let agents: Vec<Value> = registry
        .by_capability(&cap)
        .into_iter()
        .map(|info| agent_summary(info, registry.is_alive(&info.speaker_uri, now, threshold)))
        .collect();
    Json(serde_json::json!({ "capability": cap, "agents": agents }))
}

/// POST /agents/heartbeat — refresh an agent's liveness.
async fn heartbeat_handler(
    State(state): State<AppState>,
    Json(request): Json<HeartbeatRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state
        .registry
        .write()
        .heartbeat(&request.speaker_uri, chrono::Utc::now())
        .map_err(error_response)?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

/// POST /floor/request — request or re-request the floor.
async fn floor_request_handler(
    State(state): State<AppState>,
    Json(request): Json<FloorRequestBody>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let grant = state
        .floor
        .request_floor(
            &request.conversation_id,
            &request.speaker_uri,
            request.priority,
        )
        .map_err(error_response)?;
    Ok(Json(serde_json::json!({
        "granted": grant.granted,
        "position": grant.position,
    })))
}

/// POST /floor/release — release the floor; promotes the next in queue.
async fn floor_release_handler(
    State(state): State<AppState>,
    Json(request): Json<FloorReleaseBody>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let release = state
        .floor
        .release_floor(&request.conversation_id, &request.speaker_uri)
        .map_err(error_response)?;
    Ok(Json(serde_json::json!({
        "released": release.released,
        "new_holder": release.new_holder,
    })))
}

/// POST /floor/withdraw — cancel a still-queued floor request.
async fn floor_withdraw_handler(
    State(state): State<AppState>,
    Json(request): Json<FloorReleaseBody>,
) -> Json<Value> {
    let withdrawn = state
        .floor
        .withdraw_request(&request.conversation_id, &request.speaker_uri);
    Json(serde_json::json!({ "withdrawn": withdrawn }))
}

/// GET /floor/holder/{conversation_id} — current holder, null when free.
async fn floor_holder_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Json<Value> {
    let holder = state.floor.get_holder(&conversation_id);
    Json(serde_json::json!({
        "conversation_id": conversation_id,
        "holder": holder,
    }))
}

/// GET /floor/queue/{conversation_id} — ordered wait queue snapshot.
async fn floor_queue_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Json<Value> {
    let queue: Vec<Value> = state
        .floor
        .queue_snapshot(&conversation_id)
        .into_iter()
        .enumerate()
        .map(|(i, request)| {
            serde_json::json!({
                "speakerUri": request.speaker_uri,
                "priority": request.priority,
                "position": i + 1,
            })
        })
        .collect();
    Json(serde_json::json!({
        "conversation_id": conversation_id,
        "queue": queue,
    }))
}

/// POST /envelopes/utterance — route an utterance to its target.
async fn utterance_handler(
    State(state): State<AppState>,
    Json(request): Json<UtteranceRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let delivery = state
        .envelopes
        .deliver(
            &request.conversation_id,
            &request.sender,
            request.target.as_deref(),
            &request.text,
        )
        .await
        .map_err(error_response)?;
    Ok(Json(serde_json::json!({
        "success": delivery.delivered,
        "envelopeId": delivery.envelope_id,
        "target_speakerUri": delivery.target,
    })))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
