//! Runtime configuration for the floor control service.
//!
//! All knobs are read from environment variables at startup; defaults are
//! chosen so the service runs usefully with no configuration at all.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `ROSTRUM_PORT` | `8080` | HTTP listen port |
//! | `ROSTRUM_MAX_HOLD_SECS` | `120` | Max floor hold before forced release |
//! | `ROSTRUM_LIVENESS_SECS` | `60` | Heartbeat age before an agent counts as dead |
//! | `ROSTRUM_ENFORCE_LIVENESS` | `true` | Deny `requestFloor` from non-live agents |
//! | `ROSTRUM_REGISTRATION_POLICY` | `upsert` | `upsert` or `reject` on duplicate register |
//! | `ROSTRUM_REQUEUE_POLICY` | `upsert` | `upsert` or `keep` on re-request while queued |
//! | `ROSTRUM_FLOOR_GATED_SEND` | `false` | Require senders to hold the floor |

use std::time::Duration;

/// What to do when an already-registered speaker URI registers again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistrationPolicy {
    /// Replace the existing record and refresh its heartbeat.
    #[default]
    Upsert,
    /// Reject with `DuplicateAgent`.
    Reject,
}

/// What to do when an already-queued speaker requests the floor again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequeuePolicy {
    /// Update the queued request's priority and enqueue time in place.
    #[default]
    Upsert,
    /// Leave the existing request untouched; just report its position.
    Keep,
}

/// Policy knobs consumed by the floor control manager and envelope router.
#[derive(Debug, Clone)]
pub struct FloorPolicy {
    /// Maximum time an agent may hold the floor before the sweeper
    /// forcibly releases it.
    pub max_hold: Duration,
    /// Maximum heartbeat age before an agent counts as non-live.
    pub liveness_threshold: Duration,
    /// When true, `request_floor` rejects non-live speakers and the sweeper
    /// evicts non-live holders.
    pub enforce_liveness: bool,
    /// Duplicate registration handling.
    pub registration: RegistrationPolicy,
    /// Re-request-while-queued handling.
    pub requeue: RequeuePolicy,
    /// When true, only the current holder may send utterances.
    pub floor_gated_send: bool,
}

impl Default for FloorPolicy {
    fn default() -> Self {
        Self {
            max_hold: Duration::from_secs(120),
            liveness_threshold: Duration::from_secs(60),
            enforce_liveness: true,
            registration: RegistrationPolicy::Upsert,
            requeue: RequeuePolicy::Upsert,
            floor_gated_send: false,
        }
    }
}

impl FloorPolicy {
    /// Build a policy from environment variables, falling back to defaults
    /// for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_hold: env_secs("ROSTRUM_MAX_HOLD_SECS").unwrap_or(defaults.max_hold),
            liveness_threshold: env_secs("ROSTRUM_LIVENESS_SECS")
                .unwrap_or(defaults.liveness_threshold),
            enforce_liveness: env_bool("ROSTRUM_ENFORCE_LIVENESS")
                .unwrap_or(defaults.enforce_liveness),
            registration: match env_lower("ROSTRUM_REGISTRATION_POLICY").as_deref() {
                Some("reject") => RegistrationPolicy::Reject,
                Some("upsert") => RegistrationPolicy::Upsert,
                _ => defaults.registration,
            },
            requeue: match env_lower("ROSTRUM_REQUEUE_POLICY").as_deref() {
                Some("keep") => RequeuePolicy::Keep,
                Some("upsert") => RequeuePolicy::Upsert,
                _ => defaults.requeue,
            },
            floor_gated_send: env_bool("ROSTRUM_FLOOR_GATED_SEND")
                .unwrap_or(defaults.floor_gated_send),
        }
    }
}

fn env_lower(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.to_lowercase())
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn env_bool(key: &str) -> Option<bool> {
    env_lower(key).and_then(|v| match v.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    })
}
