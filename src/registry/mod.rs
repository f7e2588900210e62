//! Agent Registry — tracks which agents exist, their capabilities, and
//! their liveness.
//!
//! Each agent registers once under an opaque speaker URI, then refreshes
//! its `last_heartbeat_at` via [`AgentRegistry::heartbeat`]. Registry entries
//! are never destroyed automatically; only the liveness predicate is
//! time-based. The floor control manager consults the registry to validate
//! that a requesting speaker is a known, live agent.
//!
//! The registry is its own shared resource with its own lock (the caller
//! wraps it in a `parking_lot::RwLock`), independent of per-conversation
//! floor locks, so the two components never couple on lock ordering.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RegistrationPolicy;
use crate::error::FloorError;

/// A registered agent.
///
/// `speaker_uri` is an opaque caller-supplied key; the registry enforces
/// uniqueness but never parses it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Unique agent identifier (opaque).
    #[serde(rename = "speakerUri")]
    pub speaker_uri: String,
    /// Human-readable agent name.
    #[serde(rename = "agent_name")]
    pub display_name: String,
    /// Capabilities this agent advertises.
    pub capabilities: Vec<String>,
    /// Endpoint utterances can be forwarded to, if the agent exposes one.
    #[serde(rename = "serviceUrl")]
    pub service_endpoint: Option<String>,
    /// Last time this agent heartbeat.
    #[serde(rename = "lastHeartbeatAt")]
    pub last_heartbeat_at: DateTime<Utc>,
}

impl AgentInfo {
    /// Create a fresh record with `last_heartbeat_at = now`.
    pub fn new(
        speaker_uri: impl Into<String>,
        display_name: impl Into<String>,
        capabilities: Vec<String>,
        service_endpoint: Option<String>,
    ) -> Self {
        Self {
            speaker_uri: speaker_uri.into(),
            display_name: display_name.into(),
            capabilities,
            service_endpoint,
            last_heartbeat_at: Utc::now(),
        }
    }
}

/// Outcome of a successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registered {
    /// First registration under this speaker URI.
    New,
    /// Re-registration replaced the existing record (upsert policy).
    Updated,
}

/// In-memory agent store.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, AgentInfo>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent.
    ///
    /// Under [`RegistrationPolicy::Upsert`] a duplicate speaker URI replaces
    /// the existing record (and counts as a heartbeat); under
    /// [`RegistrationPolicy::Reject`] it fails with `DuplicateAgent`.
    pub fn register(
        &mut self,
        info: AgentInfo,
        policy: RegistrationPolicy,
    ) -> Result<Registered, FloorError> {
        let existing = self.agents.contains_key(&info.speaker_uri);
        if existing && policy == RegistrationPolicy::Reject {
            return Err(FloorError::DuplicateAgent {
                speaker_uri: info.speaker_uri,
            });
        }
        tracing::info!(
            speaker_uri = %info.speaker_uri,
            updated = existing,
            "agent registered"
        );
        self.agents.insert(info.speaker_uri.clone(), info);
        Ok(if existing {
            Registered::Updated
        } else {
            Registered::New
        })
    }

    /// Look up an agent by speaker URI.
    pub fn lookup(&self, speaker_uri: &str) -> Option<&AgentInfo> {
        self.agents.get(speaker_uri)
    }

    /// All registered agents, in no particular order.
    pub fn list(&self) -> Vec<&AgentInfo> {
        self.agents.values().collect()
    }

    /// All agents advertising the given capability.
    pub fn by_capability(&self, capability: &str) -> Vec<&AgentInfo> {
        self.agents
            .values()
            .filter(|a| a.capabilities.iter().any(|c| c == capability))
            .collect()
    }

    /// Refresh an agent's heartbeat to `now`.
    pub fn heartbeat(&mut self, speaker_uri: &str, now: DateTime<Utc>) -> Result<(), FloorError> {
        match self.agents.get_mut(speaker_uri) {
            Some(agent) => {
                agent.last_heartbeat_at = now;
                Ok(())
            }
            None => Err(FloorError::UnknownAgent {
                speaker_uri: speaker_uri.to_string(),
            }),
        }
    }

    /// Liveness predicate: heartbeat age within the threshold.
    ///
    /// An unregistered speaker is never alive.
    pub fn is_alive(&self, speaker_uri: &str, now: DateTime<Utc>, threshold: Duration) -> bool {
        match self.agents.get(speaker_uri) {
            Some(agent) => {
                let age = now.signed_duration_since(agent.last_heartbeat_at);
                age.num_milliseconds() <= threshold.as_millis() as i64
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
