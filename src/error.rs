//! Error types for floor control and agent registry operations.
//!
//! Every variant here is a recoverable, caller-visible outcome; the HTTP
//! layer maps each one to a distinct non-success response. An unseen
//! conversation is never an error — it reads as a fresh, empty one.

use thiserror::Error;

/// Errors surfaced by the floor control manager, agent registry, and
/// envelope router.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FloorError {
    /// The speaker URI is not registered with the agent registry.
    #[error("Unknown agent: {speaker_uri}")]
    UnknownAgent { speaker_uri: String },

    /// The speaker's last heartbeat exceeds the liveness threshold and
    /// liveness enforcement is enabled.
    #[error("Agent not live: {speaker_uri}")]
    AgentNotLive { speaker_uri: String },

    /// A release was attempted by an agent that does not hold the floor.
    #[error("Agent {speaker_uri} does not hold the floor for conversation {conversation_id}")]
    NotHolder {
        conversation_id: String,
        speaker_uri: String,
    },

    /// Utterance routing could not resolve a recipient.
    #[error("No eligible target for utterance in conversation {conversation_id}")]
    NoEligibleTarget { conversation_id: String },

    /// Registration conflict under the reject policy.
    #[error("Agent already registered: {speaker_uri}")]
    DuplicateAgent { speaker_uri: String },
}

impl FloorError {
    /// Stable machine-readable code for the HTTP boundary.
    pub fn code(&self) -> &'static str {
        match self {
            FloorError::UnknownAgent { .. } => "unknown_agent",
            FloorError::AgentNotLive { .. } => "agent_not_live",
            FloorError::NotHolder { .. } => "not_holder",
            FloorError::NoEligibleTarget { .. } => "no_eligible_target",
            FloorError::DuplicateAgent { .. } => "duplicate_agent",
        }
    }
}
