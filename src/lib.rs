//! # Rostrum
//!
//! Floor-control service for multi-party agent conversations. At most one
//! agent holds the exclusive right to speak ("the floor") per conversation
//! at any instant, with priority-ordered waiting and liveness-based recovery
//! from stuck holders.
//!
//! The core is the [`floor::FloorManager`], which owns per-conversation
//! floor state and serializes concurrent grant/release/request operations.
//! The [`registry::AgentRegistry`] tracks which agents exist, their
//! capabilities, and their liveness; the [`envelope::EnvelopeRouter`]
//! delivers utterances to the current holder or a named target. The
//! [`server`] module exposes everything over HTTP.

pub mod config;
pub mod envelope;
pub mod error;
pub mod floor;
pub mod registry;
pub mod server;

pub use config::{FloorPolicy, RegistrationPolicy, RequeuePolicy};
pub use envelope::{EnvelopeRouter, UtteranceEnvelope};
pub use error::FloorError;
pub use floor::{FloorGrant, FloorManager, FloorRelease};
pub use registry::{AgentInfo, AgentRegistry};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
