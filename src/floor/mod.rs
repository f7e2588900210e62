//! Floor control — one speaker at a time per conversation.
//!
//! `state` holds the per-conversation data model and its invariants,
//! `manager` serializes operations against it, and `sweeper` decides when a
//! stuck holder must be evicted.

pub mod manager;
pub mod state;
pub mod sweeper;

pub use manager::{FloorGrant, FloorManager, FloorRelease};
pub use state::{ConversationFloorState, FloorRequest};
pub use sweeper::EvictReason;
