//! Floor Control Manager — serializes grant/release/request operations per
//! conversation and applies priority-queue semantics.
//!
//! Conversation state lives in a `DashMap` keyed by conversation id, each
//! entry wrapping its [`ConversationFloorState`] in a `parking_lot::Mutex`.
//! Mutations take only that conversation's mutex, so operations on different
//! conversations never block each other. Registry validation for a requester
//! happens before the conversation lock is taken; the lock is never held
//! across anything slower than a registry read.
//!
//! Conversations are created implicitly on first `request_floor` and never
//! destroyed. Reads of unseen conversations allocate nothing.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::config::FloorPolicy;
use crate::error::FloorError;
use crate::floor::state::{ConversationFloorState, FloorRequest};
use crate::floor::sweeper;
use crate::registry::AgentRegistry;

/// Outcome of `request_floor`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FloorGrant {
    pub granted: bool,
    /// 1-based queue rank when not granted.
    pub position: Option<usize>,
}

/// Outcome of `release_floor`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FloorRelease {
    pub released: bool,
    /// The promoted holder, if the queue was non-empty.
    pub new_holder: Option<String>,
}

/// Owns all per-conversation floor state.
pub struct FloorManager {
    conversations: DashMap<String, Arc<Mutex<ConversationFloorState>>>,
    registry: Arc<RwLock<AgentRegistry>>,
    policy: FloorPolicy,
}

impl FloorManager {
    pub fn new(registry: Arc<RwLock<AgentRegistry>>, policy: FloorPolicy) -> Self {
        Self {
            conversations: DashMap::new(),
            registry,
            policy,
        }
    }

    pub fn policy(&self) -> &FloorPolicy {
        &self.policy
    }

    /// Request the floor for `speaker_uri` in `conversation_id`.
    ///
    /// Grants immediately when the floor is free; is idempotent for the
    /// current holder; otherwise queues (or re-queues, per policy) and
    /// reports the 1-based rank. Always safe to retry.
    pub fn request_floor(
        &self,
        conversation_id: &str,
        speaker_uri: &str,
        priority: i32,
    ) -> Result<FloorGrant, FloorError> {
        let now = Utc::now();

        // Validate the requester before entering the conversation's
        // critical section.
        {
            let registry = self.registry.read();
            if registry.lookup(speaker_uri).is_none() {
                return Err(FloorError::UnknownAgent {
                    speaker_uri: speaker_uri.to_string(),
                });
            }
            if self.policy.enforce_liveness
                && !registry.is_alive(speaker_uri, now, self.policy.liveness_threshold)
            {
                return Err(FloorError::AgentNotLive {
                    speaker_uri: speaker_uri.to_string(),
                });
            }
        }

        let handle = self.handle(conversation_id);
        let mut state = handle.lock();
        self.sweep(conversation_id, &mut state, now);

        match state.holder.as_deref() {
            None => {
                state.grant(speaker_uri, now);
                tracing::info!(
                    conversation_id,
                    speaker_uri,
                    "floor granted"
                );
                Ok(FloorGrant {
                    granted: true,
                    position: None,
                })
            }
            Some(holder) if holder == speaker_uri => Ok(FloorGrant {
                granted: true,
                position: None,
            }),
            Some(_) => {
                let position = state.enqueue(speaker_uri, priority, now, self.policy.requeue);
                tracing::debug!(
                    conversation_id,
                    speaker_uri,
                    priority,
                    position,
                    "floor request queued"
                );
                Ok(FloorGrant {
                    granted: false,
                    position: Some(position),
                })
            }
        }
    }

    /// Release the floor held by `speaker_uri` and promote the next queued
    /// request, if any.
    ///
    /// A non-holder gets `NotHolder` and mutates nothing, so a misbehaving
    /// agent cannot evict another's floor.
    pub fn release_floor(
        &self,
        conversation_id: &str,
        speaker_uri: &str,
    ) -> Result<FloorRelease, FloorError> {
        let now = Utc::now();
        let not_holder = || FloorError::NotHolder {
            conversation_id: conversation_id.to_string(),
            speaker_uri: speaker_uri.to_string(),
        };

        let Some(handle) = self.existing_handle(conversation_id) else {
            return Err(not_holder());
        };
        let mut state = handle.lock();
        self.sweep(conversation_id, &mut state, now);

        if state.holder.as_deref() != Some(speaker_uri) {
            return Err(not_holder());
        }
        state.clear_holder();
        let new_holder = state.promote_next(now);
        tracing::info!(
            conversation_id,
            speaker_uri,
            new_holder = new_holder.as_deref().unwrap_or("<none>"),
            "floor released"
        );
        Ok(FloorRelease {
            released: true,
            new_holder,
        })
    }

    /// Current holder, if any. Never fails; an unseen conversation reads
    /// as empty. Runs the lazy expiry sweep before answering.
    pub fn get_holder(&self, conversation_id: &str) -> Option<String> {
        let handle = self.existing_handle(conversation_id)?;
        let mut state = handle.lock();
        self.sweep(conversation_id, &mut state, Utc::now());
        state.holder.clone()
    }

    /// Cancel a still-queued request. Returns whether an entry was removed.
    pub fn withdraw_request(&self, conversation_id: &str, speaker_uri: &str) -> bool {
        let Some(handle) = self.existing_handle(conversation_id) else {
            return false;
        };
        let mut state = handle.lock();
        let withdrawn = state.withdraw(speaker_uri);
        if withdrawn {
            tracing::debug!(conversation_id, speaker_uri, "floor request withdrawn");
        }
        withdrawn
    }

    /// Snapshot of the ordered wait queue for a conversation.
    pub fn queue_snapshot(&self, conversation_id: &str) -> Vec<FloorRequest> {
        match self.existing_handle(conversation_id) {
            Some(handle) => handle.lock().wait_queue.clone(),
            None => Vec::new(),
        }
    }

    fn handle(&self, conversation_id: &str) -> Arc<Mutex<ConversationFloorState>> {
        self.conversations
            .entry(conversation_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    fn existing_handle(&self, conversation_id: &str) -> Option<Arc<Mutex<ConversationFloorState>>> {
        self.conversations
            .get(conversation_id)
            .map(|entry| entry.value().clone())
    }

    /// Evict a stale or dead holder and promote replacements until the
    /// floor is held by a viable agent or free.
    fn sweep(&self, conversation_id: &str, state: &mut ConversationFloorState, now: chrono::DateTime<Utc>) {
        loop {
            let Some(holder) = state.holder.clone() else {
                return;
            };
            let granted_at = state.holder_granted_at.unwrap_or(now);
            let alive = !self.policy.enforce_liveness
                || self
                    .registry
                    .read()
                    .is_alive(&holder, now, self.policy.liveness_threshold);
            match sweeper::check_holder(
                now,
                granted_at,
                self.policy.max_hold,
                alive,
                self.policy.enforce_liveness,
            ) {
                None => return,
                Some(reason) => {
                    tracing::warn!(
                        conversation_id,
                        speaker_uri = %holder,
                        ?reason,
                        "forcibly releasing stale floor holder"
                    );
                    state.clear_holder();
                    state.promote_next(now);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RegistrationPolicy, RequeuePolicy};
    use crate::registry::AgentInfo;
    use std::time::Duration;

    fn registry_with(agents: &[&str]) -> Arc<RwLock<AgentRegistry>> {
        let mut registry = AgentRegistry::new();
        for uri in agents {
            registry
                .register(
                    AgentInfo::new(*uri, *uri, vec![], None),
                    RegistrationPolicy::Upsert,
                )
                .unwrap();
        }
        Arc::new(RwLock::new(registry))
    }

    fn manager(agents: &[&str]) -> FloorManager {
        FloorManager::new(registry_with(agents), FloorPolicy::default())
    }

    #[test]
    fn test_grant_when_idle() {
        let mgr = manager(&["a"]);
        let grant = mgr.request_floor("conv", "a", 0).unwrap();
        assert_eq!(
            grant,
            FloorGrant {
                granted: true,
                position: None
            }
        );
        assert_eq!(mgr.get_holder("conv").as_deref(), Some("a"));
    }

    #[test]
    fn test_unknown_agent_rejected() {
        let mgr = manager(&["a"]);
        let err = mgr.request_floor("conv", "ghost", 0).unwrap_err();
        assert!(matches!(err, FloorError::UnknownAgent { .. }));
    }

    #[test]
    fn test_stale_heartbeat_rejected() {
        let registry = registry_with(&["a"]);
        let stale = Utc::now() - chrono::Duration::seconds(300);
        registry.write().heartbeat("a", stale).unwrap();
        let mgr = FloorManager::new(registry, FloorPolicy::default());

        let err = mgr.request_floor("conv", "a", 0).unwrap_err();
        assert!(matches!(err, FloorError::AgentNotLive { .. }));
    }

    #[test]
    fn test_stale_heartbeat_allowed_when_liveness_off() {
        let registry = registry_with(&["a"]);
        let stale = Utc::now() - chrono::Duration::seconds(300);
        registry.write().heartbeat("a", stale).unwrap();
        let policy = FloorPolicy {
            enforce_liveness: false,
            ..FloorPolicy::default()
        };
        let mgr = FloorManager::new(registry, policy);

        assert!(mgr.request_floor("conv", "a", 0).unwrap().granted);
    }

    #[test]
    fn test_idempotent_self_grant_keeps_queue() {
        let mgr = manager(&["a", "b"]);
        mgr.request_floor("conv", "a", 0).unwrap();
        mgr.request_floor("conv", "b", 1).unwrap();

        let again = mgr.request_floor("conv", "a", 0).unwrap();
        assert!(again.granted);
        assert_eq!(again.position, None);
        assert_eq!(mgr.queue_snapshot("conv").len(), 1);
    }

    #[test]
    fn test_priority_promotion_order() {
        let mgr = manager(&["text", "image", "data"]);
        assert!(mgr.request_floor("conv", "text", 5).unwrap().granted);
        let image = mgr.request_floor("conv", "image", 3).unwrap();
        let data = mgr.request_floor("conv", "data", 4).unwrap();
        assert_eq!(image.position, Some(1));
        assert_eq!(data.position, Some(1), "higher priority ranks ahead");

        let release = mgr.release_floor("conv", "text").unwrap();
        assert_eq!(release.new_holder.as_deref(), Some("data"));
        let release = mgr.release_floor("conv", "data").unwrap();
        assert_eq!(release.new_holder.as_deref(), Some("image"));
        let release = mgr.release_floor("conv", "image").unwrap();
        assert_eq!(release.new_holder, None);
        assert_eq!(mgr.get_holder("conv"), None);
    }

    #[test]
    fn test_non_holder_release_rejected() {
        let mgr = manager(&["a", "b"]);
        mgr.request_floor("conv", "a", 0).unwrap();

        let err = mgr.release_floor("conv", "b").unwrap_err();
        assert!(matches!(err, FloorError::NotHolder { .. }));
        assert_eq!(mgr.get_holder("conv").as_deref(), Some("a"));
    }

    #[test]
    fn test_release_on_unseen_conversation_rejected() {
        let mgr = manager(&["a"]);
        let err = mgr.release_floor("nowhere", "a").unwrap_err();
        assert!(matches!(err, FloorError::NotHolder { .. }));
    }

    #[test]
    fn test_get_holder_unseen_conversation() {
        let mgr = manager(&[]);
        assert_eq!(mgr.get_holder("nowhere"), None);
    }

    #[test]
    fn test_withdraw_request() {
        let mgr = manager(&["a", "b", "c"]);
        mgr.request_floor("conv", "a", 0).unwrap();
        mgr.request_floor("conv", "b", 2).unwrap();
        mgr.request_floor("conv", "c", 1).unwrap();

        assert!(mgr.withdraw_request("conv", "b"));
        assert!(!mgr.withdraw_request("conv", "b"));

        let release = mgr.release_floor("conv", "a").unwrap();
        assert_eq!(release.new_holder.as_deref(), Some("c"));
    }

    #[test]
    fn test_dead_holder_evicted_on_next_touch() {
        let registry = registry_with(&["a", "b"]);
        let mgr = FloorManager::new(registry.clone(), FloorPolicy::default());
        mgr.request_floor("conv", "a", 0).unwrap();
        mgr.request_floor("conv", "b", 1).unwrap();

        // Holder stops heartbeating past the threshold.
        let stale = Utc::now() - chrono::Duration::seconds(300);
        registry.write().heartbeat("a", stale).unwrap();

        assert_eq!(mgr.get_holder("conv").as_deref(), Some("b"));
    }

    #[test]
    fn test_overlong_hold_evicted_on_next_request() {
        let policy = FloorPolicy {
            max_hold: Duration::from_secs(30),
            ..FloorPolicy::default()
        };
        let mgr = FloorManager::new(registry_with(&["a", "b"]), policy);
        mgr.request_floor("conv", "a", 0).unwrap();

        // Backdate the grant past max_hold.
        {
            let handle = mgr.existing_handle("conv").unwrap();
            let mut state = handle.lock();
            state.holder_granted_at = Some(Utc::now() - chrono::Duration::seconds(60));
        }

        let grant = mgr.request_floor("conv", "b", 0).unwrap();
        assert!(grant.granted, "floor should pass to the new requester");
        assert_eq!(mgr.get_holder("conv").as_deref(), Some("b"));
    }

    #[test]
    fn test_eviction_skips_dead_queued_agents() {
        let registry = registry_with(&["a", "b", "c"]);
        let mgr = FloorManager::new(registry.clone(), FloorPolicy::default());
        mgr.request_floor("conv", "a", 0).unwrap();
        mgr.request_floor("conv", "b", 2).unwrap();
        mgr.request_floor("conv", "c", 1).unwrap();

        let stale = Utc::now() - chrono::Duration::seconds(300);
        registry.write().heartbeat("a", stale).unwrap();
        registry.write().heartbeat("b", stale).unwrap();

        // Both the holder and the best-ranked waiter are dead; the sweep
        // promotes through to the first live agent.
        assert_eq!(mgr.get_holder("conv").as_deref(), Some("c"));
    }

    #[test]
    fn test_concurrent_requests_grant_exactly_one() {
        let mgr = Arc::new(manager(&["a", "b"]));
        let mgr_a = mgr.clone();
        let mgr_b = mgr.clone();

        let t1 = std::thread::spawn(move || mgr_a.request_floor("conv", "a", 0).unwrap());
        let t2 = std::thread::spawn(move || mgr_b.request_floor("conv", "b", 0).unwrap());
        let (g1, g2) = (t1.join().unwrap(), t2.join().unwrap());

        assert!(g1.granted ^ g2.granted, "exactly one request may win");
        let queued = if g1.granted { g2 } else { g1 };
        assert_eq!(queued.position, Some(1));
    }

    #[test]
    fn test_conversations_are_independent() {
        let mgr = manager(&["a", "b"]);
        assert!(mgr.request_floor("conv_1", "a", 0).unwrap().granted);
        assert!(mgr.request_floor("conv_2", "b", 0).unwrap().granted);
        assert_eq!(mgr.get_holder("conv_1").as_deref(), Some("a"));
        assert_eq!(mgr.get_holder("conv_2").as_deref(), Some("b"));
    }

    #[test]
    fn test_requeue_keep_policy_preserves_rank() {
        let policy = FloorPolicy {
            requeue: RequeuePolicy::Keep,
            ..FloorPolicy::default()
        };
        let mgr = FloorManager::new(registry_with(&["a", "b", "c"]), policy);
        mgr.request_floor("conv", "a", 0).unwrap();
        mgr.request_floor("conv", "b", 1).unwrap();
        mgr.request_floor("conv", "c", 5).unwrap();

        // "b" escalates, but the keep policy ignores the new priority.
        let again = mgr.request_floor("conv", "b", 9).unwrap();
        assert_eq!(again.position, Some(2));

        let release = mgr.release_floor("conv", "a").unwrap();
        assert_eq!(release.new_holder.as_deref(), Some("c"));
    }
}
