//! Conversation State Store — per-conversation floor state and its
//! invariant-preserving mutations.
//!
//! Invariants held by [`ConversationFloorState`]:
//! - at most one holder at any instant;
//! - the wait queue never contains the current holder;
//! - the wait queue is always sorted by (priority descending, enqueued_at
//!   ascending) — FIFO within a priority tier;
//! - a speaker appears at most once in the queue.
//!
//! All mutation goes through the methods here; callers provide the
//! conversation-scoped mutual exclusion (see `floor::manager`).

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::RequeuePolicy;

/// A pending floor request. Exists only while queued.
#[derive(Debug, Clone, Serialize)]
pub struct FloorRequest {
    #[serde(rename = "speakerUri")]
    pub speaker_uri: String,
    /// Higher value is more urgent.
    pub priority: i32,
    #[serde(rename = "enqueuedAt")]
    pub enqueued_at: DateTime<Utc>,
}

/// Floor state for a single conversation.
#[derive(Debug, Clone, Default)]
pub struct ConversationFloorState {
    /// Current holder, if any.
    pub holder: Option<String>,
    /// When the current holder was granted.
    pub holder_granted_at: Option<DateTime<Utc>>,
    /// Pending requests, kept sorted (priority desc, enqueued_at asc).
    pub wait_queue: Vec<FloorRequest>,
}

impl ConversationFloorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `speaker_uri` as holder at `now`.
    ///
    /// The caller must have established that the floor is free; any queued
    /// request from the same speaker is dropped first so the holder never
    /// also waits.
    pub fn grant(&mut self, speaker_uri: &str, now: DateTime<Utc>) {
        debug_assert!(self.holder.is_none(), "grant over an existing holder");
        self.wait_queue.retain(|r| r.speaker_uri != speaker_uri);
        self.holder = Some(speaker_uri.to_string());
        self.holder_granted_at = Some(now);
        self.assert_invariants();
    }

    /// Clear the holder without promoting anyone.
    pub fn clear_holder(&mut self) {
        self.holder = None;
        self.holder_granted_at = None;
    }

    /// Insert or update a queued request and return its 1-based rank.
    ///
    /// A repeat request from an already-queued speaker follows `policy`:
    /// under `Upsert` the entry takes the new priority and a fresh enqueue
    /// time (losing its FIFO seniority); under `Keep` the existing entry is
    /// untouched and only its current rank is reported.
    pub fn enqueue(
        &mut self,
        speaker_uri: &str,
        priority: i32,
        now: DateTime<Utc>,
        policy: RequeuePolicy,
    ) -> usize {
        debug_assert!(
            self.holder.as_deref() != Some(speaker_uri),
            "holder must not be enqueued"
        );
        if let Some(existing) = self
            .wait_queue
            .iter()
            .position(|r| r.speaker_uri == speaker_uri)
        {
            match policy {
                RequeuePolicy::Keep => return existing + 1,
                RequeuePolicy::Upsert => {
                    self.wait_queue.remove(existing);
                }
            }
        }
        let request = FloorRequest {
            speaker_uri: speaker_uri.to_string(),
            priority,
            enqueued_at: now,
        };
        // Insert after every entry that outranks or ties this one, so FIFO
        // holds within a priority tier.
        let index = self
            .wait_queue
            .iter()
            .position(|r| r.priority < priority)
            .unwrap_or(self.wait_queue.len());
        self.wait_queue.insert(index, request);
        self.assert_invariants();
        index + 1
    }

    /// Remove a queued request. Returns whether anything was removed;
    /// removal re-closes the rank gap.
    pub fn withdraw(&mut self, speaker_uri: &str) -> bool {
        let before = self.wait_queue.len();
        self.wait_queue.retain(|r| r.speaker_uri != speaker_uri);
        self.wait_queue.len() < before
    }

    /// Promote the best-ranked queued request to holder, if any.
    ///
    /// The queue is sorted, so the front entry is the one with greatest
    /// priority and earliest arrival. Returns the new holder.
    pub fn promote_next(&mut self, now: DateTime<Utc>) -> Option<String> {
        debug_assert!(self.holder.is_none(), "promote while floor is held");
        if self.wait_queue.is_empty() {
            return None;
        }
        let next = self.wait_queue.remove(0);
        self.holder = Some(next.speaker_uri.clone());
        self.holder_granted_at = Some(now);
        self.assert_invariants();
        Some(next.speaker_uri)
    }

    /// 1-based rank of a queued speaker, if present.
    pub fn position_of(&self, speaker_uri: &str) -> Option<usize> {
        self.wait_queue
            .iter()
            .position(|r| r.speaker_uri == speaker_uri)
            .map(|i| i + 1)
    }

    fn assert_invariants(&self) {
        if let Some(holder) = &self.holder {
            debug_assert!(
                !self.wait_queue.iter().any(|r| &r.speaker_uri == holder),
                "holder present in wait queue"
            );
        }
        debug_assert!(
            self.wait_queue
                .windows(2)
                .all(|w| w[0].priority >= w[1].priority),
            "wait queue out of priority order"
        );
    }
}
