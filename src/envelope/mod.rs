//! Envelope Router — delivers utterances to the current floor holder or a
//! named target.
//!
//! Target resolution: an explicit target is looked up in the registry; an
//! omitted target resolves to the conversation's current holder, excluding
//! the sender. With `floor_gated_send` on, only the current holder may send
//! at all (which means gated traffic must always name its target).
//!
//! Outbound delivery goes through [`UtteranceTransport`]: the HTTP
//! implementation POSTs the envelope to the target's registered service
//! endpoint with a bounded timeout, and the loopback implementation keeps
//! envelopes in memory for tests. A transport failure is reported as
//! `delivered=false`, never as a grant of anything.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use uuid::Uuid;

use crate::error::FloorError;
use crate::floor::FloorManager;
use crate::registry::AgentRegistry;

/// An utterance in flight.
#[derive(Debug, Clone, Serialize)]
pub struct UtteranceEnvelope {
    #[serde(rename = "envelopeId")]
    pub envelope_id: Uuid,
    pub conversation_id: String,
    #[serde(rename = "sender_speakerUri")]
    pub sender: String,
    #[serde(rename = "target_speakerUri")]
    pub target: String,
    pub text: String,
    #[serde(rename = "sentAt")]
    pub sent_at: DateTime<Utc>,
}

/// Outcome of a delivery attempt.
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub delivered: bool,
    #[serde(rename = "envelopeId")]
    pub envelope_id: Uuid,
    #[serde(rename = "target_speakerUri")]
    pub target: String,
}

/// Outbound hop for resolved envelopes.
#[async_trait]
pub trait UtteranceTransport: Send + Sync {
    /// Forward `envelope` to the target's service endpoint.
    async fn forward(&self, endpoint: &str, envelope: &UtteranceEnvelope) -> anyhow::Result<()>;
}

/// POSTs envelopes to the target agent's `serviceUrl`.
pub struct HttpTransport {
    /// Request timeout in seconds.
    pub timeout: u64,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self { timeout: 10 }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UtteranceTransport for HttpTransport {
    async fn forward(&self, endpoint: &str, envelope: &UtteranceEnvelope) -> anyhow::Result<()> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(self.timeout))
            .build()?;
        let resp = client
            .post(endpoint)
            .header("Content-Type", "application/json")
            .json(envelope)
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("target endpoint {} returned HTTP {}", endpoint, resp.status());
        }
        Ok(())
    }
}

/// In-process transport that records every forwarded envelope.
#[derive(Default)]
pub struct LoopbackTransport {
    sent: Mutex<Vec<(String, UtteranceEnvelope)>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Envelopes forwarded so far, with their endpoints.
    pub fn sent(&self) -> Vec<(String, UtteranceEnvelope)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl UtteranceTransport for LoopbackTransport {
    async fn forward(&self, endpoint: &str, envelope: &UtteranceEnvelope) -> anyhow::Result<()> {
        self.sent.lock().push((endpoint.to_string(), envelope.clone()));
        Ok(())
    }
}

/// Routes utterances using floor state for authorization and target
/// resolution.
pub struct EnvelopeRouter {
    floor: Arc<FloorManager>,
    registry: Arc<RwLock<AgentRegistry>>,
    transport: Arc<dyn UtteranceTransport>,
}

impl EnvelopeRouter {
    pub fn new(
        floor: Arc<FloorManager>,
        registry: Arc<RwLock<AgentRegistry>>,
        transport: Arc<dyn UtteranceTransport>,
    ) -> Self {
        Self {
            floor,
            registry,
            transport,
        }
    }

    /// Deliver `text` from `sender` to `target` (or to the current holder
    /// when no target is named).
    pub async fn deliver(
        &self,
        conversation_id: &str,
        sender: &str,
        target: Option<&str>,
        text: &str,
    ) -> Result<Delivery, FloorError> {
        // get_holder also runs the lazy expiry sweep for this conversation.
        let holder = self.floor.get_holder(conversation_id);

        if self.floor.policy().floor_gated_send && holder.as_deref() != Some(sender) {
            return Err(FloorError::NotHolder {
                conversation_id: conversation_id.to_string(),
                speaker_uri: sender.to_string(),
            });
        }

        let resolved = match target {
            Some(uri) => uri.to_string(),
            None => match holder {
                Some(h) if h != sender => h,
                _ => {
                    return Err(FloorError::NoEligibleTarget {
                        conversation_id: conversation_id.to_string(),
                    })
                }
            },
        };

        // Clone what we need out of the registry; the read guard must not
        // be held across the transport await.
        let (sender_known, endpoint) = {
            let registry = self.registry.read();
            (
                registry.lookup(sender).is_some(),
                registry
                    .lookup(&resolved)
                    .map(|info| info.service_endpoint.clone()),
            )
        };
        if !sender_known {
            return Err(FloorError::UnknownAgent {
                speaker_uri: sender.to_string(),
            });
        }
        let Some(endpoint) = endpoint else {
            return Err(FloorError::UnknownAgent {
                speaker_uri: resolved,
            });
        };

        let envelope = UtteranceEnvelope {
            envelope_id: Uuid::new_v4(),
            conversation_id: conversation_id.to_string(),
            sender: sender.to_string(),
            target: resolved.clone(),
            text: text.to_string(),
            sent_at: Utc::now(),
        };

        let delivered = match endpoint {
            Some(endpoint) => match self.transport.forward(&endpoint, &envelope).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(
                        conversation_id,
                        target = %resolved,
                        error = %e,
                        "utterance forward failed"
                    );
                    false
                }
            },
            // No registered endpoint: the envelope is accepted and logged.
            None => {
                tracing::debug!(
                    conversation_id,
                    target = %resolved,
                    "target has no service endpoint; envelope accepted"
                );
                true
            }
        };

        Ok(Delivery {
            delivered,
            envelope_id: envelope.envelope_id,
            target: resolved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FloorPolicy, RegistrationPolicy};
    use crate::registry::AgentInfo;

    struct Fixture {
        router: EnvelopeRouter,
        floor: Arc<FloorManager>,
        transport: Arc<LoopbackTransport>,
    }

    fn fixture(policy: FloorPolicy, agents: &[&str]) -> Fixture {
        let mut registry = AgentRegistry::new();
        for uri in agents {
            registry
                .register(
                    AgentInfo::new(
                        *uri,
                        *uri,
                        vec![],
                        Some(format!("http://{}.local/inbox", uri)),
                    ),
                    RegistrationPolicy::Upsert,
                )
                .unwrap();
        }
        let registry = Arc::new(RwLock::new(registry));
        let floor = Arc::new(FloorManager::new(registry.clone(), policy));
        let transport = Arc::new(LoopbackTransport::new());
        let router = EnvelopeRouter::new(floor.clone(), registry, transport.clone());
        Fixture {
            router,
            floor,
            transport,
        }
    }

    #[tokio::test]
    async fn test_default_target_is_current_holder() {
        let fx = fixture(FloorPolicy::default(), &["a", "b"]);
        fx.floor.request_floor("conv", "a", 0).unwrap();

        let delivery = fx.router.deliver("conv", "b", None, "hello").await.unwrap();
        assert!(delivery.delivered);
        assert_eq!(delivery.target, "a");

        let sent = fx.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "http://a.local/inbox");
        assert_eq!(sent[0].1.text, "hello");
    }

    #[tokio::test]
    async fn test_no_holder_means_no_eligible_target() {
        let fx = fixture(FloorPolicy::default(), &["a", "b"]);
        let err = fx.router.deliver("conv", "b", None, "hello").await.unwrap_err();
        assert!(matches!(err, FloorError::NoEligibleTarget { .. }));
    }

    #[tokio::test]
    async fn test_holder_cannot_default_target_itself() {
        let fx = fixture(FloorPolicy::default(), &["a"]);
        fx.floor.request_floor("conv", "a", 0).unwrap();

        let err = fx.router.deliver("conv", "a", None, "hello").await.unwrap_err();
        assert!(matches!(err, FloorError::NoEligibleTarget { .. }));
    }

    #[tokio::test]
    async fn test_explicit_unknown_target_rejected() {
        let fx = fixture(FloorPolicy::default(), &["a", "b"]);
        fx.floor.request_floor("conv", "a", 0).unwrap();

        let err = fx
            .router
            .deliver("conv", "a", Some("ghost"), "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, FloorError::UnknownAgent { .. }));
    }

    #[tokio::test]
    async fn test_unknown_sender_rejected() {
        let fx = fixture(FloorPolicy::default(), &["a", "b"]);
        fx.floor.request_floor("conv", "a", 0).unwrap();

        let err = fx.router.deliver("conv", "ghost", None, "hello").await.unwrap_err();
        assert!(matches!(err, FloorError::UnknownAgent { .. }));
    }

    #[tokio::test]
    async fn test_gated_send_rejects_non_holder() {
        let policy = FloorPolicy {
            floor_gated_send: true,
            ..FloorPolicy::default()
        };
        let fx = fixture(policy, &["a", "b"]);
        fx.floor.request_floor("conv", "a", 0).unwrap();

        let err = fx
            .router
            .deliver("conv", "b", Some("a"), "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, FloorError::NotHolder { .. }));
    }

    #[tokio::test]
    async fn test_gated_send_allows_holder_with_explicit_target() {
        let policy = FloorPolicy {
            floor_gated_send: true,
            ..FloorPolicy::default()
        };
        let fx = fixture(policy, &["a", "b"]);
        fx.floor.request_floor("conv", "a", 0).unwrap();

        let delivery = fx
            .router
            .deliver("conv", "a", Some("b"), "hello")
            .await
            .unwrap();
        assert!(delivery.delivered);
        assert_eq!(delivery.target, "b");
    }

    #[tokio::test]
    async fn test_target_without_endpoint_still_accepted() {
        let fx = fixture(FloorPolicy::default(), &["a"]);
        {
            let mut registry = fx.router.registry.write();
            registry
                .register(
                    AgentInfo::new("quiet", "quiet", vec![], None),
                    RegistrationPolicy::Upsert,
                )
                .unwrap();
        }
        fx.floor.request_floor("conv", "a", 0).unwrap();

        let delivery = fx
            .router
            .deliver("conv", "a", Some("quiet"), "hello")
            .await
            .unwrap();
        assert!(delivery.delivered);
        assert!(fx.transport.sent().is_empty());
    }
}
