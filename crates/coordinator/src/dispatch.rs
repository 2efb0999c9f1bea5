//! Request/reply over the message bus with retries and reply timeouts.
//!
//! The bus itself never retries. `BusDispatcher` sends a request envelope,
//! waits for the correlated reply and, when no reply arrives in time, marks
//! the envelope timed out and tries again with linear backoff.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use switchboard_bus::MessageBus;
use switchboard_common::{Context, Envelope, MessageType, Result, SwitchboardError};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Time allowed for one attempt to produce a reply
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,

    /// Delay before the second attempt; grows linearly per attempt
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_reply_timeout_ms() -> u64 {
    30_000
}

fn default_backoff_ms() -> u64 {
    100
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            reply_timeout_ms: default_reply_timeout_ms(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(attempt as u64))
    }
}

/// Sends requests on behalf of one bus sender.
pub struct BusDispatcher {
    bus: Arc<MessageBus>,
    sender: String,
    policy: RetryPolicy,
}

impl BusDispatcher {
    pub fn new(bus: Arc<MessageBus>, sender: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            bus,
            sender: sender.into(),
            policy,
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Ask `recipient` to process `payload` and return its reply text.
    ///
    /// Rejected sends and error replies fail immediately; only attempts that
    /// time out are retried.
    pub async fn dispatch(&self, recipient: &str, payload: &str, context: &Context) -> Result<String> {
        let attempts = self.policy.max_attempts.max(1);
        let timeout = self.policy.reply_timeout();

        for attempt in 1..=attempts {
            let mut envelope = Envelope::request(&self.sender, recipient, payload)
                .with_context(context.clone())
                .with_timeout(timeout)
                .with_max_attempts(attempts);
            envelope.attempts = attempt;
            let id = envelope.id.clone();

            debug!(recipient = %recipient, envelope = %id, attempt, "Dispatching request");

            let outcome = match tokio::time::timeout(timeout, self.bus.send(envelope)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.bus.mark_timed_out(recipient, &id);
                    warn!(
                        recipient = %recipient,
                        envelope = %id,
                        attempt,
                        max_attempts = attempts,
                        "No reply before timeout"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.delay_for(attempt)).await;
                    }
                    continue;
                }
            };

            if !outcome.accepted {
                return Err(SwitchboardError::Validation(
                    outcome
                        .error
                        .unwrap_or_else(|| format!("envelope {id} rejected")),
                ));
            }

            let reply = self
                .bus
                .take_reply(&self.sender, &id)
                .or(outcome.response)
                .ok_or_else(|| {
                    SwitchboardError::delegation(recipient, "recipient produced no reply")
                })?;

            return match reply.message_type {
                MessageType::Error => Err(SwitchboardError::delegation(recipient, reply.payload)),
                _ => Ok(reply.payload),
            };
        }

        Err(SwitchboardError::TimeoutExceeded(format!(
            "{recipient} did not reply within {}ms after {attempts} attempts",
            self.policy.reply_timeout_ms
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use switchboard_bus::HistoryFilter;
    use switchboard_common::{EnvelopeStatus, Worker};

    struct EchoWorker;

    #[async_trait]
    impl Worker for EchoWorker {
        fn name(&self) -> &str {
            "echo"
        }

        async fn process(&self, message: &str, _context: &Context) -> Result<String> {
            Ok(format!("eco: {message}"))
        }
    }

    /// Hangs on the first call, answers afterwards.
    struct SlowOnceWorker {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Worker for SlowOnceWorker {
        fn name(&self) -> &str {
            "slow"
        }

        async fn process(&self, message: &str, _context: &Context) -> Result<String> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(message.to_uppercase())
        }
    }

    struct FailingWorker;

    #[async_trait]
    impl Worker for FailingWorker {
        fn name(&self) -> &str {
            "failing"
        }

        async fn process(&self, _message: &str, _context: &Context) -> Result<String> {
            Err(SwitchboardError::delegation("failing", "índice corrompido"))
        }
    }

    fn bus_with(name: &str, worker: Arc<dyn Worker>) -> Arc<MessageBus> {
        let bus = Arc::new(MessageBus::with_default_config());
        bus.register("orchestrator", None, None);
        bus.register(name, Some(worker), None);
        bus
    }

    #[tokio::test]
    async fn test_reply_is_collected_from_mailbox() {
        let bus = bus_with("echo", Arc::new(EchoWorker));
        let dispatcher = BusDispatcher::new(bus.clone(), "orchestrator", RetryPolicy::default());

        let reply = dispatcher.dispatch("echo", "olá", &Context::new()).await.unwrap();
        assert_eq!(reply, "eco: olá");
        assert_eq!(bus.queue_depth("orchestrator"), 0);
    }

    #[tokio::test]
    async fn test_unknown_recipient_is_not_retried() {
        let bus = bus_with("echo", Arc::new(EchoWorker));
        let dispatcher = BusDispatcher::new(bus.clone(), "orchestrator", RetryPolicy::default());

        let err = dispatcher.dispatch("nobody", "x", &Context::new()).await.unwrap_err();
        assert!(matches!(err, SwitchboardError::Validation(_)));
        assert_eq!(bus.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_error_reply_becomes_delegation_error() {
        let bus = bus_with("failing", Arc::new(FailingWorker));
        let dispatcher = BusDispatcher::new(bus, "orchestrator", RetryPolicy::default());

        let err = dispatcher.dispatch("failing", "x", &Context::new()).await.unwrap_err();
        assert!(matches!(err, SwitchboardError::Delegation { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_attempt_is_retried() {
        let worker = Arc::new(SlowOnceWorker {
            calls: AtomicU32::new(0),
        });
        let bus = bus_with("slow", worker.clone());
        let policy = RetryPolicy {
            max_attempts: 2,
            reply_timeout_ms: 1_000,
            backoff_ms: 10,
        };
        let dispatcher = BusDispatcher::new(bus.clone(), "orchestrator", policy);

        let reply = dispatcher.dispatch("slow", "abc", &Context::new()).await.unwrap();
        assert_eq!(reply, "ABC");
        assert_eq!(worker.calls.load(Ordering::SeqCst), 2);

        let timed_out = bus.history(&HistoryFilter {
            status: Some(EnvelopeStatus::TimedOut),
            ..Default::default()
        });
        assert_eq!(timed_out.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        struct Hanging;

        #[async_trait]
        impl Worker for Hanging {
            fn name(&self) -> &str {
                "hanging"
            }

            async fn process(&self, _message: &str, _context: &Context) -> Result<String> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(String::new())
            }
        }

        let bus = bus_with("hanging", Arc::new(Hanging));
        let policy = RetryPolicy {
            max_attempts: 2,
            reply_timeout_ms: 500,
            backoff_ms: 0,
        };
        let dispatcher = BusDispatcher::new(bus, "orchestrator", policy);

        let err = dispatcher.dispatch("hanging", "x", &Context::new()).await.unwrap_err();
        assert!(matches!(err, SwitchboardError::TimeoutExceeded(_)));
    }
}
