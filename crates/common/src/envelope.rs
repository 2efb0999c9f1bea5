//! Envelope types exchanged over the message bus.

use crate::{now_millis, Context, Result, SwitchboardError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Kind of bus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Request,
    Response,
    Notification,
    Error,
    Broadcast,
    Heartbeat,
    Status,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Notification => "notification",
            Self::Error => "error",
            Self::Broadcast => "broadcast",
            Self::Heartbeat => "heartbeat",
            Self::Status => "status",
        }
    }
}

/// Delivery status of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    Pending,
    Processing,
    Done,
    Error,
    Cancelled,
    #[serde(rename = "timedout")]
    TimedOut,
}

impl EnvelopeStatus {
    /// Allowed lifecycle moves: pending → processing → {done, error, timedout},
    /// plus pending → {cancelled, timedout} for envelopes never picked up.
    pub fn can_transition_to(self, next: EnvelopeStatus) -> bool {
        use EnvelopeStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Pending, TimedOut)
                | (Processing, Done)
                | (Processing, Error)
                | (Processing, TimedOut)
        )
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Processing)
    }
}

/// Bus priority, 1 (highest) through 10 (lowest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(u8);

impl Priority {
    pub const HIGHEST: Priority = Priority(1);
    pub const NORMAL: Priority = Priority(5);
    pub const LOWEST: Priority = Priority(10);
    pub const LANES: usize = 10;

    /// Build a priority, clamping into `1..=10`.
    pub fn new(value: u8) -> Self {
        Self(value.clamp(1, 10))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Zero-based queue lane index.
    pub fn lane(self) -> usize {
        (self.0.clamp(1, 10) - 1) as usize
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// A structured unit exchanged over the message bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique envelope ID
    pub id: String,

    #[serde(rename = "type")]
    pub message_type: MessageType,

    pub sender: String,

    pub recipient: String,

    pub payload: String,

    #[serde(default, skip_serializing_if = "Context::is_empty")]
    pub context: Context,

    /// Creation timestamp (Unix millis)
    pub timestamp: u64,

    pub status: EnvelopeStatus,

    #[serde(default)]
    pub priority: Priority,

    /// ID of the request this envelope answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(default)]
    pub attempts: u32,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Envelope {
    pub fn new(
        message_type: MessageType,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            message_type,
            sender: sender.into(),
            recipient: recipient.into(),
            payload: payload.into(),
            context: Context::new(),
            timestamp: now_millis(),
            status: EnvelopeStatus::Pending,
            priority: Priority::default(),
            correlation_id: None,
            attempts: 0,
            max_attempts: default_max_attempts(),
            timeout_ms: default_timeout_ms(),
        }
    }

    pub fn request(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self::new(MessageType::Request, sender, recipient, payload)
    }

    pub fn notification(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self::new(MessageType::Notification, sender, recipient, payload)
    }

    /// Build the reply to `request`, addressed back to its sender.
    pub fn reply_to(request: &Envelope, payload: impl Into<String>) -> Self {
        let mut reply = Self::new(
            MessageType::Response,
            request.recipient.clone(),
            request.sender.clone(),
            payload,
        );
        reply.correlation_id = Some(request.id.clone());
        reply.priority = request.priority;
        reply
    }

    /// Build an error reply to `request`.
    pub fn error_reply(request: &Envelope, reason: impl Into<String>) -> Self {
        let mut reply = Self::reply_to(request, reason);
        reply.message_type = MessageType::Error;
        reply
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Whether the envelope has outlived its timeout at `now_ms`.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.timeout_ms > 0 && now_ms.saturating_sub(self.timestamp) > self.timeout_ms
    }

    /// Check structural invariants before the envelope enters the bus.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(SwitchboardError::Validation("envelope id is empty".into()));
        }
        if self.sender.trim().is_empty() {
            return Err(SwitchboardError::Validation(format!(
                "envelope {} has no sender",
                self.id
            )));
        }
        if self.recipient.trim().is_empty() {
            return Err(SwitchboardError::Validation(format!(
                "envelope {} has no recipient",
                self.id
            )));
        }
        if matches!(self.message_type, MessageType::Response | MessageType::Error)
            && self.correlation_id.is_none()
        {
            return Err(SwitchboardError::Validation(format!(
                "{} envelope {} carries no correlation id",
                self.message_type.as_str(),
                self.id
            )));
        }
        if self.status != EnvelopeStatus::Pending {
            return Err(SwitchboardError::Validation(format!(
                "envelope {} must be pending when sent, found {:?}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// Move to `next`, refusing transitions the lifecycle does not allow.
    pub fn transition(&mut self, next: EnvelopeStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(SwitchboardError::Validation(format!(
                "envelope {} cannot move from {:?} to {:?}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_clamps_into_range() {
        assert_eq!(Priority::new(0).value(), 1);
        assert_eq!(Priority::new(42).value(), 10);
        assert_eq!(Priority::new(3).lane(), 2);
        assert!(Priority::HIGHEST < Priority::LOWEST);
    }

    #[test]
    fn test_reply_carries_correlation() {
        let request = Envelope::request("orchestrator", "search", "find invoices")
            .with_priority(Priority::new(2));
        let reply = Envelope::reply_to(&request, "3 invoices found");

        assert_eq!(reply.message_type, MessageType::Response);
        assert_eq!(reply.correlation_id.as_deref(), Some(request.id.as_str()));
        assert_eq!(reply.sender, "search");
        assert_eq!(reply.recipient, "orchestrator");
        assert_eq!(reply.priority, request.priority);
        assert!(reply.validate().is_ok());
    }

    #[test]
    fn test_response_without_correlation_is_invalid() {
        let orphan = Envelope::new(MessageType::Response, "a", "b", "hi");
        assert!(matches!(
            orphan.validate(),
            Err(SwitchboardError::Validation(_))
        ));
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut env = Envelope::request("a", "b", "x");
        assert!(env.transition(EnvelopeStatus::Done).is_err());
        env.transition(EnvelopeStatus::Processing).unwrap();
        env.transition(EnvelopeStatus::Done).unwrap();
        assert!(env.status.is_terminal());
        assert!(env.transition(EnvelopeStatus::Processing).is_err());
    }

    #[test]
    fn test_expiry_uses_timeout() {
        let env = Envelope::request("a", "b", "x").with_timeout(Duration::from_millis(100));
        assert!(!env.is_expired_at(env.timestamp + 50));
        assert!(env.is_expired_at(env.timestamp + 101));
    }

    #[test]
    fn test_serialized_field_names() {
        let env = Envelope::request("a", "b", "x");
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "request");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["priority"], 5);
        assert!(json.get("correlation_id").is_none());
    }
}
