//! Outcomes, filters, statistics and configuration for the message bus.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use switchboard_common::{Envelope, EnvelopeStatus, MessageType, Result};

/// Observer invoked for every envelope delivered to a recipient.
pub type Callback = Arc<dyn Fn(&Envelope) -> Result<()> + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Envelopes kept in the history ring buffer
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_history_capacity() -> usize {
    1000
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
        }
    }
}

/// Result of handing one envelope to the bus.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub accepted: bool,
    pub message_id: String,
    pub status: EnvelopeStatus,
    /// Reply produced by the recipient's worker, for request envelopes
    pub response: Option<Envelope>,
    pub error: Option<String>,
}

impl SendOutcome {
    pub(crate) fn rejected(message_id: impl Into<String>, error: impl ToString) -> Self {
        Self {
            accepted: false,
            message_id: message_id.into(),
            status: EnvelopeStatus::Error,
            response: None,
            error: Some(error.to_string()),
        }
    }

    pub(crate) fn accepted(message_id: impl Into<String>, status: EnvelopeStatus) -> Self {
        Self {
            accepted: true,
            message_id: message_id.into(),
            status,
            response: None,
            error: None,
        }
    }
}

/// Criteria for [`crate::MessageBus::history`]. Empty fields match anything.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub message_type: Option<MessageType>,
    pub status: Option<EnvelopeStatus>,
    /// Most recent N matches
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub fn matches(&self, envelope: &Envelope) -> bool {
        self.sender.as_ref().is_none_or(|s| *s == envelope.sender)
            && self
                .recipient
                .as_ref()
                .is_none_or(|r| *r == envelope.recipient)
            && self
                .message_type
                .is_none_or(|t| t == envelope.message_type)
            && self.status.is_none_or(|s| s == envelope.status)
    }
}

/// Bus counters, serialized under Portuguese keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusStats {
    #[serde(rename = "mensagens_enviadas")]
    pub sent: u64,

    #[serde(rename = "mensagens_processadas")]
    pub processed: u64,

    #[serde(rename = "erros")]
    pub errors: u64,

    #[serde(rename = "mensagens_rejeitadas")]
    pub rejected: u64,

    #[serde(rename = "mensagens_expiradas")]
    pub timed_out: u64,

    #[serde(rename = "por_tipo")]
    pub by_type: BTreeMap<String, u64>,

    /// Accepted envelopes per sender
    #[serde(rename = "por_agente")]
    pub by_agent: BTreeMap<String, u64>,

    #[serde(rename = "tempo_medio_processamento_ms")]
    pub avg_processing_ms: f64,

    #[serde(rename = "fila_atual")]
    pub queue_depth: usize,

    #[serde(rename = "em_processamento")]
    pub in_flight: usize,

    #[serde(rename = "tamanho_historico")]
    pub history_size: usize,

    #[serde(rename = "agentes_registrados")]
    pub registered_agents: usize,
}
