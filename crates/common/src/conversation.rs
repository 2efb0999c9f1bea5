//! Conversation turns kept between requests.

use crate::now_millis;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,

    /// Timestamp (Unix millis)
    pub timestamp: u64,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
            timestamp: now_millis(),
        }
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Agent,
            content: content.into(),
            timestamp: now_millis(),
        }
    }
}

/// Ordered, bounded list of turns. The oldest turn is pruned past `capacity`.
#[derive(Debug, Clone)]
pub struct Conversation {
    turns: VecDeque<ConversationTurn>,
    capacity: usize,
}

impl Conversation {
    pub const DEFAULT_CAPACITY: usize = 50;

    pub fn new(capacity: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.capacity {
            self.turns.pop_front();
        }
    }

    pub fn turns(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// Context key under which recent turns are handed to workers.
pub const HISTORY_KEY: &str = "history";

/// One line per turn, prefixed with the speaker.
pub fn render_history(turns: &[ConversationTurn]) -> String {
    turns
        .iter()
        .map(|turn| {
            let speaker = match turn.role {
                TurnRole::User => "usuário",
                TurnRole::Agent => "assistente",
            };
            format!("{speaker}: {}", turn.content.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oldest_turn_pruned_past_capacity() {
        let mut conversation = Conversation::new(2);
        conversation.push(ConversationTurn::user("first"));
        conversation.push(ConversationTurn::agent("second"));
        conversation.push(ConversationTurn::user("third"));

        let turns = conversation.turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "second");
        assert_eq!(turns[1].content, "third");
    }

    #[test]
    fn test_history_renders_one_line_per_turn() {
        let rendered = render_history(&[
            ConversationTurn::user(" oi "),
            ConversationTurn::agent("Olá!"),
        ]);
        assert_eq!(rendered, "usuário: oi\nassistente: Olá!");
    }

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TurnRole::Agent).unwrap(), "\"agent\"");
    }
}
