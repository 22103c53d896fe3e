//! Conversation history: bounded context for the fallback generator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const MAX_HISTORY_TURNS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub sql: Option<String>,
    pub answer: String,
    pub asked_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(question: impl Into<String>, sql: Option<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            sql,
            answer: answer.into(),
            asked_at: Utc::now(),
        }
    }
}

/// Oldest turns are dropped once the history holds [`MAX_HISTORY_TURNS`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationHistory {
    turns: VecDeque<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        if self.turns.len() == MAX_HISTORY_TURNS {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    /// The last `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter().skip(self.turns.len().saturating_sub(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let mut history = ConversationHistory::new();
        for i in 0..15 {
            history.push(ConversationTurn::new(format!("q{i}"), None, "a"));
        }
        assert_eq!(history.len(), MAX_HISTORY_TURNS);
        assert_eq!(history.turns().next().unwrap().question, "q5");
    }

    #[test]
    fn test_recent_keeps_order() {
        let mut history = ConversationHistory::new();
        for i in 0..5 {
            history.push(ConversationTurn::new(format!("q{i}"), None, "a"));
        }
        let recent: Vec<_> = history.recent(3).map(|t| t.question.as_str()).collect();
        assert_eq!(recent, vec!["q2", "q3", "q4"]);
        assert_eq!(history.recent(10).count(), 5);
    }
}
