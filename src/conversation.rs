//! Conversation history
//!
//! The history is an append-only log of role-tagged turns. It is seeded with a
//! single system turn and replayed verbatim to the chat model on every request.

use serde::{Deserialize, Serialize};

/// Persona instructions used when no system prompt is configured
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant accessed via a voice interface. \
Your responses will be read aloud to the user. Please keep your responses brief. \
If you have a long response, ask the user if they want you to continue. \
If the user's input doesn't quite make sense, it might have been dictated incorrectly: \
feel free to guess what they really said.";

/// Author of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One role-tagged message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Append-only conversation log for one session
///
/// Turns can only be pushed; nothing is ever edited or removed.
#[derive(Debug, Clone)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
}

impl Conversation {
    /// Start a conversation seeded with the given persona instructions
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            turns: vec![ConversationTurn::system(system_prompt)],
        }
    }

    /// Append a user turn
    pub fn push_user(&mut self, content: impl Into<String>) -> &ConversationTurn {
        self.push(ConversationTurn::user(content))
    }

    /// Append an assistant turn
    pub fn push_assistant(&mut self, content: impl Into<String>) -> &ConversationTurn {
        self.push(ConversationTurn::assistant(content))
    }

    fn push(&mut self, turn: ConversationTurn) -> &ConversationTurn {
        tracing::debug!(role = %turn.role, len = self.turns.len() + 1, "turn appended");
        self.turns.push(turn);
        &self.turns[self.turns.len() - 1]
    }

    /// All turns in conversation order
    #[must_use]
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT)
    }
}
