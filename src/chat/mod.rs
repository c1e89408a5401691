//! Chat completion clients
//!
//! The engine only depends on the [`ChatCompletion`] trait; the concrete
//! client talks to an OpenAI-compatible HTTP endpoint.

mod openai;

use async_trait::async_trait;

pub use openai::OpenAiChatClient;

use crate::Result;
use crate::conversation::ConversationTurn;

/// Produces one assistant turn from the full conversation so far
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Request a completion for `turns`, in conversation order
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a missing credential, `Error::Connectivity`
    /// for transport failures and non-success statuses, and
    /// `Error::ResponseFormat` when the reply cannot be understood.
    async fn complete(&self, turns: &[ConversationTurn]) -> Result<ConversationTurn>;
}
