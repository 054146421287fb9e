//! Chat-completion collaborators.
//!
//! The crate ships no provider clients. Hosts implement [`ChatProvider`] and
//! pass a handle into the operations that need one.

use crate::error::Result;
use crate::types::{BranchId, Message, Metadata, Role};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const SUMMARY_INSTRUCTIONS: &str = "You are an AI assistant tasked with summarizing a conversation. \
Provide key insights, main topics discussed, and any action items or conclusions reached.";

const SUMMARY_REQUEST: &str = "Please summarize the following conversation:\n\n";

/// One turn sent to a provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        Self::new(message.role, message.content.clone())
    }
}

/// A provider's answer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub content: String,

    /// Token accounting or similar, stored verbatim on the saved message.
    #[serde(default)]
    pub usage: Metadata,
}

/// External chat-completion service.
///
/// Failures should be reported as [`BranchError::Collaborator`] so callers
/// can tell them apart from storage problems.
///
/// [`BranchError::Collaborator`]: crate::error::BranchError::Collaborator
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Short identifier recorded as `llmType` on saved replies.
    fn name(&self) -> &str;

    async fn complete(&self, messages: &[ChatMessage]) -> Result<ChatReply>;
}

/// Summary of a branch produced by a provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub branch_id: BranchId,
    pub content: String,
    pub provider: String,
    pub usage: Metadata,
}

/// Prompt asking a provider to summarize `log`.
pub fn summary_prompt(log: &[Message]) -> Vec<ChatMessage> {
    let transcript = log
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n");

    vec![
        ChatMessage::new(Role::System, SUMMARY_INSTRUCTIONS),
        ChatMessage::new(Role::User, format!("{}{}", SUMMARY_REQUEST, transcript)),
    ]
}
