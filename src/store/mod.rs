//! Persistent store abstraction.
//!
//! The fork and merge engines only talk to a [`ConversationStore`]. Two
//! backends ship with the crate: [`MemoryStore`] and the durable
//! [`FileStore`].

mod file;
mod journal;
mod memory;

pub use file::FileStore;
pub use journal::{Journal, JournalEntry};
pub use memory::MemoryStore;

use crate::branches::BranchRegistry;
use crate::error::{BranchError, Result};
use crate::messages::MessageLog;
use crate::types::{
    Branch, BranchId, Message, MessageId, MessagePatch, NewBranch, NewMessage, StoreStats,
};
use async_trait::async_trait;

/// Storage contract for the message log and the branch registry.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append one message. Branch existence is not checked here.
    async fn append(&self, message: NewMessage) -> Result<Message>;

    /// Bulk insert with one outcome per input, in input order.
    ///
    /// `Err` means nothing was written.
    async fn append_batch(&self, messages: Vec<NewMessage>) -> Result<Vec<Result<Message>>>;

    async fn get_message(&self, id: MessageId) -> Result<Message>;

    /// A branch's messages, oldest first.
    async fn list_ordered(&self, branch: BranchId) -> Result<Vec<Message>>;

    /// Consistent prefix read: resolves `cutoff` and selects every message
    /// of `branch` created no later than it, under a single read guard.
    /// Without a cutoff this is the full log.
    async fn snapshot(&self, branch: BranchId, cutoff: Option<MessageId>) -> Result<Vec<Message>>;

    async fn count_for(&self, branch: BranchId) -> Result<u64>;

    async fn update(&self, id: MessageId, patch: MessagePatch) -> Result<Message>;

    async fn remove(&self, id: MessageId) -> Result<()>;

    async fn create_branch(&self, branch: NewBranch) -> Result<Branch>;

    async fn get_branch(&self, id: BranchId) -> Result<Branch>;

    /// Branches owned by `user_id`, newest first.
    async fn list_branches_for_user(&self, user_id: &str) -> Result<Vec<Branch>>;

    async fn stats(&self) -> Result<StoreStats>;
}

/// Log and registry guarded together by a backend's lock.
#[derive(Debug)]
pub(crate) struct StoreState {
    pub(crate) log: MessageLog,
    pub(crate) registry: BranchRegistry,
}

impl StoreState {
    pub(crate) fn new() -> Self {
        Self {
            log: MessageLog::new(),
            registry: BranchRegistry::new(),
        }
    }

    pub(crate) fn get_message(&self, id: MessageId) -> Result<Message> {
        self.log
            .get(id)
            .cloned()
            .ok_or(BranchError::MessageNotFound(id))
    }

    pub(crate) fn get_branch(&self, id: BranchId) -> Result<Branch> {
        self.registry
            .get(id)
            .cloned()
            .ok_or(BranchError::BranchNotFound(id))
    }

    pub(crate) fn snapshot(&self, branch: BranchId, cutoff: Option<MessageId>) -> Result<Vec<Message>> {
        match cutoff {
            Some(cutoff) => self.log.prefix_until(branch, cutoff),
            None => Ok(self.log.list_ordered(branch)),
        }
    }

    pub(crate) fn stats(&self) -> StoreStats {
        StoreStats {
            message_count: self.log.len() as u64,
            branch_count: self.registry.branch_count() as u64,
        }
    }
}
