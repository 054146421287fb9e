//! # Threadfork
//!
//! Branching conversations: every message lives in exactly one branch, and
//! new branches are made by copying, never by sharing.
//!
//! ## Core Concepts
//!
//! - **Branches**: Root, fork or merge, fixed at creation
//! - **Fork**: Copy of a parent's log up to an optional cutoff message
//! - **Merge**: Two logs interleaved by creation time into a new branch
//! - **Lineage**: Copies record their source in `originalMessageId` and, for
//!   merges, `originalBranchId`
//!
//! ## Example
//!
//! ```ignore
//! use threadfork::{AppendRequest, BranchId, Conversations, EngineConfig, ForkRequest, MemoryStore};
//!
//! let conversations = Conversations::new(MemoryStore::new(), EngineConfig::default());
//!
//! let branch = BranchId::new();
//! let first = conversations.append(AppendRequest::new(branch, "alice", "hello")).await?;
//! conversations.append(AppendRequest::new(branch, "alice", "and more")).await?;
//!
//! // Fork after the first message
//! let fork = conversations
//!     .fork(ForkRequest::new(branch, "alice").at(first.id))
//!     .await?;
//! assert_eq!(fork.copied_count, 1);
//! ```

pub mod assist;
pub mod branches;
pub mod config;
pub mod engine;
pub mod error;
pub mod messages;
pub mod query;
pub mod service;
pub mod store;
pub mod types;

// Re-exports
pub use assist::{ChatMessage, ChatProvider, ChatReply, Insight};
pub use branches::BranchRegistry;
pub use config::{CopyIdMode, EngineConfig, MissingCutoffPolicy, StoreConfig};
pub use engine::{
    CopyFailure, ForkEngine, ForkOutcome, ForkRequest, MergeEngine, MergeOutcome, MergeRequest,
};
pub use error::{BranchError, ErrorKind, Result};
pub use messages::MessageLog;
pub use query::BranchQueryService;
pub use service::{AppendRequest, Conversations};
pub use store::{ConversationStore, FileStore, MemoryStore};
pub use types::{
    Branch, BranchId, BranchKind, BranchSummary, Message, MessageId, MessagePatch, Metadata,
    NewBranch, NewMessage, Role, StoreStats, Timestamp,
};
