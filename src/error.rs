//! Error types for branch and message operations.

use crate::types::{BranchId, MessageId};
use thiserror::Error;

/// Main error type for conversation store and engine operations.
#[derive(Debug, Error)]
pub enum BranchError {
    #[error("Invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("Branch not found: {0}")]
    BranchNotFound(BranchId),

    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    #[error("Cutoff message {message} not found in branch {branch}")]
    CutoffNotFound { message: MessageId, branch: BranchId },

    #[error("Branch {0} has no messages")]
    EmptyConversation(BranchId),

    #[error("Branch already exists: {0}")]
    BranchExists(BranchId),

    #[error("Message already exists: {0}")]
    MessageExists(MessageId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Collaborator error: {0}")]
    Collaborator(String),
}

/// Coarse classification used by callers to decide how to react.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, rejected before any mutation.
    Validation,
    /// A referenced branch, message or cutoff does not exist.
    NotFound,
    /// The id is already taken.
    Conflict,
    /// Read or write failure in the underlying store. Safe to retry.
    Storage,
    /// An external collaborator (chat provider) failed.
    Collaborator,
}

impl BranchError {
    /// Shorthand for a validation failure on a named field.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        BranchError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BranchError::Validation { .. } => ErrorKind::Validation,
            BranchError::BranchNotFound(_)
            | BranchError::MessageNotFound(_)
            | BranchError::CutoffNotFound { .. }
            | BranchError::EmptyConversation(_) => ErrorKind::NotFound,
            BranchError::BranchExists(_) | BranchError::MessageExists(_) => ErrorKind::Conflict,
            BranchError::Collaborator(_) => ErrorKind::Collaborator,
            BranchError::Io(_)
            | BranchError::Serialization(_)
            | BranchError::Deserialization(_)
            | BranchError::Corruption(_)
            | BranchError::ChecksumMismatch { .. }
            | BranchError::InvalidFormat(_)
            | BranchError::Locked
            | BranchError::NotInitialized
            | BranchError::Storage(_) => ErrorKind::Storage,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<serde_json::Error> for BranchError {
    fn from(e: serde_json::Error) -> Self {
        BranchError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for BranchError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        BranchError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for BranchError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        BranchError::Deserialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for BranchError {
    fn from(e: tokio::task::JoinError) -> Self {
        BranchError::Storage(format!("blocking task failed: {}", e))
    }
}

/// Result type for conversation operations.
pub type Result<T> = std::result::Result<T, BranchError>;
