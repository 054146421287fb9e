//! Copying messages into a freshly created branch.

use crate::config::CopyIdMode;
use crate::error::{BranchError, ErrorKind, Result};
use crate::store::ConversationStore;
use crate::types::{
    Branch, BranchId, Message, MessageId, NewBranch, NewMessage, ORIGINAL_BRANCH_ID,
    ORIGINAL_MESSAGE_ID,
};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Which lineage keys a copy carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Lineage {
    /// `originalMessageId` only.
    Fork,
    /// `originalMessageId` and `originalBranchId`.
    Merge,
}

/// A message that could not be copied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopyFailure {
    pub source_id: MessageId,
    pub kind: ErrorKind,
    pub error: String,
}

#[derive(Debug, Default)]
pub(crate) struct CopyOutcome {
    pub(crate) copied: usize,
    pub(crate) failures: Vec<CopyFailure>,
}

/// Build the copies of `sources` for `destination`, preserving order.
///
/// Copies keep role, content and caller metadata. Lineage keys from earlier
/// copies are replaced so they always name the immediate source. Flags are
/// never carried over.
pub(crate) fn plan_copies(
    sources: &[Message],
    destination: BranchId,
    ids: CopyIdMode,
    lineage: Lineage,
) -> Vec<NewMessage> {
    sources
        .iter()
        .enumerate()
        .map(|(position, source)| {
            let id = match ids {
                CopyIdMode::Random => MessageId::new(),
                CopyIdMode::Deterministic => MessageId::derived(source.id, destination, position),
            };

            let mut metadata = source.user_metadata();
            metadata.insert(
                ORIGINAL_MESSAGE_ID.to_string(),
                Value::String(source.id.to_string()),
            );
            if lineage == Lineage::Merge {
                metadata.insert(
                    ORIGINAL_BRANCH_ID.to_string(),
                    Value::String(source.branch_id.to_string()),
                );
            }

            NewMessage::new(destination, source.role, source.content.clone())
                .with_id(id)
                .with_metadata(metadata)
        })
        .collect()
}

/// Submit the copies as one batch and account for every row.
///
/// In deterministic mode a row that already exists was written by an earlier
/// attempt and counts as copied.
pub(crate) async fn write_copies<S: ConversationStore + ?Sized>(
    store: &S,
    sources: &[Message],
    copies: Vec<NewMessage>,
    ids: CopyIdMode,
) -> CopyOutcome {
    let mut outcome = CopyOutcome::default();
    if copies.is_empty() {
        return outcome;
    }

    let results = match store.append_batch(copies).await {
        Ok(results) => results,
        Err(e) => {
            warn!(error = %e, rows = sources.len(), "copy batch rejected");
            outcome.failures = sources
                .iter()
                .map(|source| CopyFailure {
                    source_id: source.id,
                    kind: e.kind(),
                    error: e.to_string(),
                })
                .collect();
            return outcome;
        }
    };

    if results.len() != sources.len() {
        warn!(
            rows = sources.len(),
            results = results.len(),
            "copy batch returned a mismatched result count"
        );
    }

    let mut results = results.into_iter();
    for source in sources {
        let Some(result) = results.next() else {
            outcome.failures.push(CopyFailure {
                source_id: source.id,
                kind: ErrorKind::Storage,
                error: "store returned no result for row".into(),
            });
            continue;
        };

        match result {
            Ok(_) => outcome.copied += 1,
            Err(BranchError::MessageExists(id)) if ids == CopyIdMode::Deterministic => {
                debug!(source = %source.id, copy = %id, "copy already present");
                outcome.copied += 1;
            }
            Err(e) => {
                warn!(source = %source.id, error = %e, "failed to copy message");
                outcome.failures.push(CopyFailure {
                    source_id: source.id,
                    kind: e.kind(),
                    error: e.to_string(),
                });
            }
        }
    }

    outcome
}

/// Register the destination branch.
///
/// In deterministic mode an existing branch with the same owner and structure
/// is taken as the product of an earlier attempt and reused.
pub(crate) async fn create_destination<S: ConversationStore + ?Sized>(
    store: &S,
    request: NewBranch,
    ids: CopyIdMode,
) -> Result<Branch> {
    let id = request.id;
    let user_id = request.user_id.clone();
    let kind = request.kind.clone();

    match store.create_branch(request).await {
        Ok(branch) => Ok(branch),
        Err(BranchError::BranchExists(_)) if ids == CopyIdMode::Deterministic => {
            let existing = store.get_branch(id).await?;
            if existing.user_id == user_id && existing.kind == kind {
                info!(branch = %id, "resuming copy into existing branch");
                Ok(existing)
            } else {
                Err(BranchError::BranchExists(id))
            }
        }
        Err(e) => Err(e),
    }
}
