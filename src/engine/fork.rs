//! Fork engine: a new branch holding a prefix copy of its parent.

use super::copy::{create_destination, plan_copies, write_copies, CopyFailure, Lineage};
use crate::config::{EngineConfig, MissingCutoffPolicy};
use crate::error::{BranchError, Result};
use crate::store::ConversationStore;
use crate::types::{Branch, BranchId, MessageId, NewBranch};
use std::sync::Arc;
use tracing::{info, warn};

/// Request to fork `parent_id`.
#[derive(Clone, Debug)]
pub struct ForkRequest {
    pub parent_id: BranchId,
    pub user_id: String,

    /// Last message to include. `None` copies the whole log.
    pub cutoff: Option<MessageId>,

    /// Id for the new branch. Generated when absent; supply it to make a
    /// retry land on the same branch.
    pub branch_id: Option<BranchId>,
}

impl ForkRequest {
    pub fn new(parent_id: BranchId, user_id: impl Into<String>) -> Self {
        Self {
            parent_id,
            user_id: user_id.into(),
            cutoff: None,
            branch_id: None,
        }
    }

    pub fn at(mut self, cutoff: MessageId) -> Self {
        self.cutoff = Some(cutoff);
        self
    }

    pub fn into_branch(mut self, branch_id: BranchId) -> Self {
        self.branch_id = Some(branch_id);
        self
    }
}

/// Result of a fork.
#[derive(Clone, Debug)]
pub struct ForkOutcome {
    pub branch: Branch,

    /// Messages present in the new branch.
    pub copied_count: usize,

    /// Some copies failed; see `failures`.
    pub partial: bool,

    pub failures: Vec<CopyFailure>,

    /// False when the cutoff did not resolve and the whole log was copied.
    pub cutoff_applied: bool,
}

/// Creates fork branches.
pub struct ForkEngine<S: ConversationStore> {
    store: Arc<S>,
    config: EngineConfig,
}

impl<S: ConversationStore> ForkEngine<S> {
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Fork a branch.
    ///
    /// The parent's log is read once, cutoff included, before the new branch
    /// is registered, so a missing parent or cutoff leaves nothing behind.
    /// Once the branch exists, individual copy failures are collected into
    /// the outcome rather than failing the call.
    pub async fn fork(&self, request: ForkRequest) -> Result<ForkOutcome> {
        if request.user_id.trim().is_empty() {
            return Err(BranchError::validation("userId", "is required"));
        }

        let parent = self.store.get_branch(request.parent_id).await?;

        let (snapshot, fork_point) = match self.store.snapshot(parent.id, request.cutoff).await {
            Ok(snapshot) => (snapshot, request.cutoff),
            Err(BranchError::CutoffNotFound { message, branch })
                if self.config.missing_cutoff == MissingCutoffPolicy::FullCopy =>
            {
                warn!(
                    branch = %branch,
                    cutoff = %message,
                    "cutoff not found, copying full history"
                );
                (self.store.snapshot(parent.id, None).await?, None)
            }
            Err(e) => return Err(e),
        };

        let branch_id = request.branch_id.unwrap_or_default();
        let branch = create_destination(
            &*self.store,
            NewBranch::fork(branch_id, request.user_id, parent.id, fork_point),
            self.config.copy_ids,
        )
        .await?;

        let copies = plan_copies(&snapshot, branch.id, self.config.copy_ids, Lineage::Fork);
        let outcome = write_copies(&*self.store, &snapshot, copies, self.config.copy_ids).await;

        info!(
            branch = %branch.id,
            parent = %parent.id,
            copied = outcome.copied,
            failed = outcome.failures.len(),
            "forked branch"
        );

        Ok(ForkOutcome {
            branch,
            copied_count: outcome.copied,
            partial: !outcome.failures.is_empty(),
            failures: outcome.failures,
            cutoff_applied: request.cutoff.is_none() || fork_point.is_some(),
        })
    }
}
