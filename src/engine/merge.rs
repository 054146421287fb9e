//! Merge engine: a new branch interleaving two existing logs by time.

use super::copy::{create_destination, plan_copies, write_copies, CopyFailure, Lineage};
use crate::config::EngineConfig;
use crate::error::{BranchError, Result};
use crate::store::ConversationStore;
use crate::types::{Branch, BranchId, Message, NewBranch};
use std::sync::Arc;
use tracing::info;

/// Request to merge `source_id` and `target_id` into a new branch.
#[derive(Clone, Debug)]
pub struct MergeRequest {
    pub source_id: BranchId,
    pub target_id: BranchId,
    pub user_id: String,

    /// Id for the new branch. Generated when absent.
    pub branch_id: Option<BranchId>,
}

impl MergeRequest {
    pub fn new(source_id: BranchId, target_id: BranchId, user_id: impl Into<String>) -> Self {
        Self {
            source_id,
            target_id,
            user_id: user_id.into(),
            branch_id: None,
        }
    }

    pub fn into_branch(mut self, branch_id: BranchId) -> Self {
        self.branch_id = Some(branch_id);
        self
    }
}

/// Result of a merge.
#[derive(Clone, Debug)]
pub struct MergeOutcome {
    pub branch: Branch,

    /// Messages present in the new branch.
    pub merged_count: usize,

    pub partial: bool,
    pub failures: Vec<CopyFailure>,

    /// Rows read from each input.
    pub source_count: usize,
    pub target_count: usize,
}

/// Creates merge branches.
pub struct MergeEngine<S: ConversationStore> {
    store: Arc<S>,
    config: EngineConfig,
}

impl<S: ConversationStore> MergeEngine<S> {
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Merge two branches.
    ///
    /// Both inputs are read in full before the merge branch is registered.
    /// The union is ordered by creation time; rows with equal timestamps keep
    /// source rows ahead of target rows, and each side keeps its own order.
    /// Nothing is deduplicated: shared ancestry appears once per side.
    pub async fn merge(&self, request: MergeRequest) -> Result<MergeOutcome> {
        if request.user_id.trim().is_empty() {
            return Err(BranchError::validation("userId", "is required"));
        }

        let store = &*self.store;
        let (source, target) = tokio::try_join!(
            store.get_branch(request.source_id),
            store.get_branch(request.target_id)
        )?;

        let (source_log, target_log) =
            tokio::try_join!(store.list_ordered(source.id), store.list_ordered(target.id))?;

        let branch_id = request.branch_id.unwrap_or_default();
        let branch = create_destination(
            store,
            NewBranch::merge(branch_id, request.user_id, source.id, target.id),
            self.config.copy_ids,
        )
        .await?;

        let source_count = source_log.len();
        let target_count = target_log.len();
        let combined = interleave(source_log, target_log);

        let copies = plan_copies(&combined, branch.id, self.config.copy_ids, Lineage::Merge);
        let outcome = write_copies(store, &combined, copies, self.config.copy_ids).await;

        info!(
            branch = %branch.id,
            source = %source.id,
            target = %target.id,
            merged = outcome.copied,
            failed = outcome.failures.len(),
            "merged branches"
        );

        Ok(MergeOutcome {
            branch,
            merged_count: outcome.copied,
            partial: !outcome.failures.is_empty(),
            failures: outcome.failures,
            source_count,
            target_count,
        })
    }
}

/// Concatenate source then target and stable-sort by creation time.
pub(crate) fn interleave(source: Vec<Message>, target: Vec<Message>) -> Vec<Message> {
    let mut combined = source;
    combined.extend(target);
    combined.sort_by_key(|m| m.created_at);
    combined
}
