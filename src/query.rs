//! Read side: branch listings and conversation logs.

use crate::error::Result;
use crate::store::ConversationStore;
use crate::types::{BranchId, BranchSummary, Message};
use futures::future::try_join_all;
use std::sync::Arc;

/// Read-only queries over branches.
pub struct BranchQueryService<S: ConversationStore> {
    store: Arc<S>,
}

impl<S: ConversationStore> BranchQueryService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Branches owned by `user_id`, newest first, each with the number of
    /// messages stored directly in it. Ancestors and merge sources are not
    /// counted.
    pub async fn list_branches(&self, user_id: &str) -> Result<Vec<BranchSummary>> {
        let branches = self.store.list_branches_for_user(user_id).await?;

        let store = &*self.store;
        let counts = try_join_all(branches.iter().map(|b| store.count_for(b.id))).await?;

        Ok(branches
            .into_iter()
            .zip(counts)
            .map(|(branch, message_count)| BranchSummary {
                branch,
                message_count,
            })
            .collect())
    }

    /// The branch's own log, oldest first.
    pub async fn get_conversation(&self, branch_id: BranchId) -> Result<Vec<Message>> {
        self.store.get_branch(branch_id).await?;
        self.store.list_ordered(branch_id).await
    }
}
