//! In-process store.

use super::{ConversationStore, StoreState};
use crate::error::Result;
use crate::types::{
    Branch, BranchId, Message, MessageId, MessagePatch, NewBranch, NewMessage, StoreStats,
};
use async_trait::async_trait;
use parking_lot::RwLock;

/// Store that keeps everything in memory behind one `RwLock`.
///
/// Intended for tests and embedding. Nothing survives a restart.
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn append(&self, message: NewMessage) -> Result<Message> {
        self.state.write().log.insert(message)
    }

    async fn append_batch(&self, messages: Vec<NewMessage>) -> Result<Vec<Result<Message>>> {
        let mut state = self.state.write();
        Ok(messages
            .into_iter()
            .map(|message| state.log.insert(message))
            .collect())
    }

    async fn get_message(&self, id: MessageId) -> Result<Message> {
        self.state.read().get_message(id)
    }

    async fn list_ordered(&self, branch: BranchId) -> Result<Vec<Message>> {
        Ok(self.state.read().log.list_ordered(branch))
    }

    async fn snapshot(&self, branch: BranchId, cutoff: Option<MessageId>) -> Result<Vec<Message>> {
        self.state.read().snapshot(branch, cutoff)
    }

    async fn count_for(&self, branch: BranchId) -> Result<u64> {
        Ok(self.state.read().log.count_for(branch) as u64)
    }

    async fn update(&self, id: MessageId, patch: MessagePatch) -> Result<Message> {
        self.state.write().log.update(id, &patch)
    }

    async fn remove(&self, id: MessageId) -> Result<()> {
        self.state.write().log.remove(id).map(|_| ())
    }

    async fn create_branch(&self, branch: NewBranch) -> Result<Branch> {
        self.state.write().registry.create(branch)
    }

    async fn get_branch(&self, id: BranchId) -> Result<Branch> {
        self.state.read().get_branch(id)
    }

    async fn list_branches_for_user(&self, user_id: &str) -> Result<Vec<Branch>> {
        Ok(self.state.read().registry.list_for_user(user_id))
    }

    async fn stats(&self) -> Result<StoreStats> {
        Ok(self.state.read().stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BranchError;
    use crate::types::{Role, Timestamp};

    #[tokio::test]
    async fn test_append_and_list() {
        let store = MemoryStore::new();
        let branch = BranchId::new();

        store.append(NewMessage::new(branch, Role::User, "one")).await.unwrap();
        store.append(NewMessage::new(branch, Role::Assistant, "two")).await.unwrap();

        let log = store.list_ordered(branch).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].content, "one");
        assert_eq!(log[1].content, "two");
        assert_eq!(store.count_for(branch).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_batch_reports_each_row() {
        let store = MemoryStore::new();
        let branch = BranchId::new();
        let taken = store
            .append(NewMessage::new(branch, Role::User, "existing"))
            .await
            .unwrap();

        let results = store
            .append_batch(vec![
                NewMessage::new(branch, Role::User, "fresh"),
                NewMessage::new(branch, Role::User, "clash").with_id(taken.id),
            ])
            .await
            .unwrap();

        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(BranchError::MessageExists(_))));
        assert_eq!(store.count_for(branch).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_with_cutoff() {
        let store = MemoryStore::new();
        let branch = BranchId::new();

        let m1 = store
            .append(NewMessage::new(branch, Role::User, "m1").at(Timestamp(10)))
            .await
            .unwrap();
        store
            .append(NewMessage::new(branch, Role::User, "m2").at(Timestamp(20)))
            .await
            .unwrap();

        let prefix = store.snapshot(branch, Some(m1.id)).await.unwrap();
        assert_eq!(prefix.len(), 1);

        let full = store.snapshot(branch, None).await.unwrap();
        assert_eq!(full.len(), 2);

        let missing = store.snapshot(branch, Some(MessageId::new())).await;
        assert!(matches!(missing, Err(BranchError::CutoffNotFound { .. })));
    }

    #[tokio::test]
    async fn test_missing_rows() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get_branch(BranchId::new()).await,
            Err(BranchError::BranchNotFound(_))
        ));
        assert!(matches!(
            store.get_message(MessageId::new()).await,
            Err(BranchError::MessageNotFound(_))
        ));
        assert!(matches!(
            store.remove(MessageId::new()).await,
            Err(BranchError::MessageNotFound(_))
        ));
    }
}
