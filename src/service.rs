//! Transport-facing facade.

use crate::assist::{summary_prompt, ChatMessage, ChatProvider, Insight};
use crate::config::EngineConfig;
use crate::engine::{ForkEngine, ForkOutcome, ForkRequest, MergeEngine, MergeOutcome, MergeRequest};
use crate::error::{BranchError, Result};
use crate::query::BranchQueryService;
use crate::store::ConversationStore;
use crate::types::{
    BranchId, BranchSummary, Message, MessageId, MessagePatch, Metadata, NewBranch, NewMessage,
    Role, LLM_TYPE, RESERVED_METADATA_KEYS,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// A message posted by a client.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendRequest {
    pub branch_id: Option<BranchId>,
    pub user_id: String,
    #[serde(default)]
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl AppendRequest {
    pub fn new(branch_id: BranchId, user_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            branch_id: Some(branch_id),
            user_id: user_id.into(),
            role: Role::User,
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    fn validate(&self) -> Result<BranchId> {
        let branch_id = self
            .branch_id
            .ok_or_else(|| BranchError::validation("branchId", "is required"))?;
        if self.user_id.trim().is_empty() {
            return Err(BranchError::validation("userId", "is required"));
        }
        if self.content.trim().is_empty() {
            return Err(BranchError::validation("content", "is required"));
        }
        check_reserved(&self.metadata)?;
        Ok(branch_id)
    }
}

fn check_reserved(metadata: &Metadata) -> Result<()> {
    match RESERVED_METADATA_KEYS.iter().find(|k| metadata.contains_key(**k)) {
        Some(key) => Err(BranchError::validation(
            "metadata",
            format!("'{}' is set by fork and merge only", key),
        )),
        None => Ok(()),
    }
}

/// Every operation the core offers, over one store.
pub struct Conversations<S: ConversationStore> {
    store: Arc<S>,
    forks: ForkEngine<S>,
    merges: MergeEngine<S>,
    queries: BranchQueryService<S>,
}

impl<S: ConversationStore> Conversations<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self::with_store(Arc::new(store), config)
    }

    pub fn with_store(store: Arc<S>, config: EngineConfig) -> Self {
        Self {
            forks: ForkEngine::new(Arc::clone(&store), config.clone()),
            merges: MergeEngine::new(Arc::clone(&store), config),
            queries: BranchQueryService::new(Arc::clone(&store)),
            store,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Append a message, registering `branch_id` as a root branch of
    /// `user_id` if it is not known yet.
    pub async fn append(&self, request: AppendRequest) -> Result<Message> {
        let branch_id = request.validate()?;
        self.ensure_branch(branch_id, &request.user_id).await?;

        let message = self
            .store
            .append(
                NewMessage::new(branch_id, request.role, request.content)
                    .with_metadata(request.metadata),
            )
            .await?;
        debug!(branch = %branch_id, message = %message.id, "appended message");
        Ok(message)
    }

    pub async fn update(&self, id: MessageId, patch: MessagePatch) -> Result<Message> {
        if patch.is_empty() {
            return Err(BranchError::validation("patch", "no fields to update"));
        }
        if let Some(metadata) = &patch.metadata {
            check_reserved(metadata)?;
        }
        self.store.update(id, patch).await
    }

    pub async fn remove(&self, id: MessageId) -> Result<()> {
        self.store.remove(id).await?;
        debug!(message = %id, "removed message");
        Ok(())
    }

    pub async fn pin(&self, id: MessageId, is_pinned: bool) -> Result<Message> {
        self.store.update(id, MessagePatch::pinned(is_pinned)).await
    }

    pub async fn bookmark(&self, id: MessageId, is_bookmarked: bool) -> Result<Message> {
        self.store.update(id, MessagePatch::bookmarked(is_bookmarked)).await
    }

    pub async fn fork(&self, request: ForkRequest) -> Result<ForkOutcome> {
        self.forks.fork(request).await
    }

    pub async fn merge(&self, request: MergeRequest) -> Result<MergeOutcome> {
        self.merges.merge(request).await
    }

    pub async fn list_branches(&self, user_id: &str) -> Result<Vec<BranchSummary>> {
        if user_id.trim().is_empty() {
            return Err(BranchError::validation("userId", "is required"));
        }
        self.queries.list_branches(user_id).await
    }

    pub async fn get_conversation(&self, branch_id: BranchId) -> Result<Vec<Message>> {
        self.queries.get_conversation(branch_id).await
    }

    /// Ask `provider` to continue the branch and store its answer as an
    /// assistant message.
    pub async fn reply(&self, branch_id: BranchId, provider: &dyn ChatProvider) -> Result<Message> {
        let log = self.queries.get_conversation(branch_id).await?;
        if log.is_empty() {
            return Err(BranchError::EmptyConversation(branch_id));
        }

        let prompt: Vec<ChatMessage> = log.iter().map(ChatMessage::from).collect();
        let reply = provider.complete(&prompt).await?;

        let mut metadata = reply.usage;
        metadata.insert(LLM_TYPE.to_string(), Value::String(provider.name().to_string()));

        let message = self
            .store
            .append(NewMessage::new(branch_id, Role::Assistant, reply.content).with_metadata(metadata))
            .await?;
        info!(branch = %branch_id, provider = provider.name(), "stored assistant reply");
        Ok(message)
    }

    /// Summarize a branch with `provider`.
    pub async fn insights(&self, branch_id: BranchId, provider: &dyn ChatProvider) -> Result<Insight> {
        let log = self.queries.get_conversation(branch_id).await?;
        if log.is_empty() {
            return Err(BranchError::EmptyConversation(branch_id));
        }

        let reply = provider.complete(&summary_prompt(&log)).await?;
        Ok(Insight {
            branch_id,
            content: reply.content,
            provider: provider.name().to_string(),
            usage: reply.usage,
        })
    }

    async fn ensure_branch(&self, branch_id: BranchId, user_id: &str) -> Result<()> {
        match self.store.get_branch(branch_id).await {
            Ok(_) => Ok(()),
            Err(BranchError::BranchNotFound(_)) => {
                match self
                    .store
                    .create_branch(NewBranch::root(branch_id, user_id))
                    .await
                {
                    Ok(branch) => {
                        info!(branch = %branch.id, user = %user_id, "created root branch");
                        Ok(())
                    }
                    // Lost a race with another append to the same new branch.
                    Err(BranchError::BranchExists(_)) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assist::ChatReply;
    use crate::error::ErrorKind;
    use crate::store::MemoryStore;
    use crate::types::ORIGINAL_MESSAGE_ID;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Echo {
        seen: Mutex<Vec<ChatMessage>>,
    }

    impl Echo {
        fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatProvider for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, messages: &[ChatMessage]) -> Result<ChatReply> {
            *self.seen.lock() = messages.to_vec();
            let mut usage = Metadata::new();
            usage.insert("total_tokens".into(), json!(messages.len()));
            Ok(ChatReply {
                content: format!("heard {}", messages.len()),
                usage,
            })
        }
    }

    fn service() -> Conversations<MemoryStore> {
        Conversations::new(MemoryStore::new(), EngineConfig::default())
    }

    #[tokio::test]
    async fn test_append_creates_root_branch() {
        let service = service();
        let branch = BranchId::new();

        let message = service
            .append(AppendRequest::new(branch, "alice", "hello"))
            .await
            .unwrap();
        assert_eq!(message.role, Role::User);
        assert_eq!(message.branch_id, branch);

        let summaries = service.list_branches("alice").await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].branch.is_root());
        assert_eq!(summaries[0].message_count, 1);

        service
            .append(AppendRequest::new(branch, "alice", "again").with_role(Role::Assistant))
            .await
            .unwrap();
        assert_eq!(service.get_conversation(branch).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_append_validation() {
        let service = service();
        let branch = BranchId::new();

        let missing_branch = AppendRequest {
            user_id: "alice".into(),
            content: "hi".into(),
            ..Default::default()
        };
        let empty_content = AppendRequest::new(branch, "alice", "  ");
        let no_user = AppendRequest::new(branch, "", "hi");

        let mut reserved = Metadata::new();
        reserved.insert(ORIGINAL_MESSAGE_ID.into(), json!("x"));
        let reserved = AppendRequest::new(branch, "alice", "hi").with_metadata(reserved);

        for request in [missing_branch, empty_content, no_user, reserved] {
            let err = service.append(request).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
        assert_eq!(service.store().stats().await.unwrap().branch_count, 0);
    }

    #[tokio::test]
    async fn test_flags_and_edits() {
        let service = service();
        let branch = BranchId::new();
        let message = service
            .append(AppendRequest::new(branch, "alice", "hello"))
            .await
            .unwrap();

        assert!(service.pin(message.id, true).await.unwrap().is_pinned);
        assert!(service.bookmark(message.id, true).await.unwrap().is_bookmarked);

        let edited = service
            .update(
                message.id,
                MessagePatch {
                    content: Some("edited".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.content, "edited");
        assert!(edited.is_pinned);

        let empty = service.update(message.id, MessagePatch::default()).await;
        assert!(matches!(empty, Err(BranchError::Validation { .. })));

        service.remove(message.id).await.unwrap();
        let gone = service.pin(message.id, false).await.unwrap_err();
        assert_eq!(gone.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_metadata_edit_on_copy_keeps_lineage() {
        let service = service();
        let branch = BranchId::new();
        let source = service
            .append(AppendRequest::new(branch, "alice", "hello"))
            .await
            .unwrap();

        let fork = service.fork(ForkRequest::new(branch, "alice")).await.unwrap();
        let copy = service.get_conversation(fork.branch.id).await.unwrap().remove(0);

        let mut metadata = Metadata::new();
        metadata.insert("label".into(), json!("draft"));
        let edited = service
            .update(
                copy.id,
                MessagePatch {
                    metadata: Some(metadata),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(edited.original_message_id(), Some(source.id));
        assert_eq!(edited.metadata.get("label"), Some(&json!("draft")));

        // Lineage cannot be introduced on an original either.
        let mut forged = Metadata::new();
        forged.insert(ORIGINAL_MESSAGE_ID.into(), json!(copy.id.to_string()));
        let err = service
            .update(
                source.id,
                MessagePatch {
                    metadata: Some(forged),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(service
            .store()
            .get_message(source.id)
            .await
            .unwrap()
            .original_message_id()
            .is_none());
    }

    #[tokio::test]
    async fn test_reply_stores_assistant_message() {
        let service = service();
        let branch = BranchId::new();
        service
            .append(AppendRequest::new(branch, "alice", "hello"))
            .await
            .unwrap();

        let provider = Echo::new();
        let reply = service.reply(branch, &provider).await.unwrap();

        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(reply.content, "heard 1");
        assert_eq!(reply.metadata.get(LLM_TYPE), Some(&json!("echo")));
        assert_eq!(reply.metadata.get("total_tokens"), Some(&json!(1)));
        assert_eq!(provider.seen.lock()[0].content, "hello");
        assert_eq!(service.get_conversation(branch).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reply_requires_branch() {
        let service = service();
        let result = service.reply(BranchId::new(), &Echo::new()).await;
        assert!(matches!(result, Err(BranchError::BranchNotFound(_))));
    }

    #[tokio::test]
    async fn test_insights() {
        let service = service();
        let branch = BranchId::new();
        service
            .append(AppendRequest::new(branch, "alice", "plan the trip"))
            .await
            .unwrap();

        let provider = Echo::new();
        let insight = service.insights(branch, &provider).await.unwrap();
        assert_eq!(insight.branch_id, branch);
        assert_eq!(insight.provider, "echo");
        assert_eq!(insight.content, "heard 2");

        let seen = provider.seen.lock();
        assert_eq!(seen[0].role, Role::System);
        assert!(seen[1].content.ends_with("user: plan the trip"));
    }

    #[tokio::test]
    async fn test_insights_on_empty_branch() {
        let service = service();
        let branch = BranchId::new();
        service
            .store()
            .create_branch(NewBranch::root(branch, "alice"))
            .await
            .unwrap();

        let err = service.insights(branch, &Echo::new()).await.unwrap_err();
        assert!(matches!(err, BranchError::EmptyConversation(_)));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
