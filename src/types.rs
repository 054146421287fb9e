//! Core types for branches and messages.

use crate::error::{BranchError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Metadata key pointing at the message a copy was made from.
pub const ORIGINAL_MESSAGE_ID: &str = "originalMessageId";

/// Metadata key pointing at the branch a merge copy was taken from.
pub const ORIGINAL_BRANCH_ID: &str = "originalBranchId";

/// Metadata key recording which chat provider produced an assistant reply.
pub const LLM_TYPE: &str = "llmType";

/// Keys written by fork and merge. Callers may not set them directly.
pub const RESERVED_METADATA_KEYS: [&str; 2] = [ORIGINAL_MESSAGE_ID, ORIGINAL_BRANCH_ID];

/// Namespace for deterministic copy ids.
const COPY_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6b69_7769_2d63_6f70_792d_6964_732d_7631);

/// Open key-value map attached to every message.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Unique identifier for a message.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    /// Fresh random id.
    pub fn new() -> Self {
        MessageId(Uuid::new_v4())
    }

    /// Id for the copy of `source` placed at `position` in `destination`.
    ///
    /// Identical inputs always yield the same id, so a retried copy collides
    /// with the row an earlier attempt already wrote.
    pub fn derived(source: MessageId, destination: BranchId, position: usize) -> Self {
        let mut name = Vec::with_capacity(40);
        name.extend_from_slice(source.0.as_bytes());
        name.extend_from_slice(destination.0.as_bytes());
        name.extend_from_slice(&(position as u64).to_le_bytes());
        MessageId(Uuid::new_v5(&COPY_ID_NAMESPACE, &name))
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = BranchError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(MessageId)
            .map_err(|e| BranchError::validation("messageId", e.to_string()))
    }
}

/// Unique identifier for a branch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(pub Uuid);

impl BranchId {
    pub fn new() -> Self {
        BranchId(Uuid::new_v4())
    }
}

impl Default for BranchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BranchId({})", self.0)
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BranchId {
    type Err = BranchError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Err(BranchError::validation("branchId", "is required"));
        }
        Uuid::parse_str(s.trim())
            .map(BranchId)
            .map_err(|e| BranchError::validation("branchId", e.to_string()))
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }

    /// The smallest timestamp strictly after `self`, if one exists.
    pub fn succ(self) -> Option<Self> {
        self.0.checked_add(1).map(Timestamp)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Author of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = BranchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(BranchError::validation(
                "role",
                format!("'{}' is not one of user, assistant, system", other),
            )),
        }
    }
}

/// A single message stored in exactly one branch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,

    /// Owning branch.
    pub branch_id: BranchId,

    pub role: Role,

    pub content: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub created_at: Timestamp,

    /// Insertion order within the store. Breaks `created_at` ties.
    pub sequence: u64,

    #[serde(default)]
    pub is_pinned: bool,

    #[serde(default)]
    pub is_bookmarked: bool,
}

impl Message {
    /// The message this one was copied from, if it is a fork or merge copy.
    pub fn original_message_id(&self) -> Option<MessageId> {
        self.metadata
            .get(ORIGINAL_MESSAGE_ID)
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }

    /// The branch a merge copy was taken from.
    pub fn original_branch_id(&self) -> Option<BranchId> {
        self.metadata
            .get(ORIGINAL_BRANCH_ID)
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }

    /// Metadata with the lineage keys stripped.
    pub fn user_metadata(&self) -> Metadata {
        let mut metadata = self.metadata.clone();
        for key in RESERVED_METADATA_KEYS {
            metadata.remove(key);
        }
        metadata
    }
}

/// Input for a new message (before sequence and timestamp are assigned).
#[derive(Clone, Debug)]
pub struct NewMessage {
    pub id: MessageId,
    pub branch_id: BranchId,
    pub role: Role,
    pub content: String,
    pub metadata: Metadata,
    /// Explicit creation time, used when importing history.
    pub created_at: Option<Timestamp>,
}

impl NewMessage {
    pub fn new(branch_id: BranchId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            branch_id,
            role,
            content: content.into(),
            metadata: Metadata::new(),
            created_at: None,
        }
    }

    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = id;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn at(mut self, created_at: Timestamp) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

/// Partial update of a message. `None` leaves the field untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePatch {
    pub content: Option<String>,
    pub metadata: Option<Metadata>,
    pub is_pinned: Option<bool>,
    pub is_bookmarked: Option<bool>,
}

impl MessagePatch {
    pub fn pinned(is_pinned: bool) -> Self {
        Self {
            is_pinned: Some(is_pinned),
            ..Default::default()
        }
    }

    pub fn bookmarked(is_bookmarked: bool) -> Self {
        Self {
            is_bookmarked: Some(is_bookmarked),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.metadata.is_none()
            && self.is_pinned.is_none()
            && self.is_bookmarked.is_none()
    }

    /// Apply the patch in place.
    ///
    /// A metadata patch replaces the caller's keys only; lineage keys already
    /// on the message are kept.
    pub fn apply_to(&self, message: &mut Message) {
        if let Some(content) = &self.content {
            message.content = content.clone();
        }
        if let Some(metadata) = &self.metadata {
            let mut next = metadata.clone();
            for key in RESERVED_METADATA_KEYS {
                match message.metadata.remove(key) {
                    Some(value) => {
                        next.insert(key.to_string(), value);
                    }
                    None => {
                        next.remove(key);
                    }
                }
            }
            message.metadata = next;
        }
        if let Some(pinned) = self.is_pinned {
            message.is_pinned = pinned;
        }
        if let Some(bookmarked) = self.is_bookmarked {
            message.is_bookmarked = bookmarked;
        }
    }
}

/// Structural variant of a branch, fixed at creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BranchKind {
    /// Start of a conversation.
    Root,

    /// Prefix copy of `parent_id`, optionally cut at `fork_point`.
    Fork {
        parent_id: BranchId,
        fork_point: Option<MessageId>,
    },

    /// Interleaved union of two branches, `[source, target]`.
    Merge { sources: [BranchId; 2] },
}

impl BranchKind {
    /// Build a variant from the loose field set a transport request carries.
    ///
    /// Rejects a request that sets both a parent and merge sources, or a fork
    /// point without a parent.
    pub fn from_fields(
        parent_id: Option<BranchId>,
        fork_point: Option<MessageId>,
        merge_source_ids: Option<Vec<BranchId>>,
    ) -> Result<Self> {
        match (parent_id, merge_source_ids) {
            (Some(_), Some(_)) => Err(BranchError::validation(
                "mergeSourceIds",
                "a branch cannot have both a parent and merge sources",
            )),
            (Some(parent_id), None) => Ok(BranchKind::Fork {
                parent_id,
                fork_point,
            }),
            (None, Some(sources)) => {
                if fork_point.is_some() {
                    return Err(BranchError::validation(
                        "forkPointMessageId",
                        "only fork branches have a fork point",
                    ));
                }
                let sources: [BranchId; 2] = sources.try_into().map_err(|v: Vec<BranchId>| {
                    BranchError::validation(
                        "mergeSourceIds",
                        format!("expected exactly 2 branch ids, got {}", v.len()),
                    )
                })?;
                Ok(BranchKind::Merge { sources })
            }
            (None, None) => {
                if fork_point.is_some() {
                    return Err(BranchError::validation(
                        "forkPointMessageId",
                        "only fork branches have a fork point",
                    ));
                }
                Ok(BranchKind::Root)
            }
        }
    }
}

/// Branch metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: BranchId,
    pub user_id: String,
    pub created_at: Timestamp,
    pub kind: BranchKind,
}

impl Branch {
    pub fn parent_id(&self) -> Option<BranchId> {
        match &self.kind {
            BranchKind::Fork { parent_id, .. } => Some(*parent_id),
            _ => None,
        }
    }

    pub fn fork_point_message_id(&self) -> Option<MessageId> {
        match &self.kind {
            BranchKind::Fork { fork_point, .. } => *fork_point,
            _ => None,
        }
    }

    pub fn merge_source_ids(&self) -> Option<[BranchId; 2]> {
        match &self.kind {
            BranchKind::Merge { sources } => Some(*sources),
            _ => None,
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self.kind, BranchKind::Root)
    }
}

/// Input for registering a branch.
#[derive(Clone, Debug)]
pub struct NewBranch {
    pub id: BranchId,
    pub user_id: String,
    pub kind: BranchKind,
}

impl NewBranch {
    pub fn root(id: BranchId, user_id: impl Into<String>) -> Self {
        Self {
            id,
            user_id: user_id.into(),
            kind: BranchKind::Root,
        }
    }

    pub fn fork(
        id: BranchId,
        user_id: impl Into<String>,
        parent_id: BranchId,
        fork_point: Option<MessageId>,
    ) -> Self {
        Self {
            id,
            user_id: user_id.into(),
            kind: BranchKind::Fork {
                parent_id,
                fork_point,
            },
        }
    }

    pub fn merge(id: BranchId, user_id: impl Into<String>, source: BranchId, target: BranchId) -> Self {
        Self {
            id,
            user_id: user_id.into(),
            kind: BranchKind::Merge {
                sources: [source, target],
            },
        }
    }
}

/// A branch together with its shallow message count.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchSummary {
    pub branch: Branch,
    pub message_count: u64,
}

/// Store statistics.
#[derive(Clone, Debug, Default)]
pub struct StoreStats {
    pub message_count: u64,
    pub branch_count: u64,
}
