//! In-memory message log with a per-branch ordering index.

use crate::error::{BranchError, Result};
use crate::types::{BranchId, Message, MessageId, MessagePatch, NewMessage, Timestamp};
use std::collections::{BTreeSet, HashMap};

/// Position of a message inside its branch.
type OrderKey = (Timestamp, u64, MessageId);

/// Append-only (per branch) collection of messages.
///
/// Not synchronized on its own: stores wrap it in a lock so that a cutoff
/// lookup and the prefix selection it bounds happen under one guard.
#[derive(Debug, Default)]
pub struct MessageLog {
    /// All messages by ID.
    messages: HashMap<MessageId, Message>,

    /// Branch to messages ordered by (created_at, sequence).
    by_branch: HashMap<BranchId, BTreeSet<OrderKey>>,

    /// Next insertion sequence to assign.
    next_sequence: u64,

    /// Latest timestamp issued or observed.
    last_timestamp: Option<Timestamp>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self {
            next_sequence: 1,
            ..Default::default()
        }
    }

    /// Store a new message, assigning its sequence and (unless the input
    /// carries one) its creation time.
    pub fn insert(&mut self, input: NewMessage) -> Result<Message> {
        if self.messages.contains_key(&input.id) {
            return Err(BranchError::MessageExists(input.id));
        }

        let created_at = match input.created_at {
            Some(ts) => {
                self.observe(ts);
                ts
            }
            None => self.next_timestamp()?,
        };

        let message = Message {
            id: input.id,
            branch_id: input.branch_id,
            role: input.role,
            content: input.content,
            metadata: input.metadata,
            created_at,
            sequence: self.next_sequence,
            is_pinned: false,
            is_bookmarked: false,
        };
        self.next_sequence += 1;

        self.index(&message);
        self.messages.insert(message.id, message.clone());
        Ok(message)
    }

    /// Put back a message exactly as it was stored (journal replay).
    pub fn restore(&mut self, message: Message) {
        if let Some(previous) = self.messages.remove(&message.id) {
            self.unindex(&previous);
        }
        self.next_sequence = self.next_sequence.max(message.sequence + 1);
        self.observe(message.created_at);
        self.index(&message);
        self.messages.insert(message.id, message);
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.get(&id)
    }

    /// Messages of a branch, oldest first, ties by insertion sequence.
    pub fn list_ordered(&self, branch: BranchId) -> Vec<Message> {
        self.by_branch
            .get(&branch)
            .map(|keys| keys.iter().map(|(_, _, id)| self.messages[id].clone()).collect())
            .unwrap_or_default()
    }

    /// Messages of a branch created no later than `cutoff`.
    ///
    /// The cutoff must belong to `branch`.
    pub fn prefix_until(&self, branch: BranchId, cutoff: MessageId) -> Result<Vec<Message>> {
        let bound = match self.messages.get(&cutoff) {
            Some(m) if m.branch_id == branch => m.created_at,
            _ => {
                return Err(BranchError::CutoffNotFound {
                    message: cutoff,
                    branch,
                })
            }
        };

        Ok(self
            .by_branch
            .get(&branch)
            .map(|keys| {
                keys.iter()
                    .take_while(|(ts, _, _)| *ts <= bound)
                    .map(|(_, _, id)| self.messages[id].clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    pub fn count_for(&self, branch: BranchId) -> usize {
        self.by_branch.get(&branch).map_or(0, BTreeSet::len)
    }

    /// Apply a patch. Content and flags never move a message in the order.
    pub fn update(&mut self, id: MessageId, patch: &MessagePatch) -> Result<Message> {
        let message = self
            .messages
            .get_mut(&id)
            .ok_or(BranchError::MessageNotFound(id))?;
        patch.apply_to(message);
        Ok(message.clone())
    }

    pub fn remove(&mut self, id: MessageId) -> Result<Message> {
        let message = self
            .messages
            .remove(&id)
            .ok_or(BranchError::MessageNotFound(id))?;
        self.unindex(&message);
        Ok(message)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn index(&mut self, message: &Message) {
        self.by_branch
            .entry(message.branch_id)
            .or_default()
            .insert((message.created_at, message.sequence, message.id));
    }

    fn unindex(&mut self, message: &Message) {
        if let Some(keys) = self.by_branch.get_mut(&message.branch_id) {
            keys.remove(&(message.created_at, message.sequence, message.id));
            if keys.is_empty() {
                self.by_branch.remove(&message.branch_id);
            }
        }
    }

    /// Strictly increasing wall-clock timestamp.
    ///
    /// Fails once an imported timestamp has pushed the clock to its limit.
    fn next_timestamp(&mut self) -> Result<Timestamp> {
        let now = Timestamp::now();
        let ts = match self.last_timestamp {
            Some(last) if now <= last => last.succ().ok_or_else(|| {
                BranchError::Storage(format!("message clock exhausted at {}", last.0))
            })?,
            _ => now,
        };
        self.last_timestamp = Some(ts);
        Ok(ts)
    }

    fn observe(&mut self, ts: Timestamp) {
        if self.last_timestamp.map_or(true, |last| ts > last) {
            self.last_timestamp = Some(ts);
        }
    }
}
