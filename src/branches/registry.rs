//! Branch registry implementation.

use crate::error::{BranchError, Result};
use crate::types::{Branch, BranchId, BranchKind, NewBranch, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

/// Magic bytes for branch index file.
const BRANCH_INDEX_MAGIC: &[u8; 4] = b"BRI\0";

/// Current branch index format version.
const BRANCH_INDEX_VERSION: u8 = 2;

/// Branch index stored on disk.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct BranchIndex {
    /// All branches by ID.
    branches: HashMap<BranchId, Branch>,

    /// IDs in creation order.
    order: Vec<BranchId>,

    /// Latest creation time handed out.
    last_created: Option<Timestamp>,
}

/// Catalog of branches and their structural variant.
///
/// Branches are immutable once registered; the registry only ever grows.
#[derive(Debug, Default)]
pub struct BranchRegistry {
    index: BranchIndex,
}

impl BranchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a branch.
    ///
    /// The variant is checked for internal consistency; whether referenced
    /// branches exist is the caller's concern.
    pub fn create(&mut self, input: NewBranch) -> Result<Branch> {
        if input.user_id.trim().is_empty() {
            return Err(BranchError::validation("userId", "is required"));
        }

        if self.index.branches.contains_key(&input.id) {
            return Err(BranchError::BranchExists(input.id));
        }

        match &input.kind {
            BranchKind::Root => {}
            BranchKind::Fork { parent_id, .. } => {
                if *parent_id == input.id {
                    return Err(BranchError::validation(
                        "parentId",
                        "a branch cannot be its own parent",
                    ));
                }
            }
            BranchKind::Merge { sources } => {
                if sources.contains(&input.id) {
                    return Err(BranchError::validation(
                        "mergeSourceIds",
                        "a merge branch cannot be one of its own sources",
                    ));
                }
            }
        }

        let branch = Branch {
            id: input.id,
            user_id: input.user_id,
            created_at: self.next_timestamp()?,
            kind: input.kind,
        };

        self.index.order.push(branch.id);
        self.index.branches.insert(branch.id, branch.clone());

        Ok(branch)
    }

    /// Drop a branch whose registration could not be persisted.
    pub(crate) fn forget(&mut self, id: BranchId) {
        if self.index.branches.remove(&id).is_some() {
            self.index.order.retain(|b| *b != id);
        }
    }

    /// Get a branch by ID.
    pub fn get(&self, id: BranchId) -> Option<&Branch> {
        self.index.branches.get(&id)
    }

    pub fn contains(&self, id: BranchId) -> bool {
        self.index.branches.contains_key(&id)
    }

    /// Branches owned by `user_id`, newest first.
    pub fn list_for_user(&self, user_id: &str) -> Vec<Branch> {
        let mut branches: Vec<Branch> = self
            .index
            .order
            .iter()
            .rev()
            .filter_map(|id| self.index.branches.get(id))
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();

        // Stable: equal timestamps keep newest-registered first.
        branches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        branches
    }

    /// Get branch count.
    pub fn branch_count(&self) -> usize {
        self.index.branches.len()
    }

    /// Save branch index to file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        file.write_all(BRANCH_INDEX_MAGIC)?;
        file.write_all(&[BRANCH_INDEX_VERSION])?;

        let encoded = rmp_serde::to_vec(&self.index)?;
        file.write_all(&(encoded.len() as u64).to_le_bytes())?;
        file.write_all(&encoded)?;

        file.sync_all()?;
        Ok(())
    }

    /// Load branch index from file. A missing file yields an empty registry.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let mut file = File::open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != BRANCH_INDEX_MAGIC {
            return Err(BranchError::InvalidFormat(
                "Invalid branch index magic".into(),
            ));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != BRANCH_INDEX_VERSION {
            return Err(BranchError::InvalidFormat(format!(
                "Unsupported branch index version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes) as usize;

        let mut encoded = vec![0u8; len];
        file.read_exact(&mut encoded)?;

        let index: BranchIndex = rmp_serde::from_slice(&encoded)?;
        if index.order.len() != index.branches.len() {
            return Err(BranchError::Corruption(format!(
                "branch index lists {} ids for {} branches",
                index.order.len(),
                index.branches.len()
            )));
        }

        Ok(Self { index })
    }

    fn next_timestamp(&mut self) -> Result<Timestamp> {
        let now = Timestamp::now();
        let ts = match self.index.last_created {
            Some(last) if now <= last => last.succ().ok_or_else(|| {
                BranchError::Storage(format!("branch clock exhausted at {}", last.0))
            })?,
            _ => now,
        };
        self.index.last_created = Some(ts);
        Ok(ts)
    }
}
