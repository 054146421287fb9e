//! Durable directory-backed store.

use super::journal::{Journal, JournalEntry};
use super::{ConversationStore, StoreState};
use crate::branches::BranchRegistry;
use crate::config::StoreConfig;
use crate::error::{BranchError, Result};
use crate::types::{
    Branch, BranchId, Message, MessageId, MessagePatch, NewBranch, NewMessage, StoreStats,
};
use async_trait::async_trait;
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"TFS\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

const JOURNAL_FILE: &str = "messages.journal";
const BRANCHES_FILE: &str = "branches.bin";

struct Inner {
    config: StoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    journal: Journal,

    /// Resident log and registry. Writers hold the write guard across the
    /// journal write so memory and disk never disagree.
    state: RwLock<StoreState>,
}

/// Store persisted under a directory:
///
/// - `MANIFEST`: format magic and version
/// - `LOCK`: exclusive process lock
/// - `messages.journal`: every message mutation, replayed on open
/// - `branches.bin`: the branch registry, rewritten on each branch creation
///
/// File I/O runs on the blocking thread pool.
pub struct FileStore {
    inner: Arc<Inner>,
}

impl FileStore {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(BranchError::NotInitialized)
        }
    }

    /// Create a new store.
    pub fn create(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;
        Self::write_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        let (journal, _) = Journal::open(config.path.join(JOURNAL_FILE), config.sync_interval)?;
        let state = StoreState::new();
        state.registry.save(&config.path.join(BRANCHES_FILE))?;

        info!(path = %config.path.display(), "created store");
        Ok(Self::assemble(config, lock_file, journal, state))
    }

    /// Open an existing store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::verify_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        let (journal, entries) =
            Journal::open(config.path.join(JOURNAL_FILE), config.sync_interval)?;

        let mut state = StoreState::new();
        state.registry = BranchRegistry::load(&config.path.join(BRANCHES_FILE))?;

        let replayed = entries.len();
        for entry in entries {
            match entry {
                JournalEntry::Put(message) => state.log.restore(message),
                JournalEntry::Remove { id } => {
                    // Removal of an id the journal never put means a torn history.
                    state.log.remove(id).map_err(|_| {
                        BranchError::Corruption(format!("journal removes unknown message {}", id))
                    })?;
                }
            }
        }

        info!(
            path = %config.path.display(),
            replayed,
            messages = state.log.len(),
            branches = state.registry.branch_count(),
            "opened store"
        );
        Ok(Self::assemble(config, lock_file, journal, state))
    }

    fn assemble(config: StoreConfig, lock_file: File, journal: Journal, state: StoreState) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                _lock_file: lock_file,
                journal,
                state: RwLock::new(state),
            }),
        }
    }

    /// Get the store path.
    pub fn path(&self) -> &Path {
        &self.inner.config.path
    }

    /// Sync the journal and the registry to disk.
    pub fn sync(&self) -> Result<()> {
        self.inner.sync()
    }

    /// Run `f` against the shared state on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner)).await?
    }

    fn write_manifest(path: &Path) -> Result<()> {
        let mut file = File::create(path.join("MANIFEST"))?;
        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        let mut file = File::open(path.join("MANIFEST"))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(BranchError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(BranchError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| BranchError::Locked)?;
        Ok(lock_file)
    }
}

impl Inner {
    fn branches_path(&self) -> PathBuf {
        self.config.path.join(BRANCHES_FILE)
    }

    fn sync(&self) -> Result<()> {
        self.journal.sync()?;
        self.state.read().registry.save(&self.branches_path())
    }

    fn append(&self, input: NewMessage) -> Result<Message> {
        let mut state = self.state.write();
        let message = state.log.insert(input)?;
        if let Err(e) = self.journal.append(&JournalEntry::Put(message.clone())) {
            state.log.remove(message.id)?;
            return Err(e);
        }
        Ok(message)
    }

    fn append_batch(&self, inputs: Vec<NewMessage>) -> Result<Vec<Result<Message>>> {
        let mut state = self.state.write();

        let results: Vec<Result<Message>> =
            inputs.into_iter().map(|input| state.log.insert(input)).collect();

        let entries: Vec<JournalEntry> = results
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .map(|m| JournalEntry::Put(m.clone()))
            .collect();

        if let Err(e) = self.journal.append_many(&entries) {
            for entry in &entries {
                if let JournalEntry::Put(m) = entry {
                    state.log.remove(m.id)?;
                }
            }
            return Err(e);
        }

        debug!(written = entries.len(), requested = results.len(), "journaled batch");
        Ok(results)
    }

    fn update(&self, id: MessageId, patch: &MessagePatch) -> Result<Message> {
        let mut state = self.state.write();
        let before = state.get_message(id)?;
        let after = state.log.update(id, patch)?;
        if let Err(e) = self.journal.append(&JournalEntry::Put(after.clone())) {
            state.log.restore(before);
            return Err(e);
        }
        Ok(after)
    }

    fn remove(&self, id: MessageId) -> Result<()> {
        let mut state = self.state.write();
        let removed = state.log.remove(id)?;
        if let Err(e) = self.journal.append(&JournalEntry::Remove { id }) {
            state.log.restore(removed);
            return Err(e);
        }
        Ok(())
    }

    fn create_branch(&self, input: NewBranch) -> Result<Branch> {
        let mut state = self.state.write();
        let branch = state.registry.create(input)?;
        if let Err(e) = state.registry.save(&self.branches_path()) {
            state.registry.forget(branch.id);
            return Err(e);
        }
        Ok(branch)
    }
}

#[async_trait]
impl ConversationStore for FileStore {
    async fn append(&self, message: NewMessage) -> Result<Message> {
        self.blocking(move |inner| inner.append(message)).await
    }

    async fn append_batch(&self, messages: Vec<NewMessage>) -> Result<Vec<Result<Message>>> {
        self.blocking(move |inner| inner.append_batch(messages)).await
    }

    async fn get_message(&self, id: MessageId) -> Result<Message> {
        self.inner.state.read().get_message(id)
    }

    async fn list_ordered(&self, branch: BranchId) -> Result<Vec<Message>> {
        Ok(self.inner.state.read().log.list_ordered(branch))
    }

    async fn snapshot(&self, branch: BranchId, cutoff: Option<MessageId>) -> Result<Vec<Message>> {
        self.inner.state.read().snapshot(branch, cutoff)
    }

    async fn count_for(&self, branch: BranchId) -> Result<u64> {
        Ok(self.inner.state.read().log.count_for(branch) as u64)
    }

    async fn update(&self, id: MessageId, patch: MessagePatch) -> Result<Message> {
        self.blocking(move |inner| inner.update(id, &patch)).await
    }

    async fn remove(&self, id: MessageId) -> Result<()> {
        self.blocking(move |inner| inner.remove(id)).await
    }

    async fn create_branch(&self, branch: NewBranch) -> Result<Branch> {
        self.blocking(move |inner| inner.create_branch(branch)).await
    }

    async fn get_branch(&self, id: BranchId) -> Result<Branch> {
        self.inner.state.read().get_branch(id)
    }

    async fn list_branches_for_user(&self, user_id: &str) -> Result<Vec<Branch>> {
        Ok(self.inner.state.read().registry.list_for_user(user_id))
    }

    async fn stats(&self) -> Result<StoreStats> {
        Ok(self.inner.state.read().stats())
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.inner.sync();
    }
}
