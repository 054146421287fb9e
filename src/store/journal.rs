//! Append-only journal of message mutations.
//!
//! Every put, update and removal is written as one entry. Replaying the
//! journal from the start rebuilds the message log.

use crate::error::{BranchError, Result};
use crate::types::{Message, MessageId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// Magic bytes for the journal file.
const JOURNAL_MAGIC: &[u8; 4] = b"TFJ\0";

/// Current journal format version.
const JOURNAL_VERSION: u8 = 1;

/// Header size (magic + version).
const HEADER_SIZE: u64 = 5;

/// Entry frame size (payload length + checksum).
const FRAME_SIZE: usize = 4 + 4;

/// Mutations recorded in the journal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum JournalEntry {
    /// Full message state after an insert or update.
    Put(Message),
    /// Message deleted.
    Remove { id: MessageId },
}

struct JournalFile {
    file: File,
    /// End of the last complete entry.
    size: u64,
    writes_since_sync: u64,
}

/// Journal writer.
pub struct Journal {
    inner: Mutex<JournalFile>,
    /// Sync every N entries.
    sync_interval: u64,
    #[cfg(test)]
    fail_next_sync: AtomicBool,
}

impl Journal {
    /// Open or create a journal, returning it along with every entry it holds.
    ///
    /// An incomplete trailing entry (torn write) is cut off. A checksum
    /// mismatch anywhere else is reported as corruption.
    pub fn open(path: impl AsRef<Path>, sync_interval: u64) -> Result<(Self, Vec<JournalEntry>)> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let len = file.metadata()?.len();
        let (entries, size) = if len == 0 {
            file.write_all(JOURNAL_MAGIC)?;
            file.write_all(&[JOURNAL_VERSION])?;
            file.sync_all()?;
            (Vec::new(), HEADER_SIZE)
        } else {
            Self::replay(&mut file, len)?
        };

        if size < len {
            warn!(path = %path.display(), dropped = len - size, "truncating torn journal tail");
            file.set_len(size)?;
            file.sync_all()?;
        }

        Ok((
            Self {
                inner: Mutex::new(JournalFile {
                    file,
                    size,
                    writes_since_sync: 0,
                }),
                sync_interval: sync_interval.max(1),
                #[cfg(test)]
                fail_next_sync: AtomicBool::new(false),
            },
            entries,
        ))
    }

    /// Append one entry.
    pub fn append(&self, entry: &JournalEntry) -> Result<()> {
        self.append_many(std::slice::from_ref(entry))
    }

    /// Append several entries with a single write.
    ///
    /// Either every entry is on disk or none is: a failed write or a failed
    /// sync truncates back to the previous end before the error is returned.
    pub fn append_many(&self, entries: &[JournalEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        for entry in entries {
            let payload = rmp_serde::to_vec(entry)?;
            buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
            buf.extend_from_slice(&payload);
        }

        let mut inner = self.inner.lock();
        let offset = inner.size;
        inner.file.seek(SeekFrom::Start(offset))?;
        if let Err(e) = inner.file.write_all(&buf) {
            // Leave no partial frame behind for the next append to follow.
            let _ = inner.file.set_len(offset);
            return Err(e.into());
        }

        let pending = inner.writes_since_sync + entries.len() as u64;
        if pending >= self.sync_interval {
            if let Err(e) = self.sync_data(&inner.file) {
                warn!(offset, error = %e, "journal sync failed, discarding entries");
                let _ = inner.file.set_len(offset);
                return Err(e.into());
            }
            inner.writes_since_sync = 0;
        } else {
            inner.writes_since_sync = pending;
        }
        inner.size = offset + buf.len() as u64;

        Ok(())
    }

    #[cfg(not(test))]
    fn sync_data(&self, file: &File) -> std::io::Result<()> {
        file.sync_data()
    }

    #[cfg(test)]
    fn sync_data(&self, file: &File) -> std::io::Result<()> {
        if self.fail_next_sync.swap(false, Ordering::SeqCst) {
            return Err(std::io::Error::new(ErrorKind::Other, "injected sync failure"));
        }
        file.sync_data()
    }

    /// Make the next data sync fail.
    #[cfg(test)]
    pub(crate) fn fail_next_sync(&self) {
        self.fail_next_sync.store(true, Ordering::SeqCst);
    }

    /// Force sync all pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.sync_all()?;
        inner.writes_since_sync = 0;
        Ok(())
    }

    /// Bytes in the journal, header included.
    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    fn replay(file: &mut File, len: u64) -> Result<(Vec<JournalEntry>, u64)> {
        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&mut *file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != JOURNAL_MAGIC {
            return Err(BranchError::InvalidFormat("Invalid journal magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != JOURNAL_VERSION {
            return Err(BranchError::InvalidFormat(format!(
                "Unsupported journal version: {}",
                version[0]
            )));
        }

        let mut entries = Vec::new();
        let mut offset = HEADER_SIZE;

        while offset < len {
            let mut frame = [0u8; FRAME_SIZE];
            match reader.read_exact(&mut frame) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let payload_len = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as u64;
            let expected = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);

            let end = offset + FRAME_SIZE as u64 + payload_len;
            if end > len {
                break;
            }

            let mut payload = vec![0u8; payload_len as usize];
            reader.read_exact(&mut payload)?;

            let got = crc32fast::hash(&payload);
            if got != expected {
                if end == len {
                    // Torn final write.
                    break;
                }
                return Err(BranchError::ChecksumMismatch { expected, got });
            }

            entries.push(rmp_serde::from_slice(&payload)?);
            offset = end;
        }

        Ok((entries, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BranchId, Metadata, Role, Timestamp};
    use serde_json::json;
    use tempfile::TempDir;

    fn message(content: &str) -> Message {
        let mut metadata = Metadata::new();
        metadata.insert("k".into(), json!({"nested": [1, 2]}));
        Message {
            id: MessageId::new(),
            branch_id: BranchId::new(),
            role: Role::User,
            content: content.into(),
            metadata,
            created_at: Timestamp(42),
            sequence: 1,
            is_pinned: true,
            is_bookmarked: false,
        }
    }

    #[test]
    fn test_reopen_replays_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("messages.journal");
        let m = message("hello");

        {
            let (journal, entries) = Journal::open(&path, 1).unwrap();
            assert!(entries.is_empty());
            journal.append(&JournalEntry::Put(m.clone())).unwrap();
            journal
                .append_many(&[
                    JournalEntry::Put(message("other")),
                    JournalEntry::Remove { id: m.id },
                ])
                .unwrap();
        }

        let (_, entries) = Journal::open(&path, 1).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], JournalEntry::Put(m.clone()));
        assert_eq!(entries[2], JournalEntry::Remove { id: m.id });
    }

    #[test]
    fn test_failed_sync_discards_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("messages.journal");

        let size = {
            let (journal, _) = Journal::open(&path, 1).unwrap();
            journal.append(&JournalEntry::Put(message("kept"))).unwrap();
            let size = journal.size();

            journal.fail_next_sync();
            let result = journal.append(&JournalEntry::Put(message("lost")));
            assert!(matches!(result, Err(BranchError::Io(_))));
            assert_eq!(journal.size(), size);
            assert_eq!(std::fs::metadata(&path).unwrap().len(), size);

            // The journal stays usable after the failure.
            journal.append(&JournalEntry::Put(message("after"))).unwrap();
            size
        };

        let (journal, entries) = Journal::open(&path, 1).unwrap();
        let contents: Vec<_> = entries
            .iter()
            .map(|e| match e {
                JournalEntry::Put(m) => m.content.as_str(),
                JournalEntry::Remove { .. } => "remove",
            })
            .collect();
        assert_eq!(contents, vec!["kept", "after"]);
        assert!(journal.size() > size);
    }

    #[test]
    fn test_torn_tail_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("messages.journal");

        let size = {
            let (journal, _) = Journal::open(&path, 1).unwrap();
            journal.append(&JournalEntry::Put(message("kept"))).unwrap();
            journal.size()
        };

        // Simulate a crash halfway through the next frame.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[200, 0, 0, 0, 1, 2]).unwrap();
        }

        let (journal, entries) = Journal::open(&path, 1).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(journal.size(), size);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), size);
    }

    #[test]
    fn test_corruption_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("messages.journal");

        {
            let (journal, _) = Journal::open(&path, 1).unwrap();
            journal.append(&JournalEntry::Put(message("first"))).unwrap();
            journal.append(&JournalEntry::Put(message("second"))).unwrap();
        }

        // Flip a payload byte of the first entry.
        let mut bytes = std::fs::read(&path).unwrap();
        let idx = HEADER_SIZE as usize + FRAME_SIZE + 2;
        bytes[idx] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();

        let result = Journal::open(&path, 1);
        assert!(matches!(result, Err(BranchError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("messages.journal");
        std::fs::write(&path, b"XXXX\x01").unwrap();

        assert!(matches!(
            Journal::open(&path, 1),
            Err(BranchError::InvalidFormat(_))
        ));
    }
}
