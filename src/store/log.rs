//! Append-only log store
//!
//! No database, no WAL: every committed update is one framed batch of
//! mutations appended to `pool.log`, and the current occupancy is whatever
//! replaying the log yields.
//!
//! # Architecture
//!
//! ```text
//! pool.log:
//! [Batch 0: {reset 100..=4099 step 50}]      ← written by --reset
//! [Batch 1: {claim 0}]                       ← one allocation
//! [Batch 2: {claim 1}]
//! [Batch 3: {tag 1 "6ba7b810-..."}]
//! [Batch 4: {release 0}]
//! ```
//!
//! Batch framing: `[4-byte length][json body][4-byte checksum]`. A frame
//! cut short at the end of the file is an update that never committed;
//! replay stops there and the next writer cuts it off. A complete frame that
//! fails its checksum is damage to committed data and makes the store
//! refuse to load until the log is repaired or reset by hand.
//!
//! Writers hold an exclusive `flock` on `pool.lock` from the replay until
//! the batch is synced, so two processes can never both see slot N free and
//! both claim it.

use super::lock::{LockMode, StoreLock};
use super::occupancy::{Mutation, Occupancy};
use super::AllocationStore;
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const LOG_FILE: &str = "pool.log";
const LOCK_FILE: &str = "pool.lock";

/// Bytes of framing around each batch body
const FRAME_OVERHEAD: usize = 8;

/// One committed update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogBatch {
    /// Batch sequence number (monotonically increasing)
    pub sequence: u64,
    /// Commit time (milliseconds since epoch)
    pub timestamp: i64,
    pub mutations: Vec<Mutation>,
}

impl LogBatch {
    pub fn new(sequence: u64, mutations: Vec<Mutation>) -> Self {
        Self {
            sequence,
            timestamp: chrono::Utc::now().timestamp_millis(),
            mutations,
        }
    }

    /// Serialize to bytes with length prefix and checksum suffix
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(self)
            .map_err(|e| Error::Storage(format!("Failed to serialize batch: {}", e)))?;

        let mut result = Vec::with_capacity(json.len() + FRAME_OVERHEAD);
        result.extend_from_slice(&(json.len() as u32).to_le_bytes());
        result.extend_from_slice(&json);
        result.extend_from_slice(&checksum(&json).to_le_bytes());
        Ok(result)
    }

    /// Deserialize one framed batch
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FRAME_OVERHEAD {
            return Err(Error::Storage("Batch too short".to_string()));
        }

        let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if bytes.len() < len + FRAME_OVERHEAD {
            return Err(Error::Storage(format!(
                "Incomplete batch: expected {} bytes, got {}",
                len + FRAME_OVERHEAD,
                bytes.len()
            )));
        }

        let json = &bytes[4..4 + len];
        let stored = u32::from_le_bytes([
            bytes[4 + len],
            bytes[5 + len],
            bytes[6 + len],
            bytes[7 + len],
        ]);
        if stored != checksum(json) {
            return Err(Error::Storage("Checksum mismatch".to_string()));
        }

        serde_json::from_slice(json)
            .map_err(|e| Error::Storage(format!("Failed to deserialize batch: {}", e)))
    }

    /// Total framed size
    pub fn framed_len(bytes: &[u8]) -> Option<usize> {
        let prefix: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(prefix) as usize + FRAME_OVERHEAD)
    }
}

/// FNV-1a over the batch body
fn checksum(data: &[u8]) -> u32 {
    data.iter().fold(0x811c_9dc5u32, |acc, &b| {
        (acc ^ b as u32).wrapping_mul(0x0100_0193)
    })
}

/// Result of replaying the log
#[derive(Debug, Default)]
struct Replay {
    state: Occupancy,
    /// Batches applied
    batches: u64,
    next_sequence: u64,
    /// Offset just past the last good batch
    valid_len: u64,
    file_len: u64,
}

/// Durable store shared by every process pointing at the same directory
#[derive(Debug)]
pub struct LogStore {
    dir: PathBuf,
    log_path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
    compact_after: u64,
}

impl LogStore {
    /// Open the store, creating the directory and its files on first use
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let dir = config.path.clone();
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::Storage(format!("Failed to create store directory: {}", e)))?;

        let store = Self {
            log_path: dir.join(LOG_FILE),
            lock_path: dir.join(LOCK_FILE),
            dir,
            lock_timeout: Duration::from_millis(config.lock_timeout_ms),
            compact_after: config.compact_after,
        };

        for path in [&store.log_path, &store.lock_path] {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| Error::Storage(format!("Failed to create {:?}: {}", path, e)))?;
        }

        debug!(path = ?store.dir, "Opened log store");
        Ok(store)
    }

    /// Store directory
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Size of the log file in bytes
    pub fn log_len(&self) -> Result<u64> {
        std::fs::metadata(&self.log_path)
            .map(|m| m.len())
            .map_err(|e| Error::Storage(format!("Failed to stat log: {}", e)))
    }

    fn lock(&self, mode: LockMode) -> Result<StoreLock> {
        StoreLock::acquire(&self.lock_path, mode, self.lock_timeout)
    }

    /// Rebuild the occupancy from the log; caller holds the lock
    fn replay(&self) -> Result<Replay> {
        let bytes = std::fs::read(&self.log_path)
            .map_err(|e| Error::Storage(format!("Failed to read log: {}", e)))?;

        let mut replay = Replay {
            file_len: bytes.len() as u64,
            ..Replay::default()
        };
        let mut offset = 0usize;

        while offset < bytes.len() {
            let rest = &bytes[offset..];
            let len = match LogBatch::framed_len(rest) {
                Some(len) if len <= rest.len() => len,
                _ => {
                    warn!(
                        offset,
                        discarded = rest.len(),
                        "Ignoring uncommitted log tail"
                    );
                    break;
                }
            };

            let batch = LogBatch::from_bytes(&rest[..len]).map_err(|e| {
                Error::Storage(format!(
                    "Corrupt batch at offset {} of {}: {}",
                    offset,
                    self.log_path.display(),
                    e
                ))
            })?;

            for mutation in &batch.mutations {
                replay.state.apply(mutation);
            }
            replay.next_sequence = batch.sequence + 1;
            replay.batches += 1;
            offset += len;
        }

        replay.valid_len = offset as u64;
        debug!(
            batches = replay.batches,
            occupied = replay.state.len(),
            "Replayed allocation log"
        );
        Ok(replay)
    }

    /// Append one batch, cutting off any torn tail first
    fn append(&self, replay: &Replay, batch: &LogBatch) -> Result<()> {
        let bytes = batch.to_bytes()?;

        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.log_path)
            .map_err(|e| Error::Storage(format!("Failed to open log: {}", e)))?;

        if replay.valid_len < replay.file_len {
            warn!(
                valid_len = replay.valid_len,
                file_len = replay.file_len,
                "Truncating torn log tail"
            );
            file.set_len(replay.valid_len)
                .map_err(|e| Error::Storage(format!("Failed to truncate log: {}", e)))?;
        }

        file.write_all(&bytes)
            .map_err(|e| Error::Storage(format!("Failed to write batch: {}", e)))?;
        file.sync_all()
            .map_err(|e| Error::Storage(format!("Failed to sync log: {}", e)))?;

        debug!(
            sequence = batch.sequence,
            mutations = batch.mutations.len(),
            "Appended log batch"
        );
        Ok(())
    }

    /// Replace the log with a single batch rebuilding `state`
    fn compact(&self, state: &Occupancy, sequence: u64) -> Result<()> {
        let batch = LogBatch::new(sequence, state.compacted());
        let bytes = batch.to_bytes()?;

        let temp_path = self.log_path.with_extension("log.tmp");
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| Error::Storage(format!("Failed to create temp log: {}", e)))?;

        file.write_all(&bytes)
            .map_err(|e| Error::Storage(format!("Failed to write compacted log: {}", e)))?;
        file.sync_all()
            .map_err(|e| Error::Storage(format!("Failed to sync compacted log: {}", e)))?;

        std::fs::rename(&temp_path, &self.log_path)
            .map_err(|e| Error::Storage(format!("Failed to rename log: {}", e)))?;

        info!(
            sequence,
            occupied = state.len(),
            "Compacted allocation log"
        );
        Ok(())
    }
}

impl AllocationStore for LogStore {
    fn snapshot(&self) -> Result<Occupancy> {
        let _lock = self.lock(LockMode::Shared)?;
        Ok(self.replay()?.state)
    }

    fn update(&self, op: &mut dyn FnMut(&mut Occupancy) -> Result<()>) -> Result<()> {
        let _lock = self.lock(LockMode::Exclusive)?;
        let mut replay = self.replay()?;

        op(&mut replay.state)?;

        let mutations = replay.state.take_journal();
        if mutations.is_empty() {
            return Ok(());
        }

        let resets = mutations.iter().any(Mutation::is_reset);
        if resets || replay.batches >= self.compact_after {
            self.compact(&replay.state, replay.next_sequence)
        } else {
            self.append(&replay, &LogBatch::new(replay.next_sequence, mutations))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::store::SlotIndex;

    fn temp_config(name: &str) -> StoreConfig {
        StoreConfig {
            path: std::env::temp_dir().join(format!("vlan_log_{}_{}", name, std::process::id())),
            lock_timeout_ms: 1000,
            max_retries: 0,
            compact_after: 512,
        }
    }

    #[test]
    fn test_batch_serialization() -> Result<()> {
        let batch = LogBatch::new(
            42,
            vec![
                Mutation::Release {
                    index: SlotIndex::new(1),
                },
                Mutation::Reset {
                    pool: PoolConfig::new(0, 9, 5)?,
                },
            ],
        );

        let bytes = batch.to_bytes()?;
        assert_eq!(LogBatch::framed_len(&bytes), Some(bytes.len()));

        let recovered = LogBatch::from_bytes(&bytes)?;
        assert_eq!(recovered.sequence, 42);
        assert_eq!(recovered.mutations, batch.mutations);
        Ok(())
    }

    #[test]
    fn test_batch_checksum_detects_corruption() -> Result<()> {
        let batch = LogBatch::new(
            1,
            vec![Mutation::Release {
                index: SlotIndex::new(7),
            }],
        );
        let mut bytes = batch.to_bytes()?;
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0x20;

        assert!(LogBatch::from_bytes(&bytes).is_err());
        assert!(LogBatch::from_bytes(&bytes[..5]).is_err());
        Ok(())
    }

    #[test]
    fn test_log_store_recovery() -> Result<()> {
        let config = temp_config("recovery");

        {
            let store = LogStore::open(&config)?;
            store.reset(PoolConfig::new(100, 199, 10)?)?;
            store.claim(SlotIndex::new(0), None)?;
            store.claim(SlotIndex::new(1), Some("vm-1"))?;
            store.release(SlotIndex::new(0))?;
        }

        // Reopen and verify recovery
        {
            let store = LogStore::open(&config)?;
            let state = store.snapshot()?;
            assert_eq!(state.pool(), Some(PoolConfig::new(100, 199, 10)?));
            assert_eq!(state.indices().collect::<Vec<_>>(), vec![SlotIndex::new(1)]);
            assert_eq!(
                state.get(SlotIndex::new(1)).and_then(|r| r.tag.as_deref()),
                Some("vm-1")
            );
        }

        std::fs::remove_dir_all(&config.path).ok();
        Ok(())
    }

    #[test]
    fn test_torn_tail_is_ignored_and_truncated() -> Result<()> {
        let config = temp_config("torn");
        let store = LogStore::open(&config)?;
        store.claim(SlotIndex::new(0), None)?;
        let committed = store.log_len()?;

        // Half-written batch from a crashed writer
        let partial = LogBatch::new(
            9,
            vec![Mutation::Release {
                index: SlotIndex::new(0),
            }],
        )
        .to_bytes()?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(config.path.join(LOG_FILE))
            .unwrap();
        file.write_all(&partial[..partial.len() - 3]).unwrap();
        drop(file);

        assert_eq!(store.count_occupied()?, 1);

        store.claim(SlotIndex::new(1), None)?;
        let state = store.snapshot()?;
        assert_eq!(state.len(), 2);
        assert!(store.log_len()? > committed);

        std::fs::remove_dir_all(&config.path).ok();
        Ok(())
    }

    #[test]
    fn test_failed_update_writes_nothing() -> Result<()> {
        let config = temp_config("rollback");
        let store = LogStore::open(&config)?;
        store.claim(SlotIndex::new(2), None)?;
        let before = store.log_len()?;

        let result = store.claim(SlotIndex::new(2), None);
        assert!(matches!(result, Err(Error::AlreadyOccupied(2))));
        assert!(store.set_tag(SlotIndex::new(5), "vm").is_err());
        // Releasing a free slot is a no-op, not a write
        assert!(!store.release(SlotIndex::new(5))?);

        assert_eq!(store.log_len()?, before);

        std::fs::remove_dir_all(&config.path).ok();
        Ok(())
    }

    #[test]
    fn test_compaction_keeps_state() -> Result<()> {
        let mut config = temp_config("compact");
        config.compact_after = 4;
        let store = LogStore::open(&config)?;

        for i in 0..10 {
            store.claim(SlotIndex::new(i), None)?;
        }
        for i in 0..10 {
            if i % 2 == 0 {
                store.release(SlotIndex::new(i))?;
            }
        }

        let state = store.snapshot()?;
        let odd: Vec<_> = (0..10).filter(|i| i % 2 == 1).map(SlotIndex::new).collect();
        assert_eq!(state.indices().collect::<Vec<_>>(), odd);

        // Reset always rewrites the log as a single small batch
        store.reset(PoolConfig::new(0, 99, 10)?)?;
        let reset_len = store.log_len()?;
        assert_eq!(store.count_occupied()?, 0);
        assert!(reset_len < 200, "log after reset is {} bytes", reset_len);

        std::fs::remove_dir_all(&config.path).ok();
        Ok(())
    }

    #[test]
    fn test_corrupt_committed_batch_blocks_the_store() -> Result<()> {
        let config = temp_config("corrupt");
        let store = LogStore::open(&config)?;
        store.reset(PoolConfig::new(0, 99, 10)?)?;
        for i in 0..4 {
            store.claim(SlotIndex::new(i), None)?;
        }

        // Flip one byte inside the body of the first claim batch
        let log_path = config.path.join(LOG_FILE);
        let mut bytes = std::fs::read(&log_path).unwrap();
        let first_claim = LogBatch::framed_len(&bytes).unwrap();
        bytes[first_claim + 6] ^= 0x01;
        std::fs::write(&log_path, &bytes).unwrap();
        let damaged_len = store.log_len()?;

        assert!(matches!(store.snapshot(), Err(Error::Storage(_))));
        assert!(matches!(
            store.claim(SlotIndex::new(0), None),
            Err(Error::Storage(_))
        ));

        // Later committed batches are still on disk
        assert_eq!(store.log_len()?, damaged_len);
        assert_eq!(std::fs::read(&log_path).unwrap(), bytes);

        std::fs::remove_dir_all(&config.path).ok();
        Ok(())
    }
}
