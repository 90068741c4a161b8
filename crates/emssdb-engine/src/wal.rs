//! Write-Ahead Log
//!
//! Every committed batch is appended as one checksummed record before it is
//! applied to RAM. Replaying the log in file order rebuilds the map exactly.
//!
//! Files are named `wal-{sequence:016x}.log`; lexicographic order is replay
//! order. A checkpoint writes a fresh file holding a single checkpoint record
//! and removes every older file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::batch::BatchOp;
use crate::error::{EngineError, EngineResult};
use crate::format::{deserialize_record, serialize_record, Limits, RecordKind, WalRecord, HEADER_SIZE, MAGIC_ARRAY};
use crate::platform_durability::{durable_sync, sync_dir};

const WAL_PREFIX: &str = "wal-";
const WAL_SUFFIX: &str = ".log";

fn wal_file_name(sequence: u64) -> String {
    format!("{}{:016x}{}", WAL_PREFIX, sequence, WAL_SUFFIX)
}

fn parse_sequence(name: &str) -> Option<u64> {
    let hex = name.strip_prefix(WAL_PREFIX)?.strip_suffix(WAL_SUFFIX)?;
    u64::from_str_radix(hex, 16).ok()
}

/// List WAL files in the directory, sorted by sequence.
pub fn wal_files(wal_dir: &Path) -> EngineResult<Vec<(u64, PathBuf)>> {
    let dir_entries = std::fs::read_dir(wal_dir)
        .map_err(|e| EngineError::io_at(wal_dir, e, "Failed to read WAL directory"))?;

    let mut files = Vec::new();
    for entry in dir_entries {
        let entry = entry.map_err(|e| EngineError::io_at(wal_dir, e, "Failed to read directory entry"))?;
        let path = entry.path();
        if let Some(seq) = path.file_name().and_then(|n| n.to_str()).and_then(parse_sequence) {
            files.push((seq, path));
        }
    }
    files.sort_by_key(|(seq, _)| *seq);
    Ok(files)
}

/// Outcome of [`WalWriter::checkpoint`].
#[derive(Debug, Clone)]
pub struct CheckpointResult {
    /// The file now holding the checkpoint record
    pub file_path: PathBuf,
    /// Live entries written into the checkpoint
    pub live_entries: usize,
    /// WAL files removed
    pub removed_files: usize,
    /// Total WAL bytes before the checkpoint
    pub original_bytes: u64,
    /// WAL bytes after the checkpoint
    pub compacted_bytes: u64,
}

impl CheckpointResult {
    pub fn bytes_saved(&self) -> u64 {
        self.original_bytes.saturating_sub(self.compacted_bytes)
    }
}

/// Appends records to the current WAL file.
///
/// Callers must finish [`append`](Self::append) before touching the RAM map.
pub struct WalWriter {
    file: File,
    path: PathBuf,
    size: u64,
    wal_dir: PathBuf,
    sequence: u64,
    rotation_size: u64,
    limits: Limits,
}

impl WalWriter {
    /// Open the newest WAL file in `wal_dir` for appending, creating one if needed.
    pub fn new<P: AsRef<Path>>(wal_dir: P, rotation_size: u64, limits: Limits) -> EngineResult<Self> {
        let wal_dir = wal_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&wal_dir)
            .map_err(|e| EngineError::io_at(&wal_dir, e, "Failed to create WAL directory"))?;

        let sequence = wal_files(&wal_dir)?.last().map(|(seq, _)| *seq).unwrap_or(0);
        let path = wal_dir.join(wal_file_name(sequence));
        let file = open_append(&path)?;
        let size = file
            .metadata()
            .map_err(|e| EngineError::io_at(&path, e, "Failed to stat WAL file"))?
            .len();

        Ok(Self { file, path, size, wal_dir, sequence, rotation_size, limits })
    }

    /// Serialize and append one batch.
    ///
    /// With `durable` set the record is synced before returning; otherwise it
    /// may sit in the page cache until the next [`sync`](Self::sync).
    pub fn append(&mut self, ops: &[BatchOp], durable: bool) -> EngineResult<()> {
        let record = serialize_record(RecordKind::Batch, ops, self.limits)?;

        if self.size > 0 && self.size + record.len() as u64 > self.rotation_size {
            self.rotate()?;
        }

        self.file
            .write_all(&record)
            .map_err(|e| EngineError::io_at(&self.path, e, "WAL write failed"))?;
        if durable {
            durable_sync(&self.file)
                .map_err(|e| EngineError::io_at(&self.path, e, "WAL durable_sync failed"))?;
        }
        self.size += record.len() as u64;
        Ok(())
    }

    fn rotate(&mut self) -> EngineResult<()> {
        durable_sync(&self.file)
            .map_err(|e| EngineError::io_at(&self.path, e, "WAL sync before rotation failed"))?;

        self.sequence += 1;
        let new_path = self.wal_dir.join(wal_file_name(self.sequence));
        self.file = open_append(&new_path)?;
        self.path = new_path;
        self.size = 0;
        debug!(path = %self.path.display(), "rotated WAL file");
        Ok(())
    }

    /// Replace the whole log with one checkpoint record of `live` entries.
    ///
    /// The record is written to a temp file, synced and renamed into place
    /// before older files are unlinked, so a crash at any point replays to
    /// the same state.
    pub fn checkpoint(&mut self, live: &[BatchOp]) -> EngineResult<CheckpointResult> {
        let record = serialize_record(RecordKind::Checkpoint, live, self.limits)?;

        let existing = wal_files(&self.wal_dir)?;
        let mut original_bytes = 0u64;
        for (_, path) in &existing {
            original_bytes += std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        }

        let sequence = self.sequence + 1;
        let final_path = self.wal_dir.join(wal_file_name(sequence));
        let tmp_path = final_path.with_extension("log.tmp");

        {
            let mut tmp = File::create(&tmp_path)
                .map_err(|e| EngineError::io_at(&tmp_path, e, "Failed to create checkpoint file"))?;
            tmp.write_all(&record)
                .map_err(|e| EngineError::io_at(&tmp_path, e, "Checkpoint write failed"))?;
            durable_sync(&tmp).map_err(|e| EngineError::io_at(&tmp_path, e, "Checkpoint sync failed"))?;
        }
        std::fs::rename(&tmp_path, &final_path)
            .map_err(|e| EngineError::io_at(&final_path, e, "Checkpoint rename failed"))?;
        sync_dir(&self.wal_dir).map_err(|e| EngineError::io_at(&self.wal_dir, e, "WAL directory sync failed"))?;

        self.file = open_append(&final_path)?;
        self.path = final_path.clone();
        self.sequence = sequence;
        self.size = record.len() as u64;

        let mut removed_files = 0;
        for (seq, path) in existing {
            if seq >= sequence {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => removed_files += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove WAL file after checkpoint"),
            }
        }
        sync_dir(&self.wal_dir).map_err(|e| EngineError::io_at(&self.wal_dir, e, "WAL directory sync failed"))?;

        info!(
            live_entries = live.len(),
            removed_files,
            original_bytes,
            compacted_bytes = self.size,
            "WAL checkpoint complete"
        );

        Ok(CheckpointResult {
            file_path: final_path,
            live_entries: live.len(),
            removed_files,
            original_bytes,
            compacted_bytes: self.size,
        })
    }

    pub fn current_path(&self) -> &Path {
        &self.path
    }

    pub fn current_size(&self) -> u64 {
        self.size
    }

    /// Sync the current file without appending anything.
    pub fn sync(&self) -> EngineResult<()> {
        durable_sync(&self.file).map_err(|e| EngineError::io_at(&self.path, e, "WAL sync failed"))
    }
}

fn open_append(path: &Path) -> EngineResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| EngineError::io_at(path, e, "Failed to open WAL file"))
}

/// Replays WAL files during open.
pub struct WalReader {
    wal_dir: PathBuf,
}

impl WalReader {
    pub fn new<P: AsRef<Path>>(wal_dir: P) -> Self {
        Self { wal_dir: wal_dir.as_ref().to_path_buf() }
    }

    /// Recover every intact record in sequence order.
    ///
    /// Per file: check magic, check the length fits, verify CRC32C. A bad
    /// record is skipped by scanning for the next magic; an incomplete
    /// record at the tail is the crash point and ends that file.
    pub fn recover_records(&self) -> EngineResult<Vec<WalRecord>> {
        let mut records = Vec::new();
        for (_, path) in wal_files(&self.wal_dir)? {
            records.extend(self.recover_from_file(&path)?);
        }
        Ok(records)
    }

    fn recover_from_file(&self, path: &Path) -> EngineResult<Vec<WalRecord>> {
        let mut buffer = Vec::new();
        File::open(path)
            .and_then(|mut f| f.read_to_end(&mut buffer))
            .map_err(|e| EngineError::io_at(path, e, "Failed to read WAL file"))?;

        let mut records = Vec::new();
        let mut offset = 0;

        while offset + HEADER_SIZE <= buffer.len() {
            if buffer[offset..offset + 4] != MAGIC_ARRAY {
                warn!(path = %path.display(), offset, "bad WAL magic, scanning for next record");
                match find_next_magic(&buffer, offset + 1) {
                    Some(next) => {
                        offset = next;
                        continue;
                    }
                    None => break,
                }
            }

            let length = u32::from_le_bytes([
                buffer[offset + 4], buffer[offset + 5], buffer[offset + 6], buffer[offset + 7],
            ]) as usize;
            let total = HEADER_SIZE + length;

            if offset + total > buffer.len() {
                warn!(
                    path = %path.display(),
                    offset,
                    needed = total,
                    available = buffer.len() - offset,
                    "torn WAL record, discarding tail"
                );
                break;
            }

            match deserialize_record(&buffer[offset..offset + total]) {
                Ok(record) => {
                    records.push(record);
                    offset += total;
                }
                Err(e) => {
                    warn!(path = %path.display(), offset, error = %e, "corrupt WAL record skipped");
                    match find_next_magic(&buffer, offset + 1) {
                        Some(next) => offset = next,
                        None => break,
                    }
                }
            }
        }

        Ok(records)
    }
}

fn find_next_magic(buffer: &[u8], start: usize) -> Option<usize> {
    (start..buffer.len().saturating_sub(3)).find(|&i| buffer[i..i + 4] == MAGIC_ARRAY)
}
