//! Offset persistence across cycles
//!
//! Each process keeps a current offset and an append-only history of
//! `(cycle, offset)` records. The file layout is the one the dashboard and
//! plotting tools read:
//!
//! - `offset_<id>.txt` holds the current offset as a bare decimal
//! - `offset_<id>.csv` holds the history under a `cycle,offset` header

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use berkeley_core::{parse_decimal, CycleIndex, ProcessId, SyncError, SyncResult, FIRST_CYCLE};

/// One row of a process's offset history
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OffsetRecord {
    pub cycle: CycleIndex,
    pub offset: f64,
}

/// Where offsets live between cycles
pub trait OffsetStore: Send + Sync {
    /// Latest offset of a process, if it ever recorded one
    fn current_offset(&self, id: &ProcessId) -> SyncResult<Option<f64>>;

    /// Full history, oldest first
    fn history(&self, id: &ProcessId) -> SyncResult<Vec<OffsetRecord>>;

    /// Set the current offset and append it to the history
    fn record(&self, id: &ProcessId, record: OffsetRecord) -> SyncResult<()>;

    /// Every process with a stored offset
    fn processes(&self) -> SyncResult<Vec<ProcessId>>;

    /// Index the next recorded cycle of `id` will carry
    fn next_cycle(&self, id: &ProcessId) -> SyncResult<CycleIndex> {
        Ok(self
            .history(id)?
            .last()
            .map_or(FIRST_CYCLE, |r| r.cycle + 1))
    }
}

const FILE_PREFIX: &str = "offset_";
const CSV_HEADER: &str = "cycle,offset";

/// File-backed store in a single directory
#[derive(Clone, Debug)]
pub struct FileOffsetStore {
    dir: PathBuf,
}

impl FileOffsetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileOffsetStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn current_path(&self, id: &ProcessId) -> PathBuf {
        self.dir.join(format!("{}{}.txt", FILE_PREFIX, id.file_stem()))
    }

    fn history_path(&self, id: &ProcessId) -> PathBuf {
        self.dir.join(format!("{}{}.csv", FILE_PREFIX, id.file_stem()))
    }

    /// Remove every offset and history file, including histories without a
    /// current offset. Returns files removed.
    pub fn reset(&self) -> SyncResult<usize> {
        let files = self.offset_files()?;
        for path in &files {
            fs::remove_file(path).map_err(store_error)?;
        }
        Ok(files.len())
    }

    fn offset_files(&self) -> SyncResult<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(store_error)? {
            let path = entry.map_err(store_error)?.path();
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
            let owned = name.is_some_and(|n| {
                n.starts_with(FILE_PREFIX) && (n.ends_with(".txt") || n.ends_with(".csv"))
            });
            if owned && path.is_file() {
                files.push(path);
            }
        }
        Ok(files)
    }
}

impl OffsetStore for FileOffsetStore {
    fn current_offset(&self, id: &ProcessId) -> SyncResult<Option<f64>> {
        let path = self.current_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read(&path).map_err(store_error)?;
        parse_decimal(&text).map(Some)
    }

    fn history(&self, id: &ProcessId) -> SyncResult<Vec<OffsetRecord>> {
        let path = self.history_path(id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&path).map_err(store_error)?;

        let mut records = Vec::new();
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line == CSV_HEADER {
                continue;
            }
            match parse_history_line(line) {
                Some(record) => records.push(record),
                None => tracing::warn!(path = %path.display(), "skipping malformed history line {:?}", line),
            }
        }
        Ok(records)
    }

    /// Appends the history row before replacing the current offset
    fn record(&self, id: &ProcessId, record: OffsetRecord) -> SyncResult<()> {
        fs::create_dir_all(&self.dir).map_err(store_error)?;

        let path = self.history_path(id);
        let fresh = !path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(store_error)?;
        if fresh {
            writeln!(file, "{}", CSV_HEADER).map_err(store_error)?;
        }
        writeln!(file, "{},{}", record.cycle, record.offset).map_err(store_error)?;

        fs::write(self.current_path(id), record.offset.to_string()).map_err(store_error)?;
        Ok(())
    }

    fn processes(&self) -> SyncResult<Vec<ProcessId>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(store_error)? {
            let name = entry.map_err(store_error)?.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name
                .strip_prefix(FILE_PREFIX)
                .and_then(|rest| rest.strip_suffix(".txt"))
            {
                ids.push(ProcessId::new(stem));
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn parse_history_line(line: &str) -> Option<OffsetRecord> {
    let (cycle, offset) = line.split_once(',')?;
    Some(OffsetRecord {
        cycle: cycle.trim().parse().ok()?,
        offset: parse_decimal(offset.as_bytes()).ok()?,
    })
}

fn store_error(e: std::io::Error) -> SyncError {
    SyncError::StoreError(e.to_string())
}

/// In-memory store for tests and single-process simulations
#[derive(Debug, Default)]
pub struct MemoryOffsetStore {
    histories: Mutex<BTreeMap<ProcessId, Vec<OffsetRecord>>>,
}

impl MemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OffsetStore for MemoryOffsetStore {
    fn current_offset(&self, id: &ProcessId) -> SyncResult<Option<f64>> {
        Ok(self
            .histories
            .lock()
            .get(id)
            .and_then(|h| h.last())
            .map(|r| r.offset))
    }

    fn history(&self, id: &ProcessId) -> SyncResult<Vec<OffsetRecord>> {
        Ok(self.histories.lock().get(id).cloned().unwrap_or_default())
    }

    fn record(&self, id: &ProcessId, record: OffsetRecord) -> SyncResult<()> {
        self.histories
            .lock()
            .entry(id.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    fn processes(&self) -> SyncResult<Vec<ProcessId>> {
        Ok(self.histories.lock().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileOffsetStore::new(dir.path());
        let p1 = ProcessId::new("P1");

        assert_eq!(store.current_offset(&p1).unwrap(), None);
        assert_eq!(store.next_cycle(&p1).unwrap(), FIRST_CYCLE);

        store.record(&p1, OffsetRecord { cycle: 1, offset: 0.875 }).unwrap();
        store.record(&p1, OffsetRecord { cycle: 2, offset: 0.5 }).unwrap();

        let txt = fs::read_to_string(dir.path().join("offset_P1.txt")).unwrap();
        assert_eq!(txt, "0.5");
        let csv = fs::read_to_string(dir.path().join("offset_P1.csv")).unwrap();
        assert_eq!(csv, "cycle,offset\n1,0.875\n2,0.5\n");

        assert_eq!(store.current_offset(&p1).unwrap(), Some(0.5));
        assert_eq!(store.history(&p1).unwrap().len(), 2);
        assert_eq!(store.next_cycle(&p1).unwrap(), 3);
    }

    #[test]
    fn test_file_store_lists_and_resets() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileOffsetStore::new(dir.path());
        for id in ["P2", "P1"] {
            store
                .record(&ProcessId::new(id), OffsetRecord { cycle: 1, offset: 1.0 })
                .unwrap();
        }

        assert_eq!(
            store.processes().unwrap(),
            vec![ProcessId::new("P1"), ProcessId::new("P2")]
        );
        assert_eq!(store.reset().unwrap(), 4);
        assert!(store.processes().unwrap().is_empty());
    }

    #[test]
    fn test_reset_removes_orphaned_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileOffsetStore::new(dir.path());
        let p1 = ProcessId::new("P1");
        store.record(&p1, OffsetRecord { cycle: 1, offset: 1.0 }).unwrap();
        fs::remove_file(dir.path().join("offset_P1.txt")).unwrap();
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        assert_eq!(store.next_cycle(&p1).unwrap(), 2);
        assert_eq!(store.reset().unwrap(), 1);
        assert_eq!(store.next_cycle(&p1).unwrap(), FIRST_CYCLE);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_failed_history_append_keeps_current_offset() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileOffsetStore::new(dir.path());
        let p1 = ProcessId::new("P1");
        store.record(&p1, OffsetRecord { cycle: 1, offset: 0.875 }).unwrap();

        // A directory where the history file belongs makes the append fail
        fs::remove_file(dir.path().join("offset_P1.csv")).unwrap();
        fs::create_dir(dir.path().join("offset_P1.csv")).unwrap();

        assert!(store.record(&p1, OffsetRecord { cycle: 2, offset: 0.5 }).is_err());
        assert_eq!(store.current_offset(&p1).unwrap(), Some(0.875));
    }

    #[test]
    fn test_file_store_skips_malformed_history() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("offset_P3.csv"),
            "cycle,offset\n1,1.5\ngarbage\n2,oops\n3,-0.25\n",
        )
        .unwrap();

        let store = FileOffsetStore::new(dir.path());
        let history = store.history(&ProcessId::new("P3")).unwrap();
        assert_eq!(
            history,
            vec![
                OffsetRecord { cycle: 1, offset: 1.5 },
                OffsetRecord { cycle: 3, offset: -0.25 },
            ]
        );
    }

    #[test]
    fn test_corrupt_current_offset_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("offset_P1.txt"), "not a number").unwrap();
        let store = FileOffsetStore::new(dir.path());
        assert!(store.current_offset(&ProcessId::new("P1")).is_err());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryOffsetStore::new();
        let id = ProcessId::coordinator();
        store.record(&id, OffsetRecord { cycle: 1, offset: 0.25 }).unwrap();

        assert_eq!(store.current_offset(&id).unwrap(), Some(0.25));
        assert_eq!(store.next_cycle(&id).unwrap(), 2);
        assert_eq!(store.processes().unwrap(), vec![id]);
    }
}
