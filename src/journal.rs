use crate::model::{OperationKind, Payload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Journal entry status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JournalStatus {
    /// Appended before the mutation is attempted.
    Start,
    /// The mutation succeeded.
    Ok,
    /// The mutation failed; nothing was changed on disk.
    Fail,
    /// The operation was reversed during rollback or recovery.
    Undone,
}

/// A single journal entry (NDJSON line).
///
/// The `start` entry for an operation is durable on disk before the
/// mutation runs, so a crash between the two leaves a `start` with no `ok`
/// — recovery skips those, the safe direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Operation ID this entry belongs to.
    pub id: Uuid,
    /// Entry timestamp (ISO 8601).
    pub ts: DateTime<Utc>,
    /// Mutation kind.
    pub kind: OperationKind,
    /// Absolute path affected.
    pub target: PathBuf,
    /// Backup location, once one was taken.
    pub backup_path: Option<PathBuf>,
    /// Undo data carried by the operation.
    pub payload: Option<Payload>,
    /// Status transition.
    pub status: JournalStatus,
}

/// Journal writer that appends NDJSON lines, fsync'd per line.
pub struct JournalWriter {
    path: PathBuf,
    file: std::fs::File,
}

impl JournalWriter {
    /// Open a journal file for appending.
    pub fn open(path: PathBuf) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self { path, file })
    }

    /// Append a journal entry and flush it to stable storage.
    pub fn write(&mut self, entry: &JournalEntry) -> std::io::Result<()> {
        let line = serde_json::to_string(entry).map_err(std::io::Error::other)?;
        use std::io::Write;
        writeln!(&mut self.file, "{}", line)?;
        self.file.sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read journal entries from a file.
pub fn read_journal(path: &Path) -> anyhow::Result<Vec<JournalEntry>> {
    let content = std::fs::read_to_string(path)?;
    let entries: Vec<JournalEntry> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| anyhow::anyhow!("invalid journal line: {}", e))
        })
        .collect::<anyhow::Result<_>>()?;
    Ok(entries)
}

/// Fold a journal down to the operations that completed and were never
/// undone, in application order. This is what crash recovery reverses.
pub fn completed_entries(entries: &[JournalEntry]) -> Vec<JournalEntry> {
    let undone: std::collections::HashSet<Uuid> = entries
        .iter()
        .filter(|e| e.status == JournalStatus::Undone)
        .map(|e| e.id)
        .collect();
    entries
        .iter()
        .filter(|e| e.status == JournalStatus::Ok && !undone.contains(&e.id))
        .cloned()
        .collect()
}
