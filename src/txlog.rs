use crate::error::{Error, FailedUndo, Result};
use crate::fsops;
use crate::journal::{JournalEntry, JournalStatus, JournalWriter};
use crate::model::{Operation, OperationKind, Payload, Snapshot, Transaction, TxStatus};
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::warn;
use uuid::Uuid;

/// A transaction plus its write-ahead journal.
struct TxEntry {
    tx: Transaction,
    journal: JournalWriter,
}

/// Log-structured tracker of filesystem mutations.
///
/// The only component that mutates tracked paths. Every mutation is
/// appended to the owning transaction's operation list *before* it is
/// attempted and journaled to stable storage, so any batch can be undone
/// in reverse order. Multiple transactions may be active at once; each
/// one's operation list is serialized behind its own lock.
pub struct TransactionLog {
    backup_root: PathBuf,
    // Keeps the default backup root alive; removed when the log is dropped.
    _keeper: Option<tempfile::TempDir>,
    transactions: RwLock<HashMap<Uuid, Arc<Mutex<TxEntry>>>>,
    snapshots: RwLock<HashMap<Uuid, Snapshot>>,
}

/// Outcome of undoing a single operation.
pub(crate) enum Undo {
    Done,
    /// Left in place on purpose (non-empty directory, irreversible delete).
    Kept,
}

impl TransactionLog {
    /// Create a log with a fresh, uniquely named backup root under the
    /// system temp directory.
    pub fn open() -> Result<Self> {
        let keeper = tempfile::Builder::new()
            .prefix("stamp-backups-")
            .tempdir()
            .map_err(|e| Error::fs(std::env::temp_dir(), e))?;
        Ok(Self {
            backup_root: keeper.path().to_path_buf(),
            _keeper: Some(keeper),
            transactions: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
        })
    }

    /// Create a log whose backups live under a caller-chosen directory.
    pub fn with_backup_root(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path).map_err(|e| Error::fs(path, e))?;
        Ok(Self {
            backup_root: path.to_path_buf(),
            _keeper: None,
            transactions: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
        })
    }

    /// Open a new active transaction protecting `root_path`.
    pub fn start_transaction(&self, description: &str, root_path: &Path) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let backup_dir = self.backup_root.join(format!("tx-{id}"));
        std::fs::create_dir_all(&backup_dir).map_err(|e| Error::fs(&backup_dir, e))?;
        let journal = JournalWriter::open(backup_dir.join("journal.ndjson"))
            .map_err(|e| Error::fs(&backup_dir, e))?;
        let tx = Transaction {
            id,
            description: description.to_string(),
            root_path: root_path.to_path_buf(),
            status: TxStatus::Active,
            operations: Vec::new(),
            backup_dir,
        };
        self.write_map()
            .insert(id, Arc::new(Mutex::new(TxEntry { tx, journal })));
        Ok(id)
    }

    /// Write `content` to `path`, recording the creation.
    pub fn record_file_creation(&self, tx_id: Uuid, path: &Path, content: &str) -> Result<Uuid> {
        let op = Operation::new(OperationKind::CreateFile, path.to_path_buf());
        let content = content.to_string();
        self.record_with(tx_id, op, move |op, _backup_dir| {
            fsops::write_file(&op.target, &content)?;
            Ok(())
        })
    }

    /// Create the directory at `path`, recording the creation.
    pub fn record_directory_creation(&self, tx_id: Uuid, path: &Path) -> Result<Uuid> {
        let op = Operation::new(OperationKind::CreateDirectory, path.to_path_buf());
        self.record_with(tx_id, op, |op, _backup_dir| fsops::create_dir(&op.target))
    }

    /// Overwrite `path` with `new_content`, backing up prior content first
    /// when the file already exists.
    pub fn record_file_modification(
        &self,
        tx_id: Uuid,
        path: &Path,
        new_content: &str,
    ) -> Result<Uuid> {
        let op = Operation::new(OperationKind::ModifyFile, path.to_path_buf());
        let new_content = new_content.to_string();
        self.record_with(tx_id, op, move |op, backup_dir| {
            if op.target.exists() {
                op.backup_path = Some(fsops::backup_to(&op.target, backup_dir, op.id)?);
            }
            fsops::write_file(&op.target, &new_content)?;
            Ok(())
        })
    }

    /// Move `source` to `dest`. The source is backed up first; reversing a
    /// move must restore the original location.
    pub fn record_file_move(&self, tx_id: Uuid, source: &Path, dest: &Path) -> Result<Uuid> {
        let mut op = Operation::new(OperationKind::MoveFile, dest.to_path_buf());
        op.payload = Some(Payload::MovedFrom {
            path: source.to_path_buf(),
        });
        let source = source.to_path_buf();
        self.record_with(tx_id, op, move |op, backup_dir| {
            op.backup_path = Some(fsops::backup_to(&source, backup_dir, op.id)?);
            fsops::move_path(&source, &op.target)
        })
    }

    /// Copy `source` to `dest`, recording the copy.
    pub fn record_file_copy(&self, tx_id: Uuid, source: &Path, dest: &Path) -> Result<Uuid> {
        let mut op = Operation::new(OperationKind::CopyFile, dest.to_path_buf());
        op.payload = Some(Payload::CopiedFrom {
            path: source.to_path_buf(),
        });
        let source = source.to_path_buf();
        self.record_with(tx_id, op, move |op, _backup_dir| {
            fsops::copy_path(&source, &op.target)?;
            Ok(())
        })
    }

    /// Delete a file with no backup. Irreversible; rollback skips it.
    pub fn record_file_deletion(&self, tx_id: Uuid, path: &Path) -> Result<Uuid> {
        let op = Operation::new(OperationKind::DeleteFile, path.to_path_buf());
        self.record_with(tx_id, op, |op, _backup_dir| {
            std::fs::remove_file(&op.target).map_err(|e| Error::fs(&op.target, e))
        })
    }

    /// Delete a directory tree with no backup. Irreversible; rollback skips it.
    pub fn record_directory_deletion(&self, tx_id: Uuid, path: &Path) -> Result<Uuid> {
        let op = Operation::new(OperationKind::DeleteDirectory, path.to_path_buf());
        self.record_with(tx_id, op, |op, _backup_dir| {
            std::fs::remove_dir_all(&op.target).map_err(|e| Error::fs(&op.target, e))
        })
    }

    /// Capture the transaction's current operation list, by value.
    pub fn create_snapshot(&self, tx_id: Uuid, description: &str) -> Result<Uuid> {
        let handle = self.handle(tx_id)?;
        let entry = lock(&handle);
        if entry.tx.status != TxStatus::Active {
            return Err(Error::TransactionNotFound(tx_id));
        }
        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            description: description.to_string(),
            transaction: tx_id,
            operations: entry.tx.operations.clone(),
            taken_at: Utc::now(),
        };
        let id = snapshot.id;
        self.snapshots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, snapshot);
        Ok(id)
    }

    /// Release the transaction's backup storage and mark it committed.
    /// Target files are never touched here.
    pub fn commit_transaction(&self, tx_id: Uuid) -> Result<()> {
        let handle = self
            .write_map()
            .remove(&tx_id)
            .ok_or(Error::TransactionNotFound(tx_id))?;
        let mut entry = lock(&handle);
        for op in &entry.tx.operations {
            if let Some(backup) = &op.backup_path
                && backup.exists()
                && let Err(e) = remove_any(backup)
            {
                warn!(path = %backup.display(), error = %e, "failed to purge backup");
            }
        }
        if let Err(e) = std::fs::remove_dir_all(&entry.tx.backup_dir) {
            warn!(path = %entry.tx.backup_dir.display(), error = %e, "failed to remove backup dir");
        }
        entry.tx.status = TxStatus::Committed;
        self.drop_snapshots_of(tx_id);
        Ok(())
    }

    /// Undo every completed operation in reverse chronological order.
    ///
    /// Continues past individual failures; if any undo failed the
    /// transaction stays active and the error carries both the undone and
    /// the unrestored operation lists.
    pub fn rollback_transaction(&self, tx_id: Uuid) -> Result<()> {
        let handle = self.handle(tx_id)?;
        let mut entry = lock(&handle);
        if entry.tx.status != TxStatus::Active {
            return Err(Error::TransactionNotFound(tx_id));
        }

        let mut undone = Vec::new();
        let mut failed = Vec::new();
        let ops: Vec<Operation> = entry.tx.operations.iter().rev().cloned().collect();
        for op in &ops {
            if !op.completed {
                continue;
            }
            match undo_operation(op) {
                Ok(_) => {
                    undone.push(op.id);
                    let journal_entry = to_journal(op, JournalStatus::Undone);
                    if let Err(e) = entry.journal.write(&journal_entry) {
                        warn!(op = %op.id, error = %e, "failed to journal undo");
                    }
                }
                Err(e) => failed.push(FailedUndo {
                    operation: op.id,
                    path: op.target.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        if !failed.is_empty() {
            return Err(Error::RollbackFailed {
                undone,
                failed,
                trigger: None,
            });
        }

        entry.tx.status = TxStatus::RolledBack;
        if let Err(e) = std::fs::remove_dir_all(&entry.tx.backup_dir) {
            warn!(path = %entry.tx.backup_dir.display(), error = %e, "failed to remove backup dir");
        }
        drop(entry);
        self.write_map().remove(&tx_id);
        self.drop_snapshots_of(tx_id);
        Ok(())
    }

    /// Undo the operations recorded after `snapshot_id` was captured,
    /// leaving the transaction active and its bookkeeping intact.
    ///
    /// Undone operations are flipped back to incomplete — nothing of
    /// theirs remains on disk — so a later full rollback skips them.
    pub fn rollback_to_snapshot(&self, snapshot_id: Uuid) -> Result<()> {
        let snapshot = self
            .snapshots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&snapshot_id)
            .cloned()
            .ok_or(Error::SnapshotNotFound(snapshot_id))?;
        let captured: std::collections::HashSet<Uuid> =
            snapshot.operations.iter().map(|op| op.id).collect();

        let handle = self.handle(snapshot.transaction)?;
        let mut entry = lock(&handle);
        if entry.tx.status != TxStatus::Active {
            return Err(Error::TransactionNotFound(snapshot.transaction));
        }

        let mut undone = Vec::new();
        let mut failed = Vec::new();
        let suffix: Vec<Operation> = entry
            .tx
            .operations
            .iter()
            .rev()
            .filter(|op| !captured.contains(&op.id))
            .cloned()
            .collect();
        for op in &suffix {
            if !op.completed {
                continue;
            }
            match undo_operation(op) {
                Ok(_) => {
                    undone.push(op.id);
                    let journal_entry = to_journal(op, JournalStatus::Undone);
                    if let Err(e) = entry.journal.write(&journal_entry) {
                        warn!(op = %op.id, error = %e, "failed to journal undo");
                    }
                }
                Err(e) => failed.push(FailedUndo {
                    operation: op.id,
                    path: op.target.clone(),
                    reason: e.to_string(),
                }),
            }
        }
        for op in entry.tx.operations.iter_mut() {
            if undone.contains(&op.id) {
                op.completed = false;
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::RollbackFailed {
                undone,
                failed,
                trigger: None,
            })
        }
    }

    /// Last-resort cleanup with no per-operation bookkeeping: forcibly
    /// removes `root_path` entirely.
    pub fn emergency_cleanup(&self, root_path: &Path) -> Result<()> {
        if root_path.exists() {
            std::fs::remove_dir_all(root_path).map_err(|e| Error::fs(root_path, e))?;
        }
        Ok(())
    }

    /// Clone of the transaction's operation list, for inspection.
    pub fn operations(&self, tx_id: Uuid) -> Result<Vec<Operation>> {
        let handle = self.handle(tx_id)?;
        let entry = lock(&handle);
        Ok(entry.tx.operations.clone())
    }

    /// Path of the transaction's write-ahead journal.
    pub fn journal_path(&self, tx_id: Uuid) -> Result<PathBuf> {
        let handle = self.handle(tx_id)?;
        let entry = lock(&handle);
        Ok(entry.tx.backup_dir.join("journal.ndjson"))
    }

    /// Number of currently active transactions.
    pub fn active_transactions(&self) -> usize {
        self.transactions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn record_with(
        &self,
        tx_id: Uuid,
        op: Operation,
        mutate: impl FnOnce(&mut Operation, &Path) -> Result<()>,
    ) -> Result<Uuid> {
        let handle = self.handle(tx_id)?;
        let mut entry = lock(&handle);
        if entry.tx.status != TxStatus::Active {
            return Err(Error::TransactionNotFound(tx_id));
        }
        let backup_dir = entry.tx.backup_dir.clone();
        let id = op.id;

        // Append before mutating: a crash between the two leaves an
        // incomplete operation and an untouched filesystem. The reverse
        // ordering would be unsafe and must not be used.
        entry.tx.operations.push(op);
        let idx = entry.tx.operations.len() - 1;
        let start = to_journal(&entry.tx.operations[idx], JournalStatus::Start);
        let journal_path = backup_dir.join("journal.ndjson");
        entry
            .journal
            .write(&start)
            .map_err(|e| Error::fs(&journal_path, e))?;

        let result = mutate(&mut entry.tx.operations[idx], &backup_dir);
        match result {
            Ok(()) => {
                entry.tx.operations[idx].completed = true;
                let ok = to_journal(&entry.tx.operations[idx], JournalStatus::Ok);
                entry
                    .journal
                    .write(&ok)
                    .map_err(|e| Error::fs(&journal_path, e))?;
                Ok(id)
            }
            Err(e) => {
                // The operation stays appended but incomplete; rollback
                // will skip it. The failed attempt is not retried here.
                let fail = to_journal(&entry.tx.operations[idx], JournalStatus::Fail);
                if let Err(journal_err) = entry.journal.write(&fail) {
                    warn!(op = %id, error = %journal_err, "failed to journal failure");
                }
                Err(e)
            }
        }
    }

    fn handle(&self, tx_id: Uuid) -> Result<Arc<Mutex<TxEntry>>> {
        self.transactions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&tx_id)
            .cloned()
            .ok_or(Error::TransactionNotFound(tx_id))
    }

    fn write_map(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, Arc<Mutex<TxEntry>>>> {
        self.transactions.write().unwrap_or_else(|e| e.into_inner())
    }

    fn drop_snapshots_of(&self, tx_id: Uuid) {
        self.snapshots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|_, s| s.transaction != tx_id);
    }
}

fn lock(handle: &Arc<Mutex<TxEntry>>) -> MutexGuard<'_, TxEntry> {
    handle.lock().unwrap_or_else(|e| e.into_inner())
}

fn to_journal(op: &Operation, status: JournalStatus) -> JournalEntry {
    JournalEntry {
        id: op.id,
        ts: Utc::now(),
        kind: op.kind,
        target: op.target.clone(),
        backup_path: op.backup_path.clone(),
        payload: op.payload.clone(),
        status,
    }
}

fn remove_any(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

/// Perform the inverse of one completed operation.
pub(crate) fn undo_operation(op: &Operation) -> Result<Undo> {
    match op.kind {
        OperationKind::CreateFile => {
            if op.target.exists() {
                std::fs::remove_file(&op.target).map_err(|e| Error::fs(&op.target, e))?;
            }
            Ok(Undo::Done)
        }
        OperationKind::CreateDirectory => {
            if !op.target.exists() {
                return Ok(Undo::Done);
            }
            if fsops::remove_dir_if_empty(&op.target)? {
                Ok(Undo::Done)
            } else {
                // Never delete non-empty trees implicitly.
                warn!(path = %op.target.display(), "directory not empty, leaving in place");
                Ok(Undo::Kept)
            }
        }
        OperationKind::ModifyFile => {
            match &op.backup_path {
                Some(backup) if backup.exists() => fsops::restore(backup, &op.target)?,
                _ => {
                    // No prior content existed; the file itself is the mutation.
                    if op.target.exists() {
                        std::fs::remove_file(&op.target).map_err(|e| Error::fs(&op.target, e))?;
                    }
                }
            }
            Ok(Undo::Done)
        }
        OperationKind::CopyFile => {
            if op.target.exists() {
                remove_any(&op.target).map_err(|e| Error::fs(&op.target, e))?;
            }
            Ok(Undo::Done)
        }
        OperationKind::MoveFile => {
            let original = match &op.payload {
                Some(Payload::MovedFrom { path }) => path.clone(),
                _ => {
                    return Err(Error::fs(
                        &op.target,
                        std::io::Error::other("move operation lost its source path"),
                    ));
                }
            };
            match &op.backup_path {
                Some(backup) if backup.exists() => {
                    fsops::restore(backup, &original)?;
                    if op.target.exists() {
                        remove_any(&op.target).map_err(|e| Error::fs(&op.target, e))?;
                    }
                }
                _ => {
                    // Backup missing; the destination itself still holds the
                    // content, move it home.
                    fsops::move_path(&op.target, &original)?;
                }
            }
            Ok(Undo::Done)
        }
        OperationKind::DeleteFile | OperationKind::DeleteDirectory => {
            // Recorded without a backup, irreversible by design.
            warn!(path = %op.target.display(), "delete was recorded without backup, cannot restore");
            Ok(Undo::Kept)
        }
    }
}
