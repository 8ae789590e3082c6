use crate::pipeline::Stage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Structured event emitted while a generation run executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    StageStarted {
        stage: Stage,
        index: usize,
    },
    StageCompleted {
        stage: Stage,
        index: usize,
    },
    StageSkipped {
        stage: Stage,
        index: usize,
        reason: String,
    },
    /// Dry-run announcement of a path that would be written.
    FilePlanned {
        path: PathBuf,
    },
    FileWritten {
        path: PathBuf,
        bytes: u64,
    },
    InstallAttemptFailed {
        attempt: u32,
        max_attempts: u32,
        retry_in: Option<String>,
    },
    /// A log-and-continue outcome: the run proceeds in a degraded state.
    VcsDegraded {
        reason: String,
    },
    TransactionCommitted {
        transaction: Uuid,
    },
    RollbackStarted {
        transaction: Uuid,
    },
    RollbackCompleted {
        transaction: Uuid,
        undone: usize,
    },
    GenerationCompleted {
        root: PathBuf,
        files: usize,
        bytes: u64,
        elapsed: String,
    },
}
