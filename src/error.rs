use std::path::PathBuf;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

/// One undo that could not be performed during rollback.
#[derive(Debug, Clone)]
pub struct FailedUndo {
    pub operation: Uuid,
    pub path: PathBuf,
    pub reason: String,
}

/// Errors shared by the transaction log and the generation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("template provider failed: {0}")]
    Template(String),

    #[error("target directory already exists: {0} (pass --overwrite to replace it)")]
    DirectoryExists(PathBuf),

    #[error("filesystem operation failed on {path}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} {found} does not satisfy required version {required}")]
    UnsupportedToolVersion {
        tool: String,
        required: String,
        found: String,
    },

    #[error("failed to spawn `{command}`")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("dependency installation with {manager} failed after {attempts} attempts: {output}")]
    DependencyInstall {
        manager: String,
        attempts: u32,
        output: String,
    },

    #[error("unknown or already terminated transaction: {0}")]
    TransactionNotFound(Uuid),

    #[error("unknown snapshot: {0}")]
    SnapshotNotFound(Uuid),

    #[error("rollback failed: {} undone, {} not restored{}", undone.len(), failed.len(), render_failed(failed))]
    RollbackFailed {
        /// Operations undone successfully, in undo order.
        undone: Vec<Uuid>,
        /// Operations whose undo failed; their paths need manual cleanup.
        failed: Vec<FailedUndo>,
        /// The error that triggered the rollback, when one did.
        #[source]
        trigger: Option<Box<Error>>,
    },
}

impl Error {
    pub(crate) fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }
}

fn render_failed(failed: &[FailedUndo]) -> String {
    if failed.is_empty() {
        return String::new();
    }
    let mut out = String::from("; clean up manually:");
    for f in failed {
        out.push_str(&format!("\n  {} ({})", f.path.display(), f.reason));
    }
    out
}
