use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Kind of a recorded filesystem mutation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CreateFile,
    CreateDirectory,
    ModifyFile,
    DeleteFile,
    DeleteDirectory,
    MoveFile,
    CopyFile,
}

/// Extra data an operation needs to be reversed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Original source path of a move; rollback restores the file there.
    MovedFrom { path: PathBuf },
    /// Source path of a copy, kept for diagnostics.
    CopiedFrom { path: PathBuf },
}

/// A single recorded, individually reversible filesystem mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// Unique operation ID.
    pub id: Uuid,
    /// Mutation kind.
    pub kind: OperationKind,
    /// Absolute path affected.
    pub target: PathBuf,
    /// Saved copy of prior content, set for modify/move when a prior file existed.
    pub backup_path: Option<PathBuf>,
    /// Undo data (e.g. original source path for a move).
    pub payload: Option<Payload>,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// True only once the underlying mutation actually succeeded.
    /// Incomplete operations are skipped during rollback.
    pub completed: bool,
}

impl Operation {
    pub fn new(kind: OperationKind, target: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            target,
            backup_path: None,
            payload: None,
            timestamp: Utc::now(),
            completed: false,
        }
    }
}

/// Transaction lifecycle state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Active,
    Committed,
    RolledBack,
}

/// An ordered batch of operations with commit/rollback semantics.
///
/// A transaction is terminated by exactly one of commit or rollback;
/// either call after a terminal transition is an error.
#[derive(Debug)]
pub struct Transaction {
    pub id: Uuid,
    pub description: String,
    /// Directory scope this transaction protects.
    pub root_path: PathBuf,
    pub status: TxStatus,
    /// Operations in append order; rollback walks them in reverse.
    pub operations: Vec<Operation>,
    /// Private backup storage for this transaction.
    pub backup_dir: PathBuf,
}

/// An immutable copy of a transaction's operation list at a point in time.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: Uuid,
    pub description: String,
    /// Owning transaction.
    pub transaction: Uuid,
    /// Captured by value, not by reference.
    pub operations: Vec<Operation>,
    pub taken_at: DateTime<Utc>,
}

/// Everything a generation run needs to know, assembled by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GenerationConfig {
    /// Project name; becomes the `project_name` template variable.
    pub project_name: String,
    /// Template identifier resolved through the template provider.
    pub template: String,
    /// Framework flavor, if the template distinguishes one.
    #[serde(default)]
    pub framework: Option<String>,
    /// Selected feature modules, recorded in the project manifest.
    #[serde(default)]
    pub modules: Vec<String>,
    /// Template variable map.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    /// Absolute output path of the generated project.
    pub output: PathBuf,
    /// Package manager used for dependency installation.
    #[serde(default = "default_package_manager")]
    pub package_manager: String,
    /// Skip the dependency installation stage.
    #[serde(default)]
    pub skip_install: bool,
    /// Skip the VCS initialization stage.
    #[serde(default)]
    pub skip_git: bool,
}

fn default_package_manager() -> String {
    "npm".to_string()
}

/// Behavior switches for a single run; never persisted.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationOptions {
    /// Prompting is handled by the caller; the pipeline only records the flag.
    pub interactive: bool,
    /// Report intended actions without mutating anything or opening a transaction.
    pub dry_run: bool,
    /// Allow generating into an existing directory.
    pub overwrite: bool,
    /// With `overwrite`, move the existing directory aside instead of deleting it.
    pub backup: bool,
    /// Emit per-file progress events.
    pub progress: bool,
}

/// Manifest written into the generated project root on success.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    pub project: String,
    pub template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    pub modules: Vec<String>,
    /// ISO-8601 generation timestamp.
    pub generated_at: DateTime<Utc>,
    pub generator_version: String,
}

/// File name of the manifest inside the generated project.
pub const MANIFEST_FILE: &str = ".stamp.json";

impl Manifest {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            project: config.project_name.clone(),
            template: config.template.clone(),
            framework: config.framework.clone(),
            modules: config.modules.clone(),
            generated_at: Utc::now(),
            generator_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Generate JSON Schema for the GenerationConfig type.
pub fn generate_schema() -> String {
    let schema = schemars::schema_for!(GenerationConfig);
    serde_json::to_string_pretty(&schema).expect("failed to serialize schema")
}
