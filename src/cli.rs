use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Transactional project scaffolding engine.
#[derive(Parser)]
#[command(name = "stamp", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print JSON Schema for generation configs.
    Schema,
    /// Generate a new project from a template.
    New(NewArgs),
    /// Undo a crashed or abandoned run using its transaction journal.
    Undo(UndoArgs),
}

#[derive(Args)]
pub struct NewArgs {
    /// Project name.
    pub name: String,

    /// Template identifier.
    #[arg(long, required = true)]
    pub template: String,

    /// Directory holding template definitions.
    #[arg(long, required = true)]
    pub templates_dir: PathBuf,

    /// Target directory. Defaults to ./<name>.
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Framework flavor, when the template distinguishes one.
    #[arg(long)]
    pub framework: Option<String>,

    /// Feature module to enable (repeatable).
    #[arg(long = "module")]
    pub modules: Vec<String>,

    /// Template variable as key=value (repeatable).
    #[arg(long = "var")]
    pub variables: Vec<String>,

    /// Package manager for dependency installation.
    #[arg(long, default_value = "npm")]
    pub package_manager: String,

    /// Skip dependency installation.
    #[arg(long)]
    pub skip_install: bool,

    /// Skip VCS initialization.
    #[arg(long)]
    pub skip_git: bool,

    /// Allow generating over an existing directory.
    #[arg(long)]
    pub overwrite: bool,

    /// With --overwrite, move the existing directory aside instead of
    /// deleting it.
    #[arg(long)]
    pub backup: bool,

    /// Report intended actions without writing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Output structured JSON events to stdout.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct UndoArgs {
    /// Path to a transaction journal file.
    #[arg(long, required = true)]
    pub journal: PathBuf,

    /// Output structured JSON to stdout.
    #[arg(long)]
    pub json: bool,

    /// Simulate the undo without touching the filesystem.
    #[arg(long)]
    pub dry_run: bool,
}
