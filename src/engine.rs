use crate::cli::{NewArgs, UndoArgs};
use crate::error::Error;
use crate::exit_codes::exit;
use crate::journal;
use crate::model::{GenerationConfig, GenerationOptions, Operation};
use crate::pipeline::GenerationPipeline;
use crate::reporter::Reporter;
use crate::runner::ProcessRunner;
use crate::template::DirProvider;
use crate::txlog::{self, TransactionLog};
use anyhow::{Context, Result};
use std::collections::BTreeMap;

/// Run a full generation from CLI arguments. Returns the process exit code.
pub fn generate(args: NewArgs) -> Result<i32> {
    let variables = parse_variables(&args.variables)?;
    let output = args
        .output
        .unwrap_or_else(|| std::path::PathBuf::from(&args.name));

    let config = GenerationConfig {
        project_name: args.name,
        template: args.template,
        framework: args.framework,
        modules: args.modules,
        variables,
        output,
        package_manager: args.package_manager,
        skip_install: args.skip_install,
        skip_git: args.skip_git,
    };
    let options = GenerationOptions {
        interactive: false,
        dry_run: args.dry_run,
        overwrite: args.overwrite,
        backup: args.backup,
        progress: true,
    };

    let provider = DirProvider::new(&args.templates_dir);
    let runner = ProcessRunner;
    let log = TransactionLog::open().context("failed to create backup storage")?;
    let reporter = Reporter::new(args.json);

    let mut pipeline = GenerationPipeline::new(
        config,
        options,
        &log,
        &provider,
        &runner,
        Box::new(reporter),
    );
    match pipeline.run() {
        Ok(()) => Ok(exit::SUCCESS),
        Err(e) => {
            eprintln!("error: {e}");
            if let Error::RollbackFailed {
                trigger: Some(trigger),
                ..
            } = &e
            {
                eprintln!("caused by: {trigger}");
            }
            Ok(match e {
                Error::Validation(_)
                | Error::TemplateNotFound(_)
                | Error::DirectoryExists(_)
                | Error::UnsupportedToolVersion { .. } => exit::VALIDATION_FAILURE,
                Error::RollbackFailed { .. } => exit::ROLLBACK_FAILURE,
                _ => exit::GENERATION_FAILURE,
            })
        }
    }
}

fn parse_variables(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut variables = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("invalid --var '{pair}', expected key=value"))?;
        variables.insert(key.to_string(), value.to_string());
    }
    Ok(variables)
}

/// Replay a surviving transaction journal in reverse, undoing every
/// operation that completed and was never undone. Crash recovery for runs
/// whose process died mid-transaction.
pub fn undo(args: UndoArgs) -> Result<i32> {
    let entries = journal::read_journal(&args.journal).context("failed to read journal")?;
    let completed = journal::completed_entries(&entries);

    if args.dry_run {
        for entry in completed.iter().rev() {
            println!("would undo {:?} {}", entry.kind, entry.target.display());
        }
        return Ok(exit::SUCCESS);
    }

    let mut writer = journal::JournalWriter::open(args.journal.clone())
        .context("failed to open journal for appending")?;
    let mut failures = 0;
    for entry in completed.iter().rev() {
        let mut op = Operation::new(entry.kind, entry.target.clone());
        op.id = entry.id;
        op.backup_path = entry.backup_path.clone();
        op.payload = entry.payload.clone();
        op.completed = true;
        match txlog::undo_operation(&op) {
            Ok(_) => {
                let undone = journal::JournalEntry {
                    id: entry.id,
                    ts: chrono::Utc::now(),
                    kind: entry.kind,
                    target: entry.target.clone(),
                    backup_path: entry.backup_path.clone(),
                    payload: entry.payload.clone(),
                    status: journal::JournalStatus::Undone,
                };
                writer.write(&undone).context("failed to journal undo")?;
                if args.json {
                    println!("{}", serde_json::to_string(&undone)?);
                }
            }
            Err(e) => {
                eprintln!("could not undo {}: {e}", entry.target.display());
                failures += 1;
            }
        }
    }
    if failures > 0 {
        Ok(exit::ROLLBACK_FAILURE)
    } else {
        Ok(exit::SUCCESS)
    }
}
