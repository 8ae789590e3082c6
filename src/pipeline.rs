use crate::error::{Error, Result};
use crate::events::Event;
use crate::model::{GenerationConfig, GenerationOptions, Manifest, MANIFEST_FILE};
use crate::reporter::Progress;
use crate::runner::CommandRunner;
use crate::template::{TemplateInfo, TemplateProvider};
use crate::txlog::TransactionLog;
use crate::validate;
use bytesize::ByteSize;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// One step of the fixed generation sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validate,
    Prepare,
    Generate,
    Install,
    Vcs,
    Finalize,
}

impl Stage {
    pub fn index(self) -> usize {
        match self {
            Stage::Validate => 0,
            Stage::Prepare => 1,
            Stage::Generate => 2,
            Stage::Install => 3,
            Stage::Vcs => 4,
            Stage::Finalize => 5,
        }
    }
}

/// How VCS initialization ended. Failures never propagate; they degrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VcsOutcome {
    Initialized,
    Skipped(String),
    Degraded(String),
}

const INSTALL_ATTEMPTS: u32 = 3;
const INSTALL_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Fixed sequence of stages that turns a `GenerationConfig` into a project
/// on disk, wrapped in one transaction so the whole run is undoable.
///
/// Stages must be called in order: `validate_configuration`,
/// `prepare_directory`, `generate_files`, `install_dependencies`,
/// `initialize_vcs`, `finalize`; or use [`GenerationPipeline::run`] which
/// drives them and applies the rollback policy.
pub struct GenerationPipeline<'a> {
    config: GenerationConfig,
    options: GenerationOptions,
    log: &'a TransactionLog,
    provider: &'a dyn TemplateProvider,
    runner: &'a dyn CommandRunner,
    progress: Box<dyn Progress + 'a>,
    template: Option<TemplateInfo>,
    output: Option<PathBuf>,
    tx: Option<Uuid>,
    files_written: usize,
    bytes_written: u64,
    started: Instant,
}

impl<'a> GenerationPipeline<'a> {
    pub fn new(
        config: GenerationConfig,
        options: GenerationOptions,
        log: &'a TransactionLog,
        provider: &'a dyn TemplateProvider,
        runner: &'a dyn CommandRunner,
        progress: Box<dyn Progress + 'a>,
    ) -> Self {
        Self {
            config,
            options,
            log,
            provider,
            runner,
            progress,
            template: None,
            output: None,
            tx: None,
            files_written: 0,
            bytes_written: 0,
            started: Instant::now(),
        }
    }

    /// Transaction backing the current run, once one is open.
    pub fn transaction(&self) -> Option<Uuid> {
        self.tx
    }

    /// Template resolved during validation.
    pub fn template(&self) -> Option<&TemplateInfo> {
        self.template.as_ref()
    }

    /// Drive all six stages in order.
    ///
    /// Any stage failure triggers an automatic rollback before the
    /// original error is re-raised, with two exceptions: validation
    /// failures have nothing to roll back, and dependency-install
    /// failures leave the generated files intact so the caller can retry
    /// the install (or invoke [`GenerationPipeline::rollback`] explicitly).
    pub fn run(&mut self) -> Result<()> {
        self.validate_configuration()?;
        if let Err(e) = self.prepare_directory() {
            return self.fail(e);
        }
        if let Err(e) = self.generate_files() {
            return self.fail(e);
        }
        self.install_dependencies()?;
        self.initialize_vcs();
        if let Err(e) = self.finalize() {
            return self.fail(e);
        }
        Ok(())
    }

    /// Resolve the template and check the config against it. Nothing is
    /// mutated yet; there is nothing to roll back on failure.
    pub fn validate_configuration(&mut self) -> Result<()> {
        self.stage_started(Stage::Validate);
        let template = self.provider.get_template(&self.config.template)?;
        let output = validate::validate_config(&self.config, &template)?;
        validate::check_tools(&template.system_requirements, self.runner)?;
        self.template = Some(template);
        self.output = Some(output);
        self.stage_completed(Stage::Validate);
        Ok(())
    }

    /// Open the transaction and bring the target directory into existence,
    /// handling a pre-existing directory per the overwrite/backup options.
    pub fn prepare_directory(&mut self) -> Result<()> {
        self.stage_started(Stage::Prepare);
        let output = self.output()?;

        // Checked before the transaction opens: a refused run records
        // nothing at all.
        if output.exists() && !self.options.overwrite {
            return Err(Error::DirectoryExists(output));
        }

        if self.options.dry_run {
            self.progress.record(Event::FilePlanned {
                path: output.clone(),
            });
            self.stage_completed(Stage::Prepare);
            return Ok(());
        }

        let tx = self.log.start_transaction(
            &format!("generate {}", self.config.project_name),
            &output,
        )?;
        self.tx = Some(tx);

        if output.exists() {
            if self.options.backup {
                let aside = aside_path(&output, tx);
                info!(from = %output.display(), to = %aside.display(), "moving existing directory aside");
                self.log.record_file_move(tx, &output, &aside)?;
            } else {
                // Recorded as a plain delete: irreversible by design.
                warn!(path = %output.display(), "deleting existing directory without backup");
                self.log.record_directory_deletion(tx, &output)?;
            }
        }
        self.log.record_directory_creation(tx, &output)?;
        self.stage_completed(Stage::Prepare);
        Ok(())
    }

    /// Materialize the template's files, each one individually reversible.
    pub fn generate_files(&mut self) -> Result<()> {
        self.stage_started(Stage::Generate);
        let output = self.output()?;
        let files = self.provider.generate_files(&self.config)?;

        if self.options.dry_run {
            for file in &files {
                self.progress.record(Event::FilePlanned {
                    path: output.join(&file.path),
                });
            }
            self.stage_completed(Stage::Generate);
            return Ok(());
        }

        let tx = self.tx()?;
        self.log.create_snapshot(tx, "before file generation")?;
        for file in files {
            let target = output.join(&file.path);
            if target.exists() {
                self.log
                    .record_file_modification(tx, &target, &file.content)?;
            } else {
                self.log.record_file_creation(tx, &target, &file.content)?;
            }
            let bytes = file.content.len() as u64;
            self.files_written += 1;
            self.bytes_written += bytes;
            if self.options.progress {
                self.progress.record(Event::FileWritten {
                    path: target,
                    bytes,
                });
            }
        }
        self.stage_completed(Stage::Generate);
        Ok(())
    }

    /// Install dependencies with the configured package manager, retrying
    /// with exponential backoff.
    ///
    /// Failures here do not roll back generated files; re-running the
    /// install later is cheaper than regenerating the project.
    pub fn install_dependencies(&mut self) -> Result<()> {
        if self.config.skip_install {
            self.stage_skipped(Stage::Install, "skip-install set");
            return Ok(());
        }
        if self.options.dry_run {
            self.stage_skipped(Stage::Install, "dry run");
            return Ok(());
        }
        self.stage_started(Stage::Install);
        let output = self.output()?;
        let manager = self.config.package_manager.clone();
        let args = validate::install_args(&manager)
            .ok_or_else(|| Error::Validation(format!("unknown package manager '{manager}'")))?;

        let mut last_output = String::new();
        for attempt in 1..=INSTALL_ATTEMPTS {
            let result = self.runner.capture(&manager, &args, Some(&output))?;
            if result.success() {
                self.stage_completed(Stage::Install);
                return Ok(());
            }
            last_output = result.diagnostic().to_string();
            let retry_in = (attempt < INSTALL_ATTEMPTS)
                .then(|| INSTALL_BACKOFF_BASE * 2u32.pow(attempt - 1));
            self.progress.record(Event::InstallAttemptFailed {
                attempt,
                max_attempts: INSTALL_ATTEMPTS,
                retry_in: retry_in.map(|d| humantime::format_duration(d).to_string()),
            });
            if let Some(delay) = retry_in {
                warn!(attempt, delay = %humantime::format_duration(delay), "install failed, retrying");
                std::thread::sleep(delay);
            }
        }
        Err(Error::DependencyInstall {
            manager,
            attempts: INSTALL_ATTEMPTS,
            output: last_output,
        })
    }

    /// Initialize a git repository in the generated project.
    ///
    /// Non-critical: every failure is reported as a degraded outcome and
    /// the run continues.
    pub fn initialize_vcs(&mut self) -> VcsOutcome {
        if self.config.skip_git {
            self.stage_skipped(Stage::Vcs, "skip-git set");
            return VcsOutcome::Skipped("skip-git set".to_string());
        }
        if self.options.dry_run {
            self.stage_skipped(Stage::Vcs, "dry run");
            return VcsOutcome::Skipped("dry run".to_string());
        }
        let available = self
            .runner
            .capture("git", &["--version"], None)
            .map(|out| out.success())
            .unwrap_or(false);
        if !available {
            self.stage_skipped(Stage::Vcs, "git not available");
            return VcsOutcome::Skipped("git not available".to_string());
        }

        self.stage_started(Stage::Vcs);
        let output = match self.output() {
            Ok(output) => output,
            Err(e) => return self.vcs_degraded(e.to_string()),
        };
        let steps: [&[&str]; 3] = [
            &["init"],
            &["add", "-A"],
            &["commit", "-m", "Initial commit"],
        ];
        for args in steps {
            match self.runner.run("git", args, Some(&output)) {
                Ok(0) => {}
                Ok(code) => {
                    return self.vcs_degraded(format!("git {} exited with {code}", args[0]));
                }
                Err(e) => {
                    return self.vcs_degraded(format!("git {} failed: {e}", args[0]));
                }
            }
        }
        self.stage_completed(Stage::Vcs);
        VcsOutcome::Initialized
    }

    /// Write the project manifest and commit the transaction. Commit is
    /// the only point at which backups are purged.
    pub fn finalize(&mut self) -> Result<()> {
        self.stage_started(Stage::Finalize);
        let output = self.output()?;
        let manifest = Manifest::from_config(&self.config);
        let manifest_json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| Error::Template(format!("failed to serialize manifest: {e}")))?;

        if self.options.dry_run {
            self.progress.record(Event::FilePlanned {
                path: output.join(MANIFEST_FILE),
            });
            self.stage_completed(Stage::Finalize);
            return Ok(());
        }

        let tx = self.tx()?;
        self.log
            .record_file_creation(tx, &output.join(MANIFEST_FILE), &manifest_json)?;
        self.log.commit_transaction(tx)?;
        self.tx = None;
        self.progress
            .record(Event::TransactionCommitted { transaction: tx });

        let elapsed = round_to_millis(self.started.elapsed());
        let disk_size = fs_extra::dir::get_size(&output).unwrap_or(self.bytes_written);
        info!(
            root = %output.display(),
            files = self.files_written,
            size = %ByteSize(disk_size),
            elapsed = %humantime::format_duration(elapsed),
            "project generated"
        );
        self.progress.record(Event::GenerationCompleted {
            root: output,
            files: self.files_written,
            bytes: self.bytes_written,
            elapsed: humantime::format_duration(elapsed).to_string(),
        });
        self.stage_completed(Stage::Finalize);
        Ok(())
    }

    /// Undo everything the run has recorded so far.
    ///
    /// If the rollback itself fails, the target directory is forcibly
    /// removed as a last resort and the failure is surfaced either way so
    /// the caller can instruct the user on manual cleanup.
    pub fn rollback(&mut self) -> Result<()> {
        self.rollback_inner(None)
    }

    fn fail(&mut self, trigger: Error) -> Result<()> {
        self.rollback_inner(Some(trigger))
    }

    /// Roll back; re-raise `trigger` afterwards when one is given. A
    /// rollback failure is raised instead, carrying the trigger as its
    /// source.
    fn rollback_inner(&mut self, trigger: Option<Error>) -> Result<()> {
        let Some(tx) = self.tx else {
            // Nothing recorded (dry run or failure before prepare).
            return match trigger {
                Some(trigger) => Err(trigger),
                None => Ok(()),
            };
        };
        let completed = self
            .log
            .operations(tx)
            .map(|ops| ops.iter().filter(|op| op.completed).count())
            .unwrap_or(0);
        self.progress.record(Event::RollbackStarted { transaction: tx });
        match self.log.rollback_transaction(tx) {
            Ok(()) => {
                self.progress.record(Event::RollbackCompleted {
                    transaction: tx,
                    undone: completed,
                });
                self.tx = None;
                match trigger {
                    Some(trigger) => Err(trigger),
                    None => Ok(()),
                }
            }
            Err(Error::RollbackFailed { undone, failed, .. }) => {
                warn!(transaction = %tx, "rollback failed, falling back to emergency cleanup");
                if let Ok(output) = self.output()
                    && let Err(e) = self.log.emergency_cleanup(&output)
                {
                    warn!(path = %output.display(), error = %e, "emergency cleanup failed");
                }
                Err(Error::RollbackFailed {
                    undone,
                    failed,
                    trigger: trigger.map(Box::new),
                })
            }
            Err(other) => Err(other),
        }
    }

    fn vcs_degraded(&mut self, reason: String) -> VcsOutcome {
        warn!(reason = %reason, "VCS initialization degraded");
        self.progress.record(Event::VcsDegraded {
            reason: reason.clone(),
        });
        VcsOutcome::Degraded(reason)
    }

    fn output(&self) -> Result<PathBuf> {
        self.output
            .clone()
            .ok_or_else(|| Error::Validation("pipeline stages called out of order".into()))
    }

    fn tx(&self) -> Result<Uuid> {
        self.tx
            .ok_or_else(|| Error::Validation("no transaction open; stages called out of order".into()))
    }

    fn stage_started(&mut self, stage: Stage) {
        self.progress.record(Event::StageStarted {
            stage,
            index: stage.index(),
        });
    }

    fn stage_completed(&mut self, stage: Stage) {
        self.progress.record(Event::StageCompleted {
            stage,
            index: stage.index(),
        });
    }

    fn stage_skipped(&mut self, stage: Stage, reason: &str) {
        self.progress.record(Event::StageSkipped {
            stage,
            index: stage.index(),
            reason: reason.to_string(),
        });
    }
}

fn aside_path(output: &std::path::Path, tx: Uuid) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());
    let short = tx.simple().to_string();
    output.with_file_name(format!("{name}.bak-{}", &short[..8]))
}

fn round_to_millis(d: Duration) -> Duration {
    Duration::from_millis(d.as_millis() as u64)
}
