use stamp::error::{Error, Result};
use stamp::events::Event;
use stamp::model::{GenerationConfig, GenerationOptions, Manifest, MANIFEST_FILE};
use stamp::pipeline::{GenerationPipeline, VcsOutcome};
use stamp::reporter::Progress;
use stamp::runner::{CommandOutput, CommandRunner};
use stamp::template::{RenderedFile, TemplateInfo, TemplateProvider};
use stamp::txlog::TransactionLog;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

/// In-memory template provider.
struct MemProvider {
    info: TemplateInfo,
    files: Vec<RenderedFile>,
}

impl MemProvider {
    fn new(id: &str, files: &[(&str, &str)]) -> Self {
        Self {
            info: TemplateInfo {
                id: id.to_string(),
                name: id.to_string(),
                kind: None,
                framework: None,
                required_variables: vec![],
                system_requirements: vec![],
            },
            files: files
                .iter()
                .map(|(path, content)| RenderedFile {
                    path: PathBuf::from(path),
                    content: content.to_string(),
                })
                .collect(),
        }
    }
}

impl TemplateProvider for MemProvider {
    fn get_template(&self, id: &str) -> Result<TemplateInfo> {
        if id == self.info.id {
            Ok(self.info.clone())
        } else {
            Err(Error::TemplateNotFound(id.to_string()))
        }
    }

    fn generate_files(&self, _config: &GenerationConfig) -> Result<Vec<RenderedFile>> {
        Ok(self.files.clone())
    }
}

/// Runner that replays scripted exit codes per "command firstarg" key and
/// records every invocation.
#[derive(Default)]
struct ScriptedRunner {
    responses: RefCell<HashMap<String, VecDeque<i32>>>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedRunner {
    fn script(&self, key: &str, codes: &[i32]) {
        self.responses
            .borrow_mut()
            .insert(key.to_string(), codes.iter().copied().collect());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn next_code(&self, command: &str, args: &[&str]) -> i32 {
        let key = match args.first() {
            Some(first) => format!("{command} {first}"),
            None => command.to_string(),
        };
        self.calls.borrow_mut().push(key.clone());
        self.responses
            .borrow_mut()
            .get_mut(&key)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(0)
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, command: &str, args: &[&str], _cwd: Option<&Path>) -> Result<i32> {
        Ok(self.next_code(command, args))
    }

    fn capture(&self, command: &str, args: &[&str], _cwd: Option<&Path>) -> Result<CommandOutput> {
        let code = self.next_code(command, args);
        Ok(CommandOutput {
            code,
            stdout: String::new(),
            stderr: if code == 0 {
                String::new()
            } else {
                "simulated failure".to_string()
            },
        })
    }
}

/// Progress spy sharing its event list with the test body.
#[derive(Clone, Default)]
struct Spy {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Spy {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl Progress for Spy {
    fn record(&mut self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

fn config(output: &Path) -> GenerationConfig {
    GenerationConfig {
        project_name: "demo".to_string(),
        template: "basic".to_string(),
        framework: None,
        modules: vec!["auth".to_string()],
        variables: BTreeMap::new(),
        output: output.to_path_buf(),
        package_manager: "npm".to_string(),
        skip_install: true,
        skip_git: true,
    }
}

fn options() -> GenerationOptions {
    GenerationOptions {
        progress: true,
        ..Default::default()
    }
}

#[test]
fn happy_path_generates_and_commits() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("demo");
    let provider = MemProvider::new(
        "basic",
        &[
            ("README.md", "# demo"),
            ("src/index.js", "console.log('hi')"),
        ],
    );
    let runner = ScriptedRunner::default();
    let log = TransactionLog::with_backup_root(&dir.path().join("backups")).unwrap();
    let spy = Spy::default();

    let mut pipeline = GenerationPipeline::new(
        config(&output),
        options(),
        &log,
        &provider,
        &runner,
        Box::new(spy.clone()),
    );
    pipeline.run().unwrap();

    assert_eq!(fs::read_to_string(output.join("README.md")).unwrap(), "# demo");
    assert!(output.join("src/index.js").exists());
    assert_eq!(log.active_transactions(), 0);

    let manifest: Manifest =
        serde_json::from_str(&fs::read_to_string(output.join(MANIFEST_FILE)).unwrap()).unwrap();
    assert_eq!(manifest.project, "demo");
    assert_eq!(manifest.template, "basic");
    assert_eq!(manifest.modules, vec!["auth".to_string()]);

    assert!(spy
        .events()
        .iter()
        .any(|e| matches!(e, Event::GenerationCompleted { files: 2, .. })));
}

#[test]
fn existing_directory_without_overwrite_is_refused_before_any_recording() {
    // Scenario B: DirectoryExists is raised and no transaction was opened.
    let dir = tempdir().unwrap();
    let output = dir.path().join("demo");
    fs::create_dir(&output).unwrap();
    fs::write(output.join("precious.txt"), "keep me").unwrap();

    let provider = MemProvider::new("basic", &[("README.md", "# demo")]);
    let runner = ScriptedRunner::default();
    let log = TransactionLog::with_backup_root(&dir.path().join("backups")).unwrap();

    let mut pipeline = GenerationPipeline::new(
        config(&output),
        options(),
        &log,
        &provider,
        &runner,
        Box::new(Spy::default()),
    );
    let err = pipeline.run().unwrap_err();
    assert!(matches!(err, Error::DirectoryExists(_)));
    assert_eq!(log.active_transactions(), 0);
    assert!(output.join("precious.txt").exists());
}

#[test]
fn mid_batch_failure_rolls_back_files_and_directory() {
    // Scenario C: the fourth file cannot be written because the third
    // occupies its parent path; everything written so far plus the
    // prepared directory is undone.
    let dir = tempdir().unwrap();
    let output = dir.path().join("demo");
    let provider = MemProvider::new(
        "basic",
        &[
            ("one.txt", "1"),
            ("two.txt", "2"),
            ("collide", "3"),
            ("collide/trapped.txt", "4"),
            ("five.txt", "5"),
        ],
    );
    let runner = ScriptedRunner::default();
    let log = TransactionLog::with_backup_root(&dir.path().join("backups")).unwrap();

    let mut pipeline = GenerationPipeline::new(
        config(&output),
        options(),
        &log,
        &provider,
        &runner,
        Box::new(Spy::default()),
    );
    let err = pipeline.run().unwrap_err();
    assert!(matches!(err, Error::Filesystem { .. }), "got {err}");
    assert!(!output.exists(), "rollback must remove the prepared directory");
    assert_eq!(log.active_transactions(), 0);
}

#[test]
fn install_failure_surfaces_after_retries_and_keeps_files() {
    // Scenario D: three consecutive install failures raise
    // DependencyInstall; generated files stay on disk.
    let dir = tempdir().unwrap();
    let output = dir.path().join("demo");
    let provider = MemProvider::new("basic", &[("package.json", "{}")]);
    let runner = ScriptedRunner::default();
    runner.script("npm install", &[1, 1, 1]);
    let log = TransactionLog::with_backup_root(&dir.path().join("backups")).unwrap();
    let spy = Spy::default();

    let mut cfg = config(&output);
    cfg.skip_install = false;
    let mut pipeline = GenerationPipeline::new(
        cfg,
        options(),
        &log,
        &provider,
        &runner,
        Box::new(spy.clone()),
    );
    let err = pipeline.run().unwrap_err();
    match err {
        Error::DependencyInstall {
            manager, attempts, ..
        } => {
            assert_eq!(manager, "npm");
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other}"),
    }

    let installs = runner
        .calls()
        .iter()
        .filter(|c| c.as_str() == "npm install")
        .count();
    assert_eq!(installs, 3);
    assert!(output.join("package.json").exists(), "no auto-rollback here");
    assert_eq!(log.active_transactions(), 1, "transaction stays open");

    let retries = spy
        .events()
        .iter()
        .filter(|e| matches!(e, Event::InstallAttemptFailed { .. }))
        .count();
    assert_eq!(retries, 3);

    // The caller decides: explicit rollback removes the generated files.
    pipeline.rollback().unwrap();
    assert!(!output.exists());
}

#[test]
fn vcs_failures_degrade_without_failing_the_run() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("demo");
    let provider = MemProvider::new("basic", &[("README.md", "# demo")]);
    let runner = ScriptedRunner::default();
    // git is present but init fails.
    runner.script("git init", &[128]);
    let log = TransactionLog::with_backup_root(&dir.path().join("backups")).unwrap();
    let spy = Spy::default();

    let mut cfg = config(&output);
    cfg.skip_git = false;
    let mut pipeline = GenerationPipeline::new(
        cfg,
        options(),
        &log,
        &provider,
        &runner,
        Box::new(spy.clone()),
    );
    pipeline.run().unwrap();

    assert!(output.join("README.md").exists());
    assert!(output.join(MANIFEST_FILE).exists());
    assert!(spy
        .events()
        .iter()
        .any(|e| matches!(e, Event::VcsDegraded { .. })));
}

#[test]
fn vcs_runs_init_add_commit_in_order() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("demo");
    let provider = MemProvider::new("basic", &[("README.md", "# demo")]);
    let runner = ScriptedRunner::default();
    let log = TransactionLog::with_backup_root(&dir.path().join("backups")).unwrap();

    let mut cfg = config(&output);
    cfg.skip_git = false;
    let mut pipeline = GenerationPipeline::new(
        cfg,
        options(),
        &log,
        &provider,
        &runner,
        Box::new(Spy::default()),
    );
    pipeline.validate_configuration().unwrap();
    pipeline.prepare_directory().unwrap();
    pipeline.generate_files().unwrap();
    assert_eq!(pipeline.initialize_vcs(), VcsOutcome::Initialized);

    let git_calls: Vec<_> = runner
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("git"))
        .collect();
    assert_eq!(
        git_calls,
        vec!["git --version", "git init", "git add", "git commit"]
    );
}

#[test]
fn dry_run_reports_paths_and_touches_nothing() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("demo");
    let provider = MemProvider::new("basic", &[("README.md", "# demo"), ("a/b.txt", "x")]);
    let runner = ScriptedRunner::default();
    let log = TransactionLog::with_backup_root(&dir.path().join("backups")).unwrap();
    let spy = Spy::default();

    let mut opts = options();
    opts.dry_run = true;
    let mut pipeline = GenerationPipeline::new(
        config(&output),
        opts,
        &log,
        &provider,
        &runner,
        Box::new(spy.clone()),
    );
    pipeline.run().unwrap();

    assert!(!output.exists());
    assert_eq!(log.active_transactions(), 0);
    let planned = spy
        .events()
        .iter()
        .filter(|e| matches!(e, Event::FilePlanned { .. }))
        .count();
    // Target directory, two files, manifest.
    assert_eq!(planned, 4);
}

#[test]
fn overwrite_with_backup_moves_existing_directory_aside_and_restores_on_rollback() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("demo");
    fs::create_dir(&output).unwrap();
    fs::write(output.join("old.txt"), "previous project").unwrap();

    // The colliding fourth file forces a mid-run failure after the old
    // directory was moved aside.
    let provider = MemProvider::new(
        "basic",
        &[("collide", "x"), ("collide/trapped.txt", "y")],
    );
    let runner = ScriptedRunner::default();
    let log = TransactionLog::with_backup_root(&dir.path().join("backups")).unwrap();

    let mut opts = options();
    opts.overwrite = true;
    opts.backup = true;
    let mut pipeline = GenerationPipeline::new(
        config(&output),
        opts,
        &log,
        &provider,
        &runner,
        Box::new(Spy::default()),
    );
    pipeline.run().unwrap_err();

    // The original directory is back where it was.
    assert_eq!(
        fs::read_to_string(output.join("old.txt")).unwrap(),
        "previous project"
    );
}

#[test]
fn unknown_template_fails_validation_with_no_rollback() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("demo");
    let provider = MemProvider::new("basic", &[]);
    let runner = ScriptedRunner::default();
    let log = TransactionLog::with_backup_root(&dir.path().join("backups")).unwrap();

    let mut cfg = config(&output);
    cfg.template = "missing".to_string();
    let mut pipeline = GenerationPipeline::new(
        cfg,
        options(),
        &log,
        &provider,
        &runner,
        Box::new(Spy::default()),
    );
    let err = pipeline.run().unwrap_err();
    assert!(matches!(err, Error::TemplateNotFound(_)));
    assert_eq!(log.active_transactions(), 0);
    assert!(!output.exists());
}
