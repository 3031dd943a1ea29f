use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};
use tempfile::TempDir;

const SCENARIO: &str = "
parameters:
  x: [1, 2]
  y: [a, b]
";

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let workspace = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        workspace.write(
            "engine.yaml",
            &format!(
                "
executor:
  isolation: process
  threads: 2
  timeout: 5000
  worker: {}
cache:
  kind: sqlite
  path: {}
checkpoint:
  kind: sqlite
  path: {}
",
                env!("CARGO_BIN_EXE_gridlab"),
                workspace.database().display(),
                workspace.database().display()
            ),
        );
        workspace
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn database(&self) -> PathBuf {
        self.path("stores.sqlite")
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn gridlab(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_gridlab"))
            .args(args)
            .current_dir(self.dir.path())
            .env_remove("GRIDLAB_CACHE_PATH")
            .env("RUST_LOG", "info")
            .output()
            .unwrap()
    }

    fn run(&self, matrix: &Path, job: &str, extra: &[&str]) -> Output {
        let matrix = matrix.to_str().unwrap();
        let config = self.path("engine.yaml");
        let mut args = vec!["run", matrix, "--job", job, "--config", config.to_str().unwrap()];
        args.extend_from_slice(extra);

        let output = self.gridlab(&args);
        assert!(
            output.status.success(),
            "gridlab failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        output
    }
}

fn stdout(output: &Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_owned)
        .collect()
}

fn summary(output: &Output) -> String {
    stdout(output).pop().unwrap_or_default()
}

#[test]
fn expands_in_declaration_order() {
    let workspace = Workspace::new();
    let matrix = workspace.write("matrix.yaml", SCENARIO);

    let output = workspace.gridlab(&["plan", matrix.to_str().unwrap()]);

    assert!(output.status.success());
    assert_eq!(
        stdout(&output),
        vec!["{x: 1, y: a}", "{x: 1, y: b}", "{x: 2, y: a}", "{x: 2, y: b}"]
    );
}

#[test]
fn dry_run_leaves_stores_untouched() {
    let workspace = Workspace::new();
    let matrix = workspace.write(
        "matrix.yaml",
        &format!("{SCENARIO}exclude:\n  - {{x: 1, y: a}}\n"),
    );

    let output = workspace.run(&matrix, "echo", &["--dry-run"]);

    assert_eq!(
        stdout(&output),
        vec!["{x: 1, y: b}", "{x: 2, y: a}", "{x: 2, y: b}"]
    );
    assert!(String::from_utf8_lossy(&output.stderr).contains("Exiting due to dry run"));
    assert!(!workspace.database().exists());
}

#[test]
fn second_run_is_fully_cached() {
    let workspace = Workspace::new();
    let matrix = workspace.write("matrix.yaml", SCENARIO);

    let first = workspace.run(&matrix, "echo", &[]);
    let second = workspace.run(&matrix, "echo", &[]);

    assert_eq!(summary(&first), "4/4 succeeded, 0 failed, 0/4 cached");
    assert_eq!(summary(&second), "4/4 succeeded, 0 failed, 4/4 cached");
    assert!(String::from_utf8_lossy(&second.stderr).contains("4/4 results retrieved from cache"));

    // identical values, only the source differs
    let values = |output: &Output| {
        stdout(output)[..4]
            .iter()
            .map(|line| line.split(" (").next().unwrap_or_default().to_owned())
            .collect::<Vec<_>>()
    };
    assert_eq!(values(&first), values(&second));
}

#[test]
fn job_output_does_not_disturb_the_report() {
    let workspace = Workspace::new();
    let matrix = workspace.write("matrix.yaml", "parameters:\n  x: [1, 2]\n");

    let first = workspace.run(&matrix, "chatty", &[]);
    let lines = stdout(&first);

    assert!(lines[0].starts_with("{x: 1} ok 1 (fresh"), "{lines:?}");
    assert!(lines[1].starts_with("{x: 2} ok 2 (fresh"), "{lines:?}");
    assert!(String::from_utf8_lossy(&first.stderr).contains("helper thread saw x = 1"));

    let second = workspace.run(&matrix, "chatty", &[]);
    assert_eq!(summary(&second), "2/2 succeeded, 0 failed, 2/2 cached");
}

#[test]
fn one_failure_does_not_stop_the_batch() {
    let workspace = Workspace::new();
    let matrix = workspace.write(
        "matrix.yaml",
        &format!("{SCENARIO}settings:\n  fail_when: {{x: 2, y: b}}\n"),
    );

    let output = workspace.run(&matrix, "fail-on", &[]);
    let lines = stdout(&output);

    assert_eq!(lines.len(), 5);
    assert!(lines[3].starts_with("{x: 2, y: b} failed: refusing {x: 2, y: b}"));
    assert_eq!(summary(&output), "3/4 succeeded, 1 failed, 0/4 cached");
}

#[test]
fn crashing_worker_is_a_failure() {
    let workspace = Workspace::new();
    let matrix = workspace.write(
        "matrix.yaml",
        "parameters:\n  x: [1, 2, 3]\nsettings:\n  abort_when: {x: 2}\n",
    );

    let output = workspace.run(&matrix, "abort-on", &[]);
    let lines = stdout(&output);

    assert!(lines[1].contains("worker crashed: SIGABRT"), "{lines:?}");
    assert_eq!(summary(&output), "2/3 succeeded, 1 failed, 0/3 cached");
}

#[test]
fn slow_worker_times_out() {
    let workspace = Workspace::new();
    workspace.write(
        "engine.yaml",
        &format!(
            "
executor:
  threads: 2
  timeout: 300
  worker: {}
cache:
  kind: sqlite
  path: {}
checkpoint:
  kind: sqlite
  path: {}
",
            env!("CARGO_BIN_EXE_gridlab"),
            workspace.database().display(),
            workspace.database().display()
        ),
    );
    let matrix = workspace.write("matrix.yaml", "parameters:\n  ms: [10, 10000]\n");

    let output = workspace.run(&matrix, "sleep", &[]);
    let lines = stdout(&output);

    assert!(lines[0].contains(" ok 10 "), "{lines:?}");
    assert!(lines[1].contains("timed out"), "{lines:?}");
}

#[test]
fn checkpoint_survives_a_failed_attempt() {
    let workspace = Workspace::new();
    let interrupted = workspace.write(
        "interrupted.yaml",
        "parameters:\n  x: [4]\nsettings:\n  interrupt: true\n",
    );
    let matrix = workspace.write("matrix.yaml", "parameters:\n  x: [4]\n");

    let first = workspace.run(&interrupted, "checkpointed", &[]);
    assert_eq!(summary(&first), "0/1 succeeded, 1 failed, 0/1 cached");

    let second = workspace.run(&matrix, "checkpointed", &[]);
    assert!(
        stdout(&second)[0].starts_with("{x: 4} ok {resumed: true, value: 41}"),
        "{:?}",
        stdout(&second)
    );
}

#[test]
fn clear_empties_the_cache() {
    let workspace = Workspace::new();
    let matrix = workspace.write("matrix.yaml", SCENARIO);
    let config = workspace.path("engine.yaml");

    workspace.run(&matrix, "echo", &[]);
    let cleared = workspace.gridlab(&["clear", "--config", config.to_str().unwrap()]);
    assert!(cleared.status.success());

    let again = workspace.run(&matrix, "echo", &[]);
    assert_eq!(summary(&again), "4/4 succeeded, 0 failed, 0/4 cached");
}

#[test]
fn setup_errors_fail_the_command() {
    let workspace = Workspace::new();
    let matrix = workspace.write(
        "matrix.yaml",
        &format!("{SCENARIO}exclude:\n  - {{z: 1}}\n"),
    );
    let config = workspace.path("engine.yaml");

    let output = workspace.gridlab(&[
        "run",
        matrix.to_str().unwrap(),
        "--job",
        "echo",
        "--config",
        config.to_str().unwrap(),
    ]);

    assert!(!output.status.success());
    assert!(stdout(&output).is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown parameter `z`"));
}
