//! Integration tests for the gitscm binary.
//!
//! These tests run the CLI against a real upstream repository and a project
//! file written to a temporary directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command as StdCommand;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a command for running gitscm with identity variables cleared.
fn gitscm() -> Command {
    let mut cmd = Command::cargo_bin("gitscm").unwrap();
    for var in [
        "GIT_AUTHOR_NAME",
        "GIT_AUTHOR_EMAIL",
        "GIT_COMMITTER_NAME",
        "GIT_COMMITTER_EMAIL",
        "GITSCM_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn run_git(dir: &Path, args: &[&str]) -> String {
    let output = StdCommand::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "Test User")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "Test User")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .output()
        .expect("git command failed");
    if !output.status.success() {
        panic!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    String::from_utf8(output.stdout).unwrap().trim().to_string()
}

/// Upstream with one commit on master, plus a project directory.
struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        run_git(dir.path(), &["init", "--bare", "remote.git"]);
        run_git(dir.path(), &["init", "dev"]);
        let fixture = Self { dir };

        let dev = fixture.dev();
        run_git(&dev, &["symbolic-ref", "HEAD", "refs/heads/master"]);
        run_git(&dev, &["remote", "add", "origin", &fixture.url()]);
        fixture.commit("a");
        fixture
    }

    fn dev(&self) -> PathBuf {
        self.dir.path().join("dev")
    }

    fn url(&self) -> String {
        self.dir.path().join("remote.git").display().to_string()
    }

    fn commit(&self, name: &str) -> String {
        let dev = self.dev();
        fs::write(dev.join(name), name).unwrap();
        run_git(&dev, &["add", name]);
        run_git(&dev, &["commit", "--quiet", "-m", name]);
        run_git(&dev, &["push", "--quiet", "origin", "HEAD:refs/heads/master"]);
        run_git(&dev, &["rev-parse", "HEAD"])
    }

    /// Write the project file and return its path.
    fn config(&self, extra: &str) -> PathBuf {
        let path = self.dir.path().join("gitscm.toml");
        let contents = format!(
            "[repository]\nurl = \"{}\"\n\n[branches]\ninclude = \"master\"\n\n\
             [workspace]\nroot = \"project\"\n\n{extra}",
            self.url()
        );
        fs::write(&path, contents).unwrap();
        path
    }
}

fn json(output: &[u8]) -> serde_json::Value {
    serde_json::from_slice(output).expect("stdout is not JSON")
}

#[test]
fn help_flag_works() {
    gitscm()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("poll"))
        .stdout(predicate::str::contains("publish"));
}

#[test]
fn version_flag_works() {
    gitscm()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("gitscm"));
}

#[test]
fn missing_config_fails() {
    let dir = TempDir::new().unwrap();
    gitscm()
        .args(["--config", &dir.path().join("absent.toml").display().to_string(), "poll"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("absent.toml"));
}

#[test]
fn publish_without_identity_is_rejected() {
    let fixture = Fixture::new();
    let config = fixture.config("[publish]\nmerge_target = \"integrate\"\n");
    gitscm()
        .args(["--config", &config.display().to_string(), "poll"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("identity"));
}

#[test]
fn publish_identity_may_come_from_environment() {
    let fixture = Fixture::new();
    let config = fixture.config("[publish]\nmerge_target = \"integrate\"\n");
    gitscm()
        .args(["--config", &config.display().to_string(), "poll"])
        .env("GIT_AUTHOR_NAME", "CI")
        .env("GIT_AUTHOR_EMAIL", "ci@example.com")
        .assert()
        .success();
}

#[test]
fn poll_before_first_build_reports_no_changes() {
    let fixture = Fixture::new();
    let config = fixture.config("");
    let output = gitscm()
        .args(["--config", &config.display().to_string(), "poll"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(json(&output.stdout)["has_changes"], false);
}

#[test]
fn checkout_record_poll_cycle() {
    let fixture = Fixture::new();
    let config = fixture.config("");
    let config = config.display().to_string();

    let output = gitscm()
        .args(["--config", &config, "checkout"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let report = json(&output.stdout);
    assert_eq!(report["candidate"]["ref"], "refs/heads/master");
    let revision = report["candidate"]["revision"].as_str().unwrap().to_string();
    assert_eq!(report["culprits"][0]["email"], "test@example.com");

    // Nothing recorded yet, so the change is still outstanding.
    let output = gitscm().args(["--config", &config, "poll"]).output().unwrap();
    assert_eq!(json(&output.stdout)["has_changes"], true);

    gitscm()
        .args([
            "--config",
            &config,
            "record",
            "--ref",
            "master",
            "--revision",
            &revision,
            "--build-number",
            "1",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"recorded\": true"));

    let output = gitscm().args(["--config", &config, "poll"]).output().unwrap();
    assert_eq!(json(&output.stdout)["has_changes"], false);

    let next = fixture.commit("b");
    let output = gitscm().args(["--config", &config, "poll"]).output().unwrap();
    let result = json(&output.stdout);
    assert_eq!(result["has_changes"], true);
    assert_eq!(result["candidate_revision"], next.as_str());

    gitscm()
        .args(["--config", &config, "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("refs/heads/master"))
        .stdout(predicate::str::contains(revision.as_str()));
}

#[test]
fn failed_record_changes_nothing() {
    let fixture = Fixture::new();
    let config = fixture.config("");
    let config = config.display().to_string();
    let revision = run_git(&fixture.dev(), &["rev-parse", "HEAD"]);

    gitscm().args(["--config", &config, "checkout"]).assert().success();
    gitscm()
        .args([
            "--config",
            &config,
            "record",
            "--ref",
            "refs/heads/master",
            "--revision",
            &revision,
            "--build-number",
            "1",
            "--failed",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"recorded\": false"));

    let output = gitscm().args(["--config", &config, "poll"]).output().unwrap();
    assert_eq!(json(&output.stdout)["has_changes"], true);
}

#[test]
fn publish_pushes_workspace_head() {
    let fixture = Fixture::new();
    let config = fixture.config(
        "[publish]\nmerge_target = \"integrate\"\n\n[identity]\nname = \"CI\"\nemail = \"ci@example.com\"\n",
    );
    let config = config.display().to_string();
    let revision = run_git(&fixture.dev(), &["rev-parse", "HEAD"]);

    gitscm().args(["--config", &config, "checkout"]).assert().success();
    let output = gitscm()
        .args([
            "--config",
            &config,
            "publish",
            "--ref",
            "master",
            "--revision",
            &revision,
            "--build-number",
            "1",
        ])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let outcome = json(&output.stdout);
    assert_eq!(outcome["result"], "created");
    assert_eq!(outcome["revision"], revision.as_str());

    let tip = run_git(
        &fixture.dir.path().join("remote.git"),
        &["rev-parse", "refs/heads/integrate"],
    );
    assert_eq!(tip, revision);
}

#[test]
fn json_logs_go_to_stderr() {
    let fixture = Fixture::new();
    let config = fixture.config("");
    let output = gitscm()
        .args([
            "--config",
            &config.display().to_string(),
            "--log-format",
            "json",
            "checkout",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    json(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let first = stderr.lines().next().expect("no log output");
    let line: serde_json::Value = serde_json::from_str(first).unwrap();
    assert_eq!(line["level"], "INFO");
}
