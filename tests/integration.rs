//! End-to-end CLI tests against the `qmd` binary, covering the scenarios in
//! SPEC_FULL.md §8: empty index, first ingest, re-ingest unchanged, editing a
//! file, and the exit-code contract of §7.

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

fn qmd_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // test binary name
    path.pop(); // deps/
    path.push("qmd");
    path
}

struct TestEnv {
    _tmp: TempDir,
    root: PathBuf,
}

fn setup() -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    fs::create_dir_all(root.join("notes")).unwrap();
    TestEnv { _tmp: tmp, root }
}

impl TestEnv {
    fn write_note(&self, name: &str, body: &str) {
        fs::write(self.root.join("notes").join(name), body).unwrap();
    }

    fn run(&self, args: &[&str]) -> (String, String, i32) {
        let output = Command::new(qmd_binary())
            .current_dir(&self.root)
            .env("QMD_CACHE_DIR", self.root.join(".cache"))
            .env("QMD_LLM_PROVIDER", "local")
            .args(args)
            .output()
            .unwrap_or_else(|e| panic!("failed to run qmd binary: {}", e));
        (
            String::from_utf8_lossy(&output.stdout).to_string(),
            String::from_utf8_lossy(&output.stderr).to_string(),
            output.status.code().unwrap_or(-1),
        )
    }
}

#[test]
fn scenario_1_empty_index_status() {
    let env = setup();
    let (_, _, code) = env.run(&["init"]);
    assert_eq!(code, 0);

    let (stdout, _, code) = env.run(&["status"]);
    assert_eq!(code, 0);
    assert!(stdout.contains('0'), "empty index should report zero documents: {}", stdout);
}

#[test]
fn scenario_2_ingest_one_file_then_search() {
    let env = setup();
    env.write_note("alpha.md", "# Alpha\n\nNotes about deploying the service to staging.\n");
    env.run(&["init"]);

    let (stdout, stderr, code) = env.run(&["add", "notes/*.md"]);
    assert_eq!(code, 0, "add failed: {}", stderr);
    assert!(stdout.contains("1 indexed"), "expected one indexed document, got: {}", stdout);

    let (stdout, _, code) = env.run(&["search", "deploying"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("alpha.md"), "expected alpha.md in lexical search results: {}", stdout);
}

#[test]
fn scenario_3_reingest_unchanged_file_reports_unchanged() {
    let env = setup();
    env.write_note("alpha.md", "# Alpha\n\ncontent\n");
    env.run(&["init"]);
    env.run(&["add", "notes/*.md"]);

    let (stdout, _, code) = env.run(&["add", "notes/*.md"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("1 unchanged"), "expected the file to be reported unchanged: {}", stdout);
    assert!(stdout.contains("0 indexed"));
}

#[test]
fn scenario_4_editing_a_file_reports_updated() {
    let env = setup();
    env.write_note("alpha.md", "# Alpha\n\noriginal content\n");
    env.run(&["init"]);
    env.run(&["add", "notes/*.md"]);

    env.write_note("alpha.md", "# Alpha\n\nedited content about deployment\n");
    let (stdout, _, code) = env.run(&["add", "notes/*.md"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("1 updated"), "expected the edited file to be reported updated: {}", stdout);
}

#[test]
fn scenario_5_get_document_by_path() {
    let env = setup();
    env.write_note("alpha.md", "# Alpha\n\nline two\nline three\n");
    env.run(&["init"]);
    env.run(&["add", "notes/*.md"]);

    let (stdout, stderr, code) = env.run(&["get", "alpha.md"]);
    assert_eq!(code, 0, "get failed: {}", stderr);
    assert!(stdout.contains("Alpha"));
    assert!(stdout.contains("line two"));
}

#[test]
fn scenario_6_get_missing_document_reports_usage_error() {
    let env = setup();
    env.run(&["init"]);

    let (_, stderr, code) = env.run(&["get", "does-not-exist.md"]);
    assert_eq!(code, 1, "missing document should exit 1 (recoverable), got stderr: {}", stderr);
    assert!(stderr.contains("no document matches"));
}

#[test]
fn scenario_7_shell_expanded_glob_is_rejected_with_usage_exit_code() {
    let env = setup();
    env.write_note("alpha.md", "one\n");
    env.write_note("beta.md", "two\n");
    env.run(&["init"]);

    // Simulate the shell having already expanded `notes/*.md` into two args.
    let (_, stderr, code) = env.run(&["add", "notes/alpha.md", "notes/beta.md"]);
    assert_eq!(code, 2, "shell-expanded glob should exit 2 (usage error), got stderr: {}", stderr);
}

#[test]
fn scenario_8_removed_file_is_deactivated_on_reingest() {
    let env = setup();
    env.write_note("alpha.md", "one\n");
    env.write_note("beta.md", "two\n");
    env.run(&["init"]);
    env.run(&["add", "notes/*.md"]);

    fs::remove_file(env.root.join("notes").join("beta.md")).unwrap();
    let (stdout, _, code) = env.run(&["add", "notes/*.md"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("1 removed"), "expected the deleted file to be reported removed: {}", stdout);
}

#[test]
fn scenario_9_status_reports_pending_embeddings_before_embed_runs() {
    let env = setup();
    env.write_note("alpha.md", "one\n");
    env.run(&["init"]);
    env.run(&["add", "notes/*.md"]);

    let (stdout, _, code) = env.run(&["status"]);
    assert_eq!(code, 0);
    assert!(stdout.to_lowercase().contains("embed"), "status should mention embedding progress: {}", stdout);
}

#[test]
fn scenario_10_cleanup_reports_zero_within_retention_window() {
    let env = setup();
    env.write_note("alpha.md", "one\n");
    env.run(&["init"]);
    env.run(&["add", "notes/*.md"]);

    let (stdout, _, code) = env.run(&["cleanup"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("removed 0"), "nothing should be old enough to hard-delete yet: {}", stdout);
}
