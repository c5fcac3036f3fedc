use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

fn ragserve_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_ragserve"))
}

/// Config with embeddings disabled and an endpoint nothing listens on.
fn setup_test_env(extra: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_content = format!(
        r#"[client]
endpoint = "http://127.0.0.1:9/llm/"

[cache]
root = "{}/cache"

[embedding]
provider = "disabled"
{}
"#,
        root.display(),
        extra
    );
    let config_path = root.join("ragserve.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run(config_path: &Path, args: &[&str], stdin: &str) -> (String, String, bool) {
    let binary = ragserve_binary();
    let mut child = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap_or_else(|e| panic!("Failed to run ragserve binary at {:?}: {}", binary, e));

    child
        .stdin
        .take()
        .unwrap()
        .write_all(stdin.as_bytes())
        .unwrap();
    let output = child.wait_with_output().unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_help_lists_commands() {
    let output = Command::new(ragserve_binary())
        .arg("--help")
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("serve"));
    assert!(stdout.contains("chat"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let (_tmp, config) = setup_test_env("[chunking]\nchunk_size = 10\nchunk_overlap = 20\n");
    let (_, stderr, success) = run(&config, &["serve"], "");
    assert!(!success);
    assert!(stderr.contains("chunk_overlap"), "stderr: {}", stderr);
}

#[test]
fn test_unknown_model_provider_is_rejected() {
    let (_tmp, config) = setup_test_env("[model]\nprovider = \"mystery\"\n");
    let (_, stderr, success) = run(&config, &["serve"], "");
    assert!(!success);
    assert!(stderr.contains("Unknown model provider"), "stderr: {}", stderr);
}

#[test]
fn test_chat_greets_and_quits() {
    let (_tmp, config) = setup_test_env("");
    let (stdout, _, success) = run(&config, &["chat"], "/help\n/quit\n");
    assert!(success);
    assert!(stdout.contains("assistant> How can I help you?"));
    assert!(stdout.contains("/upload <path>"));
}

#[test]
fn test_chat_rejects_unsupported_upload() {
    let (tmp, config) = setup_test_env("");
    let sheet = tmp.path().join("sheet.xlsx");
    fs::write(&sheet, b"not really").unwrap();

    let input = format!("/upload {}\n/quit\n", sheet.display());
    let (stdout, _, success) = run(&config, &["chat"], &input);
    assert!(success);
    assert!(stdout.contains("accepted file types are pdf, txt, docx"));
    assert!(!tmp.path().join("cache").join("files").join("sheet.xlsx").exists());
}

#[test]
fn test_unreachable_server_leaves_turn_uncommitted() {
    let (_tmp, config) = setup_test_env("");
    let (stdout, _, success) = run(&config, &["chat"], "hello there\n/history\n");
    assert!(success);
    assert!(stdout.contains("[response incomplete"));
    assert!(stdout.contains("user> hello there"));
    assert_eq!(stdout.matches("assistant> How can I help you?").count(), 2);
}

#[test]
fn test_upload_with_embeddings_disabled_fails_cleanly() {
    let (tmp, config) = setup_test_env("");
    let notes = tmp.path().join("notes.txt");
    fs::write(&notes, "Some notes worth indexing.").unwrap();

    let (stdout, _, success) = run(&config, &["chat", "--file", notes.to_str().unwrap()], "/quit\n");
    assert!(success);
    assert!(stdout.contains("Upload of notes.txt failed"));
}
