use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn pth_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_pth"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("disclosure.txt"),
        "The charging pad uses a resonant coil tuned to 6.78 MHz.\n\n\
         A controller monitors coil temperature and reduces output power above 45 degrees.",
    )
    .unwrap();
    fs::write(
        files_dir.join("notes.md"),
        "# Field notes\n\nBattery chemistry in the handset is lithium iron phosphate.",
    )
    .unwrap();
    fs::write(
        files_dir.join("claims.txt"),
        "WIRELESS CHARGING PAD WITH THERMAL CONTROL\n\
         What is claimed is:\n\
         1. A charging pad comprising a resonant coil and a controller.\n\
         2. The charging pad of claim 1, wherein the controller reduces output power.\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
dir = "{}/data"

[chunking]
max_tokens = 200
overlap_tokens = 20

[retrieval]
top_k = 3

[embedding]
provider = "hash"
dims = 256

[llm]
provider = "disabled"

[server]
bind = "127.0.0.1:7341"
"#,
        root.display()
    );

    let config_path = config_dir.join("pth.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn files(config_path: &Path) -> PathBuf {
    config_path.parent().unwrap().parent().unwrap().join("files")
}

fn run_pth(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = pth_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run pth binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_databases() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_pth(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    let data = config_path.parent().unwrap().parent().unwrap().join("data");
    for name in ["memory.sqlite", "claims.sqlite", "sections.sqlite", "index.sqlite"] {
        assert!(data.join(name).exists(), "{} missing", name);
    }
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, first) = run_pth(&config_path, &["init"]);
    assert!(first, "first init failed");
    let (_, _, second) = run_pth(&config_path, &["init"]);
    assert!(second, "second init failed (not idempotent)");
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_pth(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Error"));
}

#[test]
fn test_ingest_and_retrieve() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files(&config_path);
    run_pth(&config_path, &["init"]);

    let (stdout, stderr, success) = run_pth(
        &config_path,
        &[
            "ingest",
            "--primary",
            dir.join("disclosure.txt").to_str().unwrap(),
            "--supplementary",
            dir.join("notes.md").to_str().unwrap(),
        ],
    );
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("failed files: 0"));
    assert!(stdout.contains("ok"));

    let (stdout, _, success) = run_pth(&config_path, &["retrieve", "lithium iron phosphate battery"]);
    assert!(success);
    assert!(stdout.contains("notes.md"), "stdout: {}", stdout);
}

#[test]
fn test_ingest_bad_file_does_not_abort_batch() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files(&config_path);
    fs::write(dir.join("broken.docx"), b"not a zip archive").unwrap();

    let (stdout, stderr, success) = run_pth(
        &config_path,
        &[
            "ingest",
            "--primary",
            dir.join("broken.docx").to_str().unwrap(),
            "--primary",
            dir.join("disclosure.txt").to_str().unwrap(),
        ],
    );
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("FAILED"));
    assert!(stdout.contains("failed files: 1"));
}

#[test]
fn test_ingest_directory() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files(&config_path);
    fs::write(dir.join("ignored.bin"), b"\x00\x01").unwrap();

    let (stdout, _, success) =
        run_pth(&config_path, &["ingest", "--dir", dir.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("disclosure.txt"));
    assert!(stdout.contains("notes.md"));
    assert!(!stdout.contains("ignored.bin"));
}

#[test]
fn test_ingest_claims_and_show() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files(&config_path);

    let (stdout, stderr, success) = run_pth(
        &config_path,
        &["ingest", "--claims", dir.join("claims.txt").to_str().unwrap()],
    );
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("title: WIRELESS CHARGING PAD WITH THERMAL CONTROL"));
    assert!(stdout.contains("claims extracted: 2"));

    let (stdout, _, success) = run_pth(&config_path, &["claims", "show"]);
    assert!(success);
    assert!(stdout.contains("Claims: 2"));
    assert!(stdout.contains("1. A charging pad comprising a resonant coil and a controller."));

    let (stdout, _, success) = run_pth(&config_path, &["retrieve", "--claims", "resonant coil"]);
    assert!(success);
    assert!(stdout.contains("claims.txt"));
}

#[test]
fn test_section_gating_save_and_skip() {
    let (_tmp, config_path) = setup_test_env();
    let root = config_path.parent().unwrap().parent().unwrap().to_path_buf();
    let draft = root.join("background.txt");
    fs::write(
        &draft,
        "Wireless charging pads lose efficiency as the coil heats up during use.\n\n\
         Existing pads do not regulate output power based on coil temperature.",
    )
    .unwrap();

    let (_, stderr, success) = run_pth(&config_path, &["section", "skip", "drawings"]);
    assert!(!success);
    assert!(stderr.contains("locked"), "stderr: {}", stderr);

    let (stdout, stderr, success) = run_pth(
        &config_path,
        &["section", "save", "background", "--file", draft.to_str().unwrap()],
    );
    assert!(success, "save failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("[1]"));
    assert!(stdout.contains("[2]"));
    assert!(stdout.contains("Unlocked: summary"));

    let (_, stderr, success) = run_pth(&config_path, &["section", "skip", "background"]);
    assert!(!success);
    assert!(stderr.contains("cannot be skipped"));

    let (stdout, _, success) = run_pth(&config_path, &["section", "skip", "summary"]);
    assert!(success);
    assert!(stdout.contains("Skipped summary"));

    let (stdout, _, success) = run_pth(&config_path, &["section", "status"]);
    assert!(success);
    assert!(stdout.contains("Next: drawings"), "stdout: {}", stdout);

    let (stdout, _, success) = run_pth(&config_path, &["section", "context", "--full"]);
    assert!(success);
    assert!(stdout.contains("BACKGROUND"));
    assert!(stdout.contains("(SKIPPED - No content generated)"));
    assert!(stdout.contains("[1] Wireless charging pads"));
}

#[test]
fn test_generate_without_model_is_refused() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_pth(
        &config_path,
        &["section", "generate", "background", "--query", "coil heating"],
    );
    assert!(!success);
    assert!(stderr.contains("missing prerequisite"), "stderr: {}", stderr);
}

#[test]
fn test_unknown_section_rejected() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_pth(&config_path, &["section", "show", "abstract"]);
    assert!(!success);
    assert!(stderr.contains("abstract"));
}

#[test]
fn test_memory_history_empty() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_pth(&config_path, &["memory", "history"]);
    assert!(success, "history failed: stdout={}, stderr={}", stdout, stderr);
}
