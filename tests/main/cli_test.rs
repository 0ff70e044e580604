//! CLI contract tests.

use std::fs;
use std::path::PathBuf;

fn main_source() -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/main.rs");
    match fs::read_to_string(&path) {
        Ok(source) => source,
        Err(err) => panic!("main source should load from {}: {err}", path.display()),
    }
}

#[test]
fn main_keeps_legacy_flag_spellings() {
    let source = main_source();
    for flag in [
        "\"mailfrom\"",
        "\"mailto\"",
        "\"sentrydsn\"",
        "\"statsdaddress\"",
        "\"austerityfile\"",
        "\"statstags\"",
        "\"independenttags\"",
        "\"cleveltags\"",
    ] {
        assert!(source.contains(flag), "missing flag {flag}");
    }
}

#[test]
fn version_banner() {
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_unilog"))
        .arg("--version")
        .output()
        .expect("binary should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("This is unilog v{}", unilog::VERSION));
}

#[test]
fn destination_is_required() {
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_unilog"))
        .output()
        .expect("binary should run");
    assert!(!output.status.success());
}

#[test]
fn copies_stdin_to_the_destination() {
    use std::io::Write;
    use std::process::Stdio;

    let tmp = tempfile::tempdir().expect("should create temp dir");
    let dst = tmp.path().join("out.log");

    let mut child = std::process::Command::new(env!("CARGO_BIN_EXE_unilog"))
        .args(["--omit-timestamps", "--statsdaddress", "127.0.0.1:9"])
        .arg(&dst)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("binary should start");
    child
        .stdin
        .take()
        .expect("piped stdin")
        .write_all(b"one\ntwo\n")
        .expect("should write");
    let status = child.wait().expect("binary should exit");

    assert!(status.success());
    assert_eq!(fs::read_to_string(&dst).expect("output"), "one\ntwo\n");
}
