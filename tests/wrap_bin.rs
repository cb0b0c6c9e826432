//! Integration tests that lock main-binary startup behavior and the
//! non-tty passthrough path.

use std::io::Write;
use std::process::{Command, Stdio};

fn rlwrap() -> Command {
    Command::new(env!("CARGO_BIN_EXE_rlwrap"))
}

#[test]
fn version_flag_prints_version_and_exits_zero() {
    let output = rlwrap().arg("--version").output().expect("run rlwrap");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("rlwrap "));
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn help_flag_documents_the_options() {
    let output = rlwrap().arg("--help").output().expect("run rlwrap");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--always-readline"));
    assert!(stdout.contains("--history-filename"));
    assert!(stdout.contains("--multi-line"));
}

#[test]
fn missing_command_is_an_error() {
    let output = rlwrap().output().expect("run rlwrap");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error:"));
}

#[test]
fn bad_duplicate_policy_is_rejected() {
    let output = rlwrap()
        .args(["-D", "3", "cat"])
        .output()
        .expect("run rlwrap");
    assert!(!output.status.success());
}

#[test]
fn non_tty_stdin_execs_the_command_directly() {
    let mut child = rlwrap()
        .arg("cat")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("spawn rlwrap cat");
    child
        .stdin
        .take()
        .expect("stdin handle")
        .write_all(b"passthrough\n")
        .expect("write to child");
    let output = child.wait_with_output().expect("wait for child");
    assert!(output.status.success());
    assert_eq!(output.stdout, b"passthrough\n");
}

#[test]
fn non_tty_passthrough_mirrors_the_exit_status() {
    let status = rlwrap()
        .args(["sh", "-c", "exit 3"])
        .stdin(Stdio::null())
        .status()
        .expect("run rlwrap sh");
    assert_eq!(status.code(), Some(3));
}

#[test]
fn unexecutable_command_reports_an_error() {
    let output = rlwrap()
        .arg("definitely-not-a-real-command-xyzzy")
        .stdin(Stdio::null())
        .output()
        .expect("run rlwrap");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cannot execute"));
}
