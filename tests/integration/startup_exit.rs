// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for the `xmtpbridge` binary's startup failure path.
//!
//! These tests validate:
//! - Missing required settings make the process exit non-zero
//! - Every missing setting is named on stderr

use std::process::{Command, Output};

fn run_bridge(envs: &[(&str, &str)]) -> Output {
    let scratch = std::env::temp_dir().join(format!("xmtpbridge-exit-{}", std::process::id()));
    std::fs::create_dir_all(&scratch).unwrap();
    Command::new(env!("CARGO_BIN_EXE_xmtpbridge"))
        .env_clear()
        .envs(envs.iter().copied())
        .current_dir(&scratch)
        .args(["--env-file", "/nonexistent/xmtpbridge/.env"])
        .args(["--config", "/dev/null"])
        .output()
        .expect("failed to spawn xmtpbridge")
}

#[test]
fn missing_settings_exit_non_zero_and_are_listed() {
    let output = run_bridge(&[]);

    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    for key in ["PRIVATE_KEY", "XMTP_DB_ENCRYPTION_KEY", "XMTP_ENV"] {
        assert!(stderr.contains(key), "stderr does not name {key}: {stderr}");
    }
}

#[test]
fn only_absent_settings_are_listed() {
    let output = run_bridge(&[("XMTP_ENV", "local"), ("PRIVATE_KEY", "0x01")]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("XMTP_DB_ENCRYPTION_KEY"), "{stderr}");
    assert!(!stderr.contains("  PRIVATE_KEY"), "{stderr}");
    assert!(!stderr.contains("  XMTP_ENV"), "{stderr}");
}
