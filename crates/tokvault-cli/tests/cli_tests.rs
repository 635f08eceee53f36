//! Integration tests for the `tokvault` CLI binary.
//!
//! These tests run the CLI as a subprocess against a redb file in a temp
//! directory, so every invocation is a separate process sharing only what
//! was persisted.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Write as _;
use std::path::Path;
use std::process::{Command, Stdio};

/// 32 bytes of 0x00..0x1f, hex-encoded.
const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

/// ASCII "12345678901234567890".
const RFC_SECRET: &str = "3132333435363738393031323334353637383930";

fn tokvault_bin() -> String {
    let path = env!("CARGO_BIN_EXE_tokvault");
    assert!(
        Path::new(path).exists(),
        "tokvault binary not found at {path}"
    );
    path.to_owned()
}

/// A command with a clean `TOKVAULT_*` environment pointed at `store`.
fn command(store: &Path) -> Command {
    let mut cmd = Command::new(tokvault_bin());
    for var in [
        "TOKVAULT_ENCRYPTION_KEY",
        "TOKVAULT_CIPHER",
        "TOKVAULT_DEFAULT_TTL_DAYS",
        "TOKVAULT_CONCEAL_REVOKED",
        "TOKVAULT_STORAGE",
        "TOKVAULT_OTP_DIGITS",
        "TOKVAULT_OTP_STEP",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd.env("TOKVAULT_STORAGE", "redb")
        .env("TOKVAULT_STORAGE_PATH", store)
        .env("TOKVAULT_ENCRYPTION_KEY", TEST_KEY)
        .env("TOKVAULT_LOG_LEVEL", "error");
    cmd
}

/// Run with args and return (`exit_code`, stdout, stderr).
fn run_cmd(mut cmd: Command, args: &[&str]) -> (i32, String, String) {
    let output = cmd
        .args(args)
        .output()
        .expect("failed to execute tokvault");
    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

fn run(store: &Path, args: &[&str]) -> (i32, String, String) {
    run_cmd(command(store), args)
}

fn tokenize(store: &Path, args: &[&str]) -> String {
    let mut full = vec!["tokenize"];
    full.extend_from_slice(args);
    let (code, stdout, stderr) = run(store, &full);
    assert_eq!(code, 0, "tokenize failed: {stderr}");
    let token = stdout.trim().to_owned();
    assert_eq!(token.len(), 32, "unexpected token: {token}");
    token
}

// ── Version & help ───────────────────────────────────────────────────

#[test]
fn test_version_flag() {
    let dir = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run(&dir.path().join("t.redb"), &["--version"]);
    assert_eq!(code, 0, "tokvault --version should exit 0");
    assert!(stdout.contains("tokvault"), "version output: {stdout}");
}

#[test]
fn test_help_lists_commands() {
    let dir = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run(&dir.path().join("t.redb"), &["--help"]);
    assert_eq!(code, 0);
    for sub in ["tokenize", "detokenize", "revoke", "inspect", "totp"] {
        assert!(stdout.contains(sub), "help should list '{sub}': {stdout}");
    }
}

// ── Key generation ───────────────────────────────────────────────────

#[test]
fn test_keygen_prints_fresh_hex_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("t.redb");
    let (code, first, _) = run(&store, &["keygen"]);
    assert_eq!(code, 0);
    let (_, second, _) = run(&store, &["keygen"]);
    let first = first.trim();
    assert_eq!(first.len(), 64);
    assert!(first.bytes().all(|b| b.is_ascii_hexdigit()));
    assert_ne!(first, second.trim());
}

// ── Vault lifecycle ──────────────────────────────────────────────────

#[test]
fn test_tokenize_detokenize_across_processes() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("t.redb");

    let token = tokenize(&store, &["ssn 123-45-6789"]);
    let (code, stdout, stderr) = run(&store, &["detokenize", &token]);
    assert_eq!(code, 0, "detokenize failed: {stderr}");
    assert_eq!(stdout.trim_end_matches('\n'), "ssn 123-45-6789");

    let (_, stdout, _) = run(&store, &["inspect", &token]);
    let meta: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(meta["usage_count"], 1);
    assert_eq!(meta["status"], "active");
    assert_eq!(meta["expired"], false);
    assert!(!stdout.contains("ssn"), "inspect must not print the payload");
}

#[test]
fn test_tokenize_reads_stdin() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("t.redb");

    let mut child = command(&store)
        .arg("tokenize")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"from stdin\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());
    let token = String::from_utf8_lossy(&output.stdout).trim().to_owned();

    let (_, stdout, _) = run(&store, &["detokenize", &token]);
    assert_eq!(stdout.trim_end_matches('\n'), "from stdin");
}

#[test]
fn test_gcm_tokens_stay_readable_under_cbc() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("t.redb");

    let mut cmd = command(&store);
    cmd.env("TOKVAULT_CIPHER", "gcm");
    let (code, stdout, stderr) = run_cmd(cmd, &["tokenize", "authenticated"]);
    assert_eq!(code, 0, "{stderr}");
    let token = stdout.trim().to_owned();

    let (code, stdout, _) = run(&store, &["detokenize", &token]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim_end_matches('\n'), "authenticated");
}

#[test]
fn test_revoked_token_cannot_be_detokenized() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("t.redb");
    let token = tokenize(&store, &["secret"]);

    let (code, stdout, _) = run(&store, &["revoke", &token]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "revoked");

    let (_, stdout, _) = run(&store, &["revoke", &token]);
    assert_eq!(stdout.trim(), "unchanged");

    let (code, stdout, stderr) = run(&store, &["detokenize", &token]);
    assert_ne!(code, 0);
    assert!(stdout.is_empty());
    assert!(stderr.contains("revoked"), "stderr: {stderr}");
}

#[test]
fn test_conceal_revoked_reports_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("t.redb");
    let token = tokenize(&store, &["secret"]);
    run(&store, &["revoke", &token]);

    let mut cmd = command(&store);
    cmd.env("TOKVAULT_CONCEAL_REVOKED", "true");
    let (code, _, stderr) = run_cmd(cmd, &["detokenize", &token]);
    assert_ne!(code, 0);
    assert!(stderr.contains("not found"), "stderr: {stderr}");
}

#[test]
fn test_expiry_flags() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("t.redb");

    let past = tokenize(&store, &["old", "--expires-at", "2000-01-01T00:00:00Z"]);
    let (_, stdout, _) = run(&store, &["expired", &past]);
    assert_eq!(stdout.trim(), "true");
    let (code, _, stderr) = run(&store, &["detokenize", &past]);
    assert_ne!(code, 0);
    assert!(stderr.contains("expired"), "stderr: {stderr}");

    let forever = tokenize(&store, &["new", "--no-expiry"]);
    let (_, stdout, _) = run(&store, &["expired", &forever]);
    assert_eq!(stdout.trim(), "false");
    let (_, stdout, _) = run(&store, &["inspect", &forever]);
    let meta: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert!(meta["expires_at"].is_null());

    let (code, _, _) = run(
        &store,
        &["tokenize", "x", "--no-expiry", "--expires-at", "2030-01-01T00:00:00Z"],
    );
    assert_ne!(code, 0, "conflicting expiry flags should be rejected");
}

#[test]
fn test_track_usage_counts() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("t.redb");
    let token = tokenize(&store, &["counted"]);

    for _ in 0..3 {
        let (code, _, stderr) = run(&store, &["track-usage", &token]);
        assert_eq!(code, 0, "{stderr}");
    }
    let (_, stdout, _) = run(&store, &["inspect", &token]);
    let meta: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(meta["usage_count"], 3);

    let (code, _, _) = run(&store, &["track-usage", &"0".repeat(32)]);
    assert_ne!(code, 0);
}

#[test]
fn test_malformed_and_unknown_tokens_fail() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("t.redb");

    let (code, _, stderr) = run(&store, &["detokenize", "not-a-token"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("invalid input"), "stderr: {stderr}");

    let (code, _, stderr) = run(&store, &["detokenize", &"a".repeat(32)]);
    assert_ne!(code, 0);
    assert!(stderr.contains("not found"), "stderr: {stderr}");
}

#[test]
fn test_wrong_key_cannot_detokenize() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("t.redb");
    let token = tokenize(&store, &["secret"]);

    let mut cmd = command(&store);
    cmd.env("TOKVAULT_ENCRYPTION_KEY", "ff".repeat(32));
    let (code, stdout, _) = run_cmd(cmd, &["detokenize", &token]);
    assert_ne!(code, 0);
    assert!(!stdout.contains("secret"));
}

// ── Configuration errors ─────────────────────────────────────────────

#[test]
fn test_missing_key_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("t.redb");

    let mut cmd = command(&store);
    cmd.env_remove("TOKVAULT_ENCRYPTION_KEY");
    let (code, stdout, stderr) = run_cmd(cmd, &["tokenize", "x"]);
    assert_ne!(code, 0);
    assert!(stdout.is_empty());
    assert!(stderr.contains("TOKVAULT_ENCRYPTION_KEY"), "stderr: {stderr}");
    assert!(!store.exists(), "no store should be created without a key");
}

#[test]
fn test_short_key_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = command(&dir.path().join("t.redb"));
    cmd.env("TOKVAULT_ENCRYPTION_KEY", "abcd");
    let (code, _, stderr) = run_cmd(cmd, &["tokenize", "x"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("invalid encryption key"), "stderr: {stderr}");
}

// ── TOTP ─────────────────────────────────────────────────────────────

#[test]
fn test_totp_code_matches_reference_vector() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("t.redb");

    let mut cmd = command(&store);
    cmd.env_remove("TOKVAULT_ENCRYPTION_KEY");
    let (code, stdout, stderr) = run_cmd(cmd, &["totp", "code", RFC_SECRET, "--at", "59"]);
    assert_eq!(code, 0, "totp should not need a vault key: {stderr}");
    assert_eq!(stdout.trim(), "287082");

    let mut cmd = command(&store);
    cmd.env("TOKVAULT_OTP_DIGITS", "8");
    let (_, stdout, _) = run_cmd(cmd, &["totp", "code", RFC_SECRET, "--at", "1111111109"]);
    assert_eq!(stdout.trim(), "07081804");
}

#[test]
fn test_totp_ignores_storage_settings() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("t.redb");

    let mut cmd = command(&store);
    cmd.env("TOKVAULT_STORAGE", "postgres").env_remove("DATABASE_URL");
    let (code, stdout, stderr) = run_cmd(cmd, &["totp", "code", RFC_SECRET, "--at", "59"]);
    assert_eq!(code, 0, "totp should not read storage settings: {stderr}");
    assert_eq!(stdout.trim(), "287082");

    let mut cmd = command(&store);
    cmd.env("TOKVAULT_STORAGE", "postgres").env_remove("DATABASE_URL");
    let (code, _, stderr) = run_cmd(cmd, &["tokenize", "4111111111111111"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("DATABASE_URL"), "{stderr}");
}

#[test]
fn test_oversized_ttl_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("t.redb");

    let mut cmd = command(&store);
    cmd.env("TOKVAULT_DEFAULT_TTL_DAYS", "100000000");
    let (code, stdout, stderr) = run_cmd(cmd, &["tokenize", "4111111111111111"]);
    assert_ne!(code, 0);
    assert!(stdout.is_empty());
    assert!(stderr.contains("TTL") || stderr.contains("ttl"), "{stderr}");
}

#[test]
fn test_totp_verify_exit_codes() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("t.redb");

    let (code, stdout, _) = run(&store, &["totp", "verify", RFC_SECRET, "287082", "--at", "59"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "valid");

    // Step 1's code checked at step 2.
    let (code, stdout, _) = run(&store, &["totp", "verify", RFC_SECRET, "287082", "--at", "89"]);
    assert_eq!(code, 1);
    assert_eq!(stdout.trim(), "invalid");

    let (code, _, _) = run(
        &store,
        &["totp", "verify", RFC_SECRET, "287082", "--at", "89", "--drift"],
    );
    assert_eq!(code, 0);

    let (code, _, stderr) = run(&store, &["totp", "verify", RFC_SECRET, "12ab56", "--at", "59"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("invalid OTP format"), "stderr: {stderr}");
}

#[test]
fn test_totp_secret_and_uri() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("t.redb");

    let (code, stdout, _) = run(&store, &["totp", "secret"]);
    assert_eq!(code, 0);
    let secret = stdout.trim().to_owned();
    assert_eq!(secret.len(), 32);

    let (code, stdout, _) = run(&store, &["totp", "code", &secret]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim().len(), 6);

    let (code, stdout, _) = run(
        &store,
        &[
            "totp",
            "uri",
            &secret,
            "--issuer",
            "Acme Corp",
            "--account",
            "alice@example.com",
        ],
    );
    assert_eq!(code, 0);
    assert_eq!(
        stdout.trim(),
        format!(
            "otpauth://totp/Acme%20Corp:alice%40example.com?secret={secret}&issuer=Acme%20Corp"
        )
    );
}
