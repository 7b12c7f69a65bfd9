use std::process::Command;

const HEADER: &str = "player,charged,paid,balance,unallocated";

fn run_with(args: &[&str], envs: &[(&str, &str)]) -> (String, String, bool) {
    let mut command = Command::new(env!("CARGO_BIN_EXE_club-ledger"));
    for arg in args {
        command.arg(format!("tests/fixtures/{arg}"));
    }
    let output = command
        .env("RUST_LOG", "warn")
        .env_remove("CLUB_LEDGER_VOID_POLICY")
        .env_remove("CLUB_LEDGER_AUTO_APPROVER")
        .env_remove("CLUB_LEDGER_MIN_REFERENCE_LEN")
        .envs(envs.iter().copied())
        .output()
        .expect("failed to run binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn run(args: &[&str]) -> (String, String, bool) {
    run_with(args, &[])
}

#[test]
fn verified_payments_allocate_and_balance() {
    let (stdout, stderr, success) = run(&["scenarios.csv"]);

    assert!(success);
    assert!(stderr.is_empty(), "unexpected stderr: {stderr}");

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec![
            HEADER,
            "7,35.0000,25.0000,-10.0000,0.0000",
            "8,30.0000,30.0000,0.0000,0.0000",
            "9,0.0000,0.0000,0.0000,0.0000",
        ]
    );
}

#[test]
fn amended_payment_settles_the_player() {
    let (stdout, _, success) = run(&["amend.csv"]);

    assert!(success);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines, vec![HEADER, "7,35.0000,35.0000,0.0000,0.0000"]);
}

#[test]
fn void_with_allocations_is_refused_by_default() {
    let (stdout, _, success) = run(&["void.csv"]);

    assert!(success);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines, vec![HEADER, "7,35.0000,25.0000,-10.0000,0.0000"]);
}

#[test]
fn void_cascade_reallocates_freed_money() {
    let (stdout, _, success) = run_with(&["void.csv"], &[("CLUB_LEDGER_VOID_POLICY", "cascade")]);

    assert!(success);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines, vec![HEADER, "7,15.0000,25.0000,10.0000,10.0000"]);
}

#[test]
fn errors_warn_but_do_not_block() {
    let (stdout, stderr, success) = run(&["with_errors.csv"]);

    assert!(success);
    assert!(stderr.contains("unrecognized command type"));
    assert!(stderr.contains("missing amount"));
    assert!(stderr.contains("possible duplicate payment"));

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines, vec![HEADER, "7,20.0000,20.0000,0.0000,0.0000"]);
}

#[test]
fn statement_csv_verifies_matching_payments() {
    let (stdout, stderr, success) = run(&["pending.csv", "statement.csv"]);

    assert!(success);
    assert!(stderr.is_empty(), "unexpected stderr: {stderr}");
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec![
            HEADER,
            "7,20.0000,20.0000,0.0000,0.0000",
            "8,0.0000,0.0000,0.0000,0.0000",
        ]
    );
}

#[test]
fn statement_json_matches_raw_text_and_lines() {
    let (stdout, _, success) = run(&["pending.csv", "statement.json"]);

    assert!(success);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec![
            HEADER,
            "7,20.0000,20.0000,0.0000,0.0000",
            "8,0.0000,10.0000,10.0000,10.0000",
        ]
    );
}

#[test]
fn invalid_config_fails() {
    let (stdout, stderr, success) =
        run_with(&["scenarios.csv"], &[("CLUB_LEDGER_VOID_POLICY", "sometimes")]);

    assert!(!success);
    assert!(stdout.is_empty());
    assert!(stderr.contains("unknown void policy"));
}

#[test]
fn missing_file_fails() {
    let (stdout, stderr, success) = run(&["does_not_exist.csv"]);

    assert!(!success);
    assert!(stdout.is_empty());
    assert!(stderr.contains("failed to open"));
}
