#![allow(clippy::expect_used)]

use stratum_e2e::harness::{REGISTRY_TOKEN, RunResult, StackDir, run_stratum};
use tempfile::TempDir;

fn logged(output: Result<RunResult, String>) -> RunResult {
    let output = output.expect("run stratum");
    println!("{}", output.transcript());
    output
}

#[test]
fn help_exits_zero() {
    let temp = TempDir::new().expect("tempdir");
    let output = logged(run_stratum(temp.path(), &["--help"]));
    assert_eq!(output.exit_code, 0);
    assert!(output.stdout.contains("preview"));
    assert!(output.stdout.contains("up"));
}

#[test]
fn missing_config_file_fails() {
    let temp = TempDir::new().expect("tempdir");
    let output = logged(run_stratum(
        temp.path(),
        &["preview", "--config", "absent.yaml"],
    ));
    assert_eq!(output.exit_code, 1);
    assert!(output.stderr.contains("failed to read stack configuration"));
}

#[test]
fn out_of_range_cpu_target_is_a_configuration_error() {
    let temp = TempDir::new().expect("tempdir");
    let stack = StackDir::create(
        temp.path(),
        "application:\n  autoscaling:\n    cpu_utilization: 313\n",
    )
    .expect("stack dir");

    let output = logged(stack.up(&[]));

    assert_eq!(output.exit_code, 1);
    assert!(output.stderr.contains("cpu_utilization"), "{}", output.stderr);
    assert!(output.stderr.contains("313"), "{}", output.stderr);
    assert!(!stack.state_path().exists());
}

#[test]
fn unknown_config_key_is_rejected() {
    let temp = TempDir::new().expect("tempdir");
    let stack = StackDir::create(temp.path(), "unexpected: true\n").expect("stack dir");

    let output = logged(stack.preview(&[]));

    assert_eq!(output.exit_code, 1);
    assert!(output.stderr.contains("failed to parse stack configuration"));
}

#[test]
fn missing_registry_token_fails_the_run() {
    let temp = TempDir::new().expect("tempdir");
    let stack = StackDir::create(temp.path(), "").expect("stack dir");
    let without_token = stack
        .required_settings()
        .replace(&format!("  gh_pat: {REGISTRY_TOKEN}\n"), "");
    stack.write_stack(&without_token).expect("rewrite stack file");

    let output = logged(stack.up(&["--color", "never"]));

    assert_eq!(output.exit_code, 1);
    assert!(output.stdout.contains("! failed"));
    assert!(output.stderr.contains("gh_pat"));
    assert!(stack.state_path().exists(), "partial progress is still recorded");
}
