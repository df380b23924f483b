#![allow(clippy::expect_used)]

use stratum_e2e::harness::{REGISTRY_TOKEN, RunResult, SEARCH_PASSWORD, StackDir};
use tempfile::TempDir;

fn logged(output: Result<RunResult, String>) -> RunResult {
    let output = output.expect("run stratum");
    println!("{}", output.transcript());
    output
}

#[test]
fn preview_lists_every_step_without_calling_out() {
    let temp = TempDir::new().expect("tempdir");
    let stack = StackDir::create(temp.path(), "").expect("stack dir");

    let output = logged(stack.preview(&["--color", "never"]));

    assert_eq!(output.exit_code, 0);
    assert!(output.stdout.starts_with("preview e2e"));
    assert!(output.stdout.contains("cluster:efk-cluster"));
    assert!(output.stdout.contains("lookup:service:ingress-nginx-controller-svc"));
    assert!(output.stdout.contains("object:horizontal-pod-autoscaler:languages-api"));
    assert!(output.stdout.contains("Plan: 25 to create, 3 to read"));
    assert!(!stack.kubeconfig_path().exists());
    assert!(!stack.state_path().exists());
}

#[test]
fn preview_verbose_shows_dependencies() {
    let temp = TempDir::new().expect("tempdir");
    let stack = StackDir::create(temp.path(), "").expect("stack dir");

    let output = logged(stack.preview(&["--color", "never", "--verbose"]));

    assert_eq!(output.exit_code, 0);
    assert!(output.stdout.contains("after: cluster:efk-cluster"));
}

#[test]
fn up_twice_reuses_recorded_outputs() {
    let temp = TempDir::new().expect("tempdir");
    let stack = StackDir::create(temp.path(), "").expect("stack dir");

    let first = logged(stack.up(&["--color", "never"]));
    assert_eq!(first.exit_code, 0);
    assert!(first.stdout.contains("Provisioned: 25 created, 3 read"));
    assert!(first.stdout.contains("hostname ingress-nginx.nginx-ingress.lb.simulated.test"));
    assert!(stack.state_path().exists());
    assert!(stack.kubeconfig_path().exists());

    let second = logged(stack.up(&["--color", "never"]));
    assert_eq!(second.exit_code, 0);
    assert!(second.stdout.contains("Provisioned: 3 read, 25 unchanged"));
    assert!(second.stdout.contains("hostname ingress-nginx.nginx-ingress.lb.simulated.test"));
}

#[test]
fn up_redacts_secret_values() {
    let temp = TempDir::new().expect("tempdir");
    let stack = StackDir::create(temp.path(), "").expect("stack dir");

    let output = logged(stack.up(&["--color", "never"]));

    assert_eq!(output.exit_code, 0);
    assert!(output.stdout.contains("kubeconfig [REDACTED]"));
    assert!(!output.stdout.contains("kind: Config"));
    assert!(!output.stdout.contains(SEARCH_PASSWORD));
    assert!(!output.stdout.contains(REGISTRY_TOKEN));
}

#[test]
fn up_json_report_is_machine_readable() {
    let temp = TempDir::new().expect("tempdir");
    let stack = StackDir::create(temp.path(), "").expect("stack dir");

    let output = logged(stack.up(&["--format", "json"]));

    assert_eq!(output.exit_code, 0);
    let report: serde_json::Value = serde_json::from_str(&output.stdout).expect("json report");
    assert_eq!(
        report["exports"]["kubeconfig-context"],
        serde_json::Value::from("lke80000-ctx")
    );
    assert_eq!(report["exports"]["kubeconfig"], serde_json::Value::from("[REDACTED]"));
    assert_eq!(report["results"].as_array().map(Vec::len), Some(28));
}
