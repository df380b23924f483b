#![allow(clippy::expect_used)]

use std::sync::Arc;

use stratum_domain::{
    ObjectKey, ObjectKind, ObjectStatus, StepId, StepKind, StepName, StepOutcome,
};
use tempfile::TempDir;

use super::{build_stack, namespace_of};
use crate::config::StackConfig;
use crate::error::{ConfigError, ProvisionError, StackError};
use crate::orchestrator::{Execution, Orchestrator};
use crate::providers::ProviderRegistry;
use crate::sim::SimulatedCloud;
use crate::state::ProvisionState;

const REGISTRY_TOKEN: &str = "ghp-registry-token-value";
const SEARCH_PASSWORD: &str = "search-password-value";

fn config(dir: &TempDir) -> StackConfig {
    let mut config = StackConfig {
        kubeconfig_path: dir.path().join("kubeconfig.yaml"),
        ..StackConfig::default()
    };
    config
        .config
        .insert("gh_user".to_string(), "octocat".to_string());
    config
        .config
        .insert("elasticsearch_user".to_string(), "elastic".to_string());
    config
        .secrets
        .insert("gh_pat".to_string(), REGISTRY_TOKEN.to_string());
    config
        .secrets
        .insert("elasticsearch_pwd".to_string(), SEARCH_PASSWORD.to_string());
    config
}

fn step(kind: StepKind, name: &str) -> StepId {
    StepId::new(kind, StepName::try_from(name).expect("step name"))
}

fn object(kind: ObjectKind, name: &str) -> StepId {
    step(StepKind::Object(kind), name)
}

async fn provision(
    cloud: &Arc<SimulatedCloud>,
    config: &StackConfig,
    previous: ProvisionState,
) -> Execution {
    let plan = build_stack(config).expect("stack");
    Orchestrator::new(ProviderRegistry::from_backend(Arc::clone(cloud)))
        .execute(plan, previous)
        .await
        .expect("valid graph")
}

#[test]
fn stack_registers_every_step_once() {
    let dir = TempDir::new().expect("tempdir");
    let plan = build_stack(&config(&dir)).expect("stack");
    let description = plan.describe();

    assert!(!description.has_errors(), "{:?}", description.errors);
    assert_eq!(description.steps.len(), 28);
    assert_eq!(description.execution_order.len(), 28);
    assert_eq!(
        description.execution_order.first(),
        Some(&step(StepKind::Cluster, "efk-cluster"))
    );
    assert_eq!(
        description.exports,
        vec!["kubeconfig", "kubeconfig-context", "hostname"]
    );
}

#[test]
fn stack_edges_follow_value_flow() {
    let dir = TempDir::new().expect("tempdir");
    let description = build_stack(&config(&dir)).expect("stack").describe();
    let depends_on = |id: &StepId| {
        description
            .step(id)
            .map(|planned| planned.depends_on.clone())
            .unwrap_or_default()
    };

    let viewer_ingress = depends_on(&object(ObjectKind::Ingress, "kibana-ingress"));
    assert!(viewer_ingress.contains(&step(StepKind::Release, "kibana")));
    assert!(viewer_ingress.contains(&step(StepKind::Lookup(ObjectKind::Service), "kibana")));
    assert!(viewer_ingress.contains(&step(
        StepKind::Lookup(ObjectKind::Service),
        "ingress-nginx-controller-svc"
    )));

    let app_settings = depends_on(&object(ObjectKind::Secret, "languages-api-secrets"));
    assert!(app_settings.contains(&object(ObjectKind::Service, "redis")));
    assert!(app_settings.contains(&object(ObjectKind::Service, "mongodb")));

    let deployment = depends_on(&object(ObjectKind::Deployment, "languages-api"));
    assert!(deployment.contains(&object(ObjectKind::Secret, "languages-api-secrets")));
    assert!(deployment.contains(&object(ObjectKind::Namespace, "alura")));

    let autoscaler = depends_on(&object(ObjectKind::HorizontalPodAutoscaler, "languages-api"));
    assert!(autoscaler.contains(&object(ObjectKind::Deployment, "languages-api")));

    let shipper = depends_on(&step(StepKind::Release, "fluentd"));
    assert!(shipper.contains(&object(ObjectKind::ClusterRoleBinding, "fluentd-aggregator-crb")));
    assert!(shipper.contains(&object(ObjectKind::ConfigMap, "elasticsearch-output")));

    let connection = step(StepKind::Connection, "k8s-provider");
    assert_eq!(
        depends_on(&connection),
        vec![step(StepKind::Cluster, "efk-cluster")]
    );
    assert!(depends_on(&object(ObjectKind::Namespace, "databases-namespace")).contains(&connection));
}

#[test]
fn description_never_contains_secret_values() {
    let dir = TempDir::new().expect("tempdir");
    let description = build_stack(&config(&dir)).expect("stack").describe();
    let rendered = serde_json::to_string(&description).expect("serialize");
    assert!(!rendered.contains(REGISTRY_TOKEN));
    assert!(!rendered.contains(SEARCH_PASSWORD));
}

#[tokio::test]
async fn full_run_provisions_stack_and_exports_hostname() {
    let dir = TempDir::new().expect("tempdir");
    let config = config(&dir);
    let cloud = Arc::new(SimulatedCloud::new());

    let execution = provision(&cloud, &config, ProvisionState::default()).await;

    assert!(execution.error.is_none(), "{:?}", execution.error);
    let report = &execution.report;
    assert!(!report.has_failures(), "{:?}", report.errors);
    assert_eq!(report.count(StepOutcome::Created), 25);
    assert_eq!(report.count(StepOutcome::Read), 3);
    assert_eq!(
        report.exports.get("hostname").map(String::as_str),
        Some("ingress-nginx.nginx-ingress.lb.simulated.test")
    );
    assert_eq!(
        report.exports.get("kubeconfig-context").map(String::as_str),
        Some("lke80000-ctx")
    );

    assert!(execution.sensitive_values.contains(REGISTRY_TOKEN));
    assert!(execution.sensitive_values.contains(SEARCH_PASSWORD));
    let kubeconfig = report.exports.get("kubeconfig").expect("kubeconfig export");
    assert!(execution.sensitive_values.contains(kubeconfig));
    assert_eq!(
        std::fs::read_to_string(&config.kubeconfig_path).expect("kubeconfig file"),
        *kubeconfig
    );

    assert_eq!(execution.state.len(), 25);
    assert!(
        cloud
            .object(
                ObjectKind::HorizontalPodAutoscaler,
                &ObjectKey::namespaced("alura", "languages-api"),
            )
            .is_some()
    );
    assert!(
        cloud
            .object(
                ObjectKind::Secret,
                &ObjectKey::namespaced("alura", "gh-registry-secret"),
            )
            .is_some()
    );
}

#[tokio::test]
async fn second_run_creates_nothing() {
    let dir = TempDir::new().expect("tempdir");
    let config = config(&dir);
    let cloud = Arc::new(SimulatedCloud::new());

    let first = provision(&cloud, &config, ProvisionState::default()).await;
    assert!(first.error.is_none(), "{:?}", first.error);
    let creates = cloud.create_calls();

    let second = provision(&cloud, &config, first.state.clone()).await;

    assert!(second.error.is_none(), "{:?}", second.error);
    assert_eq!(cloud.create_calls(), creates);
    assert_eq!(second.report.count(StepOutcome::Unchanged), 25);
    assert_eq!(second.report.count(StepOutcome::Created), 0);
    assert_eq!(second.state, first.state);
    assert_eq!(second.report.exports, first.report.exports);
}

#[tokio::test]
async fn failing_viewer_release_skips_its_ingress() {
    let dir = TempDir::new().expect("tempdir");
    let cloud = Arc::new(SimulatedCloud::new());
    cloud.fail_on("kibana");

    let execution = provision(&cloud, &config(&dir), ProvisionState::default()).await;

    let viewer = step(StepKind::Release, "kibana");
    assert!(
        matches!(
            execution.error,
            Some(ProvisionError::Provisioning { ref step, .. }) if *step == viewer
        ),
        "{:?}",
        execution.error
    );
    let report = &execution.report;
    assert_eq!(report.outcome_of(&viewer), Some(StepOutcome::Failed));
    assert_eq!(
        report.outcome_of(&object(ObjectKind::Ingress, "kibana-ingress")),
        Some(StepOutcome::Skipped)
    );
    assert_eq!(
        report.outcome_of(&object(ObjectKind::HorizontalPodAutoscaler, "languages-api")),
        Some(StepOutcome::Skipped)
    );
    assert!(
        !cloud
            .calls_to("get")
            .contains(&"service efk-logging/kibana".to_string())
    );
    assert!(report.errors.iter().any(|line| line.starts_with("plan aborted")));
}

#[tokio::test]
async fn missing_registry_token_fails_at_execution() {
    let dir = TempDir::new().expect("tempdir");
    let mut config = config(&dir);
    config.secrets.remove("gh_pat");
    let cloud = Arc::new(SimulatedCloud::new());

    let execution = provision(&cloud, &config, ProvisionState::default()).await;

    let registry = object(ObjectKind::Secret, "gh-registry-secrets");
    assert!(
        matches!(
            execution.error,
            Some(ProvisionError::Configuration { ref key, .. }) if key == "gh_pat"
        ),
        "{:?}",
        execution.error
    );
    let error = execution.error.as_ref().expect("surfaced");
    assert_eq!(error.step(), Some(&registry));
    assert!(error.to_string().starts_with("object:secret:gh-registry-secrets: "));
    assert_eq!(
        execution.report.outcome_of(&registry),
        Some(StepOutcome::Failed)
    );
}

#[test]
fn missing_registry_account_is_rejected_while_planning() {
    let dir = TempDir::new().expect("tempdir");
    let mut config = config(&dir);
    config.config.remove("gh_user");

    let error = build_stack(&config)
        .err()
        .expect("plan must not build without the registry account");
    assert!(matches!(
        error,
        StackError::Config(ConfigError::MissingKey { ref key }) if key == "gh_user"
    ));
}

#[test]
fn out_of_range_cpu_target_is_rejected_before_any_step() {
    let dir = TempDir::new().expect("tempdir");
    let mut config = config(&dir);
    config.application.autoscaling.cpu_utilization = 313;

    let error = build_stack(&config)
        .err()
        .expect("plan must not build with a 313% cpu target");
    assert!(matches!(
        error,
        StackError::Config(ConfigError::OutOfRange { value: 313, .. })
    ));
}

#[test]
fn dependent_objects_need_a_namespaced_status() {
    let service = object(ObjectKind::Service, "kibana");
    let namespaced = ObjectStatus::new(
        ObjectKind::Service,
        ObjectKey::namespaced("efk-logging", "kibana"),
    );
    assert_eq!(
        namespace_of(&service, &namespaced).expect("namespaced"),
        "efk-logging"
    );

    let cluster_scoped =
        ObjectStatus::new(ObjectKind::Service, ObjectKey::cluster_scoped("kibana"));
    let error = namespace_of(&service, &cluster_scoped).expect_err("no namespace");
    assert!(matches!(error, ProvisionError::Resolution { ref step, .. } if *step == service));
}

#[tokio::test]
async fn unassigned_controller_address_fails_the_lookup_step() {
    let dir = TempDir::new().expect("tempdir");
    let config = config(&dir);
    let cloud = Arc::new(SimulatedCloud::new());
    cloud.withhold_load_balancer_addresses();

    let execution = provision(&cloud, &config, ProvisionState::default()).await;

    let lookup = step(
        StepKind::Lookup(ObjectKind::Service),
        "ingress-nginx-controller-svc",
    );
    let report = &execution.report;
    assert_eq!(report.outcome_of(&lookup), Some(StepOutcome::Failed));
    assert_eq!(
        report.outcome_of(&object(ObjectKind::Ingress, "kibana-ingress")),
        Some(StepOutcome::Skipped)
    );
    assert_eq!(report.count(StepOutcome::Failed), 1);
    let error = execution.error.as_ref().expect("surfaced");
    assert_eq!(error.step(), Some(&lookup));
    assert!(!report.exports.contains_key("hostname"));
}
