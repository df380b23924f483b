use serde_json::json;
use stratum_domain::{ObjectKind, ObjectMeta, ObjectSpec, ReleaseSpec};

use super::{namespace, namespace_name};
use crate::config::StackConfig;
use crate::deferred::Deferred;
use crate::error::StackError;
use crate::plan::{Plan, ReleaseHandle, Token};
use crate::resolve::{
    decoded_kubeconfig, discover_ingress_hostname, kubeconfig_context, persist_kubeconfig,
};

const METRICS_SERVER_MANIFEST: &str = "metrics-server/metrics-server.yaml";

/// Cluster, provider connection, metrics add-on and ingress controller.
#[derive(Debug, Clone)]
pub struct Platform {
    pub connection: Token,
    pub metrics: Token,
    pub ingress: ReleaseHandle,
    pub hostname: Deferred<String>,
}

pub(super) fn provision(plan: &mut Plan, config: &StackConfig) -> Result<Platform, StackError> {
    let cluster = plan.provision_cluster(&config.cluster.label, config.cluster.spec(), &[])?;

    let kubeconfig = persist_kubeconfig(&decoded_kubeconfig(&cluster), config.kubeconfig_path.clone());
    let connection = plan.connect("k8s-provider", kubeconfig.clone(), &[])?;
    plan.export_secret("kubeconfig", kubeconfig)?;
    plan.export("kubeconfig-context", kubeconfig_context(&cluster))?;

    let metrics = plan.apply(
        "metrics-server",
        ObjectKind::ConfigFile,
        ObjectSpec::new(
            ObjectMeta::named("metrics-server"),
            json!({ "file": METRICS_SERVER_MANIFEST }),
        ),
        &[&connection],
    )?;

    let ingress_ns = namespace(
        plan,
        "nginx-ingress-namespace",
        "nginx-ingress",
        &[&connection, &metrics.token],
    )?;
    let chart = config.charts.ingress_nginx.clone();
    let release = namespace_name(&ingress_ns).map(move |namespace| ReleaseSpec {
        name: "ingress-nginx".to_string(),
        namespace,
        chart: "ingress-nginx".to_string(),
        version: chart.version,
        repository: chart.repository,
        values: json!({}),
        timeout_secs: 120,
    });
    let ingress = plan.install("nginx-ingress", release, &[&connection])?;

    let discovery = discover_ingress_hostname(
        plan,
        "ingress-nginx-controller-svc",
        &ingress,
        &[&connection],
    )?;

    Ok(Platform {
        connection,
        metrics: metrics.token,
        ingress,
        hostname: discovery.hostname,
    })
}
