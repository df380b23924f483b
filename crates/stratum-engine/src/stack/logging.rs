use serde_json::json;
use stratum_domain::{ObjectKind, ObjectMeta, ObjectSpec, ReleaseSpec};

use super::platform::Platform;
use super::{namespace, namespace_name, namespace_of};
use crate::config::StackConfig;
use crate::deferred::{combine2, combine3};
use crate::error::StackError;
use crate::plan::{ObjectHandle, Plan, ReleaseHandle};
use crate::secrets::SecretSource;
use crate::template::{FluentdOutput, fluentd_output_file, render_fluentd_output};

const LOGGING_NAMESPACE: &str = "efk-logging";
const SEARCH_RELEASE: &str = "elasticsearch";
const SEARCH_PORT: u16 = 9200;
const VIEWER_PORT: u16 = 5601;
const SHIPPER: &str = "fluentd";

/// Search engine, log viewer and log shipper.
#[derive(Debug, Clone)]
pub(super) struct Logging {
    pub namespace: ObjectHandle,
    pub shipper: ReleaseHandle,
}

pub(super) fn provision(
    plan: &mut Plan,
    config: &StackConfig,
    secrets: &dyn SecretSource,
    platform: &Platform,
) -> Result<Logging, StackError> {
    let connection = &platform.connection;
    let namespace = namespace(
        plan,
        "efk-namespace",
        LOGGING_NAMESPACE,
        &[connection, &platform.ingress.token],
    )?;

    let chart = config.charts.elasticsearch.clone();
    let password = secrets.get_secret("elasticsearch_pwd");
    let search = combine2(&namespace_name(&namespace), &password).map(move |(namespace, password)| {
        ReleaseSpec {
            name: SEARCH_RELEASE.to_string(),
            namespace,
            chart: "elasticsearch".to_string(),
            version: chart.version,
            repository: chart.repository,
            values: json!({
                "global": { "storageClass": "linode-block-storage" },
                "security": { "elasticPassword": password },
            }),
            timeout_secs: 600,
        }
    });
    let search = plan.install("elasticsearch", search, &[connection])?;

    viewer(plan, config, platform, &search)?;
    let shipper = shipper(plan, config, secrets, platform, &namespace, &search)?;

    Ok(Logging { namespace, shipper })
}

/// In-cluster address of the search engine a release installed.
fn search_host(search: &ReleaseHandle) -> crate::deferred::Deferred<String> {
    search
        .status
        .map(|status| format!("{}.{}.svc.cluster.local", status.name, status.namespace))
}

fn viewer(
    plan: &mut Plan,
    config: &StackConfig,
    platform: &Platform,
    search: &ReleaseHandle,
) -> Result<(), StackError> {
    let connection = &platform.connection;
    let chart = config.charts.kibana.clone();
    let release = search_host(search).map(move |host| ReleaseSpec {
        name: "kibana".to_string(),
        namespace: LOGGING_NAMESPACE.to_string(),
        chart: "kibana".to_string(),
        version: chart.version,
        repository: chart.repository,
        values: json!({
            "elasticsearch": {
                "hosts": [host],
                "port": SEARCH_PORT.to_string(),
            },
        }),
        timeout_secs: 300,
    });
    let kibana = plan.install("kibana", release, &[connection, &search.token])?;

    let key = kibana
        .status
        .map(|status| stratum_domain::ObjectKey::namespaced(status.namespace, status.name));
    let service = plan.lookup("kibana", ObjectKind::Service, key, &[connection])?;

    let service_step = service.token.step().clone();
    let ingress =
        combine2(&platform.hostname, &service.status).try_map(move |(hostname, service)| {
            Ok(ObjectSpec::new(
                ObjectMeta::named("kibana-ingress")
                    .in_namespace(namespace_of(&service_step, &service)?)
                    .annotation("kubernetes.io/ingress.class", "nginx")
                    .annotation("nginx.ingress.kubernetes.io/use-regex", "true"),
                json!({
                    "rules": [{
                        "host": hostname,
                        "http": { "paths": [{
                            "path": "/*",
                            "pathType": "Prefix",
                            "backend": { "service": {
                                "name": service.key.name,
                                "port": { "number": VIEWER_PORT },
                            }},
                        }]},
                    }],
                }),
            ))
        });
    plan.apply(
        "kibana-ingress",
        ObjectKind::Ingress,
        ingress,
        &[connection, &kibana.token],
    )?;
    Ok(())
}

fn shipper(
    plan: &mut Plan,
    config: &StackConfig,
    secrets: &dyn SecretSource,
    platform: &Platform,
    namespace: &ObjectHandle,
    search: &ReleaseHandle,
) -> Result<ReleaseHandle, StackError> {
    let connection = &platform.connection;
    let labels = |meta: ObjectMeta| {
        meta.label("app.kubernetes.io/instance", SHIPPER)
            .label("app.kubernetes.io/name", SHIPPER)
    };

    let search_address = format!("{SEARCH_RELEASE}.{LOGGING_NAMESPACE}.svc.cluster.local");
    let output = render_fluentd_output(&FluentdOutput::new(search_address.clone(), SEARCH_PORT))?;
    let output_map = namespace_name(namespace).map(move |namespace| {
        ObjectSpec::new(
            ObjectMeta::named("elasticsearch-output-cm").in_namespace(namespace),
            json!({ "data": { fluentd_output_file(): output } }),
        )
    });
    let output_map = plan.apply(
        "elasticsearch-output",
        ObjectKind::ConfigMap,
        output_map,
        &[connection, &search.token],
    )?;

    let role = plan.apply(
        "fluentd-aggregator-cr",
        ObjectKind::ClusterRole,
        ObjectSpec::new(
            labels(ObjectMeta::named("fluentd-aggregator-cr")),
            json!({
                "rules": [{
                    "apiGroups": [""],
                    "resources": ["namespaces", "pods"],
                    "verbs": ["get", "watch", "list"],
                }],
            }),
        ),
        &[connection, &output_map.token],
    )?;

    let account = namespace_name(namespace).map(move |namespace| {
        ObjectSpec::new(
            labels(ObjectMeta::named("fluentd-aggregator-sa").in_namespace(namespace))
                .label("app.kubernetes.io/component", "aggregator"),
            json!({ "automountServiceAccountToken": true }),
        )
    });
    let account = plan.apply(
        "fluentd-aggregator-sa",
        ObjectKind::ServiceAccount,
        account,
        &[connection, &role.token],
    )?;

    let binding = combine2(&account.status, &role.status).map(move |(account, role)| {
        ObjectSpec::new(
            labels(ObjectMeta::named("fluentd-aggregator-crb")),
            json!({
                "subjects": [{
                    "kind": "ServiceAccount",
                    "name": account.key.name,
                    "namespace": account.key.namespace,
                }],
                "roleRef": {
                    "apiGroup": "rbac.authorization.k8s.io",
                    "kind": "ClusterRole",
                    "name": role.key.name,
                },
            }),
        )
    });
    let binding = plan.apply(
        "fluentd-aggregator-crb",
        ObjectKind::ClusterRoleBinding,
        binding,
        &[connection],
    )?;

    let user = secrets.get("elasticsearch_user")?;
    let password = secrets.get_secret("elasticsearch_pwd");
    let chart = config.charts.fluentd.clone();
    let account_step = account.token.step().clone();
    let release = combine3(&output_map.status, &account.status, &password).try_map(
        move |(output_map, account, password)| {
            Ok(ReleaseSpec {
                name: SHIPPER.to_string(),
                namespace: namespace_of(&account_step, &account)?,
                chart: "fluentd".to_string(),
                version: chart.version,
                repository: chart.repository,
                values: json!({
                    "aggregator": {
                        "configMap": output_map.key.name,
                        "extraEnv": [
                            { "name": "ELASTICSEARCH_HOST", "value": search_address },
                            { "name": "ELASTICSEARCH_PORT", "value": SEARCH_PORT.to_string() },
                            { "name": "ELASTICSEARCH_USER", "value": user },
                            { "name": "ELASTICSEARCH_PASSWORD", "value": password },
                        ],
                        "serviceAccount": { "name": account.key.name },
                    },
                }),
                timeout_secs: 300,
            })
        },
    );
    Ok(plan.install("fluentd", release, &[connection, &binding.token])?)
}
