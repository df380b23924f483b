use serde_json::json;
use stratum_domain::{ObjectKind, ObjectMeta, ObjectSpec, ObjectStatus, StepId, StepKind};

use super::datastores::Datastores;
use super::logging::Logging;
use super::platform::Platform;
use super::{namespace, namespace_name, namespace_of};
use crate::config::StackConfig;
use crate::credentials::{registry_login_document, registry_secret};
use crate::deferred::{Resolution, combine2};
use crate::error::{ProvisionError, StackError};
use crate::plan::Plan;
use crate::secrets::SecretSource;

const REGISTRY_SECRET: &str = "gh-registry-secret";
const REGISTRY_STEP: &str = "gh-registry-secrets";

pub(super) fn provision(
    plan: &mut Plan,
    config: &StackConfig,
    secrets: &dyn SecretSource,
    platform: &Platform,
    logging: &Logging,
    stores: &Datastores,
) -> Result<(), StackError> {
    let app = &config.application;
    let connection = &platform.connection;
    let namespace = namespace(
        plan,
        &app.namespace,
        &app.namespace,
        &[
            connection,
            &stores.cache.token,
            &stores.documents.token,
            &logging.shipper.token,
        ],
    )?;

    let account = secrets.get("gh_user")?;
    let token = secrets.get_secret("gh_pat");
    let registry_step = Plan::step_id(StepKind::Object(ObjectKind::Secret), REGISTRY_STEP)?;
    let document = registry_login_document(
        &registry_step,
        &config.registry.host,
        &account,
        &config.registry.email,
        &token,
    );
    let registry = plan.apply(
        REGISTRY_STEP,
        ObjectKind::Secret,
        registry_secret(
            ObjectMeta::named(REGISTRY_SECRET).in_namespace(&app.namespace),
            &document,
        ),
        &[connection, &namespace.token],
    )?;

    let documents_step = stores.documents.token.step().clone();
    let cache_step = stores.cache.token.step().clone();
    let app_namespace = app.namespace.clone();
    let settings = combine2(&stores.documents.status, &stores.cache.status).try_map(
        move |(documents, cache)| {
            let mongodb = service_url("mongodb", &documents_step, &documents)?;
            let redis = service_url("redis", &cache_step, &cache)?;
            Ok(ObjectSpec::new(
                ObjectMeta::named("languages-api").in_namespace(app_namespace),
                json!({
                    "type": "Opaque",
                    "stringData": { "MONGODB_URI": mongodb, "REDIS_HOST": redis },
                }),
            ))
        },
    );
    let settings = plan.apply(
        "languages-api-secrets",
        ObjectKind::Secret,
        settings,
        &[connection, &registry.token],
    )?;

    let (name, image, replicas, port) = (app.name.clone(), app.image.clone(), app.replicas, app.port);
    let deployment = combine2(&namespace_name(&namespace), &settings.status).map(
        move |(namespace, settings)| {
            ObjectSpec::new(
                ObjectMeta::named(&name)
                    .in_namespace(namespace)
                    .label("app", &name),
                json!({
                    "replicas": replicas,
                    "selector": { "matchLabels": { "app": name } },
                    "template": {
                        "metadata": { "labels": { "app": name } },
                        "spec": {
                            "containers": [{
                                "name": name,
                                "image": image,
                                "imagePullPolicy": "IfNotPresent",
                                "ports": [{ "containerPort": port, "protocol": "TCP" }],
                                "resources": {
                                    "requests": { "memory": "256Mi", "cpu": "80m" },
                                    "limits": { "memory": "800Mi", "cpu": "500m" },
                                },
                                "readinessProbe": probe("/q/health/ready", port),
                                "livenessProbe": probe("/q/health/live", port),
                                "envFrom": [{ "secretRef": { "name": settings.key.name } }],
                            }],
                            "imagePullSecrets": [{ "name": REGISTRY_SECRET }],
                        },
                    },
                }),
            )
        },
    );
    let deployment = plan.apply(
        &app.name,
        ObjectKind::Deployment,
        deployment,
        &[connection],
    )?;

    let deployment_step = deployment.token.step().clone();
    let selector = app.name.clone();
    let service = deployment.status.try_map(move |deployment| {
        Ok(ObjectSpec::new(
            ObjectMeta::named(&deployment.key.name)
                .in_namespace(namespace_of(&deployment_step, &deployment)?),
            json!({
                "type": "ClusterIP",
                "selector": { "app": selector },
                "ports": [{ "name": "mainport", "port": port }],
            }),
        ))
    });
    let service = plan.apply(&app.name, ObjectKind::Service, service, &[connection])?;

    let service_step = service.token.step().clone();
    let path = app.path.clone();
    let ingress =
        combine2(&platform.hostname, &service.status).try_map(move |(hostname, service)| {
            Ok(ObjectSpec::new(
                ObjectMeta::named(&service.key.name)
                    .in_namespace(namespace_of(&service_step, &service)?)
                    .annotation("kubernetes.io/ingress.class", "nginx")
                    .annotation("nginx.ingress.kubernetes.io/rewrite-target", "/$2"),
                json!({
                    "rules": [{
                        "host": hostname,
                        "http": { "paths": [{
                            "path": path,
                            "pathType": "Prefix",
                            "backend": { "service": {
                                "name": service.key.name,
                                "port": { "number": port },
                            }},
                        }]},
                    }],
                }),
            ))
        });
    plan.apply(&app.name, ObjectKind::Ingress, ingress, &[connection])?;

    let deployment_step = deployment.token.step().clone();
    let scaling = app.autoscaling.clone();
    let autoscaler = deployment.status.try_map(move |deployment| {
        Ok(ObjectSpec::new(
            ObjectMeta::named(&deployment.key.name)
                .in_namespace(namespace_of(&deployment_step, &deployment)?),
            json!({
                "scaleTargetRef": {
                    "apiVersion": "apps/v1",
                    "kind": "Deployment",
                    "name": deployment.key.name,
                },
                "minReplicas": scaling.min_replicas,
                "maxReplicas": scaling.max_replicas,
                "metrics": [{
                    "type": "Resource",
                    "resource": {
                        "name": "cpu",
                        "target": {
                            "type": "Utilization",
                            "averageUtilization": scaling.cpu_utilization,
                        },
                    },
                }],
            }),
        ))
    });
    plan.apply(
        &app.name,
        ObjectKind::HorizontalPodAutoscaler,
        autoscaler,
        &[connection],
    )?;
    Ok(())
}

/// `<scheme>://<name>.<namespace>.svc.cluster.local:<first port>`
fn service_url(scheme: &str, step: &StepId, service: &ObjectStatus) -> Resolution<String> {
    let Some(port) = service.ports.first() else {
        return Err(ProvisionError::resolution(
            step,
            format!("service {} exposes no port", service.key),
        ));
    };
    Ok(format!(
        "{scheme}://{}:{}",
        service.cluster_dns_name(),
        port.port
    ))
}

fn probe(path: &str, port: u16) -> serde_json::Value {
    json!({
        "httpGet": { "path": path, "port": port },
        "initialDelaySeconds": 1,
        "periodSeconds": 30,
        "timeoutSeconds": 10,
        "successThreshold": 1,
        "failureThreshold": 3,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use stratum_domain::{
        ObjectKey, ObjectKind, ObjectStatus, ServicePort, StepId, StepKind, StepName,
    };

    use super::service_url;
    use crate::error::ProvisionError;

    fn redis_step() -> StepId {
        StepId::new(
            StepKind::Object(ObjectKind::Service),
            StepName::try_from("redis").expect("name"),
        )
    }

    #[test]
    fn service_url_uses_cluster_dns_and_first_port() {
        let mut status =
            ObjectStatus::new(ObjectKind::Service, ObjectKey::namespaced("databases", "redis"));
        status.ports.push(ServicePort {
            name: Some("mainport".to_string()),
            port: 6379,
        });
        status.ports.push(ServicePort {
            name: None,
            port: 16379,
        });
        assert_eq!(
            service_url("redis", &redis_step(), &status).expect("url"),
            "redis://redis.databases.svc.cluster.local:6379"
        );
    }

    #[test]
    fn service_without_ports_cannot_be_addressed() {
        let status =
            ObjectStatus::new(ObjectKind::Service, ObjectKey::namespaced("databases", "redis"));
        let error = service_url("redis", &redis_step(), &status).expect_err("no port");
        assert!(matches!(error, ProvisionError::Resolution { ref step, .. } if *step == redis_step()));
    }
}
