use serde_json::json;
use stratum_domain::{ObjectKind, ObjectMeta, ObjectSpec};

use super::logging::Logging;
use super::platform::Platform;
use super::{namespace, namespace_name};
use crate::error::StackError;
use crate::plan::{ObjectHandle, Plan, Token};

/// Services of the cache store and the document store.
#[derive(Debug, Clone)]
pub(super) struct Datastores {
    pub cache: ObjectHandle,
    pub documents: ObjectHandle,
}

struct Store {
    name: &'static str,
    image: &'static str,
    port: u16,
}

const CACHE: Store = Store {
    name: "redis",
    image: "docker.io/redis:7.0.4-alpine3.16",
    port: 6379,
};

const DOCUMENTS: Store = Store {
    name: "mongodb",
    image: "docker.io/mongo:5.0.9",
    port: 27017,
};

pub(super) fn provision(
    plan: &mut Plan,
    platform: &Platform,
    logging: &Logging,
) -> Result<Datastores, StackError> {
    let after = [
        &platform.connection,
        &platform.ingress.token,
        &logging.shipper.token,
    ];
    let namespace = namespace(plan, "databases-namespace", "databases", &after)?;
    let cache = store(plan, &CACHE, &namespace, &after)?;
    let documents = store(plan, &DOCUMENTS, &namespace, &after)?;
    Ok(Datastores { cache, documents })
}

/// Single-replica deployment plus a cluster-internal service in front of it.
fn store(
    plan: &mut Plan,
    store: &Store,
    namespace: &ObjectHandle,
    after: &[&Token],
) -> Result<ObjectHandle, StackError> {
    let (name, image, port) = (store.name, store.image, store.port);
    let deployment = namespace_name(namespace).map(move |namespace| {
        ObjectSpec::new(
            ObjectMeta::named(name)
                .in_namespace(namespace)
                .label("app", name),
            json!({
                "replicas": 1,
                "selector": { "matchLabels": { "app": name } },
                "template": {
                    "metadata": { "labels": { "app": name } },
                    "spec": { "containers": [{
                        "name": name,
                        "image": image,
                        "imagePullPolicy": "IfNotPresent",
                        "ports": [{ "containerPort": port, "protocol": "TCP" }],
                    }]},
                },
            }),
        )
    });
    let deployment = plan.apply(name, ObjectKind::Deployment, deployment, after)?;

    let service = namespace_name(namespace).map(move |namespace| {
        ObjectSpec::new(
            ObjectMeta::named(name).in_namespace(namespace),
            json!({
                "type": "ClusterIP",
                "selector": { "app": name },
                "ports": [{ "name": "mainport", "port": port }],
            }),
        )
    });
    let mut service_after = after.to_vec();
    service_after.push(&deployment.token);
    Ok(plan.apply(name, ObjectKind::Service, service, &service_after)?)
}
