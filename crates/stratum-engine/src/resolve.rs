//! Values that only exist after several dependent provider calls complete.

use std::path::PathBuf;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use stratum_domain::{ObjectKey, ObjectKind, ObjectStatus, ReleaseStatus, StepId};
use tracing::{debug, warn};

use crate::deferred::{Deferred, Resolution};
use crate::error::{PlanError, ProvisionError};
use crate::fs_util::write_private_file;
use crate::plan::{ClusterHandle, ObjectHandle, Plan, ReleaseHandle, Token};

/// Decoded kubeconfig of a provisioned cluster.
#[must_use]
pub fn decoded_kubeconfig(cluster: &ClusterHandle) -> Deferred<String> {
    let step = cluster.token.step().clone();
    cluster
        .info
        .try_map(move |info| decode_kubeconfig(&step, &info.kubeconfig))
}

/// # Errors
///
/// Returns a resolution error when `encoded` is not base64 text.
pub fn decode_kubeconfig(step: &StepId, encoded: &str) -> Resolution<String> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|error| ProvisionError::resolution(step, format!("kubeconfig is not base64: {error}")))?;
    String::from_utf8(bytes)
        .map_err(|_| ProvisionError::resolution(step, "kubeconfig is not UTF-8 text"))
}

/// Write the kubeconfig to `path` as soon as it resolves. Persisting is best
/// effort: the value passes through unchanged even when the write fails.
#[must_use]
pub fn persist_kubeconfig(kubeconfig: &Deferred<String>, path: PathBuf) -> Deferred<String> {
    let source = kubeconfig.resolve();
    Deferred::from_future(kubeconfig.sources().clone(), async move {
        let contents = source.await?;
        let bytes = contents.clone().into_bytes();
        let target = path.clone();
        match tokio::task::spawn_blocking(move || write_private_file(&target, &bytes)).await {
            Ok(Ok(())) => debug!(path = %path.display(), "kubeconfig written"),
            Ok(Err(error)) => {
                warn!(path = %path.display(), %error, "could not persist kubeconfig");
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "kubeconfig write did not complete");
            }
        }
        Ok(contents)
    })
}

/// Context name the managed cluster service assigns: `lke<id>-ctx`.
#[must_use]
pub fn kubeconfig_context(cluster: &ClusterHandle) -> Deferred<String> {
    cluster.info.map(|info| format!("lke{}-ctx", info.id))
}

/// Key of the network-facing service an ingress controller release creates.
#[must_use]
pub fn controller_service_key(release: &ReleaseStatus) -> ObjectKey {
    ObjectKey::namespaced(&release.namespace, format!("{}-controller", release.name))
}

/// Hostname of the first externally assigned address of a service.
///
/// # Errors
///
/// Returns a resolution error when no address has been assigned yet or the
/// first address carries no hostname. An empty hostname is never returned.
pub fn first_ingress_hostname(step: &StepId, status: &ObjectStatus) -> Resolution<String> {
    ingress_hostname(status).map_err(|reason| ProvisionError::resolution(step, reason))
}

fn ingress_hostname(status: &ObjectStatus) -> Result<String, String> {
    let Some(first) = status.load_balancer.first() else {
        return Err(format!(
            "service {} has no externally assigned address",
            status.key
        ));
    };
    match first.hostname.as_deref() {
        Some(hostname) if !hostname.is_empty() => Ok(hostname.to_string()),
        _ => Err(format!(
            "first address of service {} has no hostname",
            status.key
        )),
    }
}

fn has_ingress_hostname(status: &ObjectStatus) -> Result<(), String> {
    ingress_hostname(status).map(|_| ())
}

#[derive(Debug, Clone)]
pub struct HostnameDiscovery {
    pub service: ObjectHandle,
    pub hostname: Deferred<String>,
}

/// Chain release status -> controller service lookup -> external hostname.
///
/// The lookup key is only known once the release reports its namespace and
/// name, so the lookup step implicitly depends on the release. The lookup
/// fails unless the service already carries a hostname.
///
/// # Errors
///
/// Returns an error when the lookup step cannot be registered.
pub fn discover_ingress_hostname(
    plan: &mut Plan,
    name: &str,
    controller: &ReleaseHandle,
    after: &[&Token],
) -> Result<HostnameDiscovery, PlanError> {
    let key = controller.status.map(|status| controller_service_key(&status));
    let service =
        plan.lookup_checked(name, ObjectKind::Service, key, after, has_ingress_hostname)?;
    let step = service.token.step().clone();
    let hostname = service
        .status
        .try_map(move |status| first_ingress_hostname(&step, &status));
    Ok(HostnameDiscovery { service, hostname })
}
