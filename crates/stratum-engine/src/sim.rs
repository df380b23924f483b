//! In-memory backend implementing every provider trait.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use stratum_domain::{
    ClusterInfo, ClusterSpec, LoadBalancerIngress, ObjectKey, ObjectKind, ObjectSpec,
    ObjectStatus, ReleaseSpec, ReleaseStatus, ServicePort,
};
use tracing::debug;

use crate::error::{ProviderError, StateError};
use crate::fs_util::write_private_file;
use crate::providers::{
    ClusterProvisioner, ObjectLookup, PackageInstaller, PlatformConnector, ResourceApplier,
};

type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// One call received by the simulated backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedCall {
    pub operation: &'static str,
    pub target: String,
}

/// Everything the simulated backend has provisioned, without call history
/// or injected faults. Persisting it lets consecutive runs observe the same
/// world.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedInventory {
    pub clusters: BTreeMap<String, ClusterInfo>,
    pub objects: Vec<ObjectStatus>,
    pub releases: Vec<ReleaseStatus>,
}

#[derive(Debug, Default)]
struct SimState {
    clusters: BTreeMap<String, ClusterInfo>,
    objects: BTreeMap<(ObjectKind, ObjectKey), ObjectStatus>,
    releases: BTreeMap<(String, String), ReleaseStatus>,
    calls: Vec<SimulatedCall>,
    failing: BTreeSet<String>,
    delays: BTreeMap<String, Duration>,
    hostname: Option<String>,
    withhold_addresses: bool,
    connected: bool,
}

/// Cloud, platform and chart installer in one process.
///
/// Objects are keyed by kind and `<namespace>/<name>`; applying an existing
/// key updates it in place. Installing a known chart also creates the
/// services that chart would expose.
#[derive(Debug, Default)]
pub struct SimulatedCloud {
    state: Mutex<SimState>,
}

impl SimulatedCloud {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that starts out with everything in `inventory` already provisioned.
    #[must_use]
    pub fn from_inventory(inventory: SimulatedInventory) -> Self {
        let state = SimState {
            clusters: inventory.clusters,
            objects: inventory
                .objects
                .into_iter()
                .map(|status| ((status.kind, status.key.clone()), status))
                .collect(),
            releases: inventory
                .releases
                .into_iter()
                .map(|release| ((release.namespace.clone(), release.name.clone()), release))
                .collect(),
            ..SimState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    #[must_use]
    pub fn inventory(&self) -> SimulatedInventory {
        let state = self.state();
        SimulatedInventory {
            clusters: state.clusters.clone(),
            objects: state.objects.values().cloned().collect(),
            releases: state.releases.values().cloned().collect(),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail every call whose target name equals `name` (cluster label,
    /// object name or release name).
    pub fn fail_on(&self, name: impl Into<String>) {
        self.state().failing.insert(name.into());
    }

    /// Delay calls targeting `name`, keeping them in flight for a while.
    pub fn delay(&self, name: impl Into<String>, delay: Duration) {
        self.state().delays.insert(name.into(), delay);
    }

    /// Hostname assigned to load-balancer services created by ingress charts.
    pub fn set_load_balancer_hostname(&self, hostname: impl Into<String>) {
        self.state().hostname = Some(hostname.into());
    }

    /// Leave load-balancer address lists empty, as right after creation.
    pub fn withhold_load_balancer_addresses(&self) {
        self.state().withhold_addresses = true;
    }

    /// Make an object visible to lookups without applying it.
    pub fn insert_object(&self, status: ObjectStatus) {
        self.state()
            .objects
            .insert((status.kind, status.key.clone()), status);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<SimulatedCall> {
        self.state().calls.clone()
    }

    /// Targets of every call of one operation, in call order.
    #[must_use]
    pub fn calls_to(&self, operation: &str) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter(|call| call.operation == operation)
            .map(|call| call.target.clone())
            .collect()
    }

    /// Number of calls that create or update something.
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call.operation, "create" | "apply" | "install"))
            .count()
    }

    #[must_use]
    pub fn object(&self, kind: ObjectKind, key: &ObjectKey) -> Option<ObjectStatus> {
        self.state().objects.get(&(kind, key.clone())).cloned()
    }

    /// Record the call, wait out any configured delay, then fail it if
    /// `name` was marked as failing.
    async fn begin(&self, operation: &'static str, target: String, name: &str) -> ProviderResult<()> {
        let (delay, failing) = {
            let mut state = self.state();
            debug!(operation, %target, "simulated call");
            state.calls.push(SimulatedCall { operation, target });
            (state.delays.get(name).copied(), state.failing.contains(name))
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if failing {
            return Err(ProviderError::Rejected {
                operation,
                message: format!("simulated failure for {name}"),
            });
        }
        Ok(())
    }

    fn load_balancer(state: &SimState, release: &ReleaseSpec) -> Vec<LoadBalancerIngress> {
        if state.withhold_addresses {
            return Vec::new();
        }
        let hostname = state.hostname.clone().unwrap_or_else(|| {
            format!("{}.{}.lb.simulated.test", release.name, release.namespace)
        });
        vec![LoadBalancerIngress {
            hostname: Some(hostname),
            ip: Some("192.0.2.10".to_string()),
        }]
    }

    fn chart_services(state: &SimState, release: &ReleaseSpec) -> Vec<ObjectStatus> {
        let service = |name: String, port: u16| {
            let mut status = ObjectStatus::new(
                ObjectKind::Service,
                ObjectKey::namespaced(&release.namespace, name),
            );
            status.ports.push(ServicePort { name: None, port });
            status
        };
        match release.chart.as_str() {
            "ingress-nginx" => {
                let mut controller = service(format!("{}-controller", release.name), 80);
                controller.load_balancer = Self::load_balancer(state, release);
                vec![controller]
            }
            "elasticsearch" => vec![service(release.name.clone(), 9200)],
            "kibana" => vec![service(release.name.clone(), 5601)],
            "fluentd" => vec![service(format!("{}-forwarder", release.name), 24224)],
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl ClusterProvisioner for SimulatedCloud {
    async fn create(&self, spec: &ClusterSpec) -> ProviderResult<ClusterInfo> {
        self.begin("create", spec.label.clone(), &spec.label).await?;

        let mut state = self.state();
        let next_id = 80_000 + state.clusters.len();
        let info = state
            .clusters
            .entry(spec.label.clone())
            .or_insert_with(|| {
                let kubeconfig = format!(
                    "apiVersion: v1\nkind: Config\ncurrent-context: lke{next_id}-ctx\nclusters:\n- name: lke{next_id}\n  cluster:\n    server: https://{next_id}.{}.simulated.test:443\n",
                    spec.region
                );
                ClusterInfo {
                    id: next_id.to_string(),
                    kubeconfig: STANDARD.encode(kubeconfig),
                }
            })
            .clone();
        Ok(info)
    }
}

#[async_trait]
impl PlatformConnector for SimulatedCloud {
    async fn connect(&self, kubeconfig: &str) -> ProviderResult<()> {
        self.begin("connect", "kubeconfig".to_string(), "k8s-provider")
            .await?;
        if !kubeconfig.contains("kind: Config") {
            return Err(ProviderError::Rejected {
                operation: "connect",
                message: "kubeconfig is not a Config document".to_string(),
            });
        }
        self.state().connected = true;
        Ok(())
    }
}

#[async_trait]
impl ResourceApplier for SimulatedCloud {
    async fn apply(&self, kind: ObjectKind, spec: &ObjectSpec) -> ProviderResult<ObjectStatus> {
        let key = spec.metadata.key();
        self.begin("apply", format!("{kind} {key}"), &spec.metadata.name)
            .await?;

        let ports = spec
            .body
            .get("ports")
            .and_then(serde_json::Value::as_array)
            .map(|ports| {
                ports
                    .iter()
                    .filter_map(|port| serde_json::from_value::<ServicePort>(port.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        let mut status = ObjectStatus::new(kind, key.clone());
        status.ports = ports;

        let mut state = self.state();
        if !state.connected {
            return Err(ProviderError::Unavailable {
                operation: "apply",
                message: "no platform connection".to_string(),
            });
        }
        state.objects.insert((kind, key), status.clone());
        Ok(status)
    }
}

#[async_trait]
impl PackageInstaller for SimulatedCloud {
    async fn install(&self, release: &ReleaseSpec) -> ProviderResult<ReleaseStatus> {
        self.begin(
            "install",
            format!("{}/{}", release.namespace, release.name),
            &release.name,
        )
        .await?;

        let mut state = self.state();
        let slot = (release.namespace.clone(), release.name.clone());
        let revision = state
            .releases
            .get(&slot)
            .map_or(1, |previous| previous.revision + 1);
        let status = ReleaseStatus {
            name: release.name.clone(),
            namespace: release.namespace.clone(),
            chart: release.chart.clone(),
            version: release.version.clone(),
            revision,
            state: "deployed".to_string(),
        };
        for service in Self::chart_services(&state, release) {
            state.objects.insert((service.kind, service.key.clone()), service);
        }
        state.releases.insert(slot, status.clone());
        Ok(status)
    }
}

#[async_trait]
impl ObjectLookup for SimulatedCloud {
    async fn get(&self, kind: ObjectKind, key: &ObjectKey) -> ProviderResult<ObjectStatus> {
        self.begin("get", format!("{kind} {key}"), &key.name).await?;
        self.state()
            .objects
            .get(&(kind, key.clone()))
            .cloned()
            .ok_or_else(|| ProviderError::NotFound {
                kind: kind.to_string(),
                key: key.to_string(),
            })
    }
}

/// Load a persisted inventory. A missing file is an empty world.
///
/// # Errors
///
/// Returns an error when the file exists but cannot be read or decoded.
pub fn load_inventory(path: &Path) -> Result<SimulatedInventory, StateError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            return Ok(SimulatedInventory::default());
        }
        Err(source) => {
            return Err(StateError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_str(&contents).map_err(|source| StateError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

/// # Errors
///
/// Returns an error when the inventory cannot be encoded or written.
pub fn save_inventory(path: &Path, inventory: &SimulatedInventory) -> Result<(), StateError> {
    let encoded =
        serde_json::to_vec_pretty(inventory).map_err(|source| StateError::Encode { source })?;
    write_private_file(path, &encoded).map_err(|source| StateError::Write {
        path: path.to_path_buf(),
        source,
    })
}
