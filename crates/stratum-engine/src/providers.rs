use std::sync::Arc;

use async_trait::async_trait;
use stratum_domain::{
    ClusterInfo, ClusterSpec, ObjectKey, ObjectKind, ObjectSpec, ObjectStatus, ReleaseSpec,
    ReleaseStatus,
};

use crate::error::ProviderError;

type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Managed cluster service.
#[async_trait]
pub trait ClusterProvisioner: Send + Sync {
    async fn create(&self, spec: &ClusterSpec) -> ProviderResult<ClusterInfo>;
}

/// Establishes the session every platform call after it runs in.
#[async_trait]
pub trait PlatformConnector: Send + Sync {
    async fn connect(&self, kubeconfig: &str) -> ProviderResult<()>;
}

/// Declarative object API of the target platform. Applying an object whose
/// key already exists updates it in place.
#[async_trait]
pub trait ResourceApplier: Send + Sync {
    async fn apply(&self, kind: ObjectKind, spec: &ObjectSpec) -> ProviderResult<ObjectStatus>;
}

/// Chart installer.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    async fn install(&self, release: &ReleaseSpec) -> ProviderResult<ReleaseStatus>;
}

/// Reads an existing object by composite key.
#[async_trait]
pub trait ObjectLookup: Send + Sync {
    async fn get(&self, kind: ObjectKind, key: &ObjectKey) -> ProviderResult<ObjectStatus>;
}

/// Everything the orchestrator calls out to, handed in explicitly at execution.
#[derive(Clone)]
pub struct ProviderRegistry {
    pub cluster: Arc<dyn ClusterProvisioner>,
    pub connector: Arc<dyn PlatformConnector>,
    pub applier: Arc<dyn ResourceApplier>,
    pub installer: Arc<dyn PackageInstaller>,
    pub lookup: Arc<dyn ObjectLookup>,
}

impl ProviderRegistry {
    /// Use one backend for every collaborator.
    #[must_use]
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: ClusterProvisioner
            + PlatformConnector
            + ResourceApplier
            + PackageInstaller
            + ObjectLookup
            + 'static,
    {
        Self {
            cluster: backend.clone(),
            connector: backend.clone(),
            applier: backend.clone(),
            installer: backend.clone(),
            lookup: backend,
        }
    }
}
