use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainValidationError {
    #[error("step name must not be empty")]
    EmptyStepName,
    #[error("step name must not contain whitespace or ':': {name:?}")]
    InvalidStepName { name: String },
    #[error("object name must not be empty")]
    EmptyObjectName,
    #[error("object key must be <name> or <namespace>/<name>, got {key:?}")]
    MalformedObjectKey { key: String },
}

/// Stable, user-chosen name of a provisioning step.
///
/// Together with the [`StepKind`] it forms the [`StepId`] that identifies the
/// external object across plan evaluations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StepName(String);

impl StepName {
    /// Create a step name, rejecting blank names and names that would make the
    /// rendered step identity ambiguous.
    ///
    /// # Errors
    ///
    /// Returns an error when `name` is blank or contains whitespace or `:`.
    pub fn new(name: String) -> Result<Self, DomainValidationError> {
        if name.trim().is_empty() {
            return Err(DomainValidationError::EmptyStepName);
        }
        if name.chars().any(|ch| ch.is_whitespace() || ch == ':') {
            return Err(DomainValidationError::InvalidStepName { name });
        }
        Ok(Self(name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StepName {
    type Error = DomainValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for StepName {
    type Error = DomainValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value.to_string())
    }
}

impl AsRef<str> for StepName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for StepName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(formatter)
    }
}

impl From<StepName> for String {
    fn from(value: StepName) -> Self {
        value.0
    }
}

/// Kinds of objects the resource applier and lookup understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectKind {
    ConfigFile,
    Namespace,
    ConfigMap,
    Secret,
    ServiceAccount,
    ClusterRole,
    ClusterRoleBinding,
    Deployment,
    Service,
    Ingress,
    HorizontalPodAutoscaler,
}

impl ObjectKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfigFile => "config-file",
            Self::Namespace => "namespace",
            Self::ConfigMap => "config-map",
            Self::Secret => "secret",
            Self::ServiceAccount => "service-account",
            Self::ClusterRole => "cluster-role",
            Self::ClusterRoleBinding => "cluster-role-binding",
            Self::Deployment => "deployment",
            Self::Service => "service",
            Self::Ingress => "ingress",
            Self::HorizontalPodAutoscaler => "horizontal-pod-autoscaler",
        }
    }

    /// Whether objects of this kind live outside any namespace.
    #[must_use]
    pub const fn is_cluster_scoped(self) -> bool {
        matches!(
            self,
            Self::ConfigFile | Self::Namespace | Self::ClusterRole | Self::ClusterRoleBinding
        )
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(tag = "type", content = "object", rename_all = "snake_case")]
pub enum StepKind {
    Cluster,
    Connection,
    Object(ObjectKind),
    Release,
    Lookup(ObjectKind),
}

impl StepKind {
    /// Create steps provision something; read steps only observe it.
    #[must_use]
    pub const fn call_kind(self) -> CallKind {
        match self {
            Self::Cluster | Self::Object(_) | Self::Release => CallKind::Create,
            Self::Connection | Self::Lookup(_) => CallKind::Read,
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cluster => formatter.write_str("cluster"),
            Self::Connection => formatter.write_str("connection"),
            Self::Release => formatter.write_str("release"),
            Self::Object(kind) => write!(formatter, "object:{kind}"),
            Self::Lookup(kind) => write!(formatter, "lookup:{kind}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Create,
    Read,
}

/// Identity of a step: same identity means same external object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct StepId {
    pub kind: StepKind,
    pub name: StepName,
}

impl StepId {
    #[must_use]
    pub const fn new(kind: StepKind, name: StepName) -> Self {
        Self { kind, name }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.kind, self.name)
    }
}

/// Composite key of a live object: `<namespace>/<name>` or a bare `<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    #[must_use]
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Parse a key rendered as `<namespace>/<name>` or `<name>`.
    ///
    /// # Errors
    ///
    /// Returns an error when either segment is empty or more than one `/` is present.
    pub fn parse(key: &str) -> Result<Self, DomainValidationError> {
        let parts: Vec<&str> = key.split('/').collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Ok(Self::cluster_scoped(*name)),
            [namespace, name] if !namespace.is_empty() && !name.is_empty() => {
                Ok(Self::namespaced(*namespace, *name))
            }
            [""] => Err(DomainValidationError::EmptyObjectName),
            _ => Err(DomainValidationError::MalformedObjectKey {
                key: key.to_string(),
            }),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(formatter, "{namespace}/{}", self.name),
            None => formatter.write_str(&self.name),
        }
    }
}

// ---------------------------------------------------------------------------
// Desired state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePool {
    pub count: u32,
    #[serde(rename = "type")]
    pub node_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub label: String,
    pub k8s_version: String,
    pub region: String,
    pub pools: Vec<NodePool>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

/// Desired shape of a platform object. `body` is the kind-specific payload and
/// is passed through to the applier untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSpec {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub body: serde_json::Value,
}

impl ObjectSpec {
    #[must_use]
    pub const fn new(metadata: ObjectMeta, body: serde_json::Value) -> Self {
        Self { metadata, body }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseSpec {
    pub name: String,
    pub namespace: String,
    pub chart: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub repository: String,
    #[serde(default)]
    pub values: serde_json::Value,
    pub timeout_secs: u64,
}

// ---------------------------------------------------------------------------
// Observed state
// ---------------------------------------------------------------------------

/// Connection info returned by the cluster provisioner. `kubeconfig` is the
/// base64-encoded credentials document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub id: String,
    pub kubeconfig: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerIngress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStatus {
    pub kind: ObjectKind,
    pub key: ObjectKey,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
    #[serde(default)]
    pub load_balancer: Vec<LoadBalancerIngress>,
}

impl ObjectStatus {
    #[must_use]
    pub const fn new(kind: ObjectKind, key: ObjectKey) -> Self {
        Self {
            kind,
            key,
            ports: Vec::new(),
            load_balancer: Vec::new(),
        }
    }

    /// In-cluster DNS name of a namespaced object.
    #[must_use]
    pub fn cluster_dns_name(&self) -> String {
        match &self.key.namespace {
            Some(namespace) => format!("{}.{namespace}.svc.cluster.local", self.key.name),
            None => self.key.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseStatus {
    pub name: String,
    pub namespace: String,
    pub chart: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub revision: u32,
    pub state: String,
}

// ---------------------------------------------------------------------------
// Plans and reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub id: StepId,
    pub call: CallKind,
    pub depends_on: Vec<StepId>,
}

/// Static description of a plan. Holds identities and edges only, never the
/// contents of deferred inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDescription {
    pub steps: Vec<PlannedStep>,
    pub execution_order: Vec<StepId>,
    pub exports: Vec<String>,
    pub errors: Vec<String>,
}

impl PlanDescription {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    #[must_use]
    pub fn step(&self, id: &StepId) -> Option<&PlannedStep> {
        self.steps.iter().find(|step| &step.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Created,
    Unchanged,
    Read,
    Failed,
    Skipped,
    Discarded,
}

impl StepOutcome {
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Created | Self::Unchanged | Self::Read)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: StepId,
    pub outcome: StepOutcome,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionReport {
    pub plan: PlanDescription,
    pub results: Vec<StepResult>,
    pub exports: BTreeMap<String, String>,
    pub errors: Vec<String>,
}

impl ProvisionReport {
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.errors.is_empty()
            || self
                .results
                .iter()
                .any(|result| result.outcome == StepOutcome::Failed)
    }

    #[must_use]
    pub fn count(&self, outcome: StepOutcome) -> usize {
        self.results
            .iter()
            .filter(|result| result.outcome == outcome)
            .count()
    }

    #[must_use]
    pub fn outcome_of(&self, id: &StepId) -> Option<StepOutcome> {
        self.results
            .iter()
            .find(|result| &result.step == id)
            .map(|result| result.outcome)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::{
        CallKind, DomainValidationError, ObjectKey, ObjectKind, StepId, StepKind, StepName,
    };

    #[test]
    fn step_name_rejects_blank_values() {
        let error = StepName::try_from("   ").expect_err("blank names must be rejected");
        assert!(matches!(error, DomainValidationError::EmptyStepName));
    }

    #[test]
    fn step_name_rejects_separator() {
        let error = StepName::try_from("a:b").expect_err("':' must be rejected");
        assert!(matches!(
            error,
            DomainValidationError::InvalidStepName { .. }
        ));
    }

    #[test]
    fn step_id_renders_kind_and_name() {
        let id = StepId::new(
            StepKind::Lookup(ObjectKind::Service),
            StepName::try_from("ingress-nginx-controller-svc").expect("name"),
        );
        assert_eq!(id.to_string(), "lookup:service:ingress-nginx-controller-svc");
        assert_eq!(id.kind.call_kind(), CallKind::Read);
    }

    #[test]
    fn object_key_parses_namespaced_form() {
        let key = ObjectKey::parse("nginx-ingress/ingress-nginx-controller").expect("parse");
        assert_eq!(key.namespace.as_deref(), Some("nginx-ingress"));
        assert_eq!(key.name, "ingress-nginx-controller");
        assert_eq!(key.to_string(), "nginx-ingress/ingress-nginx-controller");
    }

    #[test]
    fn object_key_rejects_extra_segments() {
        let error = ObjectKey::parse("a/b/c").expect_err("must fail");
        assert!(matches!(
            error,
            DomainValidationError::MalformedObjectKey { .. }
        ));
        let error = ObjectKey::parse("/name").expect_err("must fail");
        assert!(matches!(
            error,
            DomainValidationError::MalformedObjectKey { .. }
        ));
    }
}
