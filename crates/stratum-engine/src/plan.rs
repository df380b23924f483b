use std::collections::{BTreeSet, HashSet};

use futures::future::FutureExt;
use stratum_domain::{
    CallKind, ClusterInfo, ClusterSpec, ObjectKey, ObjectKind, ObjectSpec, ObjectStatus,
    PlanDescription, PlannedStep, ReleaseSpec, ReleaseStatus, StepId, StepKind, StepName,
};

use crate::deferred::Deferred;
use crate::error::{PlanError, ProviderError};
use crate::graph::build_execution_order;
use crate::secrets::SensitiveValues;
use crate::step::{CallRunner, ProviderCall, StepNode};

type PlanResult<T> = std::result::Result<T, PlanError>;

/// Opaque handle on a registered step, usable only as a dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token(StepId);

impl Token {
    #[must_use]
    pub const fn step(&self) -> &StepId {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct ClusterHandle {
    pub token: Token,
    pub info: Deferred<ClusterInfo>,
}

#[derive(Debug, Clone)]
pub struct ObjectHandle {
    pub token: Token,
    pub status: Deferred<ObjectStatus>,
}

#[derive(Debug, Clone)]
pub struct ReleaseHandle {
    pub token: Token,
    pub status: Deferred<ReleaseStatus>,
}

pub(crate) struct Export {
    pub name: String,
    pub value: Deferred<String>,
    pub sensitive: bool,
}

/// Step registry built during planning. Steps are appended in registration
/// order and never change afterwards; [`crate::Orchestrator`] consumes the
/// plan to execute it.
pub struct Plan {
    pub(crate) nodes: Vec<StepNode>,
    ids: HashSet<StepId>,
    pub(crate) exports: Vec<Export>,
    pub(crate) sensitive: SensitiveValues,
}

impl Default for Plan {
    fn default() -> Self {
        Self::new()
    }
}

impl Plan {
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            ids: HashSet::new(),
            exports: Vec::new(),
            sensitive: SensitiveValues::default(),
        }
    }

    /// Handle on the values this plan must never print.
    #[must_use]
    pub fn sensitive_values(&self) -> SensitiveValues {
        self.sensitive.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Register the cluster create call.
    ///
    /// # Errors
    ///
    /// Returns an error when the name is invalid or already registered.
    pub fn provision_cluster(
        &mut self,
        name: &str,
        spec: impl Into<Deferred<ClusterSpec>>,
        after: &[&Token],
    ) -> PlanResult<ClusterHandle> {
        let call: ProviderCall<ClusterSpec, ClusterInfo> = Box::new(|providers, spec| {
            async move { providers.cluster.create(&spec).await }.boxed()
        });
        let (token, info) = self.register(StepKind::Cluster, name, spec.into(), after, call)?;
        Ok(ClusterHandle { token, info })
    }

    /// Register the provider connection. Every platform call issued after it
    /// should depend on the returned token.
    ///
    /// # Errors
    ///
    /// Returns an error when the name is invalid or already registered.
    pub fn connect(
        &mut self,
        name: &str,
        kubeconfig: Deferred<String>,
        after: &[&Token],
    ) -> PlanResult<Token> {
        let call: ProviderCall<String, ()> = Box::new(|providers, kubeconfig| {
            async move { providers.connector.connect(&kubeconfig).await }.boxed()
        });
        let (token, _) = self.register(StepKind::Connection, name, kubeconfig, after, call)?;
        Ok(token)
    }

    /// Register a declarative object apply.
    ///
    /// # Errors
    ///
    /// Returns an error when the name is invalid or already registered.
    pub fn apply(
        &mut self,
        name: &str,
        kind: ObjectKind,
        spec: impl Into<Deferred<ObjectSpec>>,
        after: &[&Token],
    ) -> PlanResult<ObjectHandle> {
        let call: ProviderCall<ObjectSpec, ObjectStatus> = Box::new(move |providers, spec| {
            async move { providers.applier.apply(kind, &spec).await }.boxed()
        });
        let (token, status) =
            self.register(StepKind::Object(kind), name, spec.into(), after, call)?;
        Ok(ObjectHandle { token, status })
    }

    /// Register a chart installation.
    ///
    /// # Errors
    ///
    /// Returns an error when the name is invalid or already registered.
    pub fn install(
        &mut self,
        name: &str,
        release: impl Into<Deferred<ReleaseSpec>>,
        after: &[&Token],
    ) -> PlanResult<ReleaseHandle> {
        let call: ProviderCall<ReleaseSpec, ReleaseStatus> = Box::new(|providers, release| {
            async move { providers.installer.install(&release).await }.boxed()
        });
        let (token, status) = self.register(StepKind::Release, name, release.into(), after, call)?;
        Ok(ReleaseHandle { token, status })
    }

    /// Register a read of an existing object. Lookups are issued on every run.
    ///
    /// # Errors
    ///
    /// Returns an error when the name is invalid or already registered.
    pub fn lookup(
        &mut self,
        name: &str,
        kind: ObjectKind,
        key: impl Into<Deferred<ObjectKey>>,
        after: &[&Token],
    ) -> PlanResult<ObjectHandle> {
        self.lookup_checked(name, kind, key, after, |_| Ok(()))
    }

    /// Like [`Plan::lookup`], but the read only succeeds once `ready` accepts
    /// the observed status. A rejection fails the lookup step itself.
    ///
    /// # Errors
    ///
    /// Returns an error when the name is invalid or already registered.
    pub fn lookup_checked(
        &mut self,
        name: &str,
        kind: ObjectKind,
        key: impl Into<Deferred<ObjectKey>>,
        after: &[&Token],
        ready: fn(&ObjectStatus) -> Result<(), String>,
    ) -> PlanResult<ObjectHandle> {
        let call: ProviderCall<ObjectKey, ObjectStatus> = Box::new(move |providers, key| {
            async move {
                let status = providers.lookup.get(kind, &key).await?;
                ready(&status).map_err(|message| ProviderError::Unavailable {
                    operation: "lookup",
                    message,
                })?;
                Ok::<_, ProviderError>(status)
            }
            .boxed()
        });
        let (token, status) =
            self.register(StepKind::Lookup(kind), name, key.into(), after, call)?;
        Ok(ObjectHandle { token, status })
    }

    /// Publish a value in the provisioning report.
    ///
    /// # Errors
    ///
    /// Returns an error when an export with the same name already exists.
    pub fn export(&mut self, name: &str, value: Deferred<String>) -> PlanResult<()> {
        self.push_export(name, value, false)
    }

    /// Publish a value that is redacted wherever the report is rendered.
    ///
    /// # Errors
    ///
    /// Returns an error when an export with the same name already exists.
    pub fn export_secret(&mut self, name: &str, value: Deferred<String>) -> PlanResult<()> {
        self.push_export(name, value, true)
    }

    fn push_export(&mut self, name: &str, value: Deferred<String>, sensitive: bool) -> PlanResult<()> {
        if self.exports.iter().any(|export| export.name == name) {
            return Err(PlanError::DuplicateExport {
                name: name.to_string(),
            });
        }
        self.exports.push(Export {
            name: name.to_string(),
            value,
            sensitive,
        });
        Ok(())
    }

    /// Static description: identities, call types, edges and the execution
    /// order. Deferred contents never appear here.
    #[must_use]
    pub fn describe(&self) -> PlanDescription {
        let steps = self.planned_steps();
        let (execution_order, errors) = match build_execution_order(&steps) {
            Ok(order) => (order, Vec::new()),
            Err(error) => (Vec::new(), vec![error.to_string()]),
        };
        PlanDescription {
            steps,
            execution_order,
            exports: self.exports.iter().map(|export| export.name.clone()).collect(),
            errors,
        }
    }

    pub(crate) fn planned_steps(&self) -> Vec<PlannedStep> {
        self.nodes
            .iter()
            .map(|node| PlannedStep {
                id: node.id.clone(),
                call: node.call,
                depends_on: node.depends_on.clone(),
            })
            .collect()
    }

    /// Identity a step registered as `kind` under `name` receives.
    ///
    /// # Errors
    ///
    /// Returns an error when `name` is not a valid step name.
    pub fn step_id(kind: StepKind, name: &str) -> PlanResult<StepId> {
        let step_name = StepName::try_from(name).map_err(|source| PlanError::InvalidName {
            name: name.to_string(),
            source,
        })?;
        Ok(StepId::new(kind, step_name))
    }

    fn register<I, O>(
        &mut self,
        kind: StepKind,
        name: &str,
        input: Deferred<I>,
        after: &[&Token],
        call: ProviderCall<I, O>,
    ) -> PlanResult<(Token, Deferred<O>)>
    where
        I: serde::Serialize + Clone + Send + Sync + 'static,
        O: serde::Serialize + serde::de::DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let id = Self::step_id(kind, name)?;
        if self.ids.contains(&id) {
            return Err(PlanError::DuplicateStep { step: id });
        }

        // Explicit tokens first, then the steps the input was derived from.
        let mut seen = BTreeSet::new();
        let depends_on: Vec<StepId> = after
            .iter()
            .map(|token| token.step())
            .chain(input.sources().iter())
            .filter(|dependency| seen.insert((*dependency).clone()))
            .cloned()
            .collect();

        let (resolver, output) = Deferred::channel(id.clone());
        let call_kind: CallKind = kind.call_kind();
        self.ids.insert(id.clone());
        self.nodes.push(StepNode {
            id: id.clone(),
            call: call_kind,
            depends_on,
            runner: Box::new(CallRunner::new(input, resolver, call)),
        });
        Ok((Token(id), output))
    }
}
