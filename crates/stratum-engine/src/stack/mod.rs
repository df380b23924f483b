//! The EFK logging stack with its cache, document store and application.

mod datastores;
mod logging;
mod platform;
mod workload;

use stratum_domain::{ObjectKind, ObjectMeta, ObjectSpec, ObjectStatus, StepId};

use crate::config::StackConfig;
use crate::deferred::{Deferred, Resolution};
use crate::error::{ProvisionError, StackError};
use crate::plan::{ObjectHandle, Plan, Token};
use crate::secrets::SecretSource;

pub use platform::Platform;

/// Build the complete stack plan from validated configuration.
///
/// # Errors
///
/// Returns an error when the configuration is invalid or a step cannot be
/// registered.
pub fn build_stack(config: &StackConfig) -> Result<Plan, StackError> {
    let mut plan = Plan::new();
    let secrets = config.secret_source(plan.sensitive_values());
    define_stack(&mut plan, config, &secrets)?;
    Ok(plan)
}

/// Register every stack step on `plan`, reading settings through `secrets`.
///
/// # Errors
///
/// Returns an error when the configuration is invalid or a step cannot be
/// registered.
pub fn define_stack(
    plan: &mut Plan,
    config: &StackConfig,
    secrets: &dyn SecretSource,
) -> Result<(), StackError> {
    config.validate()?;

    let platform = platform::provision(plan, config)?;
    let logging = logging::provision(plan, config, secrets, &platform)?;
    let stores = datastores::provision(plan, &platform, &logging)?;
    workload::provision(plan, config, secrets, &platform, &logging, &stores)?;

    plan.export("hostname", platform.hostname.clone())?;
    Ok(())
}

/// Namespace named `name`, labelled with its own name.
fn namespace(
    plan: &mut Plan,
    step: &str,
    name: &str,
    after: &[&Token],
) -> Result<ObjectHandle, StackError> {
    let spec = ObjectSpec::new(
        ObjectMeta::named(name).label("name", name),
        serde_json::json!({}),
    );
    Ok(plan.apply(step, ObjectKind::Namespace, spec, after)?)
}

/// Name of the namespace an applied namespace object ended up with.
fn namespace_name(namespace: &ObjectHandle) -> Deferred<String> {
    namespace.status.map(|status| status.key.name)
}

/// Namespace of the object `step` reported. Objects placed next to it must
/// land in the same namespace, so a cluster-scoped status is an error.
fn namespace_of(step: &StepId, status: &ObjectStatus) -> Resolution<String> {
    status.key.namespace.clone().ok_or_else(|| {
        ProvisionError::resolution(step, format!("{} is not namespaced", status.key))
    })
}

#[cfg(test)]
mod tests;
