use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;

use stratum_domain::{DomainValidationError, StepId};
use thiserror::Error;

/// Failure reported by an external collaborator (cluster service, platform
/// API, chart installer).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{operation} rejected: {message}")]
    Rejected {
        operation: &'static str,
        message: String,
    },
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: String },
    #[error("{operation} unavailable: {message}")]
    Unavailable {
        operation: &'static str,
        message: String,
    },
}

/// Error carried by deferred values and surfaced to the plan's caller.
///
/// Cloneable because one failure fans out to every consumer of the value.
#[derive(Debug, Clone, Error)]
pub enum ProvisionError {
    #[error("{step}: provisioning failed: {cause}")]
    Provisioning {
        step: StepId,
        #[source]
        cause: Arc<ProviderError>,
    },
    #[error("{step}: could not resolve value: {reason}")]
    Resolution { step: StepId, reason: String },
    #[error("{}configuration key \"{key}\": {reason}", step_prefix(.step.as_ref()))]
    Configuration {
        step: Option<StepId>,
        key: String,
        reason: String,
    },
    #[error("{step}: not attempted, plan aborted after an earlier failure")]
    Aborted { step: StepId },
    #[error("{step}: value was never produced")]
    Unresolved { step: StepId },
}

impl ProvisionError {
    #[must_use]
    pub fn provisioning(step: StepId, cause: ProviderError) -> Self {
        Self::Provisioning {
            step,
            cause: Arc::new(cause),
        }
    }

    #[must_use]
    pub fn resolution(step: &StepId, reason: impl Into<String>) -> Self {
        Self::Resolution {
            step: step.clone(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn configuration(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            step: None,
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Attribute a failure that names no step yet to `step`, the step whose
    /// input it broke.
    #[must_use]
    pub fn attributed_to(self, step: &StepId) -> Self {
        match self {
            Self::Configuration {
                step: None,
                key,
                reason,
            } => Self::Configuration {
                step: Some(step.clone()),
                key,
                reason,
            },
            other => other,
        }
    }

    /// Step that originated the failure, when there is one.
    #[must_use]
    pub const fn step(&self) -> Option<&StepId> {
        match self {
            Self::Provisioning { step, .. }
            | Self::Resolution { step, .. }
            | Self::Aborted { step }
            | Self::Unresolved { step } => Some(step),
            Self::Configuration { step, .. } => step.as_ref(),
        }
    }

    /// Whether this error only echoes an abort rather than a failure of its own.
    #[must_use]
    pub const fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted { .. } | Self::Unresolved { .. })
    }
}

impl From<ConfigError> for ProvisionError {
    fn from(error: ConfigError) -> Self {
        Self::configuration(error.key().unwrap_or("<config>"), error.to_string())
    }
}

fn step_prefix(step: Option<&StepId>) -> String {
    step.map(|step| format!("{step}: ")).unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("step {step} is registered twice; step identities must be unique")]
    DuplicateStep { step: StepId },
    #[error("export \"{name}\" is registered twice")]
    DuplicateExport { name: String },
    #[error("invalid step name \"{name}\"")]
    InvalidName {
        name: String,
        #[source]
        source: DomainValidationError,
    },
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("dependency graph has missing nodes:\n  - {details}")]
    MissingNodes { details: String },
    #[error("{message}")]
    Invariant { message: String },
    #[error("dependency cycle detected among: {cycle}")]
    CycleDetected { cycle: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read stack configuration: {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse stack configuration: {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("missing required configuration key \"{key}\"")]
    MissingKey { key: String },
    #[error("missing required secret \"{key}\"")]
    MissingSecret { key: String },
    #[error("\"{key}\" must be between {min} and {max}, got {value}")]
    OutOfRange {
        key: String,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("\"{key}\" is not a valid absolute URL: {value}")]
    InvalidUrl {
        key: String,
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("\"{key}\": {message}")]
    Invalid { key: String, message: String },
}

impl ConfigError {
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Read { .. } | Self::Parse { .. } => None,
            Self::MissingKey { key }
            | Self::MissingSecret { key }
            | Self::OutOfRange { key, .. }
            | Self::InvalidUrl { key, .. }
            | Self::Invalid { key, .. } => Some(key),
        }
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to read provisioning state: {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to decode provisioning state: {path}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode provisioning state")]
    Encode {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write provisioning state: {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no data directory available for the default state location (use --state)")]
    NoDataDir,
}

#[derive(Debug, Error)]
pub enum StackError {
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to render {name}")]
    Template {
        name: &'static str,
        #[source]
        source: tera::Error,
    },
}

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("invalid URI: expected scheme://path, got \"{uri}\"")]
    InvalidUri { uri: String },
    #[error("unsupported scheme \"{scheme}\" in secret URI \"{uri}\"")]
    UnsupportedScheme { scheme: String, uri: String },
    #[error("{scheme}:// URI requires {expected}, got \"{uri}\"")]
    InvalidSchemePath {
        scheme: &'static str,
        expected: &'static str,
        uri: String,
    },
    #[error("secret \"{uri}\" requires the \"{binary}\" CLI to be installed and on PATH")]
    CliMissing { uri: String, binary: &'static str },
    #[error("failed to execute \"{provider_binary}\" ({binary_path}) for secret \"{uri}\"")]
    CommandSpawn {
        provider_binary: String,
        binary_path: PathBuf,
        uri: String,
        #[source]
        source: io::Error,
    },
    #[error("\"{provider_binary}\" exited with {status}: {stderr}")]
    CommandFailed {
        provider_binary: String,
        status: ExitStatus,
        stderr: String,
    },
}
