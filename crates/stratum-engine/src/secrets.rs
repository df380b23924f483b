use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::deferred::Deferred;
use crate::error::{ConfigError, ProvisionError, SecretError};

/// Set of plaintext values that must be redacted from anything printed.
#[derive(Debug, Clone, Default)]
pub struct SensitiveValues(Arc<Mutex<BTreeSet<String>>>);

impl SensitiveValues {
    pub fn insert(&self, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            return;
        }
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(value);
    }

    #[must_use]
    pub fn snapshot(&self) -> BTreeSet<String> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Configuration and secret lookups handed explicitly to the stack builder.
pub trait SecretSource: Send + Sync {
    /// Non-sensitive setting, known while planning.
    ///
    /// # Errors
    ///
    /// Returns an error when the key is not configured.
    fn get(&self, key: &str) -> Result<String, ConfigError>;

    /// Sensitive setting, fetched during execution. A missing key fails the
    /// returned value with a configuration error.
    fn get_secret(&self, key: &str) -> Deferred<String>;
}

/// [`SecretSource`] backed by the `config` and `secrets` sections of the stack
/// file. Secret values may be literals or password-manager references, which
/// are read through the manager's CLI the first time they are needed.
pub struct StackSecrets {
    config: BTreeMap<String, String>,
    secrets: BTreeMap<String, String>,
    sensitive: SensitiveValues,
    fetched: Mutex<HashMap<String, Deferred<String>>>,
}

impl StackSecrets {
    #[must_use]
    pub fn new(
        config: BTreeMap<String, String>,
        secrets: BTreeMap<String, String>,
        sensitive: SensitiveValues,
    ) -> Self {
        Self {
            config,
            secrets,
            sensitive,
            fetched: Mutex::new(HashMap::new()),
        }
    }

    fn fetch(&self, key: &str) -> Deferred<String> {
        let Some(raw) = self.secrets.get(key).cloned() else {
            return Deferred::failed(ProvisionError::from(ConfigError::MissingSecret {
                key: key.to_string(),
            }));
        };
        let sensitive = self.sensitive.clone();
        let key = key.to_string();
        Deferred::from_future(BTreeSet::new(), async move {
            let value = if is_secret_reference(&raw) {
                debug!(secret = %key, "reading secret through password manager");
                let uri = raw.clone();
                tokio::task::spawn_blocking(move || resolve_secret(&uri))
                    .await
                    .map_err(|error| {
                        ProvisionError::configuration(
                            &key,
                            format!("secret lookup did not complete: {error}"),
                        )
                    })?
                    .map_err(|error| ProvisionError::configuration(&key, error.to_string()))?
            } else {
                raw
            };
            sensitive.insert(value.clone());
            Ok(value)
        })
    }
}

impl SecretSource for StackSecrets {
    fn get(&self, key: &str) -> Result<String, ConfigError> {
        self.config
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::MissingKey {
                key: key.to_string(),
            })
    }

    fn get_secret(&self, key: &str) -> Deferred<String> {
        let mut fetched = self.fetched.lock().unwrap_or_else(PoisonError::into_inner);
        fetched
            .entry(key.to_string())
            .or_insert_with(|| self.fetch(key))
            .clone()
    }
}

/// Whether `value` names a password-manager entry rather than a literal.
#[must_use]
pub fn is_secret_reference(value: &str) -> bool {
    value
        .split_once("://")
        .is_some_and(|(scheme, _)| matches!(scheme, "op" | "bw" | "pp"))
}

#[derive(Debug)]
pub struct SecretCommand {
    pub binary: &'static str,
    pub args: Vec<String>,
}

/// Map a secret reference onto the CLI invocation that prints it.
///
/// # Errors
///
/// Returns an error for malformed URIs and unknown schemes.
pub fn parse_secret_uri(uri: &str) -> Result<SecretCommand, SecretError> {
    let Some((scheme, path)) = uri.split_once("://") else {
        return Err(SecretError::InvalidUri {
            uri: uri.to_string(),
        });
    };
    let invalid = |scheme: &'static str, expected: &'static str| SecretError::InvalidSchemePath {
        scheme,
        expected,
        uri: uri.to_string(),
    };
    let segments: Vec<&str> = path.split('/').collect();

    match scheme {
        "op" if path.is_empty() => Err(invalid("op", "a path (e.g. op://vault/item/field)")),
        "op" => Ok(SecretCommand {
            binary: "op",
            args: vec!["read".to_string(), uri.to_string()],
        }),
        "bw" => {
            let (item, field) = match segments.as_slice() {
                [item] => (*item, "password"),
                [item, field] if !field.is_empty() => (*item, *field),
                _ => return Err(invalid("bw", "bw://item or bw://item/field")),
            };
            if item.is_empty() {
                return Err(invalid("bw", "bw://item or bw://item/field"));
            }
            Ok(SecretCommand {
                binary: "bw",
                args: vec!["get".to_string(), field.to_string(), item.to_string()],
            })
        }
        "pp" => {
            if segments.len() != 3 || segments.iter().any(|segment| segment.is_empty()) {
                return Err(invalid("pp", "pp://vault/item/field"));
            }
            Ok(SecretCommand {
                binary: "pass-cli",
                args: vec![
                    "item".to_string(),
                    "view".to_string(),
                    format!("pass://{path}"),
                ],
            })
        }
        _ => Err(SecretError::UnsupportedScheme {
            scheme: scheme.to_string(),
            uri: uri.to_string(),
        }),
    }
}

/// Read a secret reference through its password-manager CLI.
///
/// # Errors
///
/// Returns an error when the URI is invalid, the CLI is not installed, or the
/// CLI exits unsuccessfully.
pub fn resolve_secret(uri: &str) -> Result<String, SecretError> {
    let command = parse_secret_uri(uri)?;
    let binary_path = which::which(command.binary).map_err(|_| SecretError::CliMissing {
        uri: uri.to_string(),
        binary: command.binary,
    })?;
    run_secret_command(&binary_path, command.binary, &command.args, uri)
}

fn run_secret_command(
    binary_path: &Path,
    provider_binary: &str,
    args: &[String],
    uri: &str,
) -> Result<String, SecretError> {
    let output = Command::new(binary_path)
        .args(args)
        .output()
        .map_err(|source| SecretError::CommandSpawn {
            provider_binary: provider_binary.to_string(),
            binary_path: binary_path.to_path_buf(),
            uri: uri.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(SecretError::CommandFailed {
            provider_binary: provider_binary.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use std::collections::BTreeMap;

    use super::{
        SecretSource, SensitiveValues, StackSecrets, is_secret_reference, parse_secret_uri,
        run_secret_command,
    };
    use crate::error::ProvisionError;

    fn source(secrets: &[(&str, &str)]) -> (StackSecrets, SensitiveValues) {
        let sensitive = SensitiveValues::default();
        let config = BTreeMap::from([("gh_user".to_string(), "octo".to_string())]);
        let secrets = secrets
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        (StackSecrets::new(config, secrets, sensitive.clone()), sensitive)
    }

    #[test]
    fn op_reference_is_passed_through() {
        let command = parse_secret_uri("op://vault/item/field").expect("parse");
        assert_eq!(command.binary, "op");
        assert_eq!(command.args, vec!["read", "op://vault/item/field"]);
    }

    #[test]
    fn bw_reference_defaults_to_password_field() {
        let command = parse_secret_uri("bw://registry").expect("parse");
        assert_eq!(command.args, vec!["get", "password", "registry"]);
        let command = parse_secret_uri("bw://registry/notes").expect("parse");
        assert_eq!(command.args, vec!["get", "notes", "registry"]);
    }

    #[test]
    fn pp_reference_needs_three_segments() {
        let command = parse_secret_uri("pp://v/i/f").expect("parse");
        assert_eq!(command.binary, "pass-cli");
        assert_eq!(command.args, vec!["item", "view", "pass://v/i/f"]);
        let error = parse_secret_uri("pp://vault/item").expect_err("must fail");
        assert!(error.to_string().contains("pp://"), "unexpected: {error}");
    }

    #[test]
    fn malformed_references_are_rejected() {
        let error = parse_secret_uri("plain").expect_err("must fail");
        assert!(error.to_string().contains("invalid URI"), "unexpected: {error}");
        let error = parse_secret_uri("vault://foo").expect_err("must fail");
        assert!(error.to_string().contains("unsupported scheme"), "unexpected: {error}");
        let error = parse_secret_uri("bw:///field").expect_err("must fail");
        assert!(error.to_string().contains("bw://"), "unexpected: {error}");
    }

    #[test]
    fn only_manager_schemes_count_as_references() {
        assert!(is_secret_reference("op://vault/item/field"));
        assert!(!is_secret_reference("https://example.com"));
        assert!(!is_secret_reference("plain-token"));
    }

    #[test]
    fn get_reads_plain_configuration() {
        let (secrets, _) = source(&[]);
        assert_eq!(secrets.get("gh_user").expect("configured"), "octo");
        let error = secrets.get("missing").expect_err("must fail");
        assert!(error.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn literal_secret_resolves_and_is_marked_sensitive() {
        let (secrets, sensitive) = source(&[("gh_pat", "tok-123")]);
        let token = secrets.get_secret("gh_pat");
        assert!(sensitive.snapshot().is_empty());

        assert_eq!(token.resolve().await.expect("secret"), "tok-123");
        assert!(sensitive.snapshot().contains("tok-123"));
    }

    #[tokio::test]
    async fn missing_secret_fails_with_configuration_error() {
        let (secrets, _) = source(&[]);
        let error = secrets
            .get_secret("elasticsearch_pwd")
            .resolve()
            .await
            .expect_err("must fail");
        assert!(matches!(
            error,
            ProvisionError::Configuration { ref key, .. } if key == "elasticsearch_pwd"
        ));
    }

    #[tokio::test]
    async fn missing_manager_cli_fails_the_secret() {
        let (secrets, _) = source(&[("gh_pat", "pp://vault/definitely-absent/field")]);
        if which::which("pass-cli").is_ok() {
            return;
        }
        let error = secrets
            .get_secret("gh_pat")
            .resolve()
            .await
            .expect_err("must fail");
        assert!(error.to_string().contains("pass-cli"), "unexpected: {error}");
    }

    #[cfg(unix)]
    #[test]
    fn secret_command_output_is_trimmed() {
        let shell = which::which("sh").expect("sh should exist");
        let output = run_secret_command(
            &shell,
            "sh",
            &["-c".to_string(), "printf ' secret-value\\n'".to_string()],
            "op://vault/item/field",
        )
        .expect("shell command should succeed");
        assert_eq!(output, "secret-value");
    }
}
