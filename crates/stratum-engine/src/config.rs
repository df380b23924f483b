use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stratum_domain::{ClusterSpec, NodePool};
use url::Url;

use crate::error::ConfigError;
use crate::secrets::{SensitiveValues, StackSecrets};

type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Stack description loaded from YAML. Every section is optional and falls
/// back to the reference EFK deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StackConfig {
    pub stack: String,
    pub kubeconfig_path: PathBuf,
    pub cluster: ClusterSettings,
    pub config: BTreeMap<String, String>,
    pub secrets: BTreeMap<String, String>,
    pub charts: ChartSettings,
    pub registry: RegistrySettings,
    pub application: ApplicationSettings,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            stack: "dev".to_string(),
            kubeconfig_path: PathBuf::from("efk-cluster-kubeconfig.yaml"),
            cluster: ClusterSettings::default(),
            config: BTreeMap::new(),
            secrets: BTreeMap::new(),
            charts: ChartSettings::default(),
            registry: RegistrySettings::default(),
            application: ApplicationSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterSettings {
    pub label: String,
    pub k8s_version: String,
    pub region: String,
    pub pools: Vec<NodePool>,
    pub tags: Vec<String>,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            label: "efk-cluster".to_string(),
            k8s_version: "1.25".to_string(),
            region: "us-central".to_string(),
            pools: vec![NodePool {
                count: 3,
                node_type: "g6-dedicated-4".to_string(),
            }],
            tags: vec!["dev".to_string(), "poc".to_string()],
        }
    }
}

impl ClusterSettings {
    #[must_use]
    pub fn spec(&self) -> ClusterSpec {
        ClusterSpec {
            label: self.label.clone(),
            k8s_version: self.k8s_version.clone(),
            region: self.region.clone(),
            pools: self.pools.clone(),
            tags: self.tags.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChartSource {
    pub repository: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl ChartSource {
    fn new(repository: &str, version: Option<&str>) -> Self {
        Self {
            repository: repository.to_string(),
            version: version.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChartSettings {
    pub ingress_nginx: ChartSource,
    pub elasticsearch: ChartSource,
    pub kibana: ChartSource,
    pub fluentd: ChartSource,
}

const BITNAMI: &str = "https://charts.bitnami.com/bitnami";

impl Default for ChartSettings {
    fn default() -> Self {
        Self {
            ingress_nginx: ChartSource::new("https://kubernetes.github.io/ingress-nginx", None),
            elasticsearch: ChartSource::new(BITNAMI, Some("19.5.4")),
            kibana: ChartSource::new(BITNAMI, Some("10.2.9")),
            fluentd: ChartSource::new(BITNAMI, Some("5.5.12")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistrySettings {
    pub host: String,
    pub email: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            host: "ghcr.io".to_string(),
            email: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApplicationSettings {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub replicas: u32,
    pub port: u16,
    pub path: String,
    pub autoscaling: AutoscalingSettings,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: "languages-api".to_string(),
            namespace: "alura".to_string(),
            image: "ghcr.io/rodrigoafernandes/languages-api:24b7518bff37f26e9592fdf29c0e7d1da748ed4d"
                .to_string(),
            replicas: 2,
            port: 8080,
            path: "/alura-languages(/|$)(.*)".to_string(),
            autoscaling: AutoscalingSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutoscalingSettings {
    pub min_replicas: u32,
    pub max_replicas: u32,
    /// Average CPU utilization target, in percent.
    pub cpu_utilization: i64,
}

impl Default for AutoscalingSettings {
    fn default() -> Self {
        Self {
            min_replicas: 2,
            max_replicas: 10,
            cpu_utilization: 80,
        }
    }
}

impl StackConfig {
    /// Read, parse and validate a stack file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed, or when a
    /// value fails validation.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns the first invalid value found.
    pub fn validate(&self) -> ConfigResult<()> {
        require_non_empty("stack", &self.stack)?;
        require_non_empty("cluster.label", &self.cluster.label)?;
        require_non_empty("cluster.region", &self.cluster.region)?;
        if self.cluster.pools.is_empty() {
            return Err(ConfigError::Invalid {
                key: "cluster.pools".to_string(),
                message: "at least one node pool is required".to_string(),
            });
        }
        require_non_empty("registry.host", &self.registry.host)?;
        require_non_empty("application.image", &self.application.image)?;

        let charts = [
            ("charts.ingress_nginx.repository", &self.charts.ingress_nginx),
            ("charts.elasticsearch.repository", &self.charts.elasticsearch),
            ("charts.kibana.repository", &self.charts.kibana),
            ("charts.fluentd.repository", &self.charts.fluentd),
        ];
        for (key, chart) in charts {
            validate_repository(key, &chart.repository)?;
        }

        let autoscaling = &self.application.autoscaling;
        if !(1..=100).contains(&autoscaling.cpu_utilization) {
            return Err(ConfigError::OutOfRange {
                key: "application.autoscaling.cpu_utilization".to_string(),
                value: autoscaling.cpu_utilization,
                min: 1,
                max: 100,
            });
        }
        if autoscaling.min_replicas == 0 {
            return Err(ConfigError::Invalid {
                key: "application.autoscaling.min_replicas".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if autoscaling.min_replicas > autoscaling.max_replicas {
            return Err(ConfigError::Invalid {
                key: "application.autoscaling.min_replicas".to_string(),
                message: format!(
                    "{} exceeds max_replicas {}",
                    autoscaling.min_replicas, autoscaling.max_replicas
                ),
            });
        }
        Ok(())
    }

    /// Explicit configuration handle for the stack builder.
    #[must_use]
    pub fn secret_source(&self, sensitive: SensitiveValues) -> StackSecrets {
        StackSecrets::new(self.config.clone(), self.secrets.clone(), sensitive)
    }
}

fn require_non_empty(key: &str, value: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

fn validate_repository(key: &str, value: &str) -> ConfigResult<()> {
    let url = Url::parse(value).map_err(|source| ConfigError::InvalidUrl {
        key: key.to_string(),
        value: value.to_string(),
        source,
    })?;
    if !matches!(url.scheme(), "http" | "https" | "oci") || url.host_str().is_none() {
        return Err(ConfigError::Invalid {
            key: key.to_string(),
            message: format!("expected an http(s) or oci repository URL, got {value}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::StackConfig;
    use crate::error::{ConfigError, ProvisionError};

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("tempfile");
        file.write_all(contents.as_bytes()).expect("write");
        file
    }

    #[test]
    fn defaults_reproduce_reference_stack() {
        let config = StackConfig::default();
        config.validate().expect("defaults are valid");
        assert_eq!(config.cluster.label, "efk-cluster");
        assert_eq!(config.cluster.k8s_version, "1.25");
        assert_eq!(config.cluster.pools[0].count, 3);
        assert_eq!(config.registry.host, "ghcr.io");
        assert_eq!(config.application.autoscaling.cpu_utilization, 80);
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let file = write_config(
            "stack: staging\nconfig:\n  gh_user: octo\nsecrets:\n  gh_pat: tok\napplication:\n  replicas: 3\n",
        );
        let config = StackConfig::load(file.path()).expect("load");
        assert_eq!(config.stack, "staging");
        assert_eq!(config.application.replicas, 3);
        assert_eq!(config.application.port, 8080);
        assert_eq!(config.config.get("gh_user").map(String::as_str), Some("octo"));
        assert_eq!(config.charts.kibana.version.as_deref(), Some("10.2.9"));
    }

    #[test]
    fn out_of_range_cpu_target_is_a_configuration_error() {
        let file = write_config("application:\n  autoscaling:\n    cpu_utilization: 313\n");
        let error = StackConfig::load(file.path()).expect_err("313% must be rejected");
        assert!(matches!(
            error,
            ConfigError::OutOfRange { value: 313, min: 1, max: 100, .. }
        ));

        let surfaced = ProvisionError::from(error);
        assert!(matches!(
            surfaced,
            ProvisionError::Configuration { ref key, .. }
                if key == "application.autoscaling.cpu_utilization"
        ));
    }

    #[test]
    fn zero_cpu_target_is_rejected() {
        let mut config = StackConfig::default();
        config.application.autoscaling.cpu_utilization = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { value: 0, .. })
        ));
    }

    #[test]
    fn min_replicas_above_max_is_rejected() {
        let mut config = StackConfig::default();
        config.application.autoscaling.min_replicas = 11;
        let error = config.validate().expect_err("must fail");
        assert_eq!(error.key(), Some("application.autoscaling.min_replicas"));
    }

    #[test]
    fn relative_chart_repository_is_rejected() {
        let file = write_config("charts:\n  kibana:\n    repository: charts/bitnami\n");
        let error = StackConfig::load(file.path()).expect_err("must fail");
        assert!(matches!(error, ConfigError::InvalidUrl { .. }), "{error}");
    }

    #[test]
    fn unknown_keys_are_parse_errors() {
        let file = write_config("clusterr:\n  label: typo\n");
        let error = StackConfig::load(file.path()).expect_err("must fail");
        assert!(matches!(error, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let error = StackConfig::load(std::path::Path::new("/definitely/not/here.yaml"))
            .expect_err("must fail");
        assert!(matches!(error, ConfigError::Read { .. }));
    }
}
