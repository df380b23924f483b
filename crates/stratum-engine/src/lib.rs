mod config;
mod credentials;
mod deferred;
mod error;
mod fs_util;
mod graph;
mod orchestrator;
mod plan;
mod providers;
mod resolve;
mod secrets;
mod sim;
mod stack;
mod state;
mod step;
mod template;

pub use config::{
    ApplicationSettings, AutoscalingSettings, ChartSettings, ChartSource, ClusterSettings,
    RegistrySettings, StackConfig,
};
pub use credentials::{
    DOCKER_CONFIG_KEY, DOCKER_CONFIG_SECRET_TYPE, DockerConfig, RegistryAuth, docker_config,
    registry_auth, registry_login_document, registry_secret,
};
pub use deferred::{Deferred, Resolution, Resolver, Resolving, combine_all, combine2, combine3};
pub use error::{
    ConfigError, GraphError, PlanError, ProviderError, ProvisionError, SecretError, StackError,
    StateError,
};
pub use graph::build_execution_order;
pub use orchestrator::{Execution, Orchestrator};
pub use plan::{ClusterHandle, ObjectHandle, Plan, ReleaseHandle, Token};
pub use providers::{
    ClusterProvisioner, ObjectLookup, PackageInstaller, PlatformConnector, ProviderRegistry,
    ResourceApplier,
};
pub use resolve::{
    HostnameDiscovery, controller_service_key, decode_kubeconfig, decoded_kubeconfig,
    discover_ingress_hostname, first_ingress_hostname, kubeconfig_context, persist_kubeconfig,
};
pub use secrets::{
    SecretCommand, SecretSource, SensitiveValues, StackSecrets, is_secret_reference,
    parse_secret_uri, resolve_secret,
};
pub use sim::{
    SimulatedCall, SimulatedCloud, SimulatedInventory, load_inventory, save_inventory,
};
pub use stack::{Platform, build_stack, define_stack};
pub use state::{
    ProvisionState, StepRecord, default_state_path, fingerprint, load_state, save_state,
};
pub use template::{FluentdOutput, fluentd_output_file, render_fluentd_output};
