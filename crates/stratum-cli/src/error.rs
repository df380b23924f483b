use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    ArgumentParse(#[from] clap::Error),
    #[error(transparent)]
    Config(#[from] stratum_engine::ConfigError),
    #[error(transparent)]
    Stack(#[from] stratum_engine::StackError),
    #[error(transparent)]
    Graph(#[from] stratum_engine::GraphError),
    #[error(transparent)]
    State(#[from] stratum_engine::StateError),
    #[error(transparent)]
    Report(#[from] stratum_report::ReportError),
    #[error("failed to start the async runtime")]
    Runtime {
        #[source]
        source: std::io::Error,
    },
}
