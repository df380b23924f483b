use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to encode plan description as JSON")]
    PlanJson {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode provisioning report as JSON")]
    ReportJson {
        #[source]
        source: serde_json::Error,
    },
}
