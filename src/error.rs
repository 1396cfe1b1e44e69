// shadowwall-core/src/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeceptionError {
    #[error("Network IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No free port in range {0}-{1}")]
    PortAllocationExhausted(u16, u16),

    #[error("Honeypot instance quota reached ({0})")]
    MaxInstancesReached(usize),

    #[error("Unknown service type: {0}")]
    UnknownServiceType(String),

    #[error("Service emulator failed to start: {0}")]
    ServiceStartFailure(String),

    #[error("Strategy deployment failed: {0}")]
    StrategyDeploymentFailure(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// Fold internal anyhow errors into the public error type.
impl From<anyhow::Error> for DeceptionError {
    fn from(err: anyhow::Error) -> Self {
        DeceptionError::Internal(err.to_string())
    }
}
