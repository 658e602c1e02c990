use thiserror::Error;

/// §7's abstract error kinds this component can raise, as a typed enum
/// rather than bare `anyhow` — `djinnbot-server` maps these onto HTTP
/// status codes at the boundary.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown pipeline '{0}'")]
    PipelineNotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("illegal transition: {0}")]
    IllegalTransition(String),
    #[error("run not found")]
    RunNotFound,
    #[error(transparent)]
    Store(#[from] djinnbot_store::StoreError),
    #[error(transparent)]
    Bus(#[from] djinnbot_bus::BusError),
}
