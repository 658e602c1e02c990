use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// §7's abstract error taxonomy as a single enum, so every handler
/// returns the same shape of failure regardless of which component
/// raised it. Handlers map component-specific errors onto this at the
/// boundary rather than leaking `StoreError`/`DispatchError` to callers.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    PreconditionFailed(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("event bus unavailable")]
    BusUnavailable,
    #[error("unknown pipeline '{0}'")]
    PipelineNotFound(String),
    #[error("webhook signature invalid")]
    SignatureInvalid,
    #[error("rate limited")]
    RateLimited,
    #[error("internal error")]
    TransientInternal(#[source] anyhow::Error),
}

impl ControlPlaneError {
    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PreconditionFailed(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::BusUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::PipelineNotFound(_) => StatusCode::BAD_REQUEST,
            Self::SignatureInvalid => StatusCode::UNAUTHORIZED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::TransientInternal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ControlPlaneError {
    fn into_response(self) -> Response {
        if let Self::TransientInternal(err) = &self {
            tracing::error!(error = %err, "unhandled internal error");
        }
        let status = self.status();
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<djinnbot_store::StoreError> for ControlPlaneError {
    fn from(err: djinnbot_store::StoreError) -> Self {
        match err {
            djinnbot_store::StoreError::NotFound => Self::NotFound,
            djinnbot_store::StoreError::Conflict(msg) => Self::Conflict(msg),
            other => Self::TransientInternal(other.into()),
        }
    }
}

impl From<djinnbot_dispatcher::DispatchError> for ControlPlaneError {
    fn from(err: djinnbot_dispatcher::DispatchError) -> Self {
        use djinnbot_dispatcher::DispatchError::*;
        match err {
            PipelineNotFound(id) => Self::PipelineNotFound(id),
            InvalidInput(msg) => Self::InvalidInput(msg),
            IllegalTransition(msg) => Self::PreconditionFailed(msg),
            RunNotFound => Self::NotFound,
            Store(store_err) => store_err.into(),
            Bus(bus_err) => Self::TransientInternal(bus_err.into()),
        }
    }
}

impl From<djinnbot_bus::BusError> for ControlPlaneError {
    fn from(err: djinnbot_bus::BusError) -> Self {
        Self::TransientInternal(err.into())
    }
}

impl From<anyhow::Error> for ControlPlaneError {
    fn from(err: anyhow::Error) -> Self {
        Self::TransientInternal(err)
    }
}

pub type ControlPlaneResult<T> = Result<T, ControlPlaneError>;
