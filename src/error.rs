use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::store::StoreError;

/// Failure of a single forum RPC round trip.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("{method} transport failure: {reason}")]
    Transport { method: String, reason: String },
    #[error("{method} response code {status}")]
    Status { method: String, status: u16 },
    #[error("{method} response error {message}")]
    Protocol { method: String, message: String },
    #[error("{method} unexpected response shape: {reason}")]
    Shape { method: String, reason: String },
    #[error("{method} rejected: not authenticated")]
    Unauthenticated { method: String },
}

impl RpcError {
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, RpcError::Unauthenticated { .. })
    }
}

/// Login sequence failure. Cloneable so every caller coalesced onto one
/// in-flight login observes the same failure.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("login response carried no session cookie")]
    MissingSessionCookie,
    #[error("login page carried no csrf token")]
    MissingCsrfToken,
    #[error("login failed: {0}")]
    Rpc(#[from] RpcError),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    #[error("content fetch failed: {0}")]
    Rpc(#[from] RpcError),
}

impl ContentError {
    pub fn is_unauthenticated(&self) -> bool {
        match self {
            ContentError::Rpc(e) => e.is_unauthenticated(),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("{method} transport failure: {reason}")]
    Transport { method: String, reason: String },
    #[error("{method} response code {status}")]
    Status { method: String, status: u16 },
    #[error("{method} not ok: {error}")]
    NotOk { method: String, error: String },
    #[error("{method} unexpected response body: {reason}")]
    Shape { method: String, reason: String },
    #[error("{method} ok response without ts")]
    MissingHandle { method: String },
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("no such class: {0}")]
    UnknownTenant(String),
    #[error("malformed config for class {course}: {reason}")]
    Malformed { course: String, reason: String },
    #[error("invalid value for {var}: {reason}")]
    InvalidVar { var: &'static str, reason: String },
}

/// Anything that aborts one bridge invocation.
#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error("author lookup failed: {0}")]
    Authors(RpcError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("bad request: {0}")] BadRequest(String),
    #[error("unauthorized")] Unauthorized,
    #[error("not found: {0}")] NotFound(String),
    #[error("upstream failure: {0}")] Upstream(String),
    #[error("internal error")] Internal,
}

impl From<BridgeError> for ApiError {
    fn from(e: BridgeError) -> Self {
        match &e {
            BridgeError::Config(ConfigError::UnknownTenant(course)) => ApiError::NotFound(course.clone()),
            BridgeError::Config(_) | BridgeError::Store(_) => {
                tracing::error!(error = %e, "bridge invocation failed");
                ApiError::Internal
            }
            BridgeError::Auth(_)
            | BridgeError::Content(_)
            | BridgeError::Authors(_)
            | BridgeError::Delivery(_) => ApiError::Upstream(e.to_string()),
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        HttpResponse::build(status).json(ApiErrorBody { error: self.to_string() })
    }
}
