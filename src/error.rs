use serde::Serialize;
use thiserror::Error;
use warp::http::StatusCode;
use warp::{Rejection, Reply};

use crate::auth::AuthError;
use crate::topk::SelectError;
use crate::CatalogError;

/// Request-level error taxonomy. Every rejected request maps to one of
/// these and surfaces as a JSON body with a stable code; internal detail
/// is logged, never echoed to the caller.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Authentication(String),

    #[error("Unauthorized")]
    Authorization,

    #[error("{0}")]
    Validation(String),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("{0}")]
    NotFound(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Authentication(_) | ApiError::NotFound(_) => StatusCode::UNAUTHORIZED,
            ApiError::Authorization => StatusCode::FORBIDDEN,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Authentication(_) => "AUTH",
            ApiError::Authorization => "FORBIDDEN",
            ApiError::Validation(_) => "VALIDATION",
            ApiError::Upstream(_) => "UPSTREAM",
            ApiError::NotFound(_) => "NOT_FOUND",
        }
    }

    /// Caller-facing message. Upstream detail stays in the logs.
    fn message(&self) -> String {
        match self {
            ApiError::Upstream(_) => "Upstream failure".to_string(),
            other => other.to_string(),
        }
    }
}

impl warp::reject::Reject for ApiError {}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::MissingToken | AuthError::InvalidToken => {
                ApiError::Authentication(e.to_string())
            }
            AuthError::Unauthorized => ApiError::Authorization,
            // Unknown username is a lookup miss, still surfaced as 401
            AuthError::UnknownUser => ApiError::NotFound(e.to_string()),
            AuthError::InvalidPassword | AuthError::MissingCredentials => {
                ApiError::Authentication(e.to_string())
            }
        }
    }
}

impl From<SelectError> for ApiError {
    fn from(e: SelectError) -> Self {
        ApiError::Validation(e.to_string())
    }
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::DimensionMismatch { .. } => ApiError::Validation(e.to_string()),
            CatalogError::Io(_) | CatalogError::PoisonedLock => ApiError::Upstream(e.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

/// Terminal rejection stage: turn any rejection into the structured JSON
/// error body.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, std::convert::Infallible> {
    let (status, body) = if let Some(api) = err.find::<ApiError>() {
        if matches!(api, ApiError::Upstream(_)) {
            tracing::error!(detail = %api, "upstream failure");
        }
        (
            api.status(),
            ErrorBody {
                error: api.message(),
                code: api.code(),
            },
        )
    } else if err.is_not_found() {
        (
            StatusCode::NOT_FOUND,
            ErrorBody {
                error: "Not found".into(),
                code: "NOT_FOUND",
            },
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            ErrorBody {
                error: "Method not allowed".into(),
                code: "VALIDATION",
            },
        )
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            ErrorBody {
                error: "Payload too large".into(),
                code: "VALIDATION",
            },
        )
    } else if err.find::<warp::body::BodyDeserializeError>().is_some()
        || err.find::<warp::reject::InvalidHeader>().is_some()
    {
        (
            StatusCode::BAD_REQUEST,
            ErrorBody {
                error: "Malformed request".into(),
                code: "VALIDATION",
            },
        )
    } else {
        tracing::error!(?err, "unhandled rejection");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorBody {
                error: "Internal error".into(),
                code: "UPSTREAM",
            },
        )
    };

    Ok(warp::reply::with_status(warp::reply::json(&body), status))
}
