//! Application-wide error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use brickfi_client::ClientError;
use thiserror::Error;

use crate::api::ErrorResponse;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Chain error: {0}")]
    Chain(#[from] ClientError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IPFS configuration unavailable")]
    UploadUnavailable,

    #[error("Error uploading file to IPFS")]
    Upload(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Admin session required")]
    Forbidden,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Chain(_) => StatusCode::BAD_GATEWAY,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            Self::Upload(details) => Some(details.clone()),
            _ => None,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{self}");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
                details: self.details(),
            }),
        )
            .into_response()
    }
}
