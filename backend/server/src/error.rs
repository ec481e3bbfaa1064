use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::{avatar::AvatarError, database::StoreError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AppError::NotFound(what),
            StoreError::Conflict(reason) => AppError::Conflict(reason),
            other => AppError::InternalError(Box::new(other)),
        }
    }
}

impl From<AvatarError> for AppError {
    fn from(err: AvatarError) -> Self {
        match err {
            AvatarError::NotAnImage(_) | AvatarError::Decode(_) => {
                AppError::MalformedPayload(err.to_string())
            }
            AvatarError::TooLarge { .. } => AppError::PayloadTooLarge(err.to_string()),
            other => AppError::InternalError(Box::new(other)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::MalformedPayload { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::InternalError { .. } => {
                error!("{self}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, self.to_string()).into_response()
    }
}
