use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    aggregation::{AggregationError, UnknownMetric},
    models::Status,
    store::StoreError,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("feedback '{0}' does not exist")]
    NotFound(String),
    #[error(transparent)]
    InvalidMetric(#[from] UnknownMetric),
    #[error("invalid feedback: {0}")]
    InvalidFeedback(String),
    #[error("feedback cannot be moved back to {0}")]
    InvalidModeration(Status),
    #[error("feedback '{0}' is still pending and has no status to toggle")]
    NotModerated(String),
    #[error("feedback '{0}' was moderated by someone else in the meantime")]
    ModeratedConcurrently(String),
    #[error(transparent)]
    AggregationFailed(#[from] AggregationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Default, Serialize, ToSchema)]
pub struct ErrorReply {
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ErrorReply {
    pub fn from(error: &Error) -> Self {
        use Error::*;
        match error {
            NotFound(_) | NotModerated(_) | ModeratedConcurrently(_) => ErrorReply {
                message: Some(error.to_string()),
                ..Default::default()
            },
            AggregationFailed(e) => ErrorReply {
                error: Some(format!("{e}: {}", e.source)),
                ..Default::default()
            },
            _ => ErrorReply {
                error: Some(error.to_string()),
                ..Default::default()
            },
        }
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        use Error::*;
        match self {
            NotFound(_) => StatusCode::NOT_FOUND,
            InvalidMetric(_) | InvalidFeedback(_) | InvalidModeration(_) => StatusCode::BAD_REQUEST,
            NotModerated(_) | ModeratedConcurrently(_) => StatusCode::CONFLICT,
            AggregationFailed(_) | Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        HttpResponse::build(self.status_code()).json(ErrorReply::from(self))
    }
}
