//! Error handler for reaper.

use std::error::Error as StdError;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::deletion::DeletionError;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Deletion(#[from] DeletionError),

    /// No usable `Authorization` header. Same message as a rejected token.
    #[error("Authentication failed.")]
    MissingToken,

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
}

/// Body of every failed response.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    error: String,
}

/// Render `err` and all its sources, outermost first.
fn chain(err: &dyn StdError) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        // Backend internals stay in the logs.
        let message = match &self {
            ServerError::Internal { details, source } => {
                tracing::error!(
                    err = ?source.as_deref().map(|e| chain(e)),
                    %details,
                    "server returned 500 status"
                );
                "Internal Server Error".to_owned()
            },
            _ => {
                tracing::error!(err = %chain(&self), "account deletion failed");
                self.to_string()
            },
        };

        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ResponseError { error: message }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;
    use crate::backend::BackendError;

    async fn body(err: ServerError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_backend_details_are_hidden() {
        let err = ServerError::from(DeletionError::Lookup {
            what: "posts",
            source: BackendError::Status {
                status: 400,
                message: "relation \"posts\" does not exist".into(),
            },
        });

        let (status, json) = body(err).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json, serde_json::json!({"error": "Error fetching user posts."}));
    }

    #[tokio::test]
    async fn test_internal() {
        let (status, json) = body(ServerError::Internal {
            details: "task panicked".into(),
            source: None,
        })
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "Internal Server Error");
    }

    #[test]
    fn test_chain() {
        let err = DeletionError::IdentityDelete(BackendError::NotFound);
        assert_eq!(
            chain(&err),
            "Failed to delete user.: backend resource not found"
        );
    }
}
