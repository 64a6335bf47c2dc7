//! Delete the caller's account, files included.

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::deletion::SUCCESS_MESSAGE;
use crate::router::bearer;
use crate::error::Result;
use crate::{AppState, ServerError};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    message: String,
}

pub async fn handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Response>> {
    let Some(token) = bearer(&headers) else {
        metrics::counter!("account_deletions_total", "outcome" => "authentication")
            .increment(1);
        return Err(ServerError::MissingToken);
    };
    let session = state.sessions.session(token);
    let deletion = Arc::clone(&state.deletion);

    // Detached: a client walking away must not leave a deletion half-done.
    let started = Instant::now();
    let outcome =
        tokio::spawn(async move { deletion.execute(session.as_ref()).await })
            .await
            .map_err(|err| ServerError::Internal {
                details: "deletion task did not complete".into(),
                source: Some(Box::new(err)),
            })?;
    metrics::histogram!("account_deletion_duration_seconds")
        .record(started.elapsed().as_secs_f64());

    match outcome {
        Ok(report) => {
            metrics::counter!("account_deletions_total", "outcome" => "success")
                .increment(1);
            tracing::info!(
                identity = %report.identity,
                had_profile = report.had_profile,
                avatars = report.avatar_paths.len(),
                post_images = report.post_paths.len(),
                unresolved = report.unresolved,
                failed_buckets = ?report.failed_buckets,
                "account deleted"
            );

            Ok(Json(Response {
                message: SUCCESS_MESSAGE.to_owned(),
            }))
        },
        Err(err) => {
            metrics::counter!("account_deletions_total", "outcome" => err.kind())
                .increment(1);
            Err(err.into())
        },
    }
}
