//! Ports towards the backend-as-a-service.
//!
//! The orchestrator only ever talks to these traits. [`supabase`] holds the
//! HTTP adapters; tests swap in in-memory doubles.

pub mod supabase;

use async_trait::async_trait;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, BackendError>;

/// Failures reported by a backend collaborator.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend answered {status}: {message}")]
    Status { status: u16, message: String },

    #[error("backend resource not found")]
    NotFound,

    #[error("invalid backend payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid backend url: {0}")]
    Url(#[from] url::ParseError),
}

/// Canonical account as known by the auth service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Equality filter on a column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

/// Read query against a table of the relational store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Select {
    pub table: String,
    pub columns: Vec<String>,
    pub filters: Vec<Filter>,
}

impl Select {
    /// Start a query on `table`.
    pub fn from(table: &str) -> Self {
        Self {
            table: table.to_owned(),
            columns: Vec::new(),
            filters: Vec::new(),
        }
    }

    /// Restrict returned columns.
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| (*c).to_owned()).collect();
        self
    }

    /// Add a `column = value` filter.
    pub fn eq(mut self, column: &str, value: &str) -> Self {
        self.filters.push(Filter {
            column: column.to_owned(),
            value: value.to_owned(),
        });
        self
    }
}

/// Auth operations run with the caller's own session.
#[async_trait]
pub trait SessionAuth: Send + Sync {
    /// Resolve the identity behind the session token.
    async fn current_user(&self) -> Result<Identity>;

    /// Terminate the session server-side.
    async fn sign_out(&self) -> Result<()>;
}

/// Builds caller-scoped sessions from a bearer token.
pub trait SessionProvider: Send + Sync {
    fn session(&self, token: &str) -> Box<dyn SessionAuth>;
}

/// Privileged auth operations.
#[async_trait]
pub trait AdminAuth: Send + Sync {
    /// Delete an identity. The backend cascades dependent rows.
    async fn delete_user(&self, id: &str) -> Result<()>;
}

/// Relational store access.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn select(&self, query: &Select) -> Result<Vec<serde_json::Value>>;
}

/// Object store access.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Remove `paths` from `bucket` in a single call.
    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<()>;
}

/// Accept identifiers serialized either as JSON strings or numbers.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!(
            "expected string or number identifier, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_builder() {
        let query = Select::from("users")
            .columns(&["id", "avatar"])
            .eq("user_id", "U1");

        assert_eq!(query.table, "users");
        assert_eq!(query.columns, vec!["id", "avatar"]);
        assert_eq!(
            query.filters,
            vec![Filter {
                column: "user_id".into(),
                value: "U1".into()
            }]
        );
    }

    #[test]
    fn test_string_or_number() {
        #[derive(Deserialize)]
        struct Row {
            #[serde(deserialize_with = "string_or_number")]
            id: String,
        }

        let row: Row = serde_json::from_str(r#"{"id": 42}"#).unwrap();
        assert_eq!(row.id, "42");
        let row: Row = serde_json::from_str(r#"{"id": "P1"}"#).unwrap();
        assert_eq!(row.id, "P1");
        assert!(serde_json::from_str::<Row>(r#"{"id": null}"#).is_err());
    }
}
