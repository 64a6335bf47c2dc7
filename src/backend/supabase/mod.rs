//! HTTP adapters for a Supabase-compatible backend.
//!
//! Two clients exist and are never mixed up: [`SessionClient`] carries the
//! anonymous key plus the caller's own token, [`ServiceClient`] carries the
//! service-role key and is only handed to the deletion orchestrator.

mod auth;
mod rest;
mod storage;

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::backend::{BackendError, Result, SessionAuth, SessionProvider};
use crate::config;

const API_KEY_HEADER: &str = "apikey";
const DEFAULT_TIMEOUT: u64 = 10; // seconds.

/// Entry point holding the shared HTTP pool and both credentials.
#[derive(Clone)]
pub struct Supabase {
    http: reqwest::Client,
    base: Url,
    anon_key: String,
    service_key: String,
}

impl Supabase {
    /// Create a new [`Supabase`] from backend configuration.
    pub fn new(config: &config::Backend) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(
                config.timeout.unwrap_or(DEFAULT_TIMEOUT),
            ))
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;

        Ok(Self {
            http,
            base: Url::parse(&config.url)?,
            anon_key: config.anon_key.clone(),
            service_key: config.service_role_key.clone(),
        })
    }

    /// Privileged client. Keep it away from untrusted code paths.
    pub fn service(&self) -> ServiceClient {
        ServiceClient {
            conn: Connection {
                http: self.http.clone(),
                base: self.base.clone(),
                api_key: self.service_key.clone(),
                bearer: self.service_key.clone(),
            },
        }
    }

    /// Client scoped to the caller's session.
    pub fn session_client(&self, token: &str) -> SessionClient {
        SessionClient {
            conn: Connection {
                http: self.http.clone(),
                base: self.base.clone(),
                api_key: self.anon_key.clone(),
                bearer: token.to_owned(),
            },
        }
    }
}

impl SessionProvider for Supabase {
    fn session(&self, token: &str) -> Box<dyn SessionAuth> {
        Box::new(self.session_client(token))
    }
}

/// Client acting as the caller. Never privileged.
#[derive(Clone)]
pub struct SessionClient {
    conn: Connection,
}

/// Client acting with the service-role key.
#[derive(Clone)]
pub struct ServiceClient {
    conn: Connection,
}

#[derive(Clone)]
struct Connection {
    http: reqwest::Client,
    base: Url,
    api_key: String,
    bearer: String,
}

impl Connection {
    /// Append `segments` to the base URL, each one percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| {
                BackendError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase)
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .header(API_KEY_HEADER, &self.api_key)
            .bearer_auth(&self.bearer)
    }
}

/// Error payloads differ between auth, rest and storage APIs.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    msg: Option<String>,
    message: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

impl ErrorBody {
    fn into_message(self) -> Option<String> {
        self.msg
            .or(self.message)
            .or(self.error_description)
            .or(self.error)
    }
}

/// Turn non-2xx answers into [`BackendError`].
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(BackendError::NotFound);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(ErrorBody::into_message)
        .unwrap_or(body);

    Err(BackendError::Status {
        status: status.as_u16(),
        message,
    })
}
