//! Storage API.

use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;

use super::{ServiceClient, check};
use crate::backend::{ObjectStore, Result};

#[derive(Serialize)]
struct Remove<'a> {
    prefixes: &'a [String],
}

#[async_trait]
impl ObjectStore for ServiceClient {
    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<()> {
        let url = self.conn.endpoint(&["storage", "v1", "object", bucket])?;

        check(
            self.conn
                .request(Method::DELETE, url)
                .json(&Remove { prefixes: paths })
                .send()
                .await?,
        )
        .await?;
        Ok(())
    }
}
