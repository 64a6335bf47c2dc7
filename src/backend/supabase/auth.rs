//! Auth (GoTrue) endpoints.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::json;

use super::{ServiceClient, SessionClient, check};
use crate::backend::{AdminAuth, Identity, Result, SessionAuth};

#[async_trait]
impl SessionAuth for SessionClient {
    async fn current_user(&self) -> Result<Identity> {
        let url = self.conn.endpoint(&["auth", "v1", "user"])?;
        let response = check(self.conn.request(Method::GET, url).send().await?).await?;

        Ok(response.json::<Identity>().await?)
    }

    async fn sign_out(&self) -> Result<()> {
        let mut url = self.conn.endpoint(&["auth", "v1", "logout"])?;
        url.query_pairs_mut().append_pair("scope", "global");

        check(self.conn.request(Method::POST, url).send().await?).await?;
        Ok(())
    }
}

#[async_trait]
impl AdminAuth for ServiceClient {
    async fn delete_user(&self, id: &str) -> Result<()> {
        let url = self.conn.endpoint(&["auth", "v1", "admin", "users", id])?;

        check(
            self.conn
                .request(Method::DELETE, url)
                .json(&json!({ "should_soft_delete": false }))
                .send()
                .await?,
        )
        .await?;
        Ok(())
    }
}
