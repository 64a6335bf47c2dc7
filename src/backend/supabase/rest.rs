//! PostgREST reads.

use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::ACCEPT;

use super::{ServiceClient, check};
use crate::backend::{RelationalStore, Result, Select};

#[async_trait]
impl RelationalStore for ServiceClient {
    async fn select(&self, query: &Select) -> Result<Vec<serde_json::Value>> {
        let mut url = self.conn.endpoint(&["rest", "v1", query.table.as_str()])?;
        {
            let mut pairs = url.query_pairs_mut();
            if !query.columns.is_empty() {
                pairs.append_pair("select", &query.columns.join(","));
            }
            for filter in &query.filters {
                pairs.append_pair(&filter.column, &format!("eq.{}", filter.value));
            }
        }

        let response = check(
            self.conn
                .request(Method::GET, url)
                .header(ACCEPT, "application/json")
                .send()
                .await?,
        )
        .await?;

        Ok(response.json().await?)
    }
}
