// SPDX-License-Identifier: MIT

//! Brave web search

use super::{search_each, strip_html, truncate_body, SearchHit, SearchSource, SourceTag, DEFAULT_MAX_QUERIES};
use crate::adk::error::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

const BRAVE_WEB_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";
const RESULTS_PER_QUERY: u32 = 5;

#[derive(Debug, Deserialize)]
struct WebResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    age: Option<String>,
}

fn web_hits(body: &Value) -> Result<Vec<SearchHit>, SearchError> {
    let Some(results) = body.get("web").and_then(|w| w.get("results")) else {
        // No web section means no results for this query
        return Ok(Vec::new());
    };

    let results: Vec<WebResult> =
        serde_json::from_value(results.clone()).map_err(|e| SearchError::Decode {
            provider: "brave".to_string(),
            message: e.to_string(),
        })?;

    Ok(results
        .into_iter()
        .filter(|r| !r.title.trim().is_empty())
        .map(|r| {
            let mut hit = SearchHit::new(SourceTag::Web, strip_html(&r.title), r.url)
                .with_description(strip_html(&r.description));
            hit.date = r.age;
            hit
        })
        .collect())
}

/// General web search through the Brave Search API
pub struct BraveWebSearch {
    client: Client,
    api_key: String,
    url: String,
    max_queries: usize,
}

impl BraveWebSearch {
    pub fn new(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            url: BRAVE_WEB_SEARCH_URL.to_string(),
            max_queries: DEFAULT_MAX_QUERIES,
        }
    }

    pub fn with_max_queries(mut self, max_queries: usize) -> Self {
        self.max_queries = max_queries;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    async fn search_one(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let count = RESULTS_PER_QUERY.to_string();
        let resp = self
            .client
            .get(&self.url)
            .query(&[("q", query), ("count", count.as_str())])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await?;
            return Err(SearchError::Status {
                provider: "brave".to_string(),
                status: status.as_u16(),
                body: truncate_body(&text),
            });
        }

        let body: Value = resp.json().await?;
        web_hits(&body)
    }
}

#[async_trait]
impl SearchSource for BraveWebSearch {
    fn tag(&self) -> SourceTag {
        SourceTag::Web
    }

    async fn search(&self, queries: &[String]) -> Result<Vec<SearchHit>, SearchError> {
        search_each(self.tag(), queries, self.max_queries, |query| async move {
            self.search_one(&query).await
        })
        .await
    }
}
