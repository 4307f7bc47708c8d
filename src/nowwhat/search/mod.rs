// SPDX-License-Identifier: MIT

//! Search sources
//!
//! Every source turns a batch of queries into normalized [`SearchHit`]s.
//! Sources are listed in priority order by [`SourceTag`]; the fan-out
//! aggregator relies on that order when merging.

mod brave;
mod naver;

pub use brave::BraveWebSearch;
pub use naver::{NaverBlogSearch, NaverCredentials, NaverLocalSearch};

use crate::adk::error::SearchError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

/// Queries processed per source call unless configured otherwise
pub const DEFAULT_MAX_QUERIES: usize = 3;

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

/// Remove markup such as `<b>` that providers put around matched terms
pub fn strip_html(text: &str) -> String {
    HTML_TAG.replace_all(text, "").into_owned()
}

/// Where a hit came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    /// Map-style place search
    NaverMap,
    /// Blog and article search
    NaverBlog,
    /// General web search
    Web,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::NaverMap => "naver_map",
            SourceTag::NaverBlog => "naver_blog",
            SourceTag::Web => "web",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub source: SourceTag,
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telephone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub road_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl SearchHit {
    pub fn new(source: SourceTag, title: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            source,
            title: title.into(),
            link: link.into(),
            description: String::new(),
            category: None,
            telephone: None,
            address: None,
            road_address: None,
            author: None,
            date: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Road address when present, else the lot address
    pub fn location(&self) -> &str {
        self.road_address
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .or(self.address.as_deref())
            .unwrap_or("")
    }

    /// Key that identifies the same place or page across sources.
    ///
    /// The trimmed link when non-empty, else the normalized title joined
    /// with the location.
    pub fn merge_key(&self) -> String {
        let link = self.link.trim();
        if !link.is_empty() {
            return link.to_string();
        }
        format!("{}|{}", normalize(&self.title), normalize(self.location()))
    }
}

/// Lowercase and collapse whitespace
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A search provider adapter
#[async_trait]
pub trait SearchSource: Send + Sync {
    fn tag(&self) -> SourceTag;

    /// Search every query of the batch.
    ///
    /// A failing query is skipped; `Err` means nothing could be searched.
    async fn search(&self, queries: &[String]) -> Result<Vec<SearchHit>, SearchError>;
}

/// Run `search_one` for each of the first `max_queries` queries in
/// order, skipping failures. Fails only when every query failed.
pub(crate) async fn search_each<F, Fut>(
    tag: SourceTag,
    queries: &[String],
    max_queries: usize,
    mut search_one: F,
) -> Result<Vec<SearchHit>, SearchError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Vec<SearchHit>, SearchError>>,
{
    let batch: Vec<&String> = queries
        .iter()
        .filter(|q| !q.trim().is_empty())
        .take(max_queries)
        .collect();

    let mut hits = Vec::new();
    let mut failures = 0usize;
    for query in &batch {
        match search_one((*query).clone()).await {
            Ok(found) => {
                log::debug!("{} returned {} hits for '{}'", tag, found.len(), query);
                hits.extend(found);
            }
            Err(e) => {
                failures += 1;
                log::error!("{} search failed for '{}': {}", tag, query, e);
            }
        }
    }

    if !batch.is_empty() && failures == batch.len() {
        return Err(SearchError::AllQueriesFailed(failures));
    }
    Ok(hits)
}

/// Body preview for provider error messages
pub(crate) fn truncate_body(body: &str) -> String {
    body.chars().take(200).collect()
}
