// SPDX-License-Identifier: MIT

//! Naver Open API search: local places and blog posts

use super::{search_each, strip_html, truncate_body, SearchHit, SearchSource, SourceTag, DEFAULT_MAX_QUERIES};
use crate::adk::error::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

const NAVER_API_BASE: &str = "https://openapi.naver.com/v1/search";
const DISPLAY: u32 = 5;

/// Client id/secret pair for the Naver Open API
#[derive(Debug, Clone)]
pub struct NaverCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl NaverCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NaverResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    telephone: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    road_address: String,
}

#[derive(Debug, Deserialize)]
struct BlogItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    bloggername: String,
    #[serde(default)]
    postdate: String,
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn local_hits(body: &str) -> Result<Vec<SearchHit>, SearchError> {
    let response: NaverResponse<LocalItem> =
        serde_json::from_str(body).map_err(|e| SearchError::Decode {
            provider: "naver_local".to_string(),
            message: e.to_string(),
        })?;

    Ok(response
        .items
        .into_iter()
        .filter_map(|item| {
            let title = strip_html(&item.title);
            if title.trim().is_empty() {
                return None;
            }
            let mut hit = SearchHit::new(SourceTag::NaverMap, title, item.link)
                .with_description(strip_html(&item.description));
            hit.category = non_empty(strip_html(&item.category));
            hit.telephone = non_empty(item.telephone);
            hit.address = non_empty(item.address);
            hit.road_address = non_empty(item.road_address);
            Some(hit)
        })
        .collect())
}

fn blog_hits(body: &str) -> Result<Vec<SearchHit>, SearchError> {
    let response: NaverResponse<BlogItem> =
        serde_json::from_str(body).map_err(|e| SearchError::Decode {
            provider: "naver_blog".to_string(),
            message: e.to_string(),
        })?;

    Ok(response
        .items
        .into_iter()
        .filter_map(|item| {
            let title = strip_html(&item.title);
            if title.trim().is_empty() || item.link.trim().is_empty() {
                return None;
            }
            let mut hit = SearchHit::new(SourceTag::NaverBlog, title, item.link)
                .with_description(strip_html(&item.description));
            hit.author = non_empty(item.bloggername);
            hit.date = non_empty(item.postdate);
            Some(hit)
        })
        .collect())
}

/// Shared request plumbing for both Naver endpoints
#[derive(Clone)]
struct NaverClient {
    client: Client,
    credentials: NaverCredentials,
    base_url: String,
}

impl NaverClient {
    async fn get(&self, endpoint: &str, query: &str, sort: &str) -> Result<String, SearchError> {
        let url = format!("{}/{}.json", self.base_url, endpoint);
        let display = DISPLAY.to_string();
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("query", query),
                ("display", display.as_str()),
                ("sort", sort),
            ])
            .header("X-Naver-Client-Id", &self.credentials.client_id)
            .header("X-Naver-Client-Secret", &self.credentials.client_secret)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(SearchError::Status {
                provider: format!("naver_{}", endpoint),
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }
        Ok(body)
    }
}

/// Naver local (map) search, sorted by review count
pub struct NaverLocalSearch {
    inner: NaverClient,
    max_queries: usize,
}

impl NaverLocalSearch {
    pub fn new(client: Client, credentials: NaverCredentials) -> Self {
        Self {
            inner: NaverClient {
                client,
                credentials,
                base_url: NAVER_API_BASE.to_string(),
            },
            max_queries: DEFAULT_MAX_QUERIES,
        }
    }

    pub fn with_max_queries(mut self, max_queries: usize) -> Self {
        self.max_queries = max_queries;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.inner.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl SearchSource for NaverLocalSearch {
    fn tag(&self) -> SourceTag {
        SourceTag::NaverMap
    }

    async fn search(&self, queries: &[String]) -> Result<Vec<SearchHit>, SearchError> {
        search_each(self.tag(), queries, self.max_queries, |query| async move {
            let body = self.inner.get("local", &query, "comment").await?;
            local_hits(&body)
        })
        .await
    }
}

/// Naver blog search, newest first
pub struct NaverBlogSearch {
    inner: NaverClient,
    max_queries: usize,
}

impl NaverBlogSearch {
    pub fn new(client: Client, credentials: NaverCredentials) -> Self {
        Self {
            inner: NaverClient {
                client,
                credentials,
                base_url: NAVER_API_BASE.to_string(),
            },
            max_queries: DEFAULT_MAX_QUERIES,
        }
    }

    pub fn with_max_queries(mut self, max_queries: usize) -> Self {
        self.max_queries = max_queries;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.inner.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl SearchSource for NaverBlogSearch {
    fn tag(&self) -> SourceTag {
        SourceTag::NaverBlog
    }

    async fn search(&self, queries: &[String]) -> Result<Vec<SearchHit>, SearchError> {
        search_each(self.tag(), queries, self.max_queries, |query| async move {
            let body = self.inner.get("blog", &query, "date").await?;
            blog_hits(&body)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_hits_parsing() {
        let body = r#"{
            "items": [
                {
                    "title": "<b>가능동</b> 고기집",
                    "link": "",
                    "category": "한식&gt;육류",
                    "description": "",
                    "telephone": "",
                    "address": "경기도 의정부시 가능동 1",
                    "roadAddress": "경기도 의정부시 평화로 1",
                    "mapx": "1270000000",
                    "mapy": "377000000"
                },
                {"title": "", "link": "https://skip.example"}
            ]
        }"#;

        let hits = local_hits(body).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "가능동 고기집");
        assert_eq!(hits[0].source, SourceTag::NaverMap);
        assert_eq!(hits[0].telephone, None);
        assert_eq!(hits[0].road_address.as_deref(), Some("경기도 의정부시 평화로 1"));
        assert_eq!(hits[0].location(), "경기도 의정부시 평화로 1");
    }

    #[test]
    fn test_blog_hits_require_link() {
        let body = r#"{
            "items": [
                {"title": "<b>삼겹살</b> 후기", "link": "https://blog.example/1",
                 "description": "맛있는 <b>삼겹살</b>", "bloggername": "foodie", "postdate": "20240101"},
                {"title": "no link", "link": ""}
            ]
        }"#;

        let hits = blog_hits(body).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].description, "맛있는 삼겹살");
        assert_eq!(hits[0].author.as_deref(), Some("foodie"));
        assert_eq!(hits[0].date.as_deref(), Some("20240101"));
    }

    #[test]
    fn test_missing_items_is_empty() {
        assert!(blog_hits("{}").unwrap().is_empty());
        assert!(matches!(
            local_hits("not json"),
            Err(SearchError::Decode { .. })
        ));
    }
}
