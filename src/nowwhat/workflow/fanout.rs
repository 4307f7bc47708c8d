// SPDX-License-Identifier: MIT

//! Fan-out/fan-in over independent search sources
//!
//! All sources run concurrently and are awaited together. A source that
//! fails, or panics, yields [`Outcome::Failed`] and contributes no hits;
//! its siblings are unaffected.
//!
//! Merging is deterministic: outcomes are concatenated in source priority
//! order, never completion order. Caps are applied to the raw counts
//! first (per source, then per batch) and duplicates are removed after,
//! so a capped batch may end up with fewer hits than the total cap.

use crate::nowwhat::search::{SearchHit, SearchSource, SourceTag};
use futures::future::{join_all, FutureExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Result of one sub-task
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Ok(T),
    Failed { error: String },
}

impl<T> Outcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Outcome::Ok(_) => None,
            Outcome::Failed { error } => Some(error),
        }
    }
}

/// Await every task concurrently; outcomes keep the input order
pub async fn fan_out<T, E, Fut>(tasks: Vec<Fut>) -> Vec<Outcome<T>>
where
    E: Display,
    Fut: Future<Output = Result<T, E>>,
{
    let guarded = tasks
        .into_iter()
        .map(|task| AssertUnwindSafe(task).catch_unwind());

    join_all(guarded)
        .await
        .into_iter()
        .map(|result| match result {
            Ok(Ok(value)) => Outcome::Ok(value),
            Ok(Err(e)) => Outcome::Failed {
                error: e.to_string(),
            },
            Err(panic) => Outcome::Failed {
                error: panic_message(panic.as_ref()),
            },
        })
        .collect()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("task panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("task panicked: {}", s)
    } else {
        "task panicked".to_string()
    }
}

/// Raw-count limits for one search batch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchCaps {
    /// Hits kept from each source
    pub per_source: usize,
    /// Hits kept from the whole batch, before dedup
    pub total: usize,
    /// Queries dispatched to each source
    pub max_queries: usize,
}

impl Default for SearchCaps {
    fn default() -> Self {
        Self {
            per_source: 10,
            total: 30,
            max_queries: 3,
        }
    }
}

/// Per-source summary of a batch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceReport {
    pub source: SourceTag,
    /// Hits returned before any cap
    pub returned: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Merged result of one search batch
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchBatch {
    pub queries: Vec<String>,
    pub hits: Vec<SearchHit>,
    pub sources: Vec<SourceReport>,
}

impl SearchBatch {
    pub fn count(&self) -> usize {
        self.hits.len()
    }

    /// True when every source failed
    pub fn all_failed(&self) -> bool {
        !self.sources.is_empty() && self.sources.iter().all(|s| s.error.is_some())
    }
}

/// Search all `sources` concurrently and merge their hits
pub async fn search_all(
    sources: &[Arc<dyn SearchSource>],
    queries: &[String],
    caps: &SearchCaps,
) -> SearchBatch {
    let queries: Vec<String> = queries.iter().take(caps.max_queries).cloned().collect();

    let tasks = sources
        .iter()
        .map(|source| {
            let queries = &queries;
            async move { source.search(queries).await }
        })
        .collect::<Vec<_>>();
    let outcomes = fan_out(tasks).await;

    let tagged: Vec<(SourceTag, Outcome<Vec<SearchHit>>)> = sources
        .iter()
        .map(|s| s.tag())
        .zip(outcomes)
        .collect();

    for (tag, outcome) in &tagged {
        match outcome {
            Outcome::Ok(hits) => log::info!("Source {} returned {} hits", tag, hits.len()),
            Outcome::Failed { error } => log::warn!("Source {} failed: {}", tag, error),
        }
    }

    let (hits, reports) = merge_outcomes(tagged, caps);
    SearchBatch {
        queries,
        hits,
        sources: reports,
    }
}

/// Concatenate in the given order, cap raw counts, then dedup
pub fn merge_outcomes(
    outcomes: Vec<(SourceTag, Outcome<Vec<SearchHit>>)>,
    caps: &SearchCaps,
) -> (Vec<SearchHit>, Vec<SourceReport>) {
    let mut reports = Vec::with_capacity(outcomes.len());
    let mut combined = Vec::new();

    for (source, outcome) in outcomes {
        match outcome {
            Outcome::Ok(hits) => {
                reports.push(SourceReport {
                    source,
                    returned: hits.len(),
                    error: None,
                });
                combined.extend(hits.into_iter().take(caps.per_source));
            }
            Outcome::Failed { error } => reports.push(SourceReport {
                source,
                returned: 0,
                error: Some(error),
            }),
        }
    }

    combined.truncate(caps.total);
    (dedup(combined), reports)
}

/// Drop hits whose merge key was already seen; first occurrence wins
pub fn dedup(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|hit| seen.insert(hit.merge_key()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::error::SearchError;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Delayed {
        tag: SourceTag,
        delay_ms: u64,
        hits: Vec<SearchHit>,
    }

    #[async_trait]
    impl SearchSource for Delayed {
        fn tag(&self) -> SourceTag {
            self.tag
        }

        async fn search(&self, _queries: &[String]) -> Result<Vec<SearchHit>, SearchError> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            Ok(self.hits.clone())
        }
    }

    struct Broken;

    #[async_trait]
    impl SearchSource for Broken {
        fn tag(&self) -> SourceTag {
            SourceTag::NaverBlog
        }

        async fn search(&self, _queries: &[String]) -> Result<Vec<SearchHit>, SearchError> {
            Err(SearchError::MissingCredentials("naver".to_string()))
        }
    }

    struct Panics;

    #[async_trait]
    impl SearchSource for Panics {
        fn tag(&self) -> SourceTag {
            SourceTag::Web
        }

        async fn search(&self, _queries: &[String]) -> Result<Vec<SearchHit>, SearchError> {
            panic!("adapter bug")
        }
    }

    fn hit(tag: SourceTag, title: &str, link: &str) -> SearchHit {
        SearchHit::new(tag, title, link)
    }

    fn sources_with_delays(delays: [u64; 3]) -> Vec<Arc<dyn SearchSource>> {
        vec![
            Arc::new(Delayed {
                tag: SourceTag::NaverMap,
                delay_ms: delays[0],
                hits: vec![
                    hit(SourceTag::NaverMap, "map a", "https://x/a"),
                    hit(SourceTag::NaverMap, "map b", ""),
                ],
            }),
            Arc::new(Delayed {
                tag: SourceTag::NaverBlog,
                delay_ms: delays[1],
                hits: vec![
                    hit(SourceTag::NaverBlog, "blog dup", "https://x/a"),
                    hit(SourceTag::NaverBlog, "blog c", "https://x/c"),
                ],
            }),
            Arc::new(Delayed {
                tag: SourceTag::Web,
                delay_ms: delays[2],
                hits: vec![hit(SourceTag::Web, "web d", "https://x/d")],
            }),
        ]
    }

    fn queries() -> Vec<String> {
        vec!["가능동 삼겹살".to_string()]
    }

    #[tokio::test]
    async fn test_merge_order_ignores_completion_order() {
        let caps = SearchCaps::default();
        let fast_first = search_all(&sources_with_delays([1, 20, 40]), &queries(), &caps).await;
        let slow_first = search_all(&sources_with_delays([40, 20, 1]), &queries(), &caps).await;

        assert_eq!(fast_first.hits, slow_first.hits);
        let titles: Vec<&str> = fast_first.hits.iter().map(|h| h.title.as_str()).collect();
        assert_eq!(titles, vec!["map a", "map b", "blog c", "web d"]);
    }

    #[tokio::test]
    async fn test_failing_source_is_isolated() {
        let sources: Vec<Arc<dyn SearchSource>> = vec![
            Arc::new(Delayed {
                tag: SourceTag::NaverMap,
                delay_ms: 5,
                hits: vec![hit(SourceTag::NaverMap, "map a", "https://x/a")],
            }),
            Arc::new(Broken),
            Arc::new(Delayed {
                tag: SourceTag::Web,
                delay_ms: 1,
                hits: vec![hit(SourceTag::Web, "web d", "https://x/d")],
            }),
        ];

        let batch = search_all(&sources, &queries(), &SearchCaps::default()).await;

        assert_eq!(batch.count(), 2);
        assert!(batch.hits.iter().all(|h| h.source != SourceTag::NaverBlog));
        assert_eq!(batch.sources[1].returned, 0);
        assert!(batch.sources[1].error.is_some());
        assert!(!batch.all_failed());
    }

    #[tokio::test]
    async fn test_panicking_source_is_isolated() {
        let sources: Vec<Arc<dyn SearchSource>> = vec![
            Arc::new(Delayed {
                tag: SourceTag::NaverMap,
                delay_ms: 1,
                hits: vec![hit(SourceTag::NaverMap, "map a", "https://x/a")],
            }),
            Arc::new(Panics),
        ];

        let batch = search_all(&sources, &queries(), &SearchCaps::default()).await;

        assert_eq!(batch.count(), 1);
        let error = batch.sources[1].error.as_deref().unwrap();
        assert!(error.contains("adapter bug"));
    }

    #[test]
    fn test_dedup_link_then_title_and_address() {
        let hits = vec![
            hit(SourceTag::NaverMap, "first", "https://x/1"),
            hit(SourceTag::Web, "second", "https://x/1"),
            hit(SourceTag::NaverMap, "Pork House", "").with_address("가능동 1"),
            hit(SourceTag::Web, "pork  house", " ").with_address("가능동 1"),
            hit(SourceTag::Web, "Pork House", "").with_address("가능동 2"),
        ];

        let unique = dedup(hits);
        let titles: Vec<&str> = unique.iter().map(|h| h.title.as_str()).collect();
        assert_eq!(titles, vec!["first", "Pork House", "Pork House"]);
        assert_eq!(unique[0].source, SourceTag::NaverMap);
        assert_eq!(unique[1].source, SourceTag::NaverMap);
    }

    #[test]
    fn test_caps_apply_before_dedup() {
        let map_hits = (0..4)
            .map(|i| hit(SourceTag::NaverMap, &format!("map {}", i), "https://x/same"))
            .collect();
        let web_hits = vec![
            hit(SourceTag::Web, "web 0", "https://x/w0"),
            hit(SourceTag::Web, "web 1", "https://x/w1"),
        ];
        let caps = SearchCaps {
            per_source: 3,
            total: 4,
            max_queries: 3,
        };

        let (hits, reports) = merge_outcomes(
            vec![
                (SourceTag::NaverMap, Outcome::Ok(map_hits)),
                (SourceTag::Web, Outcome::Ok(web_hits)),
            ],
            &caps,
        );

        // 3 map hits survive the source cap, 1 web hit the batch cap,
        // then the 3 same-link map hits collapse into one.
        let titles: Vec<&str> = hits.iter().map(|h| h.title.as_str()).collect();
        assert_eq!(titles, vec!["map 0", "web 0"]);
        assert_eq!(reports[0].returned, 4);
    }

    #[tokio::test]
    async fn test_fan_out_keeps_input_order() {
        let tasks = vec![
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, String>(1)
            }
            .boxed(),
            async { Err::<i32, _>("down".to_string()) }.boxed(),
            async { Ok::<_, String>(3) }.boxed(),
        ];

        let outcomes = fan_out(tasks).await;
        assert_eq!(
            outcomes,
            vec![
                Outcome::Ok(1),
                Outcome::Failed {
                    error: "down".to_string()
                },
                Outcome::Ok(3)
            ]
        );
    }
}
