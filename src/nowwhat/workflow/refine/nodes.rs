// SPDX-License-Identifier: MIT

//! Refinement steps
//!
//! Every step catches its own model and search failures, substitutes a
//! safe default and reports the failure through
//! [`NodeOutput::degraded`], so a run always reaches a terminal step.

use super::policy::{
    judgments_from_model, keyword_judgments, ItemsEvaluation, JudgeMethod, Sufficiency,
};
use super::prompts;
use super::state::{
    ExitReason, FinalAnswer, FinalResult, QueryEvaluation, Recommendation, RewrittenQuery,
    SearchState, SearchUpdate, StepResult,
};
use crate::adk::error::NowWhatError;
use crate::adk::model::{call_structured, Model, TokenUsage};
use crate::nowwhat::config::WorkflowSettings;
use crate::nowwhat::search::{SearchHit, SearchSource, SourceTag};
use crate::nowwhat::workflow::fanout::{search_all, SearchBatch};
use crate::nowwhat::workflow::graph::{Node, NodeOutput};
use crate::nowwhat::workflow::guard::LoopGuard;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

pub const EVALUATE_QUERY: &str = "evaluate_query";
pub const REWRITE_AND_EXTRACT: &str = "rewrite_and_extract";
pub const HYBRID_SEARCH: &str = "hybrid_search";
pub const EVALUATE_SEARCH_RESULTS: &str = "evaluate_search_results";
pub const PARALLEL_SEARCH: &str = "parallel_search";
pub const EVALUATE_RELEVANCE: &str = "evaluate_relevance";
pub const REWRITE_WITH_CONTEXT: &str = "rewrite_with_context";
pub const GENERATE_FINAL_RESPONSE: &str = "generate_final_response";

/// Counter key of the relevance retry loop
pub const RELEVANCE_RETRY: &str = "relevance_retry";

const MAX_RECOMMENDATIONS: usize = 5;

/// Collaborators shared by all steps of a refinement graph
pub struct RefineContext {
    pub model: Arc<dyn Model>,
    /// All sources, in priority order
    pub sources: Vec<Arc<dyn SearchSource>>,
    pub settings: WorkflowSettings,
}

impl RefineContext {
    pub fn new(
        model: Arc<dyn Model>,
        sources: Vec<Arc<dyn SearchSource>>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            model,
            sources,
            settings,
        }
    }

    /// Place and blog sources, without general web search
    pub fn hybrid_sources(&self) -> Vec<Arc<dyn SearchSource>> {
        self.sources
            .iter()
            .filter(|s| s.tag() != SourceTag::Web)
            .cloned()
            .collect()
    }

    pub fn relevance_guard(&self) -> LoopGuard {
        LoopGuard::new(RELEVANCE_RETRY, self.settings.max_relevance_retries)
    }
}

pub struct EvaluateQuery(pub Arc<RefineContext>);

#[async_trait]
impl Node<SearchState> for EvaluateQuery {
    async fn run(&self, state: &SearchState) -> Result<NodeOutput<SearchUpdate>, NowWhatError> {
        let prompt = prompts::evaluate_query_prompt(state.original_query(), state.location_hint());

        match call_structured::<QueryEvaluation>(
            self.0.model.as_ref(),
            prompts::EVALUATE_QUERY_SYSTEM,
            &prompt,
        )
        .await
        {
            Ok(reply) => {
                let verdict = reply.value;
                log::info!(
                    "Query '{}' valid={} ({})",
                    state.original_query(),
                    verdict.is_valid,
                    verdict.reason
                );
                let snapshot = json!({"is_valid": verdict.is_valid, "reason": verdict.reason});
                Ok(NodeOutput::new(
                    SearchUpdate::result(StepResult::EvaluateQuery(verdict))
                        .with_usage(EVALUATE_QUERY, Some(reply.usage)),
                )
                .with_snapshot(snapshot))
            }
            Err(e) => {
                // Never treat a failed evaluation as valid
                let verdict = QueryEvaluation {
                    is_valid: false,
                    reason: format!("system error: {}", e),
                    location: None,
                    food: None,
                };
                Ok(NodeOutput::new(
                    SearchUpdate::result(StepResult::EvaluateQuery(verdict))
                        .with_usage(EVALUATE_QUERY, e.spent_usage()),
                )
                .degraded(e.to_string()))
            }
        }
    }
}

/// Fallback rewrite: the original query, localized when a hint exists
fn plain_rewrite(query: &str, location_hint: Option<&str>) -> RewrittenQuery {
    let query = match location_hint {
        Some(hint) if !query.contains(hint) => format!("{} {}", hint, query),
        _ => query.to_string(),
    };
    RewrittenQuery {
        query,
        search_queries: Vec::new(),
    }
}

pub struct RewriteAndExtract(pub Arc<RefineContext>);

#[async_trait]
impl Node<SearchState> for RewriteAndExtract {
    async fn run(&self, state: &SearchState) -> Result<NodeOutput<SearchUpdate>, NowWhatError> {
        let prompt = prompts::rewrite_prompt(state.original_query(), state.location_hint());

        let (rewrite, usage, degraded) = match call_structured::<RewrittenQuery>(
            self.0.model.as_ref(),
            prompts::REWRITE_SYSTEM,
            &prompt,
        )
        .await
        {
            Ok(reply) if !reply.value.query.trim().is_empty() => (reply.value, Some(reply.usage), None),
            Ok(reply) => (
                plain_rewrite(state.original_query(), state.location_hint()),
                Some(reply.usage),
                Some("model returned an empty query".to_string()),
            ),
            Err(e) => (
                plain_rewrite(state.original_query(), state.location_hint()),
                e.spent_usage(),
                Some(e.to_string()),
            ),
        };

        log::info!("Rewrote '{}' -> '{}'", state.original_query(), rewrite.query);
        let snapshot = json!({"query": rewrite.query, "search_queries": rewrite.search_queries});
        let update = SearchUpdate::result(StepResult::RewriteAndExtract(rewrite.clone()))
            .with_query(rewrite.query)
            .with_usage(REWRITE_AND_EXTRACT, usage);

        let output = NodeOutput::new(update).with_snapshot(snapshot);
        Ok(match degraded {
            Some(error) => output.degraded(error),
            None => output,
        })
    }
}

fn batch_output(batch: SearchBatch, wide: bool) -> NodeOutput<SearchUpdate> {
    let snapshot = json!({
        "queries": batch.queries,
        "count": batch.count(),
        "sources": batch.sources,
    });
    let failed = batch.all_failed();
    let result = if wide {
        StepResult::ParallelSearch(batch)
    } else {
        StepResult::HybridSearch(batch)
    };

    let output = NodeOutput::new(SearchUpdate::result(result)).with_snapshot(snapshot);
    if failed {
        output.degraded("every search source failed")
    } else {
        output
    }
}

/// Place and blog search with the latest rewrite
pub struct HybridSearch(pub Arc<RefineContext>);

#[async_trait]
impl Node<SearchState> for HybridSearch {
    async fn run(&self, state: &SearchState) -> Result<NodeOutput<SearchUpdate>, NowWhatError> {
        let batch = search_all(
            &self.0.hybrid_sources(),
            &state.search_queries(),
            &self.0.settings.caps,
        )
        .await;
        log::info!("Hybrid search found {} hits", batch.count());
        Ok(batch_output(batch, false))
    }
}

/// Place, blog and web search with the latest rewrite
pub struct ParallelSearch(pub Arc<RefineContext>);

#[async_trait]
impl Node<SearchState> for ParallelSearch {
    async fn run(&self, state: &SearchState) -> Result<NodeOutput<SearchUpdate>, NowWhatError> {
        let batch = search_all(&self.0.sources, &state.search_queries(), &self.0.settings.caps).await;
        log::info!("Parallel search found {} hits", batch.count());
        Ok(batch_output(batch, true))
    }
}

/// Judge a batch against the original query.
///
/// Falls back to keyword matching when the model judge fails.
async fn judge(
    ctx: &RefineContext,
    query: &str,
    hits: &[SearchHit],
) -> (Sufficiency, Option<TokenUsage>, Option<String>) {
    let policy = &ctx.settings.sufficiency;
    if !policy.needs_judging(hits.len()) {
        return (policy.assess_count(hits.len()), None, None);
    }

    let items = policy.items_to_judge(hits);
    let prompt = prompts::relevance_prompt(query, items);
    match call_structured::<ItemsEvaluation>(ctx.model.as_ref(), prompts::RELEVANCE_SYSTEM, &prompt)
        .await
    {
        Ok(reply) => {
            let judgments = judgments_from_model(items, &reply.value);
            (
                policy.assess(hits.len(), judgments, JudgeMethod::Model),
                Some(reply.usage),
                None,
            )
        }
        Err(e) => {
            log::warn!("Relevance judge failed, using keyword match: {}", e);
            let judgments = keyword_judgments(query, items);
            (
                policy.assess(hits.len(), judgments, JudgeMethod::Keyword),
                e.spent_usage(),
                Some(format!("relevance judge failed: {}", e)),
            )
        }
    }
}

fn verdict_output(
    step: &str,
    verdict: Sufficiency,
    usage: Option<TokenUsage>,
    degraded: Option<String>,
) -> NodeOutput<SearchUpdate> {
    log::info!("{}: sufficient={} ({})", step, verdict.sufficient, verdict.reason);
    let snapshot = json!({
        "sufficient": verdict.sufficient,
        "hit_count": verdict.hit_count,
        "relevant": verdict.relevant,
        "method": verdict.method,
    });
    let result = if step == EVALUATE_RELEVANCE {
        StepResult::EvaluateRelevance(verdict)
    } else {
        StepResult::EvaluateSearchResults(verdict)
    };

    let output = NodeOutput::new(SearchUpdate::result(result).with_usage(step, usage))
        .with_snapshot(snapshot);
    match degraded {
        Some(error) => output.degraded(error),
        None => output,
    }
}

pub struct EvaluateSearchResults(pub Arc<RefineContext>);

#[async_trait]
impl Node<SearchState> for EvaluateSearchResults {
    async fn run(&self, state: &SearchState) -> Result<NodeOutput<SearchUpdate>, NowWhatError> {
        let hits = state
            .result
            .hybrid_search
            .as_ref()
            .map(|b| b.hits.as_slice())
            .unwrap_or_default();
        let (verdict, usage, degraded) = judge(&self.0, state.original_query(), hits).await;
        Ok(verdict_output(EVALUATE_SEARCH_RESULTS, verdict, usage, degraded))
    }
}

pub struct EvaluateRelevance(pub Arc<RefineContext>);

#[async_trait]
impl Node<SearchState> for EvaluateRelevance {
    async fn run(&self, state: &SearchState) -> Result<NodeOutput<SearchUpdate>, NowWhatError> {
        let hits = state
            .result
            .parallel_search
            .as_ref()
            .map(|b| b.hits.as_slice())
            .unwrap_or_default();
        let (verdict, usage, degraded) = judge(&self.0, state.original_query(), hits).await;
        Ok(verdict_output(EVALUATE_RELEVANCE, verdict, usage, degraded))
    }
}

/// Fallback for a failed contextual rewrite: a variant not tried yet
fn fallback_variant(state: &SearchState) -> RewrittenQuery {
    let original = state.original_query();
    let candidates = [
        format!("{} 맛집", original),
        state
            .location_hint()
            .map(|hint| format!("{} {}", hint, original))
            .unwrap_or_default(),
        original.to_string(),
    ];
    let query = candidates
        .into_iter()
        .find(|c| !c.is_empty() && !state.queries().contains(c))
        .unwrap_or_else(|| original.to_string());

    RewrittenQuery {
        query,
        search_queries: Vec::new(),
    }
}

/// Rewrite using what the last search found; precedes the back-edge
/// to `parallel_search`, so it also advances the retry counter
pub struct RewriteWithContext(pub Arc<RefineContext>);

#[async_trait]
impl Node<SearchState> for RewriteWithContext {
    async fn run(&self, state: &SearchState) -> Result<NodeOutput<SearchUpdate>, NowWhatError> {
        let found: Vec<String> = state
            .result
            .latest_batch()
            .map(|b| b.hits.iter().take(10).map(|h| h.title.clone()).collect())
            .unwrap_or_default();
        let prompt = prompts::rewrite_with_context_prompt(
            state.original_query(),
            state.queries(),
            &found,
            state.location_hint(),
        );

        let (rewrite, usage, degraded) = match call_structured::<RewrittenQuery>(
            self.0.model.as_ref(),
            prompts::REWRITE_WITH_CONTEXT_SYSTEM,
            &prompt,
        )
        .await
        {
            Ok(reply) if !reply.value.query.trim().is_empty() => (reply.value, Some(reply.usage), None),
            Ok(reply) => (
                fallback_variant(state),
                Some(reply.usage),
                Some("model returned an empty query".to_string()),
            ),
            Err(e) => (fallback_variant(state), e.spent_usage(), Some(e.to_string())),
        };

        let guard = self.0.relevance_guard();
        let counters = guard.next_count(&state.metadata);
        log::info!(
            "Retry {}/{}: rewrote to '{}'",
            counters.get(guard.counter()),
            guard.max(),
            rewrite.query
        );

        let snapshot = json!({
            "query": rewrite.query,
            "retry": counters.get(guard.counter()),
        });
        let update = SearchUpdate::result(StepResult::RewriteWithContext(rewrite.clone()))
            .with_query(rewrite.query)
            .with_counters(counters)
            .with_usage(REWRITE_WITH_CONTEXT, usage);

        let output = NodeOutput::new(update).with_snapshot(snapshot);
        Ok(match degraded {
            Some(error) => output.degraded(error),
            None => output,
        })
    }
}

/// Answer listing the hits, used when the model cannot write one
fn listing_answer(hits: &[SearchHit]) -> FinalAnswer {
    let top: Vec<&SearchHit> = hits.iter().take(MAX_RECOMMENDATIONS).collect();
    let titles: Vec<&str> = top.iter().map(|h| h.title.as_str()).collect();
    FinalAnswer {
        answer: format!("검색 결과: {}", titles.join(", ")),
        recommendations: top
            .into_iter()
            .map(|h| Recommendation {
                name: h.title.clone(),
                reason: if h.description.is_empty() {
                    h.source.to_string()
                } else {
                    h.description.clone()
                },
                link: Some(h.link.clone()).filter(|l| !l.is_empty()),
            })
            .collect(),
    }
}

/// Sole terminal-producing step
pub struct GenerateFinalResponse(pub Arc<RefineContext>);

#[async_trait]
impl Node<SearchState> for GenerateFinalResponse {
    async fn run(&self, state: &SearchState) -> Result<NodeOutput<SearchUpdate>, NowWhatError> {
        let hits = state
            .result
            .latest_batch()
            .map(|b| b.hits.as_slice())
            .unwrap_or_default();
        let exit = match &state.result.evaluate_relevance {
            Some(verdict) if !verdict.sufficient => ExitReason::RetryLimit,
            _ => ExitReason::Sufficient,
        };
        let query_used = state.current_query().to_string();

        let (answer, usage, degraded) = if hits.is_empty() {
            let answer = FinalAnswer {
                answer: "조건에 맞는 장소를 찾지 못했습니다. 지역이나 음식을 바꿔 다시 검색해 보세요."
                    .to_string(),
                recommendations: Vec::new(),
            };
            (answer, None, None)
        } else {
            let items = self.0.settings.sufficiency.items_to_judge(hits);
            let prompt = prompts::final_response_prompt(state.original_query(), &query_used, items);
            match call_structured::<FinalAnswer>(
                self.0.model.as_ref(),
                prompts::FINAL_RESPONSE_SYSTEM,
                &prompt,
            )
            .await
            {
                Ok(reply) => (reply.value, Some(reply.usage), None),
                Err(e) => (listing_answer(hits), e.spent_usage(), Some(e.to_string())),
            }
        };

        let result = FinalResult {
            answer: answer.answer,
            recommendations: answer.recommendations,
            hit_count: hits.len(),
            exit,
            query_used,
        };
        log::info!(
            "Final response with {} recommendations ({:?})",
            result.recommendations.len(),
            result.exit
        );
        let snapshot = json!({"exit": result.exit, "recommendations": result.recommendations.len()});

        let output = NodeOutput::new(
            SearchUpdate::result(StepResult::GenerateFinalResponse(result))
                .with_usage(GENERATE_FINAL_RESPONSE, usage),
        )
        .with_snapshot(snapshot);
        Ok(match degraded {
            Some(error) => output.degraded(error),
            None => output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::error::ModelError;
    use crate::adk::model::{Content, GenerationConfig, ModelResponse};
    use crate::adk::tool::Tool;
    use crate::nowwhat::workflow::state::Pricing;
    use crate::nowwhat::workflow::state::GraphState;

    struct DownModel;

    #[async_trait]
    impl Model for DownModel {
        async fn generate_content(
            &self,
            _history: &[Content],
            _config: Option<&GenerationConfig>,
            _tools: Option<&[Arc<dyn Tool>]>,
        ) -> Result<ModelResponse, ModelError> {
            Err(ModelError::QuotaExceeded("insufficient_quota".to_string()))
        }
    }

    struct ProseModel;

    #[async_trait]
    impl Model for ProseModel {
        async fn generate_content(
            &self,
            _history: &[Content],
            _config: Option<&GenerationConfig>,
            _tools: Option<&[Arc<dyn Tool>]>,
        ) -> Result<ModelResponse, ModelError> {
            Ok(ModelResponse {
                content: Content::model("여기 추천 목록입니다"),
                usage: TokenUsage::new(300, 40),
            })
        }
    }

    fn ctx() -> Arc<RefineContext> {
        Arc::new(RefineContext::new(
            Arc::new(DownModel),
            Vec::new(),
            WorkflowSettings::default(),
        ))
    }

    fn state() -> SearchState {
        SearchState::new("run", "가능동 삼겹살", Pricing::default())
    }

    fn batch(hits: Vec<SearchHit>) -> SearchBatch {
        SearchBatch {
            queries: vec!["가능동 삼겹살".to_string()],
            hits,
            sources: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_evaluate_query_failure_is_invalid() {
        let output = EvaluateQuery(ctx()).run(&state()).await.unwrap();
        assert!(output.degraded.is_some());

        let mut s = state();
        s.merge(output.update);
        let verdict = s.result.evaluate_query.unwrap();
        assert!(!verdict.is_valid);
        assert!(verdict.reason.starts_with("system error"));
        assert!(s.usage.records().is_empty());
    }

    #[tokio::test]
    async fn test_rewrite_fallback_keeps_original_and_appends() {
        let output = RewriteAndExtract(ctx()).run(&state()).await.unwrap();
        assert!(output.degraded.is_some());

        let mut s = state();
        s.merge(output.update);
        assert_eq!(s.queries(), &["가능동 삼겹살", "가능동 삼겹살"]);
        assert_eq!(s.original_query(), "가능동 삼겹살");
    }

    #[tokio::test]
    async fn test_judge_falls_back_to_keywords() {
        let mut s = state();
        s.merge(SearchUpdate::result(StepResult::HybridSearch(batch(vec![
            SearchHit::new(SourceTag::NaverMap, "가능동 고기", "https://m/1"),
            SearchHit::new(SourceTag::NaverMap, "삼겹살 전문", "https://m/2"),
            SearchHit::new(SourceTag::NaverBlog, "삼겹살 후기", "https://b/1"),
        ]))));

        let output = EvaluateSearchResults(ctx()).run(&s).await.unwrap();
        assert!(output.degraded.is_some());
        s.merge(output.update);

        let verdict = s.result.evaluate_search_results.unwrap();
        assert_eq!(verdict.method, JudgeMethod::Keyword);
        assert!(verdict.sufficient);
    }

    #[tokio::test]
    async fn test_rewrite_with_context_always_advances_counter() {
        let mut s = state();
        for expected in 1..=2 {
            let output = RewriteWithContext(ctx()).run(&s).await.unwrap();
            s.merge(output.update);
            assert_eq!(s.metadata.get(RELEVANCE_RETRY), expected);
        }
        assert_eq!(s.queries()[1], "가능동 삼겹살 맛집");
        assert_ne!(s.queries()[2], s.queries()[1]);
    }

    #[tokio::test]
    async fn test_final_response_fallback_lists_hits() {
        let mut s = state();
        s.merge(SearchUpdate::result(StepResult::HybridSearch(batch(vec![
            SearchHit::new(SourceTag::NaverMap, "고기집 A", "https://m/1"),
            SearchHit::new(SourceTag::NaverMap, "고기집 B", ""),
        ]))));

        let output = GenerateFinalResponse(ctx()).run(&s).await.unwrap();
        assert!(output.degraded.is_some());
        s.merge(output.update);

        let result = s.result.generate_final_response.unwrap();
        assert_eq!(result.answer, "검색 결과: 고기집 A, 고기집 B");
        assert_eq!(result.recommendations[1].link, None);
        assert_eq!(result.exit, ExitReason::Sufficient);
        assert_eq!(result.hit_count, 2);
    }

    #[tokio::test]
    async fn test_unparsable_replies_still_reach_the_ledger() {
        let ctx = Arc::new(RefineContext::new(
            Arc::new(ProseModel),
            Vec::new(),
            WorkflowSettings::default(),
        ));
        let mut s = state();
        s.merge(SearchUpdate::result(StepResult::HybridSearch(batch(vec![
            SearchHit::new(SourceTag::NaverMap, "가능동 삼겹살집", "https://m/1"),
            SearchHit::new(SourceTag::NaverMap, "삼겹살 전문", "https://m/2"),
            SearchHit::new(SourceTag::NaverBlog, "삼겹살 후기", "https://b/1"),
        ]))));

        let judged = EvaluateSearchResults(ctx.clone()).run(&s).await.unwrap();
        assert!(judged.degraded.is_some());
        s.merge(judged.update);
        let rewritten = RewriteWithContext(ctx.clone()).run(&s).await.unwrap();
        assert!(rewritten.degraded.is_some());
        s.merge(rewritten.update);
        let answered = GenerateFinalResponse(ctx).run(&s).await.unwrap();
        assert!(answered.degraded.is_some());
        s.merge(answered.update);

        let steps: Vec<&str> = s.usage.records().iter().map(|r| r.step.as_str()).collect();
        assert_eq!(
            steps,
            vec![EVALUATE_SEARCH_RESULTS, REWRITE_WITH_CONTEXT, GENERATE_FINAL_RESPONSE]
        );
        assert_eq!(s.usage.total().total_tokens, 3 * 340);
    }

    #[tokio::test]
    async fn test_final_response_without_hits_skips_model() {
        let output = GenerateFinalResponse(ctx()).run(&state()).await.unwrap();
        assert!(output.degraded.is_none());
    }

    #[test]
    fn test_hybrid_sources_exclude_web() {
        struct Tagged(SourceTag);

        #[async_trait]
        impl SearchSource for Tagged {
            fn tag(&self) -> SourceTag {
                self.0
            }

            async fn search(
                &self,
                _queries: &[String],
            ) -> Result<Vec<SearchHit>, crate::adk::error::SearchError> {
                Ok(Vec::new())
            }
        }

        let ctx = RefineContext::new(
            Arc::new(DownModel),
            vec![
                Arc::new(Tagged(SourceTag::NaverMap)),
                Arc::new(Tagged(SourceTag::NaverBlog)),
                Arc::new(Tagged(SourceTag::Web)),
            ],
            WorkflowSettings::default(),
        );
        let tags: Vec<SourceTag> = ctx.hybrid_sources().iter().map(|s| s.tag()).collect();
        assert_eq!(tags, vec![SourceTag::NaverMap, SourceTag::NaverBlog]);
    }
}
