// SPDX-License-Identifier: MIT

//! State of one refinement run
//!
//! Merge policy, applied by [`SearchState::merge`]:
//! - `queries` is append-only; index 0 is the user's original input
//! - each step owns one typed slot in `result`; a later run of the same
//!   step overwrites its slot
//! - loop counters in `metadata` overwrite per key
//! - usage is appended to the ledger, which recomputes its total
//! - `steps` is appended by the executor, never by a step

use super::policy::Sufficiency;
use crate::adk::model::TokenUsage;
use crate::nowwhat::geocode::LocationKeywords;
use crate::nowwhat::workflow::fanout::SearchBatch;
use crate::nowwhat::workflow::guard::LoopCounters;
use crate::nowwhat::workflow::state::{GraphState, Pricing, StepRecord, UsageLedger};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Verdict of `evaluate_query`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct QueryEvaluation {
    /// In domain (food or places) and specific enough to search
    pub is_valid: bool,
    /// Short explanation, shown to the user when invalid
    pub reason: String,
    /// Location mentioned in or implied by the query
    #[serde(default)]
    pub location: Option<String>,
    /// Food or cuisine mentioned in the query
    #[serde(default)]
    pub food: Option<String>,
}

/// Search-ready form of the query
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RewrittenQuery {
    /// Main search query
    pub query: String,
    /// Up to three alternative queries, most specific first
    #[serde(default)]
    pub search_queries: Vec<String>,
}

impl RewrittenQuery {
    /// The main query followed by the alternatives, without repeats
    pub fn all_queries(&self) -> Vec<String> {
        let mut all: Vec<String> = Vec::new();
        for q in std::iter::once(&self.query).chain(self.search_queries.iter()) {
            let q = q.trim();
            if !q.is_empty() && !all.iter().any(|seen| seen == q) {
                all.push(q.to_string());
            }
        }
        all
    }
}

/// One recommended place in the final answer
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Recommendation {
    pub name: String,
    pub reason: String,
    #[serde(default)]
    pub link: Option<String>,
}

/// Model reply for `generate_final_response`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct FinalAnswer {
    pub answer: String,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
}

/// Why the run stopped searching
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Results were judged good enough
    Sufficient,
    /// The retry guard forced the answer
    RetryLimit,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalResult {
    pub answer: String,
    pub recommendations: Vec<Recommendation>,
    pub hit_count: usize,
    pub exit: ExitReason,
    /// Most recent query the answer is based on
    pub query_used: String,
}

/// Step-scoped results, one slot per step
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepResults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluate_query: Option<QueryEvaluation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite_and_extract: Option<RewrittenQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hybrid_search: Option<SearchBatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluate_search_results: Option<Sufficiency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_search: Option<SearchBatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluate_relevance: Option<Sufficiency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite_with_context: Option<RewrittenQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_final_response: Option<FinalResult>,
}

/// A value for exactly one slot of [`StepResults`]
#[derive(Debug, Clone)]
pub enum StepResult {
    EvaluateQuery(QueryEvaluation),
    RewriteAndExtract(RewrittenQuery),
    HybridSearch(SearchBatch),
    EvaluateSearchResults(Sufficiency),
    ParallelSearch(SearchBatch),
    EvaluateRelevance(Sufficiency),
    RewriteWithContext(RewrittenQuery),
    GenerateFinalResponse(FinalResult),
}

impl StepResults {
    fn apply(&mut self, result: StepResult) {
        match result {
            StepResult::EvaluateQuery(v) => self.evaluate_query = Some(v),
            StepResult::RewriteAndExtract(v) => self.rewrite_and_extract = Some(v),
            StepResult::HybridSearch(v) => self.hybrid_search = Some(v),
            StepResult::EvaluateSearchResults(v) => self.evaluate_search_results = Some(v),
            StepResult::ParallelSearch(v) => self.parallel_search = Some(v),
            StepResult::EvaluateRelevance(v) => self.evaluate_relevance = Some(v),
            StepResult::RewriteWithContext(v) => self.rewrite_with_context = Some(v),
            StepResult::GenerateFinalResponse(v) => self.generate_final_response = Some(v),
        }
    }

    /// Latest rewrite, the contextual one winning
    pub fn latest_rewrite(&self) -> Option<&RewrittenQuery> {
        self.rewrite_with_context
            .as_ref()
            .or(self.rewrite_and_extract.as_ref())
    }

    /// Latest search batch, the wider one winning
    pub fn latest_batch(&self) -> Option<&SearchBatch> {
        self.parallel_search.as_ref().or(self.hybrid_search.as_ref())
    }
}

/// Partial update produced by one refinement step
#[derive(Debug, Default)]
pub struct SearchUpdate {
    pub queries: Vec<String>,
    pub result: Option<StepResult>,
    pub metadata: LoopCounters,
    pub usage: Vec<(String, TokenUsage)>,
}

impl SearchUpdate {
    pub fn result(result: StepResult) -> Self {
        Self {
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.queries.push(query.into());
        self
    }

    pub fn with_usage(mut self, step: &str, usage: Option<TokenUsage>) -> Self {
        if let Some(usage) = usage {
            self.usage.push((step.to_string(), usage));
        }
        self
    }

    pub fn with_counters(mut self, counters: LoopCounters) -> Self {
        self.metadata.merge(counters);
        self
    }
}

/// Shared state of one refinement run
#[derive(Debug, Clone, Serialize)]
pub struct SearchState {
    pub run_id: String,
    queries: Vec<String>,
    /// Area name from reverse geocoding the user's position
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationKeywords>,
    pub result: StepResults,
    pub metadata: LoopCounters,
    pub usage: UsageLedger,
    pub steps: Vec<StepRecord>,
}

impl SearchState {
    pub fn new(run_id: impl Into<String>, query: impl Into<String>, pricing: Pricing) -> Self {
        Self {
            run_id: run_id.into(),
            queries: vec![query.into()],
            location: None,
            result: StepResults::default(),
            metadata: LoopCounters::new(),
            usage: UsageLedger::new(pricing),
            steps: Vec::new(),
        }
    }

    pub fn with_location(mut self, location: Option<LocationKeywords>) -> Self {
        self.location = location;
        self
    }

    /// The user's input, never rewritten
    pub fn original_query(&self) -> &str {
        self.queries.first().map(String::as_str).unwrap_or_default()
    }

    /// Most recent query
    pub fn current_query(&self) -> &str {
        self.queries.last().map(String::as_str).unwrap_or_default()
    }

    pub fn queries(&self) -> &[String] {
        &self.queries
    }

    /// Location keyword to steer the query toward, if any
    pub fn location_hint(&self) -> Option<&str> {
        self.location
            .as_ref()
            .map(|l| l.location_keyword.as_str())
            .filter(|k| !k.is_empty())
    }

    /// Queries for the next search: the latest rewrite, else the
    /// current query
    pub fn search_queries(&self) -> Vec<String> {
        match self.result.latest_rewrite() {
            Some(rewrite) if !rewrite.all_queries().is_empty() => rewrite.all_queries(),
            _ => vec![self.current_query().to_string()],
        }
    }
}

impl GraphState for SearchState {
    type Update = SearchUpdate;

    fn merge(&mut self, update: SearchUpdate) {
        self.queries.extend(
            update
                .queries
                .into_iter()
                .filter(|q| !q.trim().is_empty()),
        );
        if let Some(result) = update.result {
            self.result.apply(result);
        }
        self.metadata.merge(update.metadata);
        for (step, usage) in update.usage {
            self.usage.record(&step, usage);
        }
    }

    fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    fn steps_mut(&mut self) -> &mut Vec<StepRecord> {
        &mut self.steps
    }
}
