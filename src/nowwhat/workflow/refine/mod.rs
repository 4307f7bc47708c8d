// SPDX-License-Identifier: MIT

//! Query refinement pipeline
//!
//! ```text
//! evaluate_query --valid--> rewrite_and_extract --> hybrid_search --> evaluate_search_results
//! evaluate_query --invalid--> END
//! evaluate_search_results --valid--> generate_final_response --> END
//! evaluate_search_results --invalid--> parallel_search --> evaluate_relevance
//! evaluate_relevance --rewrite--> rewrite_with_context --> parallel_search
//! evaluate_relevance --valid--> generate_final_response
//! ```
//!
//! The `rewrite` edge is guarded: once `relevance_retry` reaches the
//! configured maximum, `evaluate_relevance` is forced onto `valid`.

pub mod nodes;
pub mod policy;
mod prompts;
pub mod state;

pub use nodes::RefineContext;
pub use policy::{JudgeMethod, Sufficiency, SufficiencyPolicy};
pub use state::{ExitReason, FinalResult, SearchState, StepResults};

use crate::adk::error::GraphError;
use crate::nowwhat::geocode::{Coordinates, Geocoder};
use crate::nowwhat::workflow::graph::{
    CompiledGraph, GraphBuilder, RouteDecision, RouteLabel, RunOutcome, Target,
};
use nodes::*;
use std::sync::Arc;
use uuid::Uuid;

/// Binary verdict of an evaluation step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Valid,
    Invalid,
}

impl RouteLabel for Verdict {
    const ALL: &'static [Self] = &[Verdict::Valid, Verdict::Invalid];

    fn as_str(&self) -> &'static str {
        match self {
            Verdict::Valid => "valid",
            Verdict::Invalid => "invalid",
        }
    }
}

/// Outcome of relevance evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relevance {
    Rewrite,
    Valid,
}

impl RouteLabel for Relevance {
    const ALL: &'static [Self] = &[Relevance::Rewrite, Relevance::Valid];

    fn as_str(&self) -> &'static str {
        match self {
            Relevance::Rewrite => "rewrite",
            Relevance::Valid => "valid",
        }
    }
}

fn route_query(state: &SearchState) -> RouteDecision<Verdict> {
    match &state.result.evaluate_query {
        Some(v) if v.is_valid => RouteDecision::domain(Verdict::Valid),
        _ => RouteDecision::domain(Verdict::Invalid),
    }
}

fn route_search_results(state: &SearchState) -> RouteDecision<Verdict> {
    match &state.result.evaluate_search_results {
        Some(v) if v.sufficient => RouteDecision::domain(Verdict::Valid),
        _ => RouteDecision::domain(Verdict::Invalid),
    }
}

/// Steps on the longest path: six before the first relevance verdict,
/// three per retry, then the final response.
pub fn longest_run(max_relevance_retries: u32) -> usize {
    7 + 3 * max_relevance_retries as usize
}

/// Build the refinement graph over `ctx`
pub fn build_refine_graph(ctx: Arc<RefineContext>) -> Result<CompiledGraph<SearchState>, GraphError> {
    let needed = longest_run(ctx.settings.max_relevance_retries);
    if ctx.settings.max_graph_steps < needed {
        return Err(GraphError::StepLimitTooLow {
            graph: "refine".to_string(),
            limit: ctx.settings.max_graph_steps,
            needed,
        });
    }

    let guard = ctx.relevance_guard();
    let route_relevance = move |state: &SearchState| {
        let wanted = match &state.result.evaluate_relevance {
            Some(v) if v.sufficient => Relevance::Valid,
            _ => Relevance::Rewrite,
        };
        guard.decide(&state.metadata, wanted, Relevance::Rewrite, Relevance::Valid)
    };

    GraphBuilder::new("refine")
        .add_node(EVALUATE_QUERY, EvaluateQuery(ctx.clone()))
        .add_node(REWRITE_AND_EXTRACT, RewriteAndExtract(ctx.clone()))
        .add_node(HYBRID_SEARCH, HybridSearch(ctx.clone()))
        .add_node(EVALUATE_SEARCH_RESULTS, EvaluateSearchResults(ctx.clone()))
        .add_node(PARALLEL_SEARCH, ParallelSearch(ctx.clone()))
        .add_node(EVALUATE_RELEVANCE, EvaluateRelevance(ctx.clone()))
        .add_node(REWRITE_WITH_CONTEXT, RewriteWithContext(ctx.clone()))
        .add_node(GENERATE_FINAL_RESPONSE, GenerateFinalResponse(ctx.clone()))
        .set_entry(EVALUATE_QUERY)
        .add_conditional_edges(
            EVALUATE_QUERY,
            route_query,
            [
                (Verdict::Valid, Target::node(REWRITE_AND_EXTRACT)),
                (Verdict::Invalid, Target::End),
            ],
        )
        .add_edge(REWRITE_AND_EXTRACT, Target::node(HYBRID_SEARCH))
        .add_edge(HYBRID_SEARCH, Target::node(EVALUATE_SEARCH_RESULTS))
        .add_conditional_edges(
            EVALUATE_SEARCH_RESULTS,
            route_search_results,
            [
                (Verdict::Valid, Target::node(GENERATE_FINAL_RESPONSE)),
                (Verdict::Invalid, Target::node(PARALLEL_SEARCH)),
            ],
        )
        .add_edge(PARALLEL_SEARCH, Target::node(EVALUATE_RELEVANCE))
        .add_conditional_edges(
            EVALUATE_RELEVANCE,
            route_relevance,
            [
                (Relevance::Rewrite, Target::node(REWRITE_WITH_CONTEXT)),
                (Relevance::Valid, Target::node(GENERATE_FINAL_RESPONSE)),
            ],
        )
        .add_edge(REWRITE_WITH_CONTEXT, Target::node(PARALLEL_SEARCH))
        .add_edge(GENERATE_FINAL_RESPONSE, Target::End)
        .with_max_steps(ctx.settings.max_graph_steps)
        .compile()
}

/// Compiled refinement graph plus the optional geocoder used to
/// localize requests
pub struct SearchPipeline {
    graph: CompiledGraph<SearchState>,
    ctx: Arc<RefineContext>,
    geocoder: Option<Arc<dyn Geocoder>>,
}

impl SearchPipeline {
    pub fn new(ctx: RefineContext) -> Result<Self, GraphError> {
        let ctx = Arc::new(ctx);
        let graph = build_refine_graph(ctx.clone())?;
        Ok(Self {
            graph,
            ctx,
            geocoder: None,
        })
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    /// Run one request to completion.
    ///
    /// `Err` only when the graph hit its step ceiling.
    pub async fn run(
        &self,
        query: &str,
        location: Option<Coordinates>,
    ) -> Result<RunOutcome<SearchState>, GraphError> {
        let keywords = match (&self.geocoder, location) {
            (Some(geocoder), Some(at)) => geocoder.reverse_geocode(at.latitude, at.longitude).await,
            _ => None,
        };

        let run_id = Uuid::new_v4().to_string();
        log::info!("Refinement run {} started for '{}'", run_id, query);
        let state = SearchState::new(run_id, query.trim(), self.ctx.settings.pricing.clone())
            .with_location(keywords);

        self.graph.invoke(state).await
    }
}
