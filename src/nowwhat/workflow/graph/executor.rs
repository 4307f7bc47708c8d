// SPDX-License-Identifier: MIT

//! Graph workflow executor

use super::types::{Node, Target};
use crate::adk::error::GraphError;
use crate::nowwhat::workflow::state::{GraphState, RouteTrace, StepRecord, StepStatus};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Outgoing edge of a node
pub(crate) enum Edge<S> {
    Direct(Target),
    Conditional(Box<dyn ErasedRouter<S>>),
}

impl<S> Edge<S> {
    pub(crate) fn successors(&self) -> Vec<Target> {
        match self {
            Edge::Direct(target) => vec![target.clone()],
            Edge::Conditional(router) => router.successors(),
        }
    }
}

/// Routing predicate with its label type erased
pub(crate) trait ErasedRouter<S>: Send + Sync {
    fn route(&self, state: &S) -> Result<Routed, GraphError>;
    fn successors(&self) -> Vec<Target>;
}

pub(crate) struct Routed {
    pub label: &'static str,
    pub target: Target,
    pub forced: Option<String>,
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunStatus {
    /// Reached the terminal sentinel with every step succeeding
    Completed,
    /// Reached the terminal sentinel, but some steps substituted defaults
    Degraded { steps: Vec<String> },
    /// A step failed without recovering; the run stopped after it
    Halted { step: String, error: String },
}

/// Final state of a run plus how it ended
#[derive(Debug)]
pub struct RunOutcome<S> {
    pub state: S,
    pub status: RunStatus,
    pub steps_executed: usize,
}

impl<S> RunOutcome<S> {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Immutable, validated graph ready to run.
///
/// Built with [`GraphBuilder`](super::GraphBuilder). One instance can
/// serve any number of concurrent runs; each run owns its state.
pub struct CompiledGraph<S: GraphState> {
    name: String,
    entry: String,
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    edges: HashMap<String, Edge<S>>,
    max_steps: usize,
}

impl<S: GraphState> CompiledGraph<S> {
    pub(crate) fn new(
        name: String,
        entry: String,
        nodes: HashMap<String, Arc<dyn Node<S>>>,
        edges: HashMap<String, Edge<S>>,
        max_steps: usize,
    ) -> Self {
        Self {
            name,
            entry,
            nodes,
            edges,
            max_steps,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Run the graph from its entry node until the terminal sentinel.
    ///
    /// Step failures never surface here: a degraded step is recorded and
    /// the run continues, a failed step is recorded and ends the run as
    /// [`RunStatus::Halted`]. `Err` means the graph itself misbehaved,
    /// i.e. the step ceiling was hit.
    pub async fn invoke(&self, mut state: S) -> Result<RunOutcome<S>, GraphError> {
        let mut current = self.entry.clone();
        let mut executed = 0usize;
        let mut degraded: Vec<String> = Vec::new();

        loop {
            if executed >= self.max_steps {
                log::error!(
                    "Graph {} exceeded max steps ({}) at node {}",
                    self.name,
                    self.max_steps,
                    current
                );
                return Err(GraphError::StepLimitExceeded {
                    graph: self.name.clone(),
                    limit: self.max_steps,
                });
            }
            executed += 1;

            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| GraphError::UnknownNode {
                    from: self.name.clone(),
                    to: current.clone(),
                })?;

            log::info!("Graph {} step {}: executing {}", self.name, executed, current);
            let timestamp = Utc::now();
            let started = Instant::now();
            let result = node.run(&state).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(output) => {
                    state.merge(output.update);

                    let status = if output.degraded.is_some() {
                        StepStatus::Error
                    } else {
                        StepStatus::Success
                    };
                    let mut record = StepRecord::new(current.clone(), status, timestamp);
                    record.duration_ms = duration_ms;
                    record.output = output.snapshot;

                    if let Some(error) = output.degraded {
                        log::warn!(
                            "Node {} recovered from failure with a default: {}",
                            current,
                            error
                        );
                        record.error = Some(error);
                        degraded.push(current.clone());
                    } else {
                        log::info!("Node {} completed in {}ms", current, duration_ms);
                    }
                    state.steps_mut().push(record);
                }
                Err(e) => {
                    log::error!("Node {} failed, ending run: {}", current, e);
                    let mut record = StepRecord::new(current.clone(), StepStatus::Error, timestamp);
                    record.duration_ms = duration_ms;
                    record.error = Some(e.to_string());
                    state.steps_mut().push(record);

                    return Ok(RunOutcome {
                        state,
                        status: RunStatus::Halted {
                            step: current,
                            error: e.to_string(),
                        },
                        steps_executed: executed,
                    });
                }
            }

            let next = self.resolve_next(&current, &mut state)?;
            match next {
                Target::End => {
                    log::info!(
                        "Graph {} finished after {} steps",
                        self.name,
                        executed
                    );
                    let status = if degraded.is_empty() {
                        RunStatus::Completed
                    } else {
                        RunStatus::Degraded { steps: degraded }
                    };
                    return Ok(RunOutcome {
                        state,
                        status,
                        steps_executed: executed,
                    });
                }
                Target::Node(name) => current = name,
            }
        }
    }

    /// Pick the successor of `current` from the post-merge state and
    /// note the decision on the step's audit record.
    fn resolve_next(&self, current: &str, state: &mut S) -> Result<Target, GraphError> {
        let edge = self
            .edges
            .get(current)
            .ok_or_else(|| GraphError::MissingEdge(current.to_string()))?;

        match edge {
            Edge::Direct(target) => Ok(target.clone()),
            Edge::Conditional(router) => {
                let routed = router.route(state)?;
                match &routed.forced {
                    Some(reason) => log::warn!(
                        "Node {} forced to '{}' -> {}: {}",
                        current,
                        routed.label,
                        routed.target,
                        reason
                    ),
                    None => log::info!(
                        "Node {} routed '{}' -> {}",
                        current,
                        routed.label,
                        routed.target
                    ),
                }

                if let Some(record) = state.steps_mut().last_mut() {
                    record.route = Some(RouteTrace {
                        label: routed.label.to_string(),
                        target: routed.target.as_str().to_string(),
                        forced: routed.forced.clone(),
                    });
                }
                Ok(routed.target)
            }
        }
    }
}

/// Names of the steps a run executed, in order
pub fn visited<S: GraphState>(state: &S) -> Vec<&str> {
    state.steps().iter().map(|r| r.step.as_str()).collect()
}

/// True when `step` ran at least once
pub fn did_visit<S: GraphState>(state: &S, step: &str) -> bool {
    state.steps().iter().any(|r| r.step == step)
}
