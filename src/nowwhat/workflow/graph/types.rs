// SPDX-License-Identifier: MIT

//! Graph type definitions
//!
//! Nodes, successors and routing labels shared by the builder and the
//! executor.

use crate::adk::error::NowWhatError;
use crate::nowwhat::workflow::state::GraphState;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::hash::Hash;

/// Name of the terminal sentinel in audit records and logs
pub const END: &str = "__end__";

/// Successor of a step
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Node(String),
    End,
}

impl Target {
    pub fn node(name: impl Into<String>) -> Self {
        Target::Node(name.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Target::Node(name) => name,
            Target::End => END,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of labels a routing predicate can return.
///
/// `ALL` lets the builder check at compile time that every label has a
/// successor.
pub trait RouteLabel: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    const ALL: &'static [Self];

    fn as_str(&self) -> &'static str;
}

/// Label chosen by a routing predicate.
///
/// `forced` carries the reason when a safety limit, not the domain
/// signal, picked the label.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDecision<L> {
    pub label: L,
    pub forced: Option<String>,
}

impl<L> RouteDecision<L> {
    pub fn domain(label: L) -> Self {
        Self {
            label,
            forced: None,
        }
    }

    pub fn forced(label: L, reason: impl Into<String>) -> Self {
        Self {
            label,
            forced: Some(reason.into()),
        }
    }

    pub fn is_forced(&self) -> bool {
        self.forced.is_some()
    }
}

/// What a step hands back to the executor
#[derive(Debug)]
pub struct NodeOutput<U> {
    pub update: U,
    /// Error the step recovered from by substituting a safe default
    pub degraded: Option<String>,
    /// Summary stored in the audit record
    pub snapshot: Option<Value>,
}

impl<U> NodeOutput<U> {
    pub fn new(update: U) -> Self {
        Self {
            update,
            degraded: None,
            snapshot: None,
        }
    }

    pub fn degraded(mut self, error: impl Into<String>) -> Self {
        self.degraded = Some(error.into());
        self
    }

    pub fn with_snapshot(mut self, snapshot: Value) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}

/// A named unit of work in a graph
#[async_trait]
pub trait Node<S: GraphState>: Send + Sync {
    /// Read the state and produce a partial update.
    ///
    /// Returning `Err` halts the run; recoverable failures should be
    /// reported through [`NodeOutput::degraded`] instead.
    async fn run(&self, state: &S) -> Result<NodeOutput<S::Update>, NowWhatError>;
}

/// Adapter turning a synchronous closure into a node
pub struct FnNode<F>(pub F);

#[async_trait]
impl<S, F> Node<S> for FnNode<F>
where
    S: GraphState,
    F: Fn(&S) -> Result<NodeOutput<S::Update>, NowWhatError> + Send + Sync,
{
    async fn run(&self, state: &S) -> Result<NodeOutput<S::Update>, NowWhatError> {
        (self.0)(state)
    }
}
