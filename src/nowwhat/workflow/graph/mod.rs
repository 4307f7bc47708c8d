// SPDX-License-Identifier: MIT

//! Graph-based workflow execution
//!
//! Steps are registered on a [`GraphBuilder`] together with their
//! outgoing edges; [`GraphBuilder::compile`] validates the definition and
//! yields a [`CompiledGraph`] whose `invoke` threads one state through
//! the steps until the terminal sentinel.

mod builder;
pub mod executor;
pub mod types;

pub use builder::{GraphBuilder, DEFAULT_MAX_STEPS};
pub use executor::{did_visit, visited, CompiledGraph, RunOutcome, RunStatus};
pub use types::{FnNode, Node, NodeOutput, RouteDecision, RouteLabel, Target, END};
