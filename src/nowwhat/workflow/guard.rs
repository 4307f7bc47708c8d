// SPDX-License-Identifier: MIT

//! Loop guard for graph back-edges
//!
//! A guard reads its counter from the run's [`LoopCounters`] and never
//! writes it. The step that precedes the back-edge bumps the counter in
//! its own update via [`LoopGuard::next_count`], which keeps the routing
//! predicate a pure read.

use super::graph::{RouteDecision, RouteLabel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Control-flow bookkeeping: one counter per guarded loop
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct LoopCounters(BTreeMap<String, u32>);

impl LoopCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter value, 0 when absent
    pub fn get(&self, key: &str) -> u32 {
        self.0.get(key).copied().unwrap_or(0)
    }

    pub fn set(&mut self, key: impl Into<String>, value: u32) {
        self.0.insert(key.into(), value);
    }

    /// Overwrite each counter present in `other`
    pub fn merge(&mut self, other: LoopCounters) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Cap on how often one back-edge may fire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopGuard {
    counter: String,
    max: u32,
}

impl LoopGuard {
    /// `counter` must be unique per loop within a graph
    pub fn new(counter: impl Into<String>, max: u32) -> Self {
        Self {
            counter: counter.into(),
            max,
        }
    }

    pub fn counter(&self) -> &str {
        &self.counter
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn count(&self, counters: &LoopCounters) -> u32 {
        counters.get(&self.counter)
    }

    pub fn exhausted(&self, counters: &LoopCounters) -> bool {
        self.count(counters) >= self.max
    }

    /// Value the step before the back-edge writes back
    pub fn next_count(&self, counters: &LoopCounters) -> LoopCounters {
        let mut update = LoopCounters::new();
        update.set(self.counter.clone(), self.count(counters) + 1);
        update
    }

    /// Turn the domain's choice into a routing decision.
    ///
    /// When the domain asks for `back` and the counter has reached the
    /// maximum, `forward` is chosen instead and the decision carries the
    /// reason.
    pub fn decide<L: RouteLabel>(
        &self,
        counters: &LoopCounters,
        wanted: L,
        back: L,
        forward: L,
    ) -> RouteDecision<L> {
        if wanted != back {
            return RouteDecision::domain(wanted);
        }

        let count = self.count(counters);
        if count >= self.max {
            RouteDecision::forced(
                forward,
                format!(
                    "{} reached {}/{}, '{}' overridden by '{}'",
                    self.counter,
                    count,
                    self.max,
                    back.as_str(),
                    forward.as_str()
                ),
            )
        } else {
            RouteDecision::domain(back)
        }
    }
}
