// SPDX-License-Identifier: MIT

//! State management for graph workflows
//!
//! This module provides:
//! - `GraphState` - the contract between a run's state and the executor
//! - `StepRecord` - one entry of a run's append-only audit trail
//! - `UsageLedger` - per-step token usage with a recomputed total

mod usage;

pub use usage::{Pricing, UsageLedger, UsageRecord, UsageTotal};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// State threaded through one graph run.
///
/// `merge` is the only way a step's output reaches the state, so each
/// implementation spells out its merge policy there.
pub trait GraphState: Send + Sync + 'static {
    /// Partial update produced by one step
    type Update: Send;

    /// Fold a step's update into the state
    fn merge(&mut self, update: Self::Update);

    /// Audit trail, one record per executed step
    fn steps(&self) -> &[StepRecord];

    fn steps_mut(&mut self) -> &mut Vec<StepRecord>;
}

/// Outcome of a single step execution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Error,
}

/// Routing decision taken after a step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteTrace {
    pub label: String,
    pub target: String,
    /// Set when a safety limit overrode the domain signal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forced: Option<String>,
}

/// Audit record of one step execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: String,
    pub status: StepStatus,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteTrace>,
}

impl StepRecord {
    pub fn new(step: impl Into<String>, status: StepStatus, timestamp: DateTime<Utc>) -> Self {
        Self {
            step: step.into(),
            status,
            timestamp,
            duration_ms: 0,
            error: None,
            output: None,
            route: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == StepStatus::Error
    }

    /// True when a safety limit chose this step's successor
    pub fn was_forced(&self) -> bool {
        self.route.as_ref().is_some_and(|r| r.forced.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_record_serializes_compactly() {
        let record = StepRecord::new("evaluate_query", StepStatus::Success, Utc::now());
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["step"], "evaluate_query");
        assert_eq!(json["status"], "success");
        assert!(json.get("error").is_none());
        assert!(json.get("route").is_none());
    }

    #[test]
    fn test_forced_route_detection() {
        let mut record = StepRecord::new("evaluate_relevance", StepStatus::Success, Utc::now());
        assert!(!record.was_forced());

        record.route = Some(RouteTrace {
            label: "valid".to_string(),
            target: "generate_final_response".to_string(),
            forced: Some("relevance_retry reached 3/3".to_string()),
        });
        assert!(record.was_forced());
        assert!(!record.is_error());
    }
}
