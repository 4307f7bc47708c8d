// SPDX-License-Identifier: MIT

//! Built-in tools for the agent loop

mod geocode;
mod registry;
mod terminate;

pub use geocode::ReverseGeocodeTool;
pub use registry::ToolRegistry;
pub use terminate::{TerminateTool, TERMINATE_TOOL};

use crate::nowwhat::geocode::Geocoder;
use std::sync::Arc;

/// Registry holding every built-in tool
pub async fn default_registry(geocoder: Arc<dyn Geocoder>) -> ToolRegistry {
    let registry = ToolRegistry::new();
    registry
        .register(Arc::new(ReverseGeocodeTool::new(geocoder)))
        .await;
    registry.register(Arc::new(TerminateTool)).await;
    registry
}
