// SPDX-License-Identifier: MIT

use crate::adk::error::NowWhatError;
use crate::adk::tool::Tool;
use crate::nowwhat::geocode::Geocoder;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

static REVERSE_GEOCODE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "latitude": {
                "type": "number",
                "description": "Latitude in decimal degrees"
            },
            "longitude": {
                "type": "number",
                "description": "Longitude in decimal degrees"
            }
        },
        "required": ["latitude", "longitude"]
    })
});

#[derive(Debug, Deserialize)]
struct ReverseGeocodeArgs {
    latitude: f64,
    longitude: f64,
}

/// Turns coordinates into area keywords for localized searches
pub struct ReverseGeocodeTool {
    geocoder: Arc<dyn Geocoder>,
}

impl ReverseGeocodeTool {
    pub fn new(geocoder: Arc<dyn Geocoder>) -> Self {
        Self { geocoder }
    }
}

#[async_trait]
impl Tool for ReverseGeocodeTool {
    fn name(&self) -> &str {
        "reverse_geocode"
    }

    fn description(&self) -> &str {
        "Converts latitude/longitude into Korean area names (시/구/동) to use as location keywords in searches."
    }

    fn schema(&self) -> &Value {
        &REVERSE_GEOCODE_SCHEMA
    }

    async fn execute(&self, input: Value) -> Result<Value, NowWhatError> {
        let args: ReverseGeocodeArgs = serde_json::from_value(input)?;

        match self
            .geocoder
            .reverse_geocode(args.latitude, args.longitude)
            .await
        {
            Some(keywords) => Ok(serde_json::to_value(keywords)?),
            None => Err(NowWhatError::api(
                "nominatim",
                format!(
                    "no address found for ({}, {})",
                    args.latitude, args.longitude
                ),
            )),
        }
    }
}
