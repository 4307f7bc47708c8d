// SPDX-License-Identifier: MIT

//! Reverse geocoding through OpenStreetMap Nominatim
//!
//! Coordinates become Korean administrative-area keywords used to
//! localize search queries. Any failure yields `None`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const NOMINATIM_REVERSE_URL: &str = "https://nominatim.openstreetmap.org/reverse";
/// Nominatim rejects requests without a User-Agent; it must be ASCII
const USER_AGENT: &str = "NowWhatBackend/1.0";

/// A point in WGS84 decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Administrative areas for a coordinate, coarsest first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationKeywords {
    /// Most specific area name, e.g. a 동
    pub location_keyword: String,
    /// 시/도
    pub depth_1: String,
    /// 시/군/구
    pub depth_2: String,
    /// 읍/면/동
    pub depth_3: String,
    /// 리 or neighbourhood
    pub depth_4: String,
    pub address: String,
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn reverse_geocode(&self, latitude: f64, longitude: f64) -> Option<LocationKeywords>;
}

pub struct NominatimGeocoder {
    client: Client,
    url: String,
}

impl NominatimGeocoder {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            url: NOMINATIM_REVERSE_URL.to_string(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    async fn fetch(&self, latitude: f64, longitude: f64) -> Result<Value, reqwest::Error> {
        self.client
            .get(&self.url)
            .query(&[
                ("format", "jsonv2".to_string()),
                ("lat", latitude.to_string()),
                ("lon", longitude.to_string()),
                ("zoom", "18".to_string()),
                ("addressdetails", "1".to_string()),
            ])
            .header("Accept", "application/json")
            .header("Accept-Language", "ko")
            .header("User-Agent", USER_AGENT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn reverse_geocode(&self, latitude: f64, longitude: f64) -> Option<LocationKeywords> {
        log::info!("Reverse geocoding ({}, {})", latitude, longitude);
        match self.fetch(latitude, longitude).await {
            Ok(body) => {
                let keywords = parse_nominatim(&body);
                match &keywords {
                    Some(k) => log::info!(
                        "Reverse geocoded to '{}' ({})",
                        k.location_keyword,
                        k.address
                    ),
                    None => log::warn!("No address for ({}, {})", latitude, longitude),
                }
                keywords
            }
            Err(e) => {
                log::error!("Reverse geocoding failed: {}", e);
                None
            }
        }
    }
}

fn first_of(address: &Value, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|k| address.get(*k).and_then(Value::as_str))
        .find(|v| !v.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// Map a Nominatim `jsonv2` reply onto Korean address depths
pub fn parse_nominatim(body: &Value) -> Option<LocationKeywords> {
    let empty = Value::Null;
    let address = body.get("address").unwrap_or(&empty);
    let display_name = body
        .get("display_name")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let has_address = address.as_object().is_some_and(|a| !a.is_empty());
    if !has_address && display_name.is_empty() {
        return None;
    }

    let mut depth_1 = first_of(address, &["city", "state", "region"]);
    let mut depth_2 = first_of(address, &["borough", "city_district", "county"]);
    let mut depth_3 = first_of(address, &["suburb", "town", "village"]);
    let depth_4 = first_of(address, &["quarter", "neighbourhood"]);

    let mut location_keyword = [&depth_3, &depth_4, &depth_2]
        .into_iter()
        .find(|d| !d.is_empty())
        .cloned()
        .unwrap_or_default();

    if location_keyword.is_empty() && !display_name.is_empty() {
        // Scan from the most specific end of "명동, 중구, 서울특별시, 대한민국"
        for part in display_name.split(',').rev().map(str::trim) {
            if part.ends_with('구') {
                location_keyword = part.to_string();
                depth_2 = part.to_string();
                break;
            }
            if part.ends_with('동') || part.ends_with('읍') || part.ends_with('면') {
                location_keyword = part.to_string();
                depth_3 = part.to_string();
                break;
            }
            if part.ends_with('시') && depth_1.is_empty() {
                depth_1 = part.to_string();
            }
        }
    }

    let joined = [&depth_1, &depth_2, &depth_3, &depth_4]
        .into_iter()
        .filter(|p| !p.is_empty())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ");
    let address = if joined.is_empty() {
        display_name.to_string()
    } else {
        joined
    };

    Some(LocationKeywords {
        location_keyword,
        depth_1,
        depth_2,
        depth_3,
        depth_4,
        address,
    })
}
