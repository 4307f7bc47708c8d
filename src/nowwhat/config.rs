// SPDX-License-Identifier: MIT

//! Process configuration
//!
//! [`Settings`] comes from the environment (after `.env` is loaded by the
//! binary). [`WorkflowSettings`] tunes both pipelines and may be loaded
//! from a YAML file; missing keys keep their defaults.

use crate::adk::error::NowWhatError;
use crate::nowwhat::search::NaverCredentials;
use crate::nowwhat::workflow::fanout::SearchCaps;
use crate::nowwhat::workflow::refine::SufficiencyPolicy;
use crate::nowwhat::workflow::state::Pricing;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;

/// Credentials and endpoints read from the environment
#[derive(Debug, Clone)]
pub struct Settings {
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub model_name: String,
    pub naver_client_id: Option<String>,
    pub naver_client_secret: Option<String>,
    pub brave_api_key: Option<String>,
    pub host: String,
    pub port: u16,
}

impl Settings {
    pub fn from_env() -> Result<Self, NowWhatError> {
        let port = match env_opt("PORT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| NowWhatError::config(format!("PORT must be a number, got '{}'", raw)))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            openai_api_key: env_opt("OPENAI_API_KEY"),
            openai_base_url: env_opt("OPENAI_BASE_URL"),
            model_name: env_opt("MODEL_NAME").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            naver_client_id: env_opt("NAVER_CLIENT_ID"),
            naver_client_secret: env_opt("NAVER_CLIENT_SECRET"),
            brave_api_key: env_opt("BRAVE_API_KEY"),
            host: env_opt("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
        })
    }

    /// Both halves of the Naver key pair, or nothing
    pub fn naver_credentials(&self) -> Option<NaverCredentials> {
        match (&self.naver_client_id, &self.naver_client_secret) {
            (Some(id), Some(secret)) => Some(NaverCredentials::new(id, secret)),
            _ => None,
        }
    }
}

/// Unset and empty variables are treated alike
fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Safety limits of the agent loop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReactSettings {
    pub max_tool_calls: u32,
    pub timeout_secs: u64,
}

impl Default for ReactSettings {
    fn default() -> Self {
        Self {
            max_tool_calls: 20,
            timeout_secs: 600,
        }
    }
}

impl ReactSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Tuning for the refinement pipeline and the agent loop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Back-edge traversals allowed from relevance evaluation to rewrite
    pub max_relevance_retries: u32,
    /// Circuit breaker on total step executions per run
    pub max_graph_steps: usize,
    pub sufficiency: SufficiencyPolicy,
    pub caps: SearchCaps,
    pub pricing: Pricing,
    pub react: ReactSettings,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_relevance_retries: 3,
            max_graph_steps: 50,
            sufficiency: SufficiencyPolicy::default(),
            caps: SearchCaps::default(),
            pricing: Pricing::default(),
            react: ReactSettings::default(),
        }
    }
}

impl WorkflowSettings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, NowWhatError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            NowWhatError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse_yaml(&content)
    }

    pub fn parse_yaml(content: &str) -> Result<Self, NowWhatError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: WorkflowSettings = serde_yaml::from_str(content)?;
        Ok(settings)
    }

    /// Defaults when no file is given
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, NowWhatError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}
