// SPDX-License-Identifier: MIT

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use nowwhat_rs::adk::error::ModelError;
use nowwhat_rs::adk::model::openai::{OpenAIModel, DEFAULT_BASE_URL};
use nowwhat_rs::adk::model::Model;
use nowwhat_rs::adk::tool::Tool;
use nowwhat_rs::nowwhat::agent::{answer_text, ReactAgent};
use nowwhat_rs::nowwhat::config::{Settings, WorkflowSettings};
use nowwhat_rs::nowwhat::geocode::{Coordinates, Geocoder, NominatimGeocoder};
use nowwhat_rs::nowwhat::search::{BraveWebSearch, NaverBlogSearch, NaverLocalSearch, SearchSource};
use nowwhat_rs::nowwhat::server::{self, AppState};
use nowwhat_rs::nowwhat::tools::default_registry;
use nowwhat_rs::nowwhat::workflow::refine::{RefineContext, SearchPipeline};
use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML file with workflow settings
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP API
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the refinement pipeline once
    Search {
        #[arg(short, long)]
        query: String,

        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,

        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
    },
    /// Run the tool-calling agent once
    Agent {
        #[arg(short, long)]
        query: String,

        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,

        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
    },
}

/// The server logs through tracing so tower-http spans are visible;
/// `log` records are bridged into it.
fn init_logging(serving: bool) {
    if serving {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    } else {
        env_logger::init();
    }
}

fn coordinates(lat: Option<f64>, lon: Option<f64>) -> Option<Coordinates> {
    match (lat, lon) {
        (Some(latitude), Some(longitude)) => Some(Coordinates {
            latitude,
            longitude,
        }),
        _ => None,
    }
}

fn build_model(settings: &Settings) -> Result<Arc<dyn Model>, ModelError> {
    let api_key = settings
        .openai_api_key
        .clone()
        .ok_or_else(|| ModelError::ApiKeyMissing("openai".to_string()))?;
    let base_url = settings
        .openai_base_url
        .clone()
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    log::info!("Using OpenAI model {}", settings.model_name);
    Ok(Arc::new(OpenAIModel::new(
        api_key,
        &settings.model_name,
        base_url,
    )?))
}

fn build_sources(
    settings: &Settings,
    workflow: &WorkflowSettings,
    client: &Client,
) -> Vec<Arc<dyn SearchSource>> {
    let max_queries = workflow.caps.max_queries;
    let mut sources: Vec<Arc<dyn SearchSource>> = Vec::new();

    match settings.naver_credentials() {
        Some(credentials) => {
            sources.push(Arc::new(
                NaverLocalSearch::new(client.clone(), credentials.clone())
                    .with_max_queries(max_queries),
            ));
            sources.push(Arc::new(
                NaverBlogSearch::new(client.clone(), credentials).with_max_queries(max_queries),
            ));
        }
        None => log::warn!("NAVER_CLIENT_ID/NAVER_CLIENT_SECRET not set, Naver sources disabled"),
    }

    match &settings.brave_api_key {
        Some(key) => sources.push(Arc::new(
            BraveWebSearch::new(client.clone(), key).with_max_queries(max_queries),
        )),
        None => log::warn!("BRAVE_API_KEY not set, web search disabled"),
    }

    log::info!(
        "Search sources: {}",
        sources
            .iter()
            .map(|s| s.tag().as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    sources
}

fn build_pipeline(
    model: Arc<dyn Model>,
    settings: &Settings,
    workflow: &WorkflowSettings,
    client: &Client,
    geocoder: Arc<dyn Geocoder>,
) -> anyhow::Result<SearchPipeline> {
    let sources = build_sources(settings, workflow, client);
    let pipeline = SearchPipeline::new(RefineContext::new(model, sources, workflow.clone()))
        .context("building the refinement graph")?;
    Ok(pipeline.with_geocoder(geocoder))
}

async fn build_agent(
    model: Arc<dyn Model>,
    workflow: &WorkflowSettings,
    geocoder: Arc<dyn Geocoder>,
) -> anyhow::Result<ReactAgent> {
    let tools = default_registry(geocoder).await;
    for tool in tools.list().await {
        log::info!("Registered tool: {}", tool.name());
    }
    ReactAgent::new(
        model,
        tools,
        workflow.react.clone(),
        workflow.pricing.clone(),
    )
    .context("building the agent graph")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();
    init_logging(matches!(args.command, Commands::Serve { .. }));

    let settings = Settings::from_env()?;
    let workflow = WorkflowSettings::load_or_default(args.config.as_deref())?;
    let client = Client::new();
    let geocoder: Arc<dyn Geocoder> = Arc::new(NominatimGeocoder::new(client.clone()));

    match args.command {
        Commands::Serve { host, port } => {
            let state = match build_model(&settings) {
                Ok(model) => AppState {
                    pipeline: Some(build_pipeline(
                        model.clone(),
                        &settings,
                        &workflow,
                        &client,
                        geocoder.clone(),
                    )?),
                    agent: Some(build_agent(model, &workflow, geocoder).await?),
                },
                Err(e) => {
                    log::warn!("{}, search endpoints will answer API_KEY_ERROR", e);
                    AppState {
                        pipeline: None,
                        agent: None,
                    }
                }
            };

            let host = host.unwrap_or_else(|| settings.host.clone());
            let port = port.unwrap_or(settings.port);
            server::serve(state, &host, port).await?;
        }
        Commands::Search { query, lat, lon } => {
            let model = build_model(&settings)?;
            let pipeline = build_pipeline(model, &settings, &workflow, &client, geocoder)?;
            let outcome = pipeline.run(&query, coordinates(lat, lon)).await?;

            println!("{}", serde_json::to_string_pretty(&outcome.state)?);
            println!("Status: {:?}", outcome.status);
            let total = outcome.state.usage.total();
            println!("Usage: {}", total.cost_formatted);
        }
        Commands::Agent { query, lat, lon } => {
            let model = build_model(&settings)?;
            let agent = build_agent(model, &workflow, geocoder).await?;
            let outcome = agent.run_query(&query, coordinates(lat, lon)).await?;

            println!("{}", answer_text(&outcome.state));
            println!(
                "Tool calls: {}, done: {}",
                outcome.state.tool_call_count, outcome.state.done
            );
            if let Some(result) = &outcome.state.final_result {
                println!("{}", serde_json::to_string_pretty(result)?);
            }
        }
    }

    Ok(())
}
