use financial_analysis_agent::{agent::Agent, api::start_server, config::AgentConfig};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AgentConfig::from_env()?;

    info!("Financial Analysis Agent - API Server");
    info!("Port: {}", config.api_port);

    let agent = Arc::new(Agent::from_config(&config)?);

    info!(
        max_steps = config.budget.max_steps,
        max_steps_per_task = config.budget.max_steps_per_task,
        "Agent initialized"
    );

    start_server(agent, config.api_port).await?;

    Ok(())
}
