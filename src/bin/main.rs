use clap::Parser;
use financial_analysis_agent::{agent::Agent, config::AgentConfig, models::QueryRequest};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Financial analysis agent
#[derive(Parser, Debug)]
#[command(name = "agent", version, about)]
struct Cli {
    /// Question to answer; starts an interactive session when omitted
    query: Option<String>,

    /// Session id used for cross-query memory
    #[arg(short, long)]
    session: Option<String>,

    /// Overall tool-selection rounds per query
    #[arg(long)]
    max_steps: Option<u32>,

    /// Tool-selection rounds per subtask
    #[arg(long)]
    max_steps_per_task: Option<u32>,

    /// JSONL file of {"question": ...} lines; answers are written to stdout as JSONL
    #[arg(long, value_name = "FILE")]
    batch: Option<PathBuf>,
}

#[derive(Deserialize)]
struct BatchItem {
    question: String,
}

#[derive(Serialize)]
struct BatchResult<'a> {
    question: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so stdout stays clean for answers
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = AgentConfig::from_env()?;
    if let Some(max_steps) = cli.max_steps {
        config.budget.max_steps = max_steps;
    }
    if let Some(max_steps_per_task) = cli.max_steps_per_task {
        config.budget.max_steps_per_task = max_steps_per_task;
    }

    let agent = Agent::from_config(&config)?;
    info!(
        max_steps = config.budget.max_steps,
        max_steps_per_task = config.budget.max_steps_per_task,
        "Agent initialized"
    );

    if let Some(path) = cli.batch {
        return run_batch(&agent, &path).await;
    }

    if let Some(query) = cli.query {
        let mut request = QueryRequest::new(query);
        request.session_id = cli.session;
        let response = agent.run(request).await?;
        println!("{}", response.answer);
        return Ok(());
    }

    let session = cli
        .session
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    run_interactive(&agent, &session).await
}

async fn run_interactive(agent: &Agent, session: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    stdout
        .write_all(b"Financial analysis agent. Type 'exit' to quit, '/clear' to forget this session.\n")
        .await?;

    loop {
        stdout.write_all(b"\n> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        match line {
            "" => continue,
            "exit" | "quit" => break,
            "/clear" => {
                agent.clear_session(session).await;
                stdout.write_all(b"Session memory cleared.\n").await?;
                continue;
            }
            _ => {}
        }

        let request = QueryRequest::new(line).with_session(session);
        match agent.run(request).await {
            Ok(response) => {
                stdout.write_all(response.answer.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
            }
            Err(e) => {
                eprintln!("Error: {}", e);
            }
        }
    }

    Ok(())
}

/// Questions from a JSONL file; malformed lines are reported and skipped.
async fn read_batch(path: &Path) -> std::io::Result<Vec<BatchItem>> {
    let contents = tokio::fs::read_to_string(path).await?;
    let mut items = Vec::new();

    for (line_no, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<BatchItem>(line) {
            Ok(item) => items.push(item),
            Err(e) => eprintln!("Skipping line {}: {}", line_no + 1, e),
        }
    }

    Ok(items)
}

async fn run_batch(agent: &Agent, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let items = read_batch(path).await?;
    let mut stdout = tokio::io::stdout();

    for item in items {
        let result = match agent.answer(&item.question).await {
            Ok(answer) => BatchResult {
                question: &item.question,
                answer: Some(answer),
                error: None,
            },
            Err(e) => BatchResult {
                question: &item.question,
                answer: None,
                error: Some(e.to_string()),
            },
        };

        let mut out = serde_json::to_vec(&result)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }

    Ok(())
}
