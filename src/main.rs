use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use paper_scout::{Config, Paper, Pipeline};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "paper-scout", version, about = "Find and rank arXiv papers for a research question")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify a free-text query, fetch, rank and filter matching papers
    Search {
        query: String,
    },
    /// Browse recent papers for topic names such as "Machine Learning"
    Topics {
        #[arg(required = true)]
        topics: Vec<String>,
    },
    /// Run only the relevance filter over papers saved from an earlier search
    Refilter {
        #[arg(long)]
        query: String,
        /// JSON array of papers
        #[arg(long)]
        input: PathBuf,
    },
    /// Generate a plain-English title for a paper
    Title {
        #[arg(long)]
        title: String,
        #[arg(long = "abstract")]
        abstract_text: String,
    },
    /// Show which API keys are configured
    Keys,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 0. Load Configuration
    // Auto-create .env if it doesn't exist (copy from .env.example)
    if !std::path::Path::new(".env").exists() && std::path::Path::new(".env.example").exists() {
        eprintln!("Creating .env from .env.example...");
        std::fs::copy(".env.example", ".env")?;
    }
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    tracing::debug!("Loaded {:?}", config);

    if let Command::Keys = cli.command {
        return print_json(&config.key_status());
    }

    let pipeline = Pipeline::from_config(&config)?;
    match cli.command {
        Command::Search { query } => {
            let outcome = pipeline.search(&query).await?;
            for degradation in &outcome.degradations {
                tracing::warn!("Degraded result: {:?}", degradation);
            }
            print_json(&outcome)
        }
        Command::Topics { topics } => {
            let papers = pipeline.search_topics(&topics).await?;
            tracing::info!("Found {} papers", papers.len());
            print_json(&papers)
        }
        Command::Refilter { query, input } => {
            let raw = std::fs::read_to_string(&input).with_context(|| format!("reading {}", input.display()))?;
            let papers: Vec<Paper> = serde_json::from_str(&raw).with_context(|| format!("parsing {}", input.display()))?;
            let outcome = pipeline.refilter(&query, papers).await?;
            if outcome.failed_open {
                tracing::warn!("Relevance filter unavailable; all papers kept");
            }
            print_json(&outcome.papers)
        }
        Command::Title { title, abstract_text } => {
            let plain = pipeline.plain_title(&title, &abstract_text).await?;
            println!("{plain}");
            Ok(())
        }
        Command::Keys => Ok(()),
    }
}
