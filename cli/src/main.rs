//! `lens` command line tool.
//!
//! Runs searches, chat calls and graph builds against a JSON file of
//! embedding records. Results are printed to stdout as JSON; logs go to
//! stderr.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

/// Similarity search and cached generation over an embedding corpus.
#[derive(Debug, Parser)]
#[command(name = "lens", version, about)]
struct Cli {
    /// TOML config file. Built-in defaults are used when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// JSON file holding the embedding records.
    #[arg(short, long, global = true, default_value = "records.json")]
    store: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Find the records most similar to a query.
    Search {
        /// Query text.
        query: String,

        /// Number of results. Defaults to the configured value.
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Minimum engagement score; 0 disables the filter.
        #[arg(long, default_value_t = 0.0)]
        min_score: f64,
    },

    /// Send a prompt through the cached, rate-limited gateway.
    Chat {
        /// Prompt text.
        prompt: String,

        /// Model name. Defaults to the configured model.
        #[arg(short, long)]
        model: Option<String>,

        /// Maximum tokens to generate.
        #[arg(long)]
        max_tokens: Option<u32>,

        /// Sampling temperature.
        #[arg(short, long)]
        temperature: Option<f32>,

        /// Skip the response cache.
        #[arg(long)]
        no_cache: bool,
    },

    /// Build the similarity graph over every record.
    Graph {
        /// Edge threshold. Defaults to the configured value.
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Write the graph here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show vector cache and response cache statistics.
    Stats,
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    // Ignore the error if a subscriber is already set.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = commands::load_config(cli.config.as_deref())?;
    let output = match cli.command {
        Command::Search {
            query,
            top_k,
            min_score,
        } => commands::search(config, &cli.store, &query, top_k, min_score).await?,
        Command::Chat {
            prompt,
            model,
            max_tokens,
            temperature,
            no_cache,
        } => {
            let mut request = lens_gateway::ChatRequest::new(prompt).with_cache(!no_cache);
            request.model = model;
            request.max_tokens = max_tokens;
            request.temperature = temperature;
            commands::chat(config, &cli.store, request).await?
        }
        Command::Graph { threshold, output } => {
            commands::graph(config, &cli.store, threshold, output.as_deref()).await?
        }
        Command::Stats => commands::stats(config, &cli.store).await?,
    };

    if let Some(output) = output {
        println!("{output}");
    }
    Ok(())
}
