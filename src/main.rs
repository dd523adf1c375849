use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use attackscope::config::Config;
use attackscope::detect::engine::Pipeline;
use attackscope::query::{self, OllamaBackend};
use attackscope::report::format::render_text;

#[derive(Parser)]
#[command(
    name = "attackscope",
    about = "Batch abuse and anomaly detection for API access logs",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (default: $ATTACKSCOPE_CONFIG, then ./attackscope.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every detector over a log file and print the report
    Detect {
        /// Log records as a JSON array or JSON Lines
        #[arg(long)]
        input: PathBuf,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,

        /// Number of entities in the top suspicious list
        #[arg(long)]
        top: Option<usize>,
    },

    /// Ask a language model a question about the detection results
    Ask {
        /// Log records as a JSON array or JSON Lines
        #[arg(long)]
        input: PathBuf,

        /// Question to ask
        #[arg(long)]
        question: String,
    },

    /// Start the HTTP API
    Serve {
        /// Bind address
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::resolve(cli.config.as_deref())?;

    attackscope::init_tracing(&config.logging);

    match cli.command {
        Commands::Detect { input, json, top } => {
            if let Some(n) = top {
                config.report.top_n = n;
            }
            tracing::info!(input = %input.display(), "Running detection");
            let records = attackscope::read_records(&input)?;
            let pipeline = Pipeline::new(config)?;
            let report = pipeline.run(&records).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", render_text(&report));
            }
        }
        Commands::Ask { input, question } => {
            let records = attackscope::read_records(&input)?;
            let query_config = config.query.clone();
            let pipeline = Pipeline::new(config)?;
            let report = pipeline.run(&records).await;

            let backend = OllamaBackend::new(query_config)?;
            let answer = query::ask_report(&backend, &report, &question)
                .await
                .context("ask backend failed")?;
            println!("{}", answer);
        }
        Commands::Serve { bind } => {
            tracing::info!(%bind, "Starting attackscope API");
            attackscope::serve(&bind, config).await?;
        }
        Commands::ShowConfig => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
