//! `iching` entry point.
//!
//! This binary is the composition root for the whole system:
//!
//! 1. **Wire observability**: `tracing-subscriber` with an env filter, text
//!    or JSON output, and an optional OpenTelemetry OTLP exporter.
//! 2. **Load configuration**: `iching.toml` (or `--config`), with command-line
//!    flags taking precedence over file values.
//! 3. **Run a command**:
//!    - `serve`: read the upstream credential from the environment, build the
//!      [`llm::ChatCompletionsProvider`] and run the [`server`].
//!    - `cast`: compute a hexagram from three numbers and print it.
//!    - `ask`: cast, then fetch an interpretation from a running server through
//!      the retrying [`client::InterpretationClient`] and print its sections.

mod config;
mod observability;

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use client::InterpretationClient;
use divination::{compute_hexagram, HexagramResult, ResponseFormat};
use llm::ChatCompletionsProvider;

use crate::config::AppConfig;
use crate::observability::LogFormat;

#[derive(Parser)]
#[command(name = "iching", version, about = "I-Ching casting and AI interpretation service")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, global = true, env = "ICHING_CONFIG", help = "Configuration file path [default: ./iching.toml]")]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text, help = "Log output format")]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Run the interpretation server")]
    Serve {
        #[arg(long, help = "Listen address (overrides server.host)")]
        host: Option<IpAddr>,

        #[arg(long, help = "Listen port (overrides server.port)")]
        port: Option<u16>,

        #[arg(long, help = "Model output format: json-schema | sectioned-text")]
        format: Option<ResponseFormat>,
    },

    #[command(about = "Cast a hexagram from three numbers")]
    Cast {
        #[command(flatten)]
        numbers: CastNumbers,
    },

    #[command(about = "Cast a hexagram and ask a running server to interpret it")]
    Ask {
        #[command(flatten)]
        numbers: CastNumbers,

        #[arg(short, long, help = "The question to interpret the hexagram for")]
        question: String,

        #[arg(long, help = "Interpretation server URL (overrides client.base_url)")]
        base_url: Option<String>,

        #[arg(long, help = "Retries after the first attempt (overrides client.max_retries)")]
        max_retries: Option<u32>,
    },
}

#[derive(clap::Args)]
struct CastNumbers {
    #[arg(value_parser = clap::value_parser!(u32).range(100..=999), help = "First number, selects the upper trigram")]
    first: u32,

    #[arg(value_parser = clap::value_parser!(u32).range(100..=999), help = "Second number, selects the lower trigram")]
    second: u32,

    #[arg(value_parser = clap::value_parser!(u32).range(100..=999), help = "Third number, selects the changing line")]
    third: u32,
}

impl CastNumbers {
    fn cast(&self) -> HexagramResult {
        compute_hexagram(self.first, self.second, self.third)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let telemetry = observability::init(cli.log_format)?;

    let result = run(cli).await;
    if let Err(e) = &result {
        tracing::error!("command failed: {e:#}");
    }

    telemetry.shutdown();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { host, port, format } => serve(config, host, port, format).await,
        Command::Cast { numbers } => {
            print_hexagram(&numbers.cast());
            Ok(())
        }
        Command::Ask {
            numbers,
            question,
            base_url,
            max_retries,
        } => ask(config, &numbers, &question, base_url, max_retries).await,
    }
}

async fn serve(
    mut config: AppConfig,
    host: Option<IpAddr>,
    port: Option<u16>,
    format: Option<ResponseFormat>,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(format) = format {
        config.server.response_format = format;
    }
    let settings = config.server_settings()?;

    let key_var = &config.upstream.api_key_env;
    let api_key = match std::env::var(key_var) {
        Ok(key) if !key.trim().is_empty() => key,
        _ => bail!("environment variable {key_var} is not set; it must hold the upstream API key"),
    };

    let provider = ChatCompletionsProvider::new(config.chat_completions(api_key))
        .context("failed to create the upstream provider")?;
    tracing::info!(
        endpoint = %provider.config().endpoint,
        model = %provider.config().model,
        "upstream provider ready"
    );

    server::serve(settings, Arc::new(provider)).await?;
    Ok(())
}

async fn ask(
    config: AppConfig,
    numbers: &CastNumbers,
    question: &str,
    base_url: Option<String>,
    max_retries: Option<u32>,
) -> anyhow::Result<()> {
    let hexagram = numbers.cast();
    print_hexagram(&hexagram);

    let base_url = base_url.unwrap_or_else(|| config.client.base_url.clone());
    let mut options = config.retry_options();
    if let Some(max_retries) = max_retries {
        options.max_retries = max_retries;
    }

    let client = InterpretationClient::new(base_url, Duration::from_secs(config.client.timeout_secs))?;
    let result = client
        .get_interpretation(question, &hexagram, &options)
        .await
        .map_err(|e| {
            let hint = e.remediation();
            anyhow::Error::new(e).context(hint)
        })?;

    for section in result.sections() {
        println!("\n【{}】\n{}", section.title, section.content);
    }
    Ok(())
}

fn print_hexagram(hexagram: &HexagramResult) {
    println!("本卦：{}", hexagram.hexagram_name);
    println!("变爻：第{}爻（{}）", hexagram.line_index.get(), hexagram.line_text);
}
