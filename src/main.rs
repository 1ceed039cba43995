//! Line-oriented REPL over stdin
//!
//! Every non-empty input line is one chunk. Printed output comes first, then
//! `< result` on success or `! error` on failure.

use std::path::PathBuf;

use clap::Parser;
use hogrepl::{ChunkStatus, Session, SessionConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "hogrepl")]
#[command(about = "Evaluate scripts line by line against a persistent VM state")]
struct Cli {
    /// TOML file with session settings
    #[arg(long, env = "HOGREPL_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "hogrepl=debug" } else { "hogrepl=info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match &cli.config {
        Some(path) => match SessionConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => SessionConfig::default(),
    };

    let session = match Session::local(&config, None) {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to start session: {}", e);
            std::process::exit(1);
        }
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read input: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let chunk = match session.eval(line).await {
            Ok(chunk) => chunk,
            Err(e) => {
                error!("{}", e);
                break;
            }
        };

        for output in &chunk.output {
            println!("{}", output);
        }
        match (chunk.status, &chunk.result, &chunk.error) {
            (ChunkStatus::Succeeded, Some(result), _) => println!("< {}", result),
            (_, _, Some(error)) => println!("! {}", error),
            _ => {}
        }
    }

    info!("Input closed");
    session.shutdown().await;
}
