//! nats-gather - scatter-gather playground over NATS
//!
//! "Ask, and it shall be given you" - Matthew 7:7
//!
//! Usage:
//!   nats-gather convert-responder --to EUR
//!   nats-gather convert --convert-usd 10
//!   nats-gather log-responder
//!   nats-gather log -x 2.5
//!
//! Environment variables:
//!   NATS_URL - NATS server URL (default: nats://127.0.0.1:4222)
//!   GATHER_TIMEOUT_MS - reply window for gather commands (default: 1000)
//!   LOG_LEVEL - log level when RUST_LOG is unset (default: info)

use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use nats_gather::{
    config::{GatherArgs, NatsArgs},
    playground::{self, Converted, Currency, AGGREGATE_SUBJECT, CONVERT_SUBJECT, LOG_SUBJECT},
    Client, SubscriptionHandle,
};

#[derive(Parser, Debug)]
#[command(name = "nats-gather")]
#[command(about = "Scatter-gather request/response playground over NATS")]
#[command(version)]
struct Cli {
    /// NATS configuration
    #[command(flatten)]
    nats: NatsArgs,

    /// Reply window configuration
    #[command(flatten)]
    gather: GatherArgs,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer USD conversion requests for one currency
    ConvertResponder {
        /// Currency to convert to
        #[arg(long, value_enum, ignore_case = true)]
        to: Currency,
    },

    /// Convert USD with every conversion responder
    Convert {
        /// Amount of USD to convert
        #[arg(long = "convert-usd", default_value = "1")]
        amount: i64,
    },

    /// Answer aggregate requests by gathering conversions
    AggregateResponder,

    /// Convert USD through every aggregator (nested gather)
    ConvertNested {
        /// Amount of USD to convert
        #[arg(long = "convert-usd", default_value = "1")]
        amount: i64,
    },

    /// Answer natural logarithm requests
    LogResponder,

    /// Ask for the natural logarithm of a number
    Log {
        /// Number to take the logarithm of
        #[arg(short, default_value = "1", allow_negative_numbers = true)]
        x: f64,
    },

    /// Publish one JSON value
    Publish {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        json: String,
    },

    /// Print every JSON value published on a subject
    Listen {
        #[arg(long)]
        subject: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("nats_gather={},info", cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = cli.nats.client_config();
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("NATS: {}", config.nats_url);
    let client = Client::connect(config).await?;

    let outcome = run(&client, &cli).await;
    if let Err(e) = client.close().await {
        warn!("Error while closing client: {}", e);
    }
    outcome
}

async fn run(client: &Client, cli: &Cli) -> anyhow::Result<()> {
    let window = cli.gather.timeout();

    match &cli.command {
        Command::ConvertResponder { to } => {
            let handle = playground::serve_conversions(client, *to).await?;
            info!("Converting USD to {} on {}", to, CONVERT_SUBJECT);
            serve_until_shutdown(handle).await;
        }
        Command::Convert { amount } => {
            let (conversions, error) = client
                .gather::<_, Converted>(CONVERT_SUBJECT, amount, window)
                .await
                .into_parts();
            if conversions.is_empty() {
                info!("No conversion responders answered within {:?}", window);
            }
            for c in &conversions {
                info!("converted {} usd to {:.6} {}", c.usd, c.amount, c.currency);
            }
            if let Some(e) = error {
                return Err(e.into());
            }
        }
        Command::AggregateResponder => {
            // Leave the aggregator's own window inside the caller's
            let inner_window = window / 2;
            let handle = playground::serve_aggregate(client, inner_window).await?;
            info!(
                "Aggregating {} on {} (window {:?})",
                CONVERT_SUBJECT, AGGREGATE_SUBJECT, inner_window
            );
            serve_until_shutdown(handle).await;
        }
        Command::ConvertNested { amount } => {
            let (batches, error) = client
                .nested_gather::<_, Converted>(AGGREGATE_SUBJECT, amount, window)
                .await
                .into_parts();
            for (i, batch) in batches.iter().enumerate() {
                info!("aggregator {} returned {} conversions", i, batch.len());
                for c in batch {
                    info!("  converted {} usd to {:.6} {}", c.usd, c.amount, c.currency);
                }
            }
            if let Some(e) = error {
                return Err(e.into());
            }
        }
        Command::LogResponder => {
            let handle = playground::serve_logarithms(client).await?;
            info!("Computing natural logarithms on {}", LOG_SUBJECT);
            serve_until_shutdown(handle).await;
        }
        Command::Log { x } => {
            let ln: f64 = client.request_with_timeout(LOG_SUBJECT, x, window).await?;
            info!("natural logarithm of {} is {:.6}", x, ln);
        }
        Command::Publish { subject, json } => {
            let value: serde_json::Value = serde_json::from_str(json)?;
            client.publish(subject, &value).await?;
            info!("Published to {}", subject);
        }
        Command::Listen { subject } => {
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<serde_json::Value>();
            let handle = client.subscribe(subject, tx).await?;
            info!("Listening on {}", subject);
            loop {
                tokio::select! {
                    value = rx.recv() => match value {
                        Some(value) => info!("{}: {}", subject, value),
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received shutdown signal");
                        handle.stop();
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Keep a responder running until Ctrl+C or until its subscription ends
async fn serve_until_shutdown(handle: SubscriptionHandle) {
    tokio::select! {
        _ = handle.closed() => {
            warn!("Subscription on {} ended", handle.subject());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            handle.stop();
        }
    }
    // Give in-flight replies a moment to go out
    tokio::time::sleep(Duration::from_millis(100)).await;
}
