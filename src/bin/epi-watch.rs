//! `epi-watch`: submit scenarios and follow simulation runs from a terminal
//!
//! ```text
//! epi-watch submit --title "Lockdown test" --horizon 60 --follow
//! epi-watch watch --run <RUN_ID> --reconnect
//! epi-watch runs
//! epi-watch compare <BASELINE_RUN> <CHALLENGER_RUN>
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use epidemic_telemetry::compare::{diff_runs, playback_summary};
use epidemic_telemetry::config::{ClientConfig, API_BASE_URL_ENV, API_TOKEN_ENV, DEFAULT_API_BASE_URL};
use epidemic_telemetry::resilience::BackoffConfig;
use epidemic_telemetry::schema::RunCreateRequest;
use epidemic_telemetry::stream::{ReconnectingStream, RunStreamConnector};
use epidemic_telemetry::{
    ApiClient, DisplayState, DraftStore, Ingest, PipelineMetrics, RunEntry, RunPlayback,
    StreamClient, StreamItem,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "epi-watch")]
#[command(about = "Follow epidemic simulation runs")]
#[command(version)]
struct Args {
    /// API base URL including the version prefix
    #[arg(long, env = API_BASE_URL_ENV, default_value = DEFAULT_API_BASE_URL)]
    base_url: String,

    /// Bearer token
    #[arg(long, env = API_TOKEN_ENV, hide_env_values = true)]
    token: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a scenario from the default draft and queue a run
    Submit {
        /// Scenario title
        #[arg(long, default_value = "New scenario")]
        title: String,
        /// Last timestep of the run
        #[arg(long, default_value = "180")]
        horizon: u64,
        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Stream the run after queuing it
        #[arg(long)]
        follow: bool,
    },
    /// Stream a run's frames
    Watch {
        /// Run id
        #[arg(long)]
        run: Uuid,
        /// Reconnect with backoff when the stream drops
        #[arg(long)]
        reconnect: bool,
    },
    /// List runs
    Runs,
    /// Compare summary metrics of two runs
    Compare {
        /// Baseline run id
        baseline: Uuid,
        /// Challenger run id
        challenger: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ClientConfig::from_env()
        .context("invalid EPI_* environment")?
        .with_base_url(args.base_url);
    config.validate()?;
    let token = args.token.clone().unwrap_or_default();
    let api = ApiClient::new(config.clone())?;

    match args.command {
        Command::Submit {
            title,
            horizon,
            seed,
            follow,
        } => {
            let mut store = DraftStore::new();
            store.set_draft(|mut draft| {
                draft.title = title;
                draft.engine = draft.engine.with_horizon(horizon).with_seed(seed);
                draft
            });
            let scenario = api.create_scenario(&token, &store.submission()?).await?;
            let request = RunCreateRequest::new(scenario.id, scenario.engine.clone());
            let key = Uuid::new_v4().to_string();
            let run = api.create_run(&token, &request, Some(&key)).await?;
            store.upsert_run(RunEntry::from(&run));
            println!("scenario {}  run {}  status {}", scenario.id, run.id, run.status);

            if follow {
                watch(config, &token, run.id, Some(scenario.engine.horizon), false).await?;
            }
        }
        Command::Watch { run, reconnect } => {
            let horizon = match api.get_run(&token, run).await {
                Ok(record) => Some(record.engine.horizon),
                Err(err) => {
                    warn!(run_id = %run, error = %err, "Could not fetch run, streaming without horizon");
                    None
                }
            };
            watch(config, &token, run, horizon, reconnect).await?;
        }
        Command::Runs => {
            let page = api.list_runs(&token).await?;
            for run in &page.items {
                println!("{}  {:<9}  scenario {}", run.id, run.status, run.scenario_id);
            }
            if page.has_more() {
                println!("(more runs available)");
            }
        }
        Command::Compare { baseline, challenger } => {
            let base = api.get_run(&token, baseline).await?;
            let other = api.get_run(&token, challenger).await?;
            for delta in diff_runs(&RunEntry::from(&base), &RunEntry::from(&other)) {
                println!(
                    "{:<16} {:>12.2} {:>12.2} {:>10}",
                    delta.metric,
                    delta.baseline,
                    delta.challenger,
                    delta.signed_delta()
                );
            }
        }
    }
    Ok(())
}

async fn watch(config: ClientConfig, token: &str, run_id: Uuid, horizon: Option<u64>, reconnect: bool) -> Result<()> {
    if token.trim().is_empty() {
        bail!("a bearer token is required to stream a run (set {})", API_TOKEN_ENV);
    }

    let metrics = Arc::new(PipelineMetrics::new()?);
    let client = StreamClient::new(config)?.with_metrics(Arc::clone(&metrics));
    let mut playback = RunPlayback::new(run_id).with_metrics(Arc::clone(&metrics));
    if let Some(horizon) = horizon {
        playback = playback.with_horizon(horizon);
    }

    let backoff = if reconnect {
        BackoffConfig::default()
    } else {
        BackoffConfig::default().with_max_retries(0)
    };
    let connector = RunStreamConnector::new(client, token, run_id);
    let mut stream = ReconnectingStream::new(connector, backoff.with_max_delay(Duration::from_secs(10)))
        .with_metrics(Arc::clone(&metrics));

    while let Some(item) = stream.next().await {
        match item {
            StreamItem::Frame(frame) => {
                if playback.ingest(&frame) == Ingest::Accepted {
                    playback.set_scrubber(i64::MAX);
                    if let Some(point) = playback.current() {
                        println!(
                            "t={:<5} S={:>12.1} E={:>10.1} I={:>10.1} R={:>12.1} D={:>10.1}",
                            point.t, point.s, point.e, point.i, point.r, point.d
                        );
                    }
                }
            }
            StreamItem::Closed => {
                if playback.status().map_or(true, |s| !s.is_terminal()) {
                    playback.mark_connection_lost("stream closed before the run finished");
                }
            }
            StreamItem::Failed(err) => playback.mark_connection_lost(err.to_string()),
        }
    }

    match playback.display_state() {
        DisplayState::Finished(status) => info!(run_id = %run_id, status = %status, "Run finished"),
        DisplayState::ConnectionLost(reason) => warn!(run_id = %run_id, reason = %reason, "Connection lost"),
        DisplayState::AwaitingData => warn!(run_id = %run_id, "No frames received"),
        DisplayState::Streaming => {}
    }

    let mut summary: Vec<_> = playback_summary(&playback.peak()).into_iter().collect();
    summary.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, value) in summary {
        println!("{:<14} {:.2}", name, value);
    }
    if playback.out_of_order() > 0 {
        println!("out-of-order frames: {}", playback.out_of_order());
    }
    Ok(())
}
