//! # Epidemic Telemetry
//!
//! Client-side pipeline for live epidemic simulation runs: contract schemas,
//! a validated SSE frame stream and the playback state that turns frames into
//! a scrubbable time series.
//!
//! ## Features
//!
//! - **Schemas**: Scenario, run and frame contracts with exhaustive validation
//! - **Draft Store**: Immutable scenario drafts and the tracked runs list
//! - **Stream Client**: Per-run frame subscription with cancel guarantees
//! - **Reconnect**: Optional backoff decorator around the stream
//! - **Playback**: Dedup, aggregation, scrubber view and status mirroring
//! - **REST Client**: Datasets, scenarios, runs and stored frames
//! - **Metrics**: Prometheus counters for the pipeline
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use epidemic_telemetry::prelude::*;
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> epidemic_telemetry::Result<()> {
//!     let config = ClientConfig::from_env()?;
//!     let token = "my-token";
//!
//!     let api = ApiClient::new(config.clone())?;
//!     let store = DraftStore::new();
//!     let scenario = api.create_scenario(token, &store.submission()?).await?;
//!     let run = api
//!         .create_run(token, &RunCreateRequest::new(scenario.id, scenario.engine.clone()), None)
//!         .await?;
//!
//!     let mut playback = RunPlayback::new(run.id).with_horizon(scenario.engine.horizon);
//!     let mut frames = StreamClient::new(config)?.subscribe(token, run.id).await?;
//!     while let Some(item) = frames.next().await {
//!         match item {
//!             StreamItem::Frame(frame) => {
//!                 playback.ingest(&frame);
//!             }
//!             StreamItem::Closed => break,
//!             StreamItem::Failed(err) => playback.mark_connection_lost(err.to_string()),
//!         }
//!     }
//!     println!("peak infected: {}", playback.peak().peak_infected);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod client;
pub mod compare;
pub mod config;
pub mod draft;
pub mod error;
pub mod metrics;
pub mod playback;
pub mod resilience;
pub mod schema;
pub mod stream;

// Re-exports for ergonomic API
pub use client::ApiClient;
pub use compare::{metrics_diff, MetricDelta};
pub use config::ClientConfig;
pub use draft::{DraftStore, RunEntry};
pub use error::{Result, TelemetryError};
pub use metrics::{FrameOutcome, PipelineMetrics};
pub use playback::{AggregatePoint, DisplayState, Ingest, PeakMetrics, RunPhase, RunPlayback};
pub use schema::{Frame, ProblemError, Run, RunStatus, Scenario, ScenarioCreateRequest, ValidationError};
pub use stream::{FrameSubscription, ReconnectingStream, StreamClient, StreamHandle, StreamItem, StreamOutcome};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::client::ApiClient;
    pub use crate::config::ClientConfig;
    pub use crate::draft::DraftStore;
    pub use crate::error::{Result, TelemetryError};
    pub use crate::playback::RunPlayback;
    pub use crate::schema::{Frame, RunCreateRequest, RunStatus, ScenarioCreateRequest, Validate};
    pub use crate::stream::{StreamClient, StreamItem};
}
