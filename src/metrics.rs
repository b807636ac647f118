//! Metrics for the telemetry pipeline
//!
//! ## Table of Contents
//! - **PipelineMetrics**: Prometheus counters for stream and playback
//! - **FrameOutcome**: Label values for `epi_frames_total`

use crate::error::Result;
use prometheus::{CounterVec, Encoder, Gauge, Counter, HistogramOpts, Histogram, Opts, Registry, TextEncoder};

/// What happened to one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Appended to a playback buffer
    Accepted,
    /// Timestep already buffered
    Duplicate,
    /// Failed JSON parsing or schema validation
    Rejected,
    /// Valid frame for another run, or beyond the horizon
    Ignored,
}

impl FrameOutcome {
    fn label(&self) -> &'static str {
        match self {
            FrameOutcome::Accepted => "accepted",
            FrameOutcome::Duplicate => "duplicate",
            FrameOutcome::Rejected => "rejected",
            FrameOutcome::Ignored => "ignored",
        }
    }
}

/// Core metrics for the pipeline
#[derive(Debug)]
pub struct PipelineMetrics {
    registry: Registry,

    /// Inbound messages by outcome
    pub frames: CounterVec,
    /// Reconnect attempts made by the reconnect decorator
    pub reconnects: Counter,
    /// Currently open run streams
    pub open_streams: Gauge,
    /// Worker-reported publish latency
    pub frame_latency: Histogram,
}

impl PipelineMetrics {
    /// Create a new metrics instance with its own registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let frames = CounterVec::new(
            Opts::new("epi_frames_total", "Inbound stream messages by outcome"),
            &["outcome"],
        )?;
        let reconnects = Counter::new("epi_stream_reconnects_total", "Stream reconnect attempts")?;
        let open_streams = Gauge::new("epi_open_streams", "Currently open run streams")?;
        let frame_latency = Histogram::with_opts(
            HistogramOpts::new("epi_frame_latency_ms", "Worker-reported frame latency")
                .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 1000.0]),
        )?;

        registry.register(Box::new(frames.clone()))?;
        registry.register(Box::new(reconnects.clone()))?;
        registry.register(Box::new(open_streams.clone()))?;
        registry.register(Box::new(frame_latency.clone()))?;

        Ok(Self {
            registry,
            frames,
            reconnects,
            open_streams,
            frame_latency,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record the outcome of one message
    pub fn record_frame(&self, outcome: FrameOutcome) {
        self.frames.with_label_values(&[outcome.label()]).inc();
    }

    /// Count of messages with a given outcome
    pub fn frame_count(&self, outcome: FrameOutcome) -> u64 {
        self.frames.with_label_values(&[outcome.label()]).get() as u64
    }

    /// Record worker latency
    pub fn record_latency(&self, latency_ms: f64) {
        self.frame_latency.observe(latency_ms);
    }

    /// Render in Prometheus text format
    pub fn export(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
