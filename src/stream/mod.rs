//! Run stream client
//!
//! ## Table of Contents
//! - **StreamClient**: Opens `GET /runs/{id}/stream` and spawns the reader
//! - **StreamItem**: One validated frame or the terminal close/failure
//! - **FrameSubscription**: Pull-based consumer of a run stream
//! - **StreamHandle**: Push-based consumer with a cancel guarantee
//! - **ReconnectingStream**: Optional reconnect decorator
//!
//! Every message is decoded and validated before it reaches a consumer.
//! Messages that fail are logged and dropped; the stream stays open.

pub mod reconnect;
pub mod sse;
pub mod subscription;

pub use reconnect::{ReconnectingStream, RunStreamConnector, StreamConnector};
pub use sse::{SseDecoder, SseEvent};
pub use subscription::FrameSubscription;

use crate::client::problem_from_response;
use crate::config::ClientConfig;
use crate::error::{Result, TelemetryError};
use crate::metrics::{FrameOutcome, PipelineMetrics};
use crate::schema::{self, Frame};
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::header::ACCEPT;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use url::Url;
use uuid::Uuid;

/// One item of a run stream
#[derive(Debug)]
pub enum StreamItem {
    /// A frame that passed schema validation
    Frame(Frame),
    /// The server ended the stream
    Closed,
    /// The connection failed; nothing follows
    Failed(TelemetryError),
}

impl StreamItem {
    /// Whether this item ends the stream
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamItem::Frame(_))
    }
}

/// How a push-based stream ended
#[derive(Debug)]
pub enum StreamOutcome {
    /// Server closed the stream
    Closed,
    /// Transport failure
    Failed(TelemetryError),
    /// Cancelled by the consumer
    Cancelled,
}

/// Client for per-run frame streams
#[derive(Clone)]
pub struct StreamClient {
    http: reqwest::Client,
    config: ClientConfig,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl StreamClient {
    /// Create a stream client
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        // No overall timeout: a run stream stays open for the whole run.
        let http = reqwest::Client::builder()
            .connect_timeout(config.request_timeout.min(Duration::from_secs(30)))
            .build()
            .map_err(|e| TelemetryError::config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            config,
            metrics: None,
        })
    }

    /// Record stream outcomes into `metrics`
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Stream URL for a run, with the token as query parameter
    pub fn stream_url(&self, run_id: Uuid, token: &str) -> Result<Url> {
        let raw = self.config.url(&format!("/runs/{}/stream", run_id));
        let mut url = Url::parse(&raw)
            .map_err(|e| TelemetryError::config(format!("invalid stream URL {}: {}", raw, e)))?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }

    /// Open the stream for `run_id`
    ///
    /// Fails with [`TelemetryError::AuthRequired`] before any network
    /// activity when `token` is empty.
    pub async fn subscribe(&self, token: &str, run_id: Uuid) -> Result<FrameSubscription> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TelemetryError::AuthRequired);
        }

        let url = self.stream_url(run_id, token)?;
        info!(run_id = %run_id, "Opening run stream");

        let response = self
            .http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(problem_from_response(response).await);
        }

        let (tx, rx) = mpsc::channel(self.config.stream_buffer);
        let reader = tokio::spawn(read_frames(response, run_id, tx, self.metrics.clone()));
        Ok(FrameSubscription::with_reader(run_id, rx, reader.abort_handle()))
    }

    /// Open the stream and deliver each frame to `on_frame`
    pub async fn open<F>(&self, token: &str, run_id: Uuid, on_frame: F) -> Result<StreamHandle>
    where
        F: FnMut(Frame) + Send + 'static,
    {
        let subscription = self.subscribe(token, run_id).await?;
        Ok(StreamHandle::spawn(subscription, on_frame))
    }
}

struct OpenStreamGuard(Option<Arc<PipelineMetrics>>);

impl OpenStreamGuard {
    fn new(metrics: Option<Arc<PipelineMetrics>>) -> Self {
        if let Some(m) = &metrics {
            m.open_streams.inc();
        }
        Self(metrics)
    }
}

impl Drop for OpenStreamGuard {
    fn drop(&mut self) {
        if let Some(m) = &self.0 {
            m.open_streams.dec();
        }
    }
}

async fn read_frames(
    response: reqwest::Response,
    run_id: Uuid,
    tx: mpsc::Sender<StreamItem>,
    metrics: Option<Arc<PipelineMetrics>>,
) {
    let _guard = OpenStreamGuard::new(metrics.clone());
    let mut body = std::pin::pin!(response.bytes_stream());
    let mut decoder = SseDecoder::new();

    loop {
        let chunk = match body.next().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(err)) => {
                warn!(run_id = %run_id, error = %err, "Run stream failed");
                let _ = tx.send(StreamItem::Failed(err.into())).await;
                return;
            }
            None => {
                debug!(run_id = %run_id, "Run stream closed by server");
                let _ = tx.send(StreamItem::Closed).await;
                return;
            }
        };

        for event in decoder.feed(&chunk) {
            if !event.is_frame() {
                trace!(run_id = %run_id, event = %event.event, "Skipping non-frame event");
                continue;
            }
            match schema::parse::<Frame>(&event.data) {
                Ok(frame) => {
                    if let (Some(m), Some(latency)) = (
                        &metrics,
                        frame.perf.as_ref().and_then(|p| p.frame_latency_ms),
                    ) {
                        m.record_latency(latency);
                    }
                    if tx.send(StreamItem::Frame(frame)).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    if let Some(m) = &metrics {
                        m.record_frame(FrameOutcome::Rejected);
                    }
                    warn!(run_id = %run_id, error = %err, "Dropping invalid frame");
                }
            }
        }
    }
}

type FrameHandler = Box<dyn FnMut(Frame) + Send>;

/// Push-based consumer of a run stream
///
/// The handler runs on a spawned task. Once [`StreamHandle::cancel`] returns,
/// the handler is never invoked again. Do not call `cancel` from inside the
/// handler; let the handler record state and cancel from the owner.
pub struct StreamHandle {
    run_id: Uuid,
    handler: Arc<Mutex<Option<FrameHandler>>>,
    task: Option<JoinHandle<StreamOutcome>>,
}

impl StreamHandle {
    /// Drive `subscription` on a new task
    pub fn spawn<F>(mut subscription: FrameSubscription, on_frame: F) -> Self
    where
        F: FnMut(Frame) + Send + 'static,
    {
        let run_id = subscription.run_id();
        let handler: Arc<Mutex<Option<FrameHandler>>> = Arc::new(Mutex::new(Some(Box::new(on_frame))));
        let gate = Arc::clone(&handler);

        let task = tokio::spawn(async move {
            while let Some(item) = subscription.next().await {
                match item {
                    StreamItem::Frame(frame) => {
                        let mut slot = gate.lock();
                        match slot.as_mut() {
                            Some(deliver) => deliver(frame),
                            None => return StreamOutcome::Cancelled,
                        }
                    }
                    StreamItem::Closed => return StreamOutcome::Closed,
                    StreamItem::Failed(err) => return StreamOutcome::Failed(err),
                }
            }
            StreamOutcome::Cancelled
        });

        Self {
            run_id,
            handler,
            task: Some(task),
        }
    }

    /// Run the handle is scoped to
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Stop delivery and release the connection
    ///
    /// Waits for an in-flight handler call to return.
    pub fn cancel(&self) {
        let removed = self.handler.lock().take();
        if let Some(task) = &self.task {
            task.abort();
        }
        if removed.is_some() {
            info!(run_id = %self.run_id, "Run stream cancelled");
        }
    }

    /// Whether the handle has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.handler.lock().is_none()
    }

    /// Wait for the stream to end
    pub async fn wait(mut self) -> StreamOutcome {
        let Some(task) = self.task.take() else {
            return StreamOutcome::Cancelled;
        };
        match task.await {
            Ok(outcome) => outcome,
            Err(err) if err.is_cancelled() => StreamOutcome::Cancelled,
            Err(err) => StreamOutcome::Failed(TelemetryError::transport(format!(
                "stream task failed: {}",
                err
            ))),
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.cancel();
        }
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("run_id", &self.run_id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
