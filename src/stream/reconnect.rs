//! Reconnect decorator for run streams
//!
//! A bare [`FrameSubscription`] surfaces transport failures and stops. This
//! wrapper opens a new subscription after a transient failure, or after the
//! server closes a stream whose run has not reached a terminal status. The
//! server may resend earlier timesteps after a reconnect; playback drops them
//! as duplicates. Only a frame with a new highest timestep restores the retry
//! budget, so a server that keeps replaying old frames is eventually given up on.

use super::{FrameSubscription, StreamClient, StreamItem};
use crate::error::Result;
use crate::metrics::PipelineMetrics;
use crate::resilience::{Backoff, BackoffConfig};
use crate::schema::RunStatus;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Something that can open a run stream
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Open a fresh subscription
    async fn connect(&self) -> Result<FrameSubscription>;
}

/// Connector for one run on a [`StreamClient`]
#[derive(Clone)]
pub struct RunStreamConnector {
    client: StreamClient,
    token: String,
    run_id: Uuid,
}

impl RunStreamConnector {
    /// Create a connector
    pub fn new(client: StreamClient, token: impl Into<String>, run_id: Uuid) -> Self {
        Self {
            client,
            token: token.into(),
            run_id,
        }
    }
}

#[async_trait]
impl StreamConnector for RunStreamConnector {
    async fn connect(&self) -> Result<FrameSubscription> {
        self.client.subscribe(&self.token, self.run_id).await
    }
}

/// Run stream that reconnects with exponential backoff
pub struct ReconnectingStream<C> {
    connector: C,
    backoff: Backoff,
    current: Option<FrameSubscription>,
    last_status: Option<RunStatus>,
    max_t: Option<u64>,
    metrics: Option<Arc<PipelineMetrics>>,
    done: bool,
}

impl<C: StreamConnector> ReconnectingStream<C> {
    /// Wrap `connector`; nothing is opened until the first [`next`](Self::next)
    pub fn new(connector: C, config: BackoffConfig) -> Self {
        Self {
            connector,
            backoff: Backoff::new(config),
            current: None,
            last_status: None,
            max_t: None,
            metrics: None,
            done: false,
        }
    }

    /// Count reconnect attempts into `metrics`
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Latest status carried by a frame
    pub fn last_status(&self) -> Option<RunStatus> {
        self.last_status
    }

    /// Stop for good
    pub fn cancel(&mut self) {
        self.done = true;
        if let Some(mut subscription) = self.current.take() {
            subscription.cancel();
        }
    }

    fn run_finished(&self) -> bool {
        self.last_status.map_or(false, |s| s.is_terminal())
    }

    async fn pause_before_retry(&mut self, reason: &str) -> bool {
        let Some(delay) = self.backoff.next_delay() else {
            return false;
        };
        if let Some(m) = &self.metrics {
            m.reconnects.inc();
        }
        warn!(
            attempt = self.backoff.attempt(),
            delay_ms = delay.as_millis() as u64,
            reason,
            "Reconnecting run stream"
        );
        tokio::time::sleep(delay).await;
        true
    }

    fn finish(&mut self, item: StreamItem) -> Option<StreamItem> {
        self.done = true;
        self.current = None;
        Some(item)
    }

    /// Next item; `None` once cancelled or after a terminal item
    pub async fn next(&mut self) -> Option<StreamItem> {
        loop {
            if self.done {
                return None;
            }

            if self.current.is_none() {
                match self.connector.connect().await {
                    Ok(subscription) => {
                        debug!(run_id = %subscription.run_id(), "Run stream connected");
                        self.current = Some(subscription);
                    }
                    Err(err) if err.is_transient() => {
                        let reason = err.to_string();
                        if self.pause_before_retry(&reason).await {
                            continue;
                        }
                        return self.finish(StreamItem::Failed(err));
                    }
                    Err(err) => return self.finish(StreamItem::Failed(err)),
                }
            }

            let item = match self.current.as_mut() {
                Some(subscription) => subscription.next().await,
                None => continue,
            };

            match item {
                Some(StreamItem::Frame(frame)) => {
                    if self.max_t.map_or(true, |max| frame.t > max) {
                        self.max_t = Some(frame.t);
                        self.backoff.reset();
                    }
                    if let Some(status) = frame.status {
                        self.last_status = Some(status);
                    }
                    return Some(StreamItem::Frame(frame));
                }
                Some(StreamItem::Closed) => {
                    self.current = None;
                    if !self.run_finished() && self.pause_before_retry("closed before run finished").await {
                        continue;
                    }
                    return self.finish(StreamItem::Closed);
                }
                Some(StreamItem::Failed(err)) => {
                    self.current = None;
                    if err.is_transient() && !self.run_finished() {
                        let reason = err.to_string();
                        if self.pause_before_retry(&reason).await {
                            continue;
                        }
                    }
                    return self.finish(StreamItem::Failed(err));
                }
                None => {
                    self.done = true;
                    self.current = None;
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TelemetryError;
    use crate::schema::{Frame, TimeSeriesPoint};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn quick(retries: u32) -> BackoffConfig {
        BackoffConfig::new()
            .with_max_retries(retries)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    fn frame(run: Uuid, t: u64) -> Frame {
        Frame::new(run, t, vec![TimeSeriesPoint::new(Uuid::new_v4(), 90.0, 0.0, 10.0, 0.0, 0.0)])
    }

    fn scripted(run: Uuid, items: Vec<StreamItem>) -> FrameSubscription {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            tx.try_send(item).unwrap();
        }
        FrameSubscription::from_receiver(run, rx)
    }

    fn t_of(item: Option<StreamItem>) -> u64 {
        match item {
            Some(StreamItem::Frame(f)) => f.t,
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reconnects_after_transport_failure() {
        let run = Uuid::new_v4();
        let mut connector = MockStreamConnector::new();
        let mut calls = 0;
        connector.expect_connect().times(2).returning(move || {
            calls += 1;
            Ok(if calls == 1 {
                scripted(
                    run,
                    vec![
                        StreamItem::Frame(frame(run, 0).with_status(RunStatus::Running)),
                        StreamItem::Failed(TelemetryError::transport("connection reset")),
                    ],
                )
            } else {
                scripted(
                    run,
                    vec![
                        StreamItem::Frame(frame(run, 1).with_status(RunStatus::Completed)),
                        StreamItem::Closed,
                    ],
                )
            })
        });

        let mut stream = ReconnectingStream::new(connector, quick(3));
        assert_eq!(t_of(stream.next().await), 0);
        assert_eq!(t_of(stream.next().await), 1);
        assert!(matches!(stream.next().await, Some(StreamItem::Closed)));
        assert!(stream.next().await.is_none());
        assert_eq!(stream.last_status(), Some(RunStatus::Completed));
    }

    #[tokio::test]
    async fn test_permanent_connect_error_surfaces() {
        let mut connector = MockStreamConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|| Err(TelemetryError::AuthRequired));

        let mut stream = ReconnectingStream::new(connector, quick(5));
        match stream.next().await {
            Some(StreamItem::Failed(TelemetryError::AuthRequired)) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_gives_up_when_budget_spent() {
        let metrics = Arc::new(PipelineMetrics::new().unwrap());
        let mut connector = MockStreamConnector::new();
        connector
            .expect_connect()
            .times(3)
            .returning(|| Err(TelemetryError::transport("refused")));

        let mut stream = ReconnectingStream::new(connector, quick(2)).with_metrics(Arc::clone(&metrics));
        assert!(matches!(stream.next().await, Some(StreamItem::Failed(_))));
        assert_eq!(metrics.reconnects.get() as u64, 2);
    }

    #[tokio::test]
    async fn test_clean_close_after_terminal_status_not_retried() {
        let run = Uuid::new_v4();
        let mut connector = MockStreamConnector::new();
        connector.expect_connect().times(1).returning(move || {
            Ok(scripted(
                run,
                vec![
                    StreamItem::Frame(frame(run, 0).with_status(RunStatus::Failed)),
                    StreamItem::Closed,
                ],
            ))
        });

        let mut stream = ReconnectingStream::new(connector, quick(3));
        assert_eq!(t_of(stream.next().await), 0);
        assert!(matches!(stream.next().await, Some(StreamItem::Closed)));
    }

    #[tokio::test]
    async fn test_cancel_ends_stream() {
        let mut connector = MockStreamConnector::new();
        connector.expect_connect().times(0);

        let mut stream = ReconnectingStream::new(connector, quick(3));
        stream.cancel();
        assert!(stream.next().await.is_none());
    }
}
