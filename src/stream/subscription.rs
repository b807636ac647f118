//! Per-run frame subscription
//!
//! A [`FrameSubscription`] is the consumer side of one run stream. The
//! reader task decodes SSE, validates each frame and pushes it into a
//! bounded channel; the subscription yields those items in order.

use super::StreamItem;
use crate::error::TelemetryError;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use uuid::Uuid;

/// Validated frames for one run, ending in a terminal item
///
/// After [`StreamItem::Closed`] or [`StreamItem::Failed`] the stream yields
/// `None`. After [`FrameSubscription::cancel`] it yields `None` at once,
/// even if frames are still buffered.
pub struct FrameSubscription {
    run_id: Uuid,
    rx: mpsc::Receiver<StreamItem>,
    reader: Option<AbortHandle>,
    cancelled: bool,
    finished: bool,
}

impl FrameSubscription {
    /// Wrap a receiver fed by a reader task
    pub(crate) fn with_reader(run_id: Uuid, rx: mpsc::Receiver<StreamItem>, reader: AbortHandle) -> Self {
        Self {
            run_id,
            rx,
            reader: Some(reader),
            cancelled: false,
            finished: false,
        }
    }

    /// Build a subscription over items produced elsewhere
    ///
    /// Dropping every sender without a terminal item ends the stream with a
    /// transport failure.
    pub fn from_receiver(run_id: Uuid, rx: mpsc::Receiver<StreamItem>) -> Self {
        Self {
            run_id,
            rx,
            reader: None,
            cancelled: false,
            finished: false,
        }
    }

    /// Run this subscription is scoped to
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Stop the subscription and release the connection
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.rx.close();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    /// Whether [`FrameSubscription::cancel`] has been called
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Whether no further items will be produced
    pub fn is_done(&self) -> bool {
        self.cancelled || self.finished
    }
}

impl Stream for FrameSubscription {
    type Item = StreamItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.is_done() {
            return Poll::Ready(None);
        }

        match Pin::new(&mut self.rx).poll_recv(cx) {
            Poll::Ready(Some(item)) => {
                if item.is_terminal() {
                    self.finished = true;
                }
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(Some(StreamItem::Failed(TelemetryError::transport(
                    "stream reader stopped without closing",
                ))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for FrameSubscription {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl std::fmt::Debug for FrameSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSubscription")
            .field("run_id", &self.run_id)
            .field("cancelled", &self.cancelled)
            .field("finished", &self.finished)
            .finish()
    }
}
