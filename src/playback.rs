//! Playback state for one run
//!
//! ## Table of Contents
//! - **RunPlayback**: Dedup buffer, scrubber view and status mirror
//! - **AggregatePoint**: Per-timestep totals summed across regions
//! - **PeakMetrics**: Summary over the whole buffer
//! - **RunPhase / DisplayState**: Lifecycle as seen by the client
//!
//! The buffer keeps frames in the order they were first accepted. Upstream
//! emits timesteps in order, but nothing here enforces it: a late frame is
//! appended where it arrives and counted in [`RunPlayback::out_of_order`].
//! [`RunPlayback::sorted_points`] gives the timestep-ordered view.

use crate::metrics::{FrameOutcome, PipelineMetrics};
use crate::schema::{Frame, RunStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Totals for one timestep
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregatePoint {
    /// Timestep
    pub t: u64,
    /// Susceptible
    pub s: f64,
    /// Exposed
    pub e: f64,
    /// Infectious
    pub i: f64,
    /// Recovered
    pub r: f64,
    /// Dead
    pub d: f64,
    /// New cases, over regions that reported them
    pub new_cases: f64,
    /// Regions present in the frame
    pub regions: usize,
}

impl AggregatePoint {
    /// Sum a frame's series over the regions it carries
    pub fn from_frame(frame: &Frame) -> Self {
        let mut point = Self {
            t: frame.t,
            s: 0.0,
            e: 0.0,
            i: 0.0,
            r: 0.0,
            d: 0.0,
            new_cases: 0.0,
            regions: frame.series.len(),
        };
        for p in &frame.series {
            point.s += p.s;
            point.e += p.e;
            point.i += p.i;
            point.r += p.r;
            point.d += p.d;
            point.new_cases += p.new_cases.unwrap_or(0.0);
        }
        point
    }
}

/// Summary metrics over every buffered point
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PeakMetrics {
    /// Largest `I` total
    pub peak_infected: f64,
    /// Timestep of the largest `I` total
    pub peak_infected_t: Option<u64>,
    /// Largest `D` total
    pub peak_deaths: f64,
    /// `D` total at the latest timestep
    pub final_deaths: f64,
    /// Buffered points
    pub frames: usize,
}

/// Run lifecycle as seen by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    /// No status observed yet
    Idle,
    /// Waiting for a worker
    Queued,
    /// Worker emitting frames
    Running,
    /// Finished normally
    Completed,
    /// Worker failed
    Failed,
    /// Stopped on request
    Cancelled,
}

impl From<RunStatus> for RunPhase {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Queued => RunPhase::Queued,
            RunStatus::Running => RunPhase::Running,
            RunStatus::Completed => RunPhase::Completed,
            RunStatus::Failed => RunPhase::Failed,
            RunStatus::Cancelled => RunPhase::Cancelled,
        }
    }
}

/// What a run view should show
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayState {
    /// Nothing buffered yet
    AwaitingData,
    /// Frames arriving or buffered, run not finished
    Streaming,
    /// Run reached a terminal status
    Finished(RunStatus),
    /// Stream ended before the run finished
    ConnectionLost(String),
}

/// Result of offering a frame to the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// Appended
    Accepted,
    /// Timestep already buffered; first frame kept
    Duplicate,
    /// Frame belongs to a different run
    ForeignRun,
    /// Timestep beyond the engine horizon
    BeyondHorizon,
}

/// Client-side playback state for one run
#[derive(Debug, Clone)]
pub struct RunPlayback {
    run_id: Uuid,
    horizon: Option<u64>,
    buffer: Vec<AggregatePoint>,
    seen: HashSet<u64>,
    max_t: Option<u64>,
    out_of_order: usize,
    scrubber: i64,
    status: Option<RunStatus>,
    connection_lost: Option<String>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl RunPlayback {
    /// Empty playback for `run_id`
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            horizon: None,
            buffer: Vec::new(),
            seen: HashSet::new(),
            max_t: None,
            out_of_order: 0,
            scrubber: 0,
            status: None,
            connection_lost: None,
            metrics: None,
        }
    }

    /// Bound timesteps and the scrubber by the engine horizon
    pub fn with_horizon(mut self, horizon: u64) -> Self {
        self.horizon = Some(horizon);
        self
    }

    /// Record ingest outcomes into `metrics`
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run this playback follows
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Offer a validated frame
    pub fn ingest(&mut self, frame: &Frame) -> Ingest {
        let outcome = self.apply(frame);
        if let Some(m) = &self.metrics {
            m.record_frame(match outcome {
                Ingest::Accepted => FrameOutcome::Accepted,
                Ingest::Duplicate => FrameOutcome::Duplicate,
                Ingest::ForeignRun | Ingest::BeyondHorizon => FrameOutcome::Ignored,
            });
        }
        outcome
    }

    fn apply(&mut self, frame: &Frame) -> Ingest {
        if frame.run_id != self.run_id {
            debug!(run_id = %self.run_id, frame_run_id = %frame.run_id, "Ignoring frame for another run");
            return Ingest::ForeignRun;
        }
        if let Some(horizon) = self.horizon {
            if frame.t > horizon {
                warn!(run_id = %self.run_id, t = frame.t, horizon, "Rejecting frame beyond horizon");
                return Ingest::BeyondHorizon;
            }
        }

        if let Some(status) = frame.status {
            self.set_status(status);
        }
        self.connection_lost = None;

        if !self.seen.insert(frame.t) {
            debug!(run_id = %self.run_id, t = frame.t, "Dropping duplicate timestep");
            return Ingest::Duplicate;
        }

        match self.max_t {
            Some(max) if frame.t < max => {
                self.out_of_order += 1;
                debug!(run_id = %self.run_id, t = frame.t, max_t = max, "Frame arrived out of order");
            }
            _ => self.max_t = Some(frame.t),
        }
        self.buffer.push(AggregatePoint::from_frame(frame));
        Ingest::Accepted
    }

    /// Mirror a status from a run record or frame
    pub fn set_status(&mut self, status: RunStatus) {
        if self.status != Some(status) {
            debug!(run_id = %self.run_id, status = %status, "Run status changed");
        }
        self.status = Some(status);
    }

    /// Latest status observed
    pub fn status(&self) -> Option<RunStatus> {
        self.status
    }

    /// Lifecycle phase, `Idle` until a status is observed
    pub fn phase(&self) -> RunPhase {
        self.status.map_or(RunPhase::Idle, RunPhase::from)
    }

    /// Note that the stream ended while the run was still going
    pub fn mark_connection_lost(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(run_id = %self.run_id, reason = %reason, "Run stream lost");
        self.connection_lost = Some(reason);
    }

    /// What the run view should show
    pub fn display_state(&self) -> DisplayState {
        match (self.status, &self.connection_lost) {
            (Some(status), _) if status.is_terminal() => DisplayState::Finished(status),
            (_, Some(reason)) => DisplayState::ConnectionLost(reason.clone()),
            _ if self.buffer.is_empty() => DisplayState::AwaitingData,
            _ => DisplayState::Streaming,
        }
    }

    /// Buffered points in acceptance order
    pub fn points(&self) -> &[AggregatePoint] {
        &self.buffer
    }

    /// Buffered points ordered by timestep
    pub fn sorted_points(&self) -> Vec<AggregatePoint> {
        let mut points = self.buffer.clone();
        points.sort_by_key(|p| p.t);
        points
    }

    /// Buffered point count
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Accepted frames that arrived after a later timestep
    pub fn out_of_order(&self) -> usize {
        self.out_of_order
    }

    /// Move the scrubber; clamped on read
    pub fn set_scrubber(&mut self, position: i64) {
        self.scrubber = position;
    }

    /// Effective scrubber index, `None` when the view is empty
    pub fn scrubber(&self) -> Option<usize> {
        if self.scrubber < 0 || self.buffer.is_empty() {
            return None;
        }
        let mut max = self.buffer.len() - 1;
        if let Some(horizon) = self.horizon {
            max = max.min(usize::try_from(horizon).unwrap_or(usize::MAX));
        }
        let position = usize::try_from(self.scrubber).unwrap_or(usize::MAX);
        Some(position.min(max))
    }

    /// Buffer prefix up to and including the scrubber
    pub fn view(&self) -> &[AggregatePoint] {
        match self.scrubber() {
            Some(index) => &self.buffer[..=index],
            None => &[],
        }
    }

    /// Point under the scrubber
    pub fn current(&self) -> Option<&AggregatePoint> {
        self.view().last()
    }

    /// Summary over the entire buffer, independent of the scrubber
    pub fn peak(&self) -> PeakMetrics {
        let mut peak = PeakMetrics {
            frames: self.buffer.len(),
            ..PeakMetrics::default()
        };
        let mut latest: Option<&AggregatePoint> = None;
        for point in &self.buffer {
            if peak.peak_infected_t.is_none() || point.i > peak.peak_infected {
                peak.peak_infected = point.i;
                peak.peak_infected_t = Some(point.t);
            }
            peak.peak_deaths = peak.peak_deaths.max(point.d);
            if latest.map_or(true, |l| point.t > l.t) {
                latest = Some(point);
            }
        }
        peak.final_deaths = latest.map_or(0.0, |p| p.d);
        peak
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TimeSeriesPoint;

    fn frame(run: Uuid, t: u64, infected: &[f64]) -> Frame {
        let series = infected
            .iter()
            .map(|i| TimeSeriesPoint::new(Uuid::new_v4(), 1000.0 - i, 0.0, *i, 0.0, *i / 10.0))
            .collect();
        Frame::new(run, t, series)
    }

    #[test]
    fn test_debug_with_metrics_attached() {
        let run = Uuid::new_v4();
        let metrics = Arc::new(PipelineMetrics::new().unwrap());
        let mut playback = RunPlayback::new(run).with_metrics(Arc::clone(&metrics));
        playback.ingest(&frame(run, 0, &[10.0]));

        let shown = format!("{:?}", playback);
        assert!(shown.starts_with("RunPlayback"));
        assert!(shown.contains("PipelineMetrics"));
    }

    #[test]
    fn test_aggregates_across_regions() {
        let run = Uuid::new_v4();
        let mut f = frame(run, 0, &[10.0, 5.0]);
        f.series[0].new_cases = Some(3.0);
        let point = AggregatePoint::from_frame(&f);

        assert_eq!(point.i, 15.0);
        assert_eq!(point.s, 1985.0);
        assert_eq!(point.d, 1.5);
        assert_eq!(point.new_cases, 3.0);
        assert_eq!(point.regions, 2);
    }

    #[test]
    fn test_duplicate_first_writer_wins() {
        let run = Uuid::new_v4();
        let mut playback = RunPlayback::new(run);

        assert_eq!(playback.ingest(&frame(run, 0, &[10.0])), Ingest::Accepted);
        assert_eq!(playback.ingest(&frame(run, 1, &[20.0])), Ingest::Accepted);
        assert_eq!(playback.ingest(&frame(run, 1, &[25.0])), Ingest::Duplicate);

        let infected: Vec<_> = playback.points().iter().map(|p| (p.t, p.i)).collect();
        assert_eq!(infected, vec![(0, 10.0), (1, 20.0)]);
        assert_eq!(playback.peak().peak_infected, 20.0);
    }

    #[test]
    fn test_arbitrary_order_keeps_distinct_count() {
        let run = Uuid::new_v4();
        let mut playback = RunPlayback::new(run);
        for t in [4, 0, 3, 1, 2, 3, 0] {
            playback.ingest(&frame(run, t, &[t as f64]));
        }

        assert_eq!(playback.len(), 5);
        let arrival: Vec<_> = playback.points().iter().map(|p| p.t).collect();
        assert_eq!(arrival, vec![4, 0, 3, 1, 2]);
        let sorted: Vec<_> = playback.sorted_points().iter().map(|p| p.t).collect();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4]);
        assert_eq!(playback.out_of_order(), 4);
    }

    #[test]
    fn test_scrubber_clamps() {
        let run = Uuid::new_v4();
        let mut playback = RunPlayback::new(run);
        assert!(playback.view().is_empty());
        playback.set_scrubber(0);
        assert!(playback.view().is_empty());

        for t in 0..5 {
            playback.ingest(&frame(run, t, &[1.0]));
        }
        playback.set_scrubber(99);
        assert_eq!(playback.view().len(), 5);
        playback.set_scrubber(2);
        assert_eq!(playback.view().len(), 3);
        assert_eq!(playback.current().map(|p| p.t), Some(2));
        playback.set_scrubber(-1);
        assert!(playback.view().is_empty());
        assert!(playback.current().is_none());
    }

    #[test]
    fn test_scrubber_bounded_by_horizon() {
        let run = Uuid::new_v4();
        let mut playback = RunPlayback::new(run).with_horizon(2);
        for t in 0..4 {
            playback.ingest(&frame(run, t, &[1.0]));
        }

        assert_eq!(playback.len(), 3);
        assert_eq!(playback.ingest(&frame(run, 9, &[1.0])), Ingest::BeyondHorizon);
        playback.set_scrubber(50);
        assert_eq!(playback.scrubber(), Some(2));
    }

    #[test]
    fn test_peak_independent_of_scrubber() {
        let run = Uuid::new_v4();
        let mut playback = RunPlayback::new(run);
        for (t, i) in [(0, 5.0), (1, 40.0), (2, 30.0)] {
            playback.ingest(&frame(run, t, &[i]));
        }
        playback.set_scrubber(0);

        let peak = playback.peak();
        assert_eq!(peak.peak_infected, 40.0);
        assert_eq!(peak.peak_infected_t, Some(1));
        assert_eq!(peak.peak_deaths, 4.0);
        assert_eq!(peak.final_deaths, 3.0);
        assert_eq!(peak.frames, 3);
    }

    #[test]
    fn test_status_mirrored_and_retained() {
        let run = Uuid::new_v4();
        let mut playback = RunPlayback::new(run);
        assert_eq!(playback.phase(), RunPhase::Idle);

        playback.set_status(RunStatus::Queued);
        playback.ingest(&frame(run, 0, &[1.0]));
        assert_eq!(playback.phase(), RunPhase::Queued);

        playback.ingest(&frame(run, 1, &[1.0]).with_status(RunStatus::Running));
        playback.ingest(&frame(run, 2, &[1.0]));
        assert_eq!(playback.status(), Some(RunStatus::Running));

        playback.ingest(&frame(run, 3, &[1.0]).with_status(RunStatus::Completed));
        assert_eq!(playback.phase(), RunPhase::Completed);
        assert_eq!(playback.display_state(), DisplayState::Finished(RunStatus::Completed));
    }

    #[test]
    fn test_foreign_run_ignored() {
        let run = Uuid::new_v4();
        let mut playback = RunPlayback::new(run);
        let other = frame(Uuid::new_v4(), 0, &[1.0]).with_status(RunStatus::Failed);

        assert_eq!(playback.ingest(&other), Ingest::ForeignRun);
        assert!(playback.is_empty());
        assert_eq!(playback.status(), None);
    }

    #[test]
    fn test_display_states() {
        let run = Uuid::new_v4();
        let mut playback = RunPlayback::new(run);
        assert_eq!(playback.display_state(), DisplayState::AwaitingData);

        playback.ingest(&frame(run, 0, &[1.0]).with_status(RunStatus::Running));
        assert_eq!(playback.display_state(), DisplayState::Streaming);

        playback.mark_connection_lost("connection reset");
        assert_eq!(
            playback.display_state(),
            DisplayState::ConnectionLost("connection reset".to_string())
        );

        playback.ingest(&frame(run, 1, &[1.0]));
        assert_eq!(playback.display_state(), DisplayState::Streaming);
    }

    #[test]
    fn test_metrics_recorded() {
        let metrics = Arc::new(PipelineMetrics::new().unwrap());
        let run = Uuid::new_v4();
        let mut playback = RunPlayback::new(run).with_metrics(Arc::clone(&metrics));

        playback.ingest(&frame(run, 0, &[1.0]));
        playback.ingest(&frame(run, 0, &[2.0]));
        playback.ingest(&frame(Uuid::new_v4(), 1, &[2.0]));

        assert_eq!(metrics.frame_count(FrameOutcome::Accepted), 1);
        assert_eq!(metrics.frame_count(FrameOutcome::Duplicate), 1);
        assert_eq!(metrics.frame_count(FrameOutcome::Ignored), 1);
    }
}
