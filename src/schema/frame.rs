//! Frame wire message
//!
//! One timestep of per-region SEIRD output pushed over the run stream.

use super::{field_path, index_path, Constraint, RunStatus, Validate, Violations};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Compartment values for one region at one timestep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    /// Region the values belong to
    #[serde(rename = "regionId")]
    pub region_id: Uuid,
    /// Susceptible
    #[serde(rename = "S")]
    pub s: f64,
    /// Exposed
    #[serde(rename = "E")]
    pub e: f64,
    /// Infectious
    #[serde(rename = "I")]
    pub i: f64,
    /// Recovered
    #[serde(rename = "R")]
    pub r: f64,
    /// Dead
    #[serde(rename = "D")]
    pub d: f64,
    /// New cases since the previous step
    #[serde(rename = "newCases", default, skip_serializing_if = "Option::is_none")]
    pub new_cases: Option<f64>,
    /// Effective reproduction number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rt: Option<f64>,
}

impl TimeSeriesPoint {
    /// Create a point with all compartments set
    pub fn new(region_id: Uuid, s: f64, e: f64, i: f64, r: f64, d: f64) -> Self {
        Self {
            region_id,
            s,
            e,
            i,
            r,
            d,
            new_cases: None,
            rt: None,
        }
    }
}

impl Validate for TimeSeriesPoint {
    fn check(&self, path: &str, v: &mut Violations) {
        v.non_negative(field_path(path, "S"), self.s);
        v.non_negative(field_path(path, "E"), self.e);
        v.non_negative(field_path(path, "I"), self.i);
        v.non_negative(field_path(path, "R"), self.r);
        v.non_negative(field_path(path, "D"), self.d);
        v.non_negative_opt(field_path(path, "newCases"), self.new_cases);
        v.non_negative_opt(field_path(path, "rt"), self.rt);
    }
}

/// Worker throughput figures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramePerf {
    /// Simulation steps per wall-clock second, `> 0`
    #[serde(rename = "stepsPerSecond")]
    pub steps_per_second: f64,
    /// Publish-to-delivery latency
    #[serde(rename = "frameLatencyMs", default, skip_serializing_if = "Option::is_none")]
    pub frame_latency_ms: Option<f64>,
}

/// One timestep of run output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Run that produced the frame
    #[serde(rename = "runId")]
    pub run_id: Uuid,
    /// Timestep
    #[serde(deserialize_with = "super::integral::deserialize")]
    pub t: u64,
    /// Per-region values, region ids unique
    pub series: Vec<TimeSeriesPoint>,
    /// Worker throughput
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perf: Option<FramePerf>,
    /// Run status as of this frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
}

impl Frame {
    /// Create a frame with no perf or status
    pub fn new(run_id: Uuid, t: u64, series: Vec<TimeSeriesPoint>) -> Self {
        Self {
            run_id,
            t,
            series,
            perf: None,
            status: None,
        }
    }

    /// Attach a status
    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }
}

impl Validate for Frame {
    fn check(&self, path: &str, v: &mut Violations) {
        let series_path = field_path(path, "series");
        let mut seen = HashSet::with_capacity(self.series.len());
        for (i, point) in self.series.iter().enumerate() {
            let point_path = index_path(&series_path, i);
            if !seen.insert(point.region_id) {
                v.push(field_path(&point_path, "regionId"), Constraint::Unique);
            }
            point.check(&point_path, v);
        }
        if let Some(perf) = &self.perf {
            let perf_path = field_path(path, "perf");
            v.positive(field_path(&perf_path, "stepsPerSecond"), perf.steps_per_second);
            v.non_negative_opt(field_path(&perf_path, "frameLatencyMs"), perf.frame_latency_ms);
        }
    }
}
