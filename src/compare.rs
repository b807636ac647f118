//! Baseline versus challenger metric comparison

use crate::draft::RunEntry;
use crate::playback::PeakMetrics;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// One metric compared across two runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDelta {
    /// Metric name, e.g. `peakInfected`
    pub metric: String,
    /// Baseline value, 0 when the baseline lacks the metric
    pub baseline: f64,
    /// Challenger value, 0 when the challenger lacks the metric
    pub challenger: f64,
    /// `challenger - baseline`
    pub delta: f64,
}

impl MetricDelta {
    /// Whether the challenger is higher; for burden metrics that is worse
    pub fn is_increase(&self) -> bool {
        self.delta > 0.0
    }

    /// Delta with an explicit sign, two decimals
    pub fn signed_delta(&self) -> String {
        if self.delta >= 0.0 {
            format!("+{:.2}", self.delta)
        } else {
            format!("{:.2}", self.delta)
        }
    }
}

/// Compare every metric present in either map, ordered by name
pub fn metrics_diff(baseline: &HashMap<String, f64>, challenger: &HashMap<String, f64>) -> Vec<MetricDelta> {
    let names: BTreeSet<&String> = baseline.keys().chain(challenger.keys()).collect();
    names
        .into_iter()
        .map(|name| {
            let base = baseline.get(name).copied().unwrap_or(0.0);
            let other = challenger.get(name).copied().unwrap_or(0.0);
            MetricDelta {
                metric: name.clone(),
                baseline: base,
                challenger: other,
                delta: other - base,
            }
        })
        .collect()
}

/// Compare the summary metrics of two tracked runs
pub fn diff_runs(baseline: &RunEntry, challenger: &RunEntry) -> Vec<MetricDelta> {
    metrics_diff(&baseline.metrics, &challenger.metrics)
}

/// Summary map of a live playback, keyed like the server's metrics summary
pub fn playback_summary(peak: &PeakMetrics) -> HashMap<String, f64> {
    HashMap::from([
        ("peakInfected".to_string(), peak.peak_infected),
        ("peakDeaths".to_string(), peak.peak_deaths),
        ("totalDeaths".to_string(), peak.final_deaths),
        ("frames".to_string(), peak.frames as f64),
    ])
}
