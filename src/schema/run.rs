//! Run records and lifecycle status

use super::{field_path, EngineCfg, Validate, Violations};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle status reported by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Accepted, not yet picked up by a worker
    Queued,
    /// Worker is emitting frames
    Running,
    /// All frames emitted
    Completed,
    /// Worker gave up
    Failed,
    /// Stopped on request
    Cancelled,
}

impl RunStatus {
    /// Whether no further frames are expected
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A simulation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Run id, also the stream scope
    pub id: Uuid,
    /// Scenario this run executes
    pub scenario_id: Uuid,
    /// Owning user
    pub owner_id: String,
    /// Engine configuration used
    pub engine: EngineCfg,
    /// Last status known to the server
    pub status: RunStatus,
    /// RNG seed
    #[serde(deserialize_with = "super::integral::deserialize")]
    pub seed: u64,
    /// When the worker picked the run up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the worker finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Summary metrics written on completion (e.g. `peakInfected`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_summary: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Run {
    /// Numeric summary metric by name
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics_summary.as_ref()?.get(name)?.as_f64()
    }

    /// All numeric summary metrics
    pub fn numeric_metrics(&self) -> Vec<(String, f64)> {
        let mut metrics: Vec<_> = self
            .metrics_summary
            .iter()
            .flat_map(|m| m.iter())
            .filter_map(|(k, v)| v.as_f64().map(|n| (k.clone(), n)))
            .collect();
        metrics.sort_by(|a, b| a.0.cmp(&b.0));
        metrics
    }
}

impl Validate for Run {
    fn check(&self, path: &str, v: &mut Violations) {
        self.engine.check(&field_path(path, "engine"), v);
    }
}

/// Body of `POST /runs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCreateRequest {
    /// Scenario to execute
    pub scenario_id: Uuid,
    /// Engine configuration
    pub engine: EngineCfg,
    /// RNG seed
    #[serde(deserialize_with = "super::integral::deserialize")]
    pub seed: u64,
}

impl RunCreateRequest {
    /// Request a run using the engine's own seed
    pub fn new(scenario_id: Uuid, engine: EngineCfg) -> Self {
        let seed = engine.seed;
        Self {
            scenario_id,
            engine,
            seed,
        }
    }
}

impl Validate for RunCreateRequest {
    fn check(&self, path: &str, v: &mut Violations) {
        self.engine.check(&field_path(path, "engine"), v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse;

    fn run_json(status: &str) -> String {
        format!(
            r#"{{
                "id": "{}",
                "scenario_id": "{}",
                "owner_id": "user_1",
                "engine": {{"type": "learned", "version": "v2", "seed": 7, "dt": 0.5, "horizon": 30}},
                "status": "{}",
                "seed": 7,
                "started_at": null,
                "metrics_summary": {{"peakInfected": 120.5, "totalDeaths": 3, "note": "x"}}
            }}"#,
            Uuid::new_v4(),
            Uuid::new_v4(),
            status
        )
    }

    #[test]
    fn test_parse_run() {
        let run: Run = parse(&run_json("queued")).unwrap();
        assert_eq!(run.status, RunStatus::Queued);
        assert!(run.started_at.is_none());
        assert_eq!(run.metric("peakInfected"), Some(120.5));
        assert_eq!(run.metric("note"), None);
        assert_eq!(
            run.numeric_metrics(),
            vec![("peakInfected".to_string(), 120.5), ("totalDeaths".to_string(), 3.0)]
        );
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!(parse::<Run>(&run_json("paused")).is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert_eq!(RunStatus::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_create_request_takes_engine_seed() {
        let req = RunCreateRequest::new(Uuid::new_v4(), EngineCfg::default().with_seed(9));
        assert_eq!(req.seed, 9);
        assert!(req.validate().is_ok());
    }
}
