//! Scenario, engine and NPI contracts
//!
//! ## Table of Contents
//! - **EngineCfg**: Determinism and output cadence of a run
//! - **NpiDefinition / NpiTimelineEntry**: Intervention catalog and schedule
//! - **ScenarioCreateRequest**: Client-submitted scenario
//! - **Scenario**: Server-acknowledged scenario with `id` and `owner_id`

use super::{field_path, index_path, Constraint, Pathogen, Validate, ValidationError, Violations};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

/// Simulation engine family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    /// Compartmental ODE integration
    Mechanistic,
    /// Learned surrogate model
    Learned,
}

impl Default for EngineType {
    fn default() -> Self {
        Self::Mechanistic
    }
}

/// Engine configuration for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineCfg {
    /// Engine family
    #[serde(rename = "type")]
    pub kind: EngineType,
    /// Engine version string
    pub version: String,
    /// RNG seed
    #[serde(deserialize_with = "super::integral::deserialize")]
    pub seed: u64,
    /// Integration step, must be `> 0`
    pub dt: f64,
    /// Last timestep a run may emit, must be `> 0`
    #[serde(deserialize_with = "super::integral::deserialize")]
    pub horizon: u64,
}

impl Default for EngineCfg {
    fn default() -> Self {
        Self {
            kind: EngineType::Mechanistic,
            version: "v1".to_string(),
            seed: 42,
            dt: 1.0,
            horizon: 180,
        }
    }
}

impl EngineCfg {
    /// Set the seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the horizon
    pub fn with_horizon(mut self, horizon: u64) -> Self {
        self.horizon = horizon;
        self
    }
}

impl Validate for EngineCfg {
    fn check(&self, path: &str, v: &mut Violations) {
        v.positive(field_path(path, "dt"), self.dt);
        if self.horizon == 0 {
            v.push(field_path(path, "horizon"), Constraint::Positive);
        }
    }
}

/// A non-pharmaceutical intervention in the scenario catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpiDefinition {
    /// Catalog identifier referenced by the timeline
    pub id: String,
    /// Display label
    pub label: String,
    /// Free-text description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Parameter multipliers keyed by parameter name
    pub effects: HashMap<String, f64>,
    /// Days between activation and effect
    #[serde(default, deserialize_with = "super::integral::deserialize")]
    pub activation_delay_days: u32,
}

impl NpiDefinition {
    /// Create an intervention with no effects
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: None,
            effects: HashMap::new(),
            activation_delay_days: 0,
        }
    }

    /// Add an effect multiplier
    pub fn with_effect(mut self, param: impl Into<String>, multiplier: f64) -> Self {
        self.effects.insert(param.into(), multiplier);
        self
    }
}

impl Validate for NpiDefinition {
    fn check(&self, path: &str, v: &mut Violations) {
        let mut keys: Vec<_> = self.effects.keys().collect();
        keys.sort();
        for key in keys {
            v.finite(field_path(&field_path(path, "effects"), key), self.effects[key]);
        }
    }
}

/// Set of interventions active from `day`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpiTimelineEntry {
    /// Simulation day
    #[serde(deserialize_with = "super::integral::deserialize")]
    pub day: u32,
    /// Catalog ids active on that day
    pub active: Vec<String>,
}

impl NpiTimelineEntry {
    /// Create a timeline entry
    pub fn new(day: u32, active: Vec<impl Into<String>>) -> Self {
        Self {
            day,
            active: active.into_iter().map(Into::into).collect(),
        }
    }
}

impl Validate for NpiTimelineEntry {
    fn check(&self, _path: &str, _v: &mut Violations) {}
}

/// Scenario submitted by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioCreateRequest {
    /// Optional client-chosen id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    /// Scenario title
    pub title: String,
    /// Region set name
    pub region_set: String,
    /// Pathogen parameters
    pub pathogen: Pathogen,
    /// Dataset ids feeding the run
    pub datasets: Vec<Uuid>,
    /// Intervention catalog
    pub npi_catalog: Vec<NpiDefinition>,
    /// Intervention schedule
    pub npi_timeline: Vec<NpiTimelineEntry>,
    /// Engine configuration
    pub engine: EngineCfg,
}

impl Default for ScenarioCreateRequest {
    fn default() -> Self {
        Self {
            id: None,
            title: "New scenario".to_string(),
            region_set: "global".to_string(),
            pathogen: Pathogen::new("Custom pathogen", 0.28, 0.2, 0.1, 0.01),
            datasets: Vec::new(),
            npi_catalog: Vec::new(),
            npi_timeline: Vec::new(),
            engine: EngineCfg::default(),
        }
    }
}

impl ScenarioCreateRequest {
    /// Timeline with duplicate days collapsed, last entry for a day wins
    pub fn resolved_timeline(&self) -> BTreeMap<u32, Vec<String>> {
        resolve_timeline(&self.npi_timeline)
    }

    /// Intervention ids in force on `day` under the resolved timeline
    pub fn active_on(&self, day: u32) -> Vec<String> {
        self.resolved_timeline()
            .range(..=day)
            .next_back()
            .map(|(_, active)| active.clone())
            .unwrap_or_default()
    }

    /// Check that every timeline id exists in the catalog
    pub fn check_npi_references(&self) -> Result<(), ValidationError> {
        check_references(&self.npi_catalog, &self.npi_timeline)
    }
}

impl Validate for ScenarioCreateRequest {
    fn check(&self, path: &str, v: &mut Violations) {
        self.pathogen.check(&field_path(path, "pathogen"), v);
        self.npi_catalog.check(&field_path(path, "npi_catalog"), v);
        self.npi_timeline.check(&field_path(path, "npi_timeline"), v);
        self.engine.check(&field_path(path, "engine"), v);
    }
}

/// Scenario as acknowledged by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Server-assigned id
    pub id: Uuid,
    /// Owning user
    pub owner_id: Uuid,
    /// Scenario title
    pub title: String,
    /// Region set name
    pub region_set: String,
    /// Pathogen parameters
    pub pathogen: Pathogen,
    /// Dataset ids feeding the run
    pub datasets: Vec<Uuid>,
    /// Intervention catalog
    pub npi_catalog: Vec<NpiDefinition>,
    /// Intervention schedule
    pub npi_timeline: Vec<NpiTimelineEntry>,
    /// Engine configuration
    pub engine: EngineCfg,
}

impl Scenario {
    /// Attach server-assigned identity to a request
    pub fn from_request(id: Uuid, owner_id: Uuid, request: ScenarioCreateRequest) -> Self {
        Self {
            id,
            owner_id,
            title: request.title,
            region_set: request.region_set,
            pathogen: request.pathogen,
            datasets: request.datasets,
            npi_catalog: request.npi_catalog,
            npi_timeline: request.npi_timeline,
            engine: request.engine,
        }
    }

    /// The create-shape of this scenario
    pub fn to_request(&self) -> ScenarioCreateRequest {
        ScenarioCreateRequest {
            id: Some(self.id),
            title: self.title.clone(),
            region_set: self.region_set.clone(),
            pathogen: self.pathogen.clone(),
            datasets: self.datasets.clone(),
            npi_catalog: self.npi_catalog.clone(),
            npi_timeline: self.npi_timeline.clone(),
            engine: self.engine.clone(),
        }
    }

    /// Timeline with duplicate days collapsed, last entry for a day wins
    pub fn resolved_timeline(&self) -> BTreeMap<u32, Vec<String>> {
        resolve_timeline(&self.npi_timeline)
    }

    /// Check that every timeline id exists in the catalog
    pub fn check_npi_references(&self) -> Result<(), ValidationError> {
        check_references(&self.npi_catalog, &self.npi_timeline)
    }
}

impl Validate for Scenario {
    fn check(&self, path: &str, v: &mut Violations) {
        self.pathogen.check(&field_path(path, "pathogen"), v);
        self.npi_catalog.check(&field_path(path, "npi_catalog"), v);
        self.npi_timeline.check(&field_path(path, "npi_timeline"), v);
        self.engine.check(&field_path(path, "engine"), v);
    }
}

fn resolve_timeline(entries: &[NpiTimelineEntry]) -> BTreeMap<u32, Vec<String>> {
    let mut resolved = BTreeMap::new();
    for entry in entries {
        resolved.insert(entry.day, entry.active.clone());
    }
    resolved
}

fn check_references(
    catalog: &[NpiDefinition],
    timeline: &[NpiTimelineEntry],
) -> Result<(), ValidationError> {
    let known: HashSet<&str> = catalog.iter().map(|npi| npi.id.as_str()).collect();
    let mut v = Violations::new();
    for (i, entry) in timeline.iter().enumerate() {
        let entry_path = field_path(&index_path("npi_timeline", i), "active");
        for (j, id) in entry.active.iter().enumerate() {
            if !known.contains(id.as_str()) {
                v.push(index_path(&entry_path, j), Constraint::UnknownReference(id.clone()));
            }
        }
    }
    v.finish()
}
