//! Disease-transmission coefficients

use super::{field_path, Validate, Violations};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pathogen parameters attached to a scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pathogen {
    /// Server-assigned identifier, absent in drafts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    /// Display name, at least one character
    pub name: String,
    /// Transmission rate
    pub beta: f64,
    /// Incubation rate (E -> I)
    pub sigma: f64,
    /// Recovery rate (I -> R)
    pub gamma: f64,
    /// Mortality rate (I -> D)
    pub mu: f64,
    /// Infection fatality ratio in `[0, 1]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ifr: Option<f64>,
    /// Mean incubation period in days
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incubation: Option<f64>,
    /// Seasonal forcing amplitude, unconstrained
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seasonality: Option<f64>,
    /// Stochastic noise scale
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise: Option<f64>,
}

impl Pathogen {
    /// Create a pathogen with the four required rates
    pub fn new(name: impl Into<String>, beta: f64, sigma: f64, gamma: f64, mu: f64) -> Self {
        Self {
            id: None,
            name: name.into(),
            beta,
            sigma,
            gamma,
            mu,
            ifr: None,
            incubation: None,
            seasonality: None,
            noise: None,
        }
    }

    /// Set the infection fatality ratio
    pub fn with_ifr(mut self, ifr: f64) -> Self {
        self.ifr = Some(ifr);
        self
    }

    /// Set the incubation period
    pub fn with_incubation(mut self, days: f64) -> Self {
        self.incubation = Some(days);
        self
    }

    /// Basic reproduction number `beta / gamma`, if gamma is non-zero
    pub fn r0(&self) -> Option<f64> {
        (self.gamma > 0.0).then(|| self.beta / self.gamma)
    }
}

impl Validate for Pathogen {
    fn check(&self, path: &str, v: &mut Violations) {
        v.min_len(field_path(path, "name"), &self.name, 1);
        v.non_negative(field_path(path, "beta"), self.beta);
        v.non_negative(field_path(path, "sigma"), self.sigma);
        v.non_negative(field_path(path, "gamma"), self.gamma);
        v.non_negative(field_path(path, "mu"), self.mu);
        if let Some(ifr) = self.ifr {
            v.within(field_path(path, "ifr"), ifr, 0.0, 1.0);
        }
        v.non_negative_opt(field_path(path, "incubation"), self.incubation);
        if let Some(seasonality) = self.seasonality {
            v.finite(field_path(path, "seasonality"), seasonality);
        }
        v.non_negative_opt(field_path(path, "noise"), self.noise);
    }
}
