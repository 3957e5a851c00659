//! Flag, decision and evaluation types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FlagError, Result};

/// A feature flag definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFlag {
    /// Unique key
    pub key: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub active: bool,
    /// Share of new users bucketed into treatment, 0 to 100
    pub rollout_percentage: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFlag {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub rollout_percentage: f64,
}

fn default_active() -> bool {
    true
}

impl NewFlag {
    /// An active flag at the given rollout
    pub fn new(key: impl Into<String>, rollout_percentage: f64) -> Self {
        let key = key.into();
        Self {
            name: key.clone(),
            key,
            description: None,
            active: true,
            rollout_percentage,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Check key and rollout
    pub fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(FlagError::InvalidInput("flag key must not be empty".to_string()));
        }
        validate_rollout(self.rollout_percentage)
    }
}

/// Partial update; `None` fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlagUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub rollout_percentage: Option<f64>,
}

impl FlagUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.active.is_none()
            && self.rollout_percentage.is_none()
    }

    /// Apply to a flag, bumping `updated_at`
    pub fn apply(&self, flag: &mut FeatureFlag, now: DateTime<Utc>) -> Result<()> {
        if let Some(rollout) = self.rollout_percentage {
            validate_rollout(rollout)?;
            flag.rollout_percentage = rollout;
        }
        if let Some(name) = &self.name {
            flag.name = name.clone();
        }
        if let Some(description) = &self.description {
            flag.description = Some(description.clone());
        }
        if let Some(active) = self.active {
            flag.active = active;
        }
        flag.updated_at = now;
        Ok(())
    }
}

/// Rollout must be a finite percentage in 0..=100
pub fn validate_rollout(rollout: f64) -> Result<()> {
    if !rollout.is_finite() || !(0.0..=100.0).contains(&rollout) {
        return Err(FlagError::InvalidRollout(rollout));
    }
    Ok(())
}

/// Bucket a user landed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Treatment,
    Control,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Treatment => "treatment",
            Variant::Control => "control",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "treatment" => Some(Variant::Treatment),
            "control" => Some(Variant::Control),
            _ => None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        *self == Variant::Treatment
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded bucketing decision; never updated once stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagDecision {
    pub distinct_id: String,
    pub flag_key: String,
    pub variant: Variant,
    /// Hash in `[0, 1)` that produced the variant
    pub hash_value: f64,
    pub decided_at: DateTime<Utc>,
}

/// Outcome of evaluating a flag for a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagEvaluation {
    pub key: String,
    pub enabled: bool,
    pub variant: Variant,
    pub reason: String,
}

impl FlagEvaluation {
    pub(crate) fn control(key: &str, reason: &str) -> Self {
        Self {
            key: key.to_string(),
            enabled: false,
            variant: Variant::Control,
            reason: reason.to_string(),
        }
    }
}
