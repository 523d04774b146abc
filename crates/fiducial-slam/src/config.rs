//! Session configuration, fixed once the engine is constructed.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fiducial_slam_core::ObservationParams;
use fiducial_slam_map::{AnchorPolicy, MapMode, MapParams, PrunePolicy};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Everything a session needs to know up front.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlamConfig {
    pub observation: ObservationParams,
    /// Localize against the loaded map without changing or saving it.
    pub read_only: bool,
    /// Per-fiducial diagnostics at info level.
    pub verbose: bool,
    pub anchor: AnchorPolicy,
    pub map_path: Option<PathBuf>,
    /// Maintenance tick rate.
    pub tick_hz: f64,
    pub pose_timeout_s: f64,
    /// Forward the normalized observations of each batch to the sink.
    pub republish_observations: bool,
    /// Landmark pruning on the maintenance tick; off when `None`.
    pub prune: Option<PrunePolicy>,
}

impl Default for SlamConfig {
    fn default() -> Self {
        Self {
            observation: ObservationParams::default(),
            read_only: false,
            verbose: false,
            anchor: AnchorPolicy::default(),
            map_path: None,
            tick_hz: 20.0,
            pose_timeout_s: MapParams::default().pose_timeout_s,
            republish_observations: false,
            prune: None,
        }
    }
}

impl SlamConfig {
    /// Load a JSON config from disk. Missing fields take their defaults.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tick_hz.is_finite() && self.tick_hz > 0.0) {
            return Err(invalid("tick_hz", format!("{} is not a positive rate", self.tick_hz)));
        }
        if Duration::try_from_secs_f64(1.0 / self.tick_hz).is_err() {
            return Err(invalid("tick_hz", format!("{} gives no representable period", self.tick_hz)));
        }
        let obs = &self.observation;
        if !(obs.weighting_scale.is_finite() && obs.weighting_scale > 0.0) {
            return Err(invalid(
                "observation.weighting_scale",
                format!("{} is not finite and positive", obs.weighting_scale),
            ));
        }
        if !(obs.min_variance.is_finite() && obs.min_variance > 0.0) {
            return Err(invalid(
                "observation.min_variance",
                format!("{} is not finite and positive", obs.min_variance),
            ));
        }
        if obs.max_variance.is_nan() || obs.max_variance < obs.min_variance {
            return Err(invalid(
                "observation.max_variance",
                format!("{} is below min_variance {}", obs.max_variance, obs.min_variance),
            ));
        }
        if self.pose_timeout_s.is_nan() || self.pose_timeout_s < 0.0 {
            return Err(invalid("pose_timeout_s", "must not be negative"));
        }
        if let Some(prune) = &self.prune {
            if prune.max_age_s.is_nan() || prune.max_age_s < 0.0 {
                return Err(invalid("prune.max_age_s", "must not be negative"));
            }
        }
        Ok(())
    }

    /// Period between maintenance ticks; saturates for rates `validate`
    /// rejects.
    pub fn tick_period(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.tick_hz).unwrap_or(Duration::MAX)
    }

    pub fn map_params(&self) -> MapParams {
        MapParams {
            mode: if self.read_only {
                MapMode::ReadOnly
            } else {
                MapMode::ReadWrite
            },
            anchor: self.anchor,
            pose_timeout_s: self.pose_timeout_s,
        }
    }
}
