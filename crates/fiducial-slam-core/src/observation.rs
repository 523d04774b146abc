//! Observation construction: weighting, flattening, sanitizing and ordering.

use serde::{Deserialize, Serialize};

use crate::{RawSighting, SightingBatch, TransformWithVariance};

/// Stable integer key of a fiducial marker.
pub type FiducialId = u32;

/// Floor applied to a zero, negative or missing area/error before weighting.
const MIN_WEIGHTING_METRIC: f64 = 1e-9;

/// How a sighting's quality metric becomes a variance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeightingPolicy {
    /// `variance = scale / fiducial_area`: large, close markers are trusted more.
    Area,
    /// `variance = scale * object_error`.
    #[default]
    Error,
}

fn default_weighting_scale() -> f64 {
    1e9
}

fn default_min_variance() -> f64 {
    1e-6
}

fn default_max_variance() -> f64 {
    1e15
}

/// Fixed, session-wide observation settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObservationParams {
    #[serde(default)]
    pub weighting: WeightingPolicy,
    #[serde(default = "default_weighting_scale")]
    pub weighting_scale: f64,
    /// Drop roll and pitch of every observation (planar environments).
    #[serde(default)]
    pub flatten: bool,
    /// Lower clamp for computed variances; must be positive.
    #[serde(default = "default_min_variance")]
    pub min_variance: f64,
    /// Upper clamp for computed variances.
    #[serde(default = "default_max_variance")]
    pub max_variance: f64,
}

impl Default for ObservationParams {
    fn default() -> Self {
        Self {
            weighting: WeightingPolicy::default(),
            weighting_scale: default_weighting_scale(),
            flatten: false,
            min_variance: default_min_variance(),
            max_variance: default_max_variance(),
        }
    }
}

/// One weighted fiducial sighting, observer frame -> fiducial frame.
///
/// Immutable once built. Only lives for a single fusion pass.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    fiducial_id: FiducialId,
    t_observer_fiducial: TransformWithVariance,
    stamp: f64,
    frame_id: String,
}

impl Observation {
    pub fn new(
        fiducial_id: FiducialId,
        t_observer_fiducial: TransformWithVariance,
        stamp: f64,
        frame_id: impl Into<String>,
    ) -> Self {
        Self {
            fiducial_id,
            t_observer_fiducial,
            stamp,
            frame_id: frame_id.into(),
        }
    }

    #[inline]
    pub fn fiducial_id(&self) -> FiducialId {
        self.fiducial_id
    }

    /// Observer -> fiducial transform with its variance.
    #[inline]
    pub fn transform(&self) -> &TransformWithVariance {
        &self.t_observer_fiducial
    }

    #[inline]
    pub fn stamp(&self) -> f64 {
        self.stamp
    }

    #[inline]
    pub fn frame_id(&self) -> &str {
        &self.frame_id
    }
}

/// Turns detector output into [`Observation`]s under a fixed policy.
#[derive(Clone, Debug, Default)]
pub struct ObservationBuilder {
    params: ObservationParams,
    verbose: bool,
}

impl ObservationBuilder {
    pub fn new(params: ObservationParams) -> Self {
        Self {
            params,
            verbose: false,
        }
    }

    /// Emit per-fiducial diagnostics at info level instead of debug.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn params(&self) -> &ObservationParams {
        &self.params
    }

    /// Variance assigned to a sighting; always finite and positive.
    pub fn variance_for(&self, sighting: &RawSighting) -> f64 {
        let p = &self.params;
        let raw = match p.weighting {
            WeightingPolicy::Area => metric(sighting.fiducial_area)
                .map(|area| p.weighting_scale / area)
                .unwrap_or(p.max_variance),
            WeightingPolicy::Error => metric(sighting.object_error)
                .map(|err| p.weighting_scale * err)
                .unwrap_or(p.max_variance),
        };
        if raw.is_finite() {
            raw.clamp(p.min_variance, p.max_variance)
        } else {
            p.max_variance
        }
    }

    /// Build one observation; `None` if the reported transform is unusable.
    pub fn build(&self, sighting: &RawSighting, stamp: f64, frame_id: &str) -> Option<Observation> {
        let level = self.diagnostic_level();
        log::log!(
            level,
            "fid {} obj_err {:9.5} area {:9.1}",
            sighting.fiducial_id,
            sighting.object_error,
            sighting.fiducial_area
        );

        let variance = self.variance_for(sighting);
        let Some(mut t) =
            TransformWithVariance::from_parts(sighting.translation, sighting.rotation, variance)
        else {
            log::warn!(
                "dropping fid {}: non-finite or degenerate transform",
                sighting.fiducial_id
            );
            return None;
        };
        if self.params.flatten {
            t = t.flattened();
        }
        Some(Observation::new(sighting.fiducial_id, t, stamp, frame_id))
    }

    /// Build all observations of a batch, sorted by ascending fiducial id.
    ///
    /// The sort is stable, so duplicate ids keep their detector order.
    pub fn build_batch(&self, batch: &SightingBatch) -> Vec<Observation> {
        let mut observations: Vec<Observation> = batch
            .sightings
            .iter()
            .filter_map(|s| self.build(s, batch.stamp, &batch.frame_id))
            .collect();
        observations.sort_by_key(Observation::fiducial_id);

        let level = self.diagnostic_level();
        if log::log_enabled!(level) {
            for o in &observations {
                let t = o.transform().translation();
                log::log!(
                    level,
                    "fid {} XYZ {:9.6} {:9.6} {:9.6}",
                    o.fiducial_id(),
                    t.x,
                    t.y,
                    t.z
                );
            }
        }
        observations
    }

    fn diagnostic_level(&self) -> log::Level {
        if self.verbose {
            log::Level::Info
        } else {
            log::Level::Debug
        }
    }
}

fn metric(value: f64) -> Option<f64> {
    if value.is_nan() || value == f64::INFINITY {
        None
    } else {
        Some(value.max(MIN_WEIGHTING_METRIC))
    }
}
