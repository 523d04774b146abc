//! The fiducial SLAM engine.
//!
//! One engine owns one map. Batch handling and the maintenance tick are the
//! only mutators and both take `&mut self`, so a fusion pass can never
//! interleave with another pass or with a tick.

use std::path::Path;

use fiducial_slam_core::{ObservationBuilder, SightingBatch};
use fiducial_slam_map::{FiducialMap, FusionOutcome, MaintenanceReport, MapIoError, SaveOutcome};

use crate::config::{ConfigError, SlamConfig};
use crate::sink::PoseSink;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    MapIo(#[from] MapIoError),
    #[error("no map path configured")]
    NoMapPath,
}

/// Final state of a session.
#[derive(Debug)]
pub struct ShutdownReport {
    pub landmarks: usize,
    pub batches: u64,
    /// Persistence result; a failure here has already been logged.
    pub save: Result<SaveOutcome, EngineError>,
}

impl ShutdownReport {
    pub fn saved(&self) -> bool {
        matches!(self.save, Ok(SaveOutcome::Saved { .. }))
    }
}

pub struct FiducialSlam {
    config: SlamConfig,
    builder: ObservationBuilder,
    map: FiducialMap,
    batches: u64,
}

impl FiducialSlam {
    /// Engine over an already loaded map.
    ///
    /// The map takes the mode, anchor policy and pose timeout of `config`.
    pub fn new(config: SlamConfig, map: FiducialMap) -> Result<Self, EngineError> {
        config.validate()?;
        let params = config.map_params();
        let map = if map.params() == &params {
            map
        } else {
            FiducialMap::with_landmarks(params, map.landmarks().cloned())
        };
        let builder =
            ObservationBuilder::new(config.observation.clone()).with_verbose(config.verbose);
        log::info!(
            "session start: {} landmarks, {:?}, weighting {:?}",
            map.len(),
            map.mode(),
            config.observation.weighting
        );
        Ok(Self {
            config,
            builder,
            map,
            batches: 0,
        })
    }

    /// Engine over the map stored at `config.map_path`; a missing file or
    /// no configured path starts an empty map.
    pub fn open(config: SlamConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let map = match &config.map_path {
            Some(path) => FiducialMap::load_or_empty(path, config.map_params())?,
            None => FiducialMap::new(config.map_params()),
        };
        Self::new(config, map)
    }

    #[inline]
    pub fn config(&self) -> &SlamConfig {
        &self.config
    }

    #[inline]
    pub fn map(&self) -> &FiducialMap {
        &self.map
    }

    pub fn into_map(self) -> FiducialMap {
        self.map
    }

    /// One complete fusion pass over a detector batch.
    ///
    /// Resolved observer poses go to `sink`; with `republish_observations`
    /// the normalized observations go there first.
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "debug",
            skip(self, batch, sink),
            fields(stamp = batch.stamp, n = batch.sightings.len())
        )
    )]
    pub fn handle_batch<S: PoseSink>(
        &mut self,
        batch: &SightingBatch,
        sink: &mut S,
    ) -> FusionOutcome {
        self.batches += 1;
        let observations = self.builder.build_batch(batch);
        let dropped = batch.sightings.len() - observations.len();
        if dropped > 0 {
            log::warn!("dropped {dropped} malformed sightings at stamp {}", batch.stamp);
        }
        if self.config.republish_observations {
            sink.publish_observations(batch.stamp, &batch.frame_id, &observations);
        }

        let outcome = self.map.update(&observations, batch.stamp);
        if outcome.observer.is_some() {
            if let Some(pose) = self.map.observer_pose() {
                sink.publish_pose(pose);
            }
        } else if !observations.is_empty() {
            log::debug!("no mapped fiducial in view at stamp {}", batch.stamp);
        }
        outcome
    }

    /// Periodic maintenance: consistency check, optional pruning and
    /// re-publication of a recent observer pose.
    pub fn tick<S: PoseSink>(&mut self, now: f64, sink: &mut S) -> MaintenanceReport {
        if let Some(policy) = &self.config.prune {
            self.map.prune(policy, now);
        }
        let report = self.map.tick(now);
        if let Some(pose) = &report.observer {
            sink.publish_pose(pose);
        }
        report
    }

    /// Persist the map to `config.map_path`.
    ///
    /// Read-only sessions report `SkippedReadOnly` without touching disk.
    pub fn save(&self) -> Result<SaveOutcome, EngineError> {
        if self.map.is_read_only() {
            log::info!("read-only session, map not saved");
            return Ok(SaveOutcome::SkippedReadOnly);
        }
        let path = self.config.map_path.as_deref().ok_or(EngineError::NoMapPath)?;
        self.save_to(path)
    }

    /// Persist the map to an explicit path.
    pub fn save_to(&self, path: &Path) -> Result<SaveOutcome, EngineError> {
        Ok(self.map.save(path)?)
    }

    /// End the session: persist unless read-only, then drop the engine.
    ///
    /// Persistence failures are logged and reported, never fatal; the
    /// previous file on disk stays intact.
    pub fn shutdown(self) -> ShutdownReport {
        let save = self.save();
        match &save {
            Ok(SaveOutcome::Saved { path, landmarks }) => {
                log::info!("shutdown: saved {landmarks} landmarks to {}", path.display())
            }
            Ok(SaveOutcome::SkippedReadOnly) => log::info!("shutdown: read-only, nothing saved"),
            Err(EngineError::NoMapPath) => log::warn!("shutdown: no map path, nothing saved"),
            Err(e) => log::error!("shutdown: failed to save map: {e}"),
        }
        ShutdownReport {
            landmarks: self.map.len(),
            batches: self.batches,
            save,
        }
    }
}
