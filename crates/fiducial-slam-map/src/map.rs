//! Authoritative map state: fiducial id -> landmark.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use fiducial_slam_core::{FiducialId, Observation, TransformWithVariance};

use crate::estimator::{estimate, AnchorPolicy, PoseEstimate};
use crate::Landmark;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Whether fusion passes may change the map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MapMode {
    #[default]
    ReadWrite,
    /// Localization only: landmarks are read, never inserted, refined or saved.
    ReadOnly,
}

fn default_pose_timeout_s() -> f64 {
    1.0
}

/// Session-wide map settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapParams {
    #[serde(default)]
    pub mode: MapMode,
    #[serde(default)]
    pub anchor: AnchorPolicy,
    /// How long a resolved observer pose keeps being re-reported by `tick`.
    #[serde(default = "default_pose_timeout_s")]
    pub pose_timeout_s: f64,
}

impl Default for MapParams {
    fn default() -> Self {
        Self {
            mode: MapMode::default(),
            anchor: AnchorPolicy::default(),
            pose_timeout_s: default_pose_timeout_s(),
        }
    }
}

/// Maintenance-time removal of weak, stale landmarks.
///
/// A landmark is removed when it has fewer than `min_observations` sightings
/// and was last seen more than `max_age_s` seconds ago.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrunePolicy {
    pub min_observations: u32,
    pub max_age_s: f64,
}

/// A resolved observer pose.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObserverPose {
    pub stamp: f64,
    /// Observer frame of the batch the pose was resolved from.
    pub frame_id: String,
    /// World -> observer.
    pub pose: TransformWithVariance,
    /// Mapped landmarks the pose was resolved from.
    pub fiducials: Vec<FiducialId>,
}

/// What one fusion pass did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FusionOutcome {
    /// World -> observer resolved in this pass.
    pub observer: Option<TransformWithVariance>,
    /// New landmarks were placed in the anchor frame.
    pub anchored: bool,
    /// New landmarks were placed from the last resolved observer pose.
    pub carried: bool,
    pub inserted: Vec<FiducialId>,
    pub refined: Vec<FiducialId>,
    /// Candidates dropped because the map is read-only.
    pub discarded: usize,
    /// Candidates dropped because they were not finite.
    pub rejected: Vec<FiducialId>,
}

/// Snapshot produced by a maintenance tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MaintenanceReport {
    pub landmarks: usize,
    /// Fiducials seen in the most recent fusion pass.
    pub visible: Vec<FiducialId>,
    /// Last resolved observer pose, if younger than `pose_timeout_s`.
    pub observer: Option<ObserverPose>,
    /// Landmarks whose stored pose failed the consistency check.
    pub inconsistent: Vec<FiducialId>,
}

/// Fiducial id -> landmark, plus the latest observer state.
#[derive(Clone, Debug, Default)]
pub struct FiducialMap {
    params: MapParams,
    landmarks: BTreeMap<FiducialId, Landmark>,
    visible: BTreeSet<FiducialId>,
    observer: Option<ObserverPose>,
}

impl FiducialMap {
    pub fn new(params: MapParams) -> Self {
        Self {
            params,
            landmarks: BTreeMap::new(),
            visible: BTreeSet::new(),
            observer: None,
        }
    }

    /// Map pre-populated with landmarks, e.g. from a saved file.
    ///
    /// Later entries replace earlier ones with the same id.
    pub fn with_landmarks(params: MapParams, landmarks: impl IntoIterator<Item = Landmark>) -> Self {
        let mut map = Self::new(params);
        for lm in landmarks {
            map.landmarks.insert(lm.id, lm);
        }
        map
    }

    #[inline]
    pub fn params(&self) -> &MapParams {
        &self.params
    }

    #[inline]
    pub fn mode(&self) -> MapMode {
        self.params.mode
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.params.mode == MapMode::ReadOnly
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.landmarks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }

    #[inline]
    pub fn landmark(&self, id: FiducialId) -> Option<&Landmark> {
        self.landmarks.get(&id)
    }

    /// Landmarks in ascending id order.
    pub fn landmarks(&self) -> impl Iterator<Item = &Landmark> {
        self.landmarks.values()
    }

    /// Most recently resolved observer pose, regardless of age.
    pub fn observer_pose(&self) -> Option<&ObserverPose> {
        self.observer.as_ref()
    }

    pub fn visible(&self) -> impl Iterator<Item = FiducialId> + '_ {
        self.visible.iter().copied()
    }

    /// Run the estimator against the current map without changing it.
    pub fn estimate(&self, observations: &[Observation]) -> PoseEstimate {
        estimate(self, observations, &self.params.anchor)
    }

    /// One fusion pass over a batch.
    ///
    /// Observations are taken in ascending id order whatever the slice order;
    /// for a duplicate id the last report wins.
    ///
    /// Read-write: new fiducials are inserted, mapped ones refined by
    /// inverse-variance fusion and co-visibility links recorded. Read-only:
    /// every candidate is discarded, only the observer pose is kept.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, observations), fields(n = observations.len()))
    )]
    pub fn update(&mut self, observations: &[Observation], stamp: f64) -> FusionOutcome {
        let estimate = self.estimate(observations);
        let mut outcome = FusionOutcome {
            observer: estimate.observer,
            anchored: estimate.anchored,
            carried: estimate.carried,
            ..FusionOutcome::default()
        };

        self.visible = estimate.candidates.iter().map(|c| c.fiducial_id).collect();

        if let Some(pose) = estimate.observer {
            let frame_id = observations
                .first()
                .map(|o| o.frame_id().to_owned())
                .unwrap_or_default();
            log::debug!(
                "observer at {:?} var {:.6} from {:?}",
                pose.translation().as_slice(),
                pose.variance,
                estimate.known
            );
            self.observer = Some(ObserverPose {
                stamp,
                frame_id,
                pose,
                fiducials: estimate.known.clone(),
            });
        }

        if self.is_read_only() {
            outcome.discarded = estimate.candidates.len();
            return outcome;
        }

        for candidate in &estimate.candidates {
            let id = candidate.fiducial_id;
            if !candidate.pose.is_finite() || candidate.pose.variance < 0.0 {
                log::warn!("rejecting non-finite pose candidate for fid {id}");
                outcome.rejected.push(id);
                continue;
            }
            match self.landmarks.entry(id) {
                Entry::Vacant(slot) => {
                    log::info!(
                        "new fiducial {id} at {:?} var {:.6}",
                        candidate.pose.translation().as_slice(),
                        candidate.pose.variance
                    );
                    slot.insert(Landmark::new(id, candidate.pose, stamp));
                    outcome.inserted.push(id);
                }
                Entry::Occupied(mut slot) => {
                    slot.get_mut().refine(&candidate.pose, stamp);
                    outcome.refined.push(id);
                }
            }
        }

        let fused: Vec<FiducialId> = outcome
            .inserted
            .iter()
            .chain(outcome.refined.iter())
            .copied()
            .collect();
        for &a in &fused {
            if let Some(lm) = self.landmarks.get_mut(&a) {
                lm.links.extend(fused.iter().copied().filter(|&b| b != a));
            }
        }

        outcome
    }

    /// Periodic maintenance, independent of observation traffic.
    ///
    /// Never changes landmark poses; safe on an empty map.
    pub fn tick(&self, now: f64) -> MaintenanceReport {
        let inconsistent: Vec<FiducialId> = self
            .landmarks
            .values()
            .filter(|lm| !lm.pose.is_finite() || lm.pose.variance < 0.0)
            .map(|lm| lm.id)
            .collect();
        if !inconsistent.is_empty() {
            log::error!("landmarks with invalid poses: {inconsistent:?}");
        }

        let observer = self
            .observer
            .as_ref()
            .filter(|o| now - o.stamp <= self.params.pose_timeout_s)
            .cloned();

        MaintenanceReport {
            landmarks: self.landmarks.len(),
            visible: self.visible.iter().copied().collect(),
            observer,
            inconsistent,
        }
    }

    /// Remove weak, stale landmarks. No-op on a read-only map.
    pub fn prune(&mut self, policy: &PrunePolicy, now: f64) -> Vec<FiducialId> {
        if self.is_read_only() {
            return Vec::new();
        }
        let removed: Vec<FiducialId> = self
            .landmarks
            .values()
            .filter(|lm| {
                lm.observations < policy.min_observations && now - lm.last_seen > policy.max_age_s
            })
            .map(|lm| lm.id)
            .collect();
        if removed.is_empty() {
            return removed;
        }
        for id in &removed {
            self.landmarks.remove(id);
            self.visible.remove(id);
        }
        for lm in self.landmarks.values_mut() {
            lm.links.retain(|id| !removed.contains(id));
        }
        log::info!("pruned {} landmarks: {removed:?}", removed.len());
        removed
    }
}
