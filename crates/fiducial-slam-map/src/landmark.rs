use std::collections::BTreeSet;

use fiducial_slam_core::{FiducialId, TransformWithVariance};

/// A mapped fiducial with its best world pose estimate.
#[derive(Clone, Debug, PartialEq)]
pub struct Landmark {
    pub id: FiducialId,
    /// World -> fiducial transform; the variance is the accumulated uncertainty.
    pub pose: TransformWithVariance,
    /// Number of sightings fused into `pose`.
    pub observations: u32,
    pub first_seen: f64,
    pub last_seen: f64,
    /// Fiducials that have been observed in the same batch as this one.
    pub links: BTreeSet<FiducialId>,
}

impl Landmark {
    /// Landmark created from its first sighting.
    pub fn new(id: FiducialId, pose: TransformWithVariance, stamp: f64) -> Self {
        Self {
            id,
            pose,
            observations: 1,
            first_seen: stamp,
            last_seen: stamp,
            links: BTreeSet::new(),
        }
    }

    #[inline]
    pub fn variance(&self) -> f64 {
        self.pose.variance
    }

    /// Inverse of the accumulated variance.
    #[inline]
    pub fn confidence(&self) -> f64 {
        self.pose.confidence()
    }

    /// Fuse a new world pose candidate into this landmark.
    pub fn refine(&mut self, candidate: &TransformWithVariance, stamp: f64) {
        self.pose.update(candidate);
        self.observations = self.observations.saturating_add(1);
        self.last_seen = self.last_seen.max(stamp);
    }
}
