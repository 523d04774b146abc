//! Observer pose resolution and landmark pose candidates.
//!
//! Given one batch of observations (single stamp, single observer frame) and
//! read access to the map:
//! 1. every observation of an already mapped landmark implies an observer
//!    pose `T_world_fid * T_observer_fid^-1`; these are fused with
//!    inverse-variance weighting into the resolved observer pose,
//! 2. without any mapped landmark in view the observer pose is unresolved;
//!    new landmarks are then placed from the last resolved observer pose if
//!    it is younger than the map's pose timeout, otherwise in the anchor frame
//!    chosen by [`AnchorPolicy`],
//! 3. every observation yields a candidate world pose
//!    `T_world_observer * T_observer_fid`.

use nalgebra::{Isometry3, Quaternion, Translation3, UnitQuaternion};
use serde::{Deserialize, Serialize};

use fiducial_slam_core::{FiducialId, Observation, TransformWithVariance};

use crate::FiducialMap;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Where to place a batch whose observer pose cannot be resolved.
///
/// The anchor frame is provisional: it only places new landmarks and is never
/// reported as a resolved observer pose.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnchorPolicy {
    /// The observer is taken to sit at the world origin, so a new landmark's
    /// world pose equals its observed relative pose.
    #[default]
    ObserverAtOrigin,
    /// The lowest-id observation of the batch is placed exactly at the world
    /// origin and the rest of the batch relative to it.
    LandmarkAtOrigin,
    /// The observer is taken to sit at a fixed, configured pose.
    ObserverAt {
        translation: [f64; 3],
        /// `[x, y, z, w]`.
        rotation: [f64; 4],
    },
}

impl AnchorPolicy {
    /// World -> observer frame used for a batch with no known landmark.
    ///
    /// The anchor carries zero variance; candidates inherit only the
    /// observation's own uncertainty.
    fn anchor_frame(&self, first: &Observation) -> TransformWithVariance {
        match *self {
            AnchorPolicy::ObserverAtOrigin => TransformWithVariance::identity(),
            AnchorPolicy::LandmarkAtOrigin => {
                TransformWithVariance::new(first.transform().transform.inverse(), 0.0)
            }
            AnchorPolicy::ObserverAt {
                translation,
                rotation,
            } => {
                let [x, y, z, w] = rotation;
                let q = Quaternion::new(w, x, y, z);
                let rotation = if q.norm() > 1e-9 && q.coords.iter().all(|v| v.is_finite()) {
                    UnitQuaternion::from_quaternion(q)
                } else {
                    log::warn!("invalid anchor rotation {rotation:?}, using identity");
                    UnitQuaternion::identity()
                };
                let [tx, ty, tz] = translation;
                TransformWithVariance::new(
                    Isometry3::from_parts(Translation3::new(tx, ty, tz), rotation),
                    0.0,
                )
            }
        }
    }
}

/// Proposed world pose for one observed landmark.
#[derive(Clone, Debug, PartialEq)]
pub struct LandmarkCandidate {
    pub fiducial_id: FiducialId,
    /// World -> fiducial.
    pub pose: TransformWithVariance,
    /// The landmark was already in the map when the batch arrived.
    pub known: bool,
}

/// Output of one estimation pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PoseEstimate {
    /// World -> observer, only when at least one mapped landmark was in view.
    pub observer: Option<TransformWithVariance>,
    /// Candidates were placed in the anchor frame instead of a resolved pose.
    pub anchored: bool,
    /// Candidates were placed from the last resolved observer pose.
    pub carried: bool,
    /// Ids of mapped landmarks that contributed to `observer`, ascending.
    pub known: Vec<FiducialId>,
    /// One candidate per distinct fiducial id, ascending.
    pub candidates: Vec<LandmarkCandidate>,
}

/// Keep one observation per fiducial id, in ascending id order.
///
/// The slice is stably sorted by id first, so for a duplicate id the last
/// report in the input wins regardless of how the batch was ordered.
pub fn dedup_latest(observations: &[Observation]) -> Vec<&Observation> {
    let mut sorted: Vec<&Observation> = observations.iter().collect();
    sorted.sort_by_key(|o| o.fiducial_id());

    let mut out: Vec<&Observation> = Vec::with_capacity(sorted.len());
    for o in sorted {
        match out.last_mut() {
            Some(last) if last.fiducial_id() == o.fiducial_id() => *last = o,
            _ => out.push(o),
        }
    }
    out
}

/// Resolve the observer pose and propose landmark world poses for a batch.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(map, observations, anchor), fields(n = observations.len()))
)]
pub fn estimate(
    map: &FiducialMap,
    observations: &[Observation],
    anchor: &AnchorPolicy,
) -> PoseEstimate {
    let observations = dedup_latest(observations);
    let Some(first) = observations.first() else {
        return PoseEstimate::default();
    };

    let mut observer: Option<TransformWithVariance> = None;
    let mut known = Vec::new();
    for o in &observations {
        let Some(landmark) = map.landmark(o.fiducial_id()) else {
            continue;
        };
        let implied = landmark.pose.compose(&o.transform().inverse());
        log::debug!(
            "fid {} implies observer at {:?} (var {:.6})",
            o.fiducial_id(),
            implied.translation().as_slice(),
            implied.variance
        );
        observer = Some(match observer {
            Some(acc) => acc.fuse(&implied),
            None => implied,
        });
        known.push(o.fiducial_id());
    }

    let recent = map.observer_pose().filter(|o| {
        (first.stamp() - o.stamp).abs() <= map.params().pose_timeout_s
    });
    let (frame, anchored, carried) = match (observer, recent) {
        (Some(pose), _) => (pose, false, false),
        (None, Some(last)) => {
            log::debug!(
                "no mapped fiducial in view, placing batch from pose at {}",
                last.stamp
            );
            (last.pose, false, true)
        }
        (None, None) => (anchor.anchor_frame(first), true, false),
    };

    let candidates = observations
        .iter()
        .map(|o| LandmarkCandidate {
            fiducial_id: o.fiducial_id(),
            pose: frame.compose(o.transform()),
            known: map.landmark(o.fiducial_id()).is_some(),
        })
        .collect();

    PoseEstimate {
        observer,
        anchored,
        carried,
        known,
        candidates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Landmark, MapParams};
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn tv(x: f64, y: f64, yaw: f64, variance: f64) -> TransformWithVariance {
        TransformWithVariance::new(
            Isometry3::from_parts(
                Translation3::new(x, y, 0.0),
                UnitQuaternion::from_euler_angles(0.0, 0.0, yaw),
            ),
            variance,
        )
    }

    fn obs(id: FiducialId, t: TransformWithVariance) -> Observation {
        Observation::new(id, t, 1.0, "camera")
    }

    fn map_with(landmarks: &[(FiducialId, TransformWithVariance)]) -> FiducialMap {
        FiducialMap::with_landmarks(
            MapParams::default(),
            landmarks
                .iter()
                .map(|(id, pose)| Landmark::new(*id, *pose, 0.0)),
        )
    }

    #[test]
    fn single_known_landmark_resolves_exactly() {
        let world_fid = tv(2.0, 1.0, 0.5, 0.1);
        let map = map_with(&[(4, world_fid)]);
        let rel = tv(1.0, 0.2, -0.3, 0.05);

        let est = estimate(&map, &[obs(4, rel)], &AnchorPolicy::default());
        let observer = est.observer.expect("resolved");
        let expected = world_fid.compose(&rel.inverse());

        assert_eq!(observer, expected);
        assert_eq!(est.known, vec![4]);
        assert!(!est.anchored);
        assert_relative_eq!(observer.variance, 0.15, epsilon = 1e-12);
    }

    #[test]
    fn no_known_landmark_leaves_observer_unresolved() {
        let map = FiducialMap::new(MapParams::default());
        let rel = tv(1.0, 2.0, 0.3, 0.2);
        let batch = [obs(7, rel), obs(9, tv(0.0, 1.0, 0.0, 0.2))];
        let est = estimate(&map, &batch, &AnchorPolicy::default());

        assert!(est.observer.is_none());
        assert!(est.anchored);
        assert_eq!(est.candidates.len(), 2);
        assert!(est.candidates.iter().all(|c| !c.known));
        let first = &est.candidates[0].pose;
        assert_relative_eq!(first.translation(), rel.translation(), epsilon = 1e-12);
        assert!(first.rotation().angle_to(&rel.rotation()) < 1e-6);
        assert_relative_eq!(first.variance, rel.variance, epsilon = 1e-12);
    }

    #[test]
    fn landmark_at_origin_places_first_fiducial_at_identity() {
        let map = FiducialMap::new(MapParams::default());
        let a = tv(1.0, 2.0, 0.3, 0.2);
        let b = tv(2.0, 2.0, 0.3, 0.2);
        let est = estimate(&map, &[obs(1, a), obs(2, b)], &AnchorPolicy::LandmarkAtOrigin);

        let first = &est.candidates[0];
        assert_relative_eq!(first.pose.translation(), Vector3::zeros(), epsilon = 1e-12);
        assert!(first.pose.rotation().angle() < 1e-6);
        // b sits one metre along a's x axis
        let second = &est.candidates[1];
        assert_relative_eq!(second.pose.translation().norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn observer_at_policy_uses_configured_pose() {
        let map = FiducialMap::new(MapParams::default());
        let anchor = AnchorPolicy::ObserverAt {
            translation: [10.0, 0.0, 0.0],
            rotation: [0.0, 0.0, 0.0, 1.0],
        };
        let est = estimate(&map, &[obs(1, tv(1.0, 0.0, 0.0, 0.2))], &anchor);
        assert_relative_eq!(
            est.candidates[0].pose.translation(),
            Vector3::new(11.0, 0.0, 0.0),
            epsilon = 1e-12
        );
        assert!(est.observer.is_none());
    }

    #[test]
    fn multiple_known_landmarks_are_weighted() {
        // two landmarks that disagree about the observer by 1 m in x
        let map = map_with(&[(1, tv(1.0, 0.0, 0.0, 0.0)), (2, tv(3.0, 0.0, 0.0, 0.0))]);
        let rel = tv(1.0, 0.0, 0.0, 1.0);
        let rel_noisy = tv(1.0, 0.0, 0.0, 3.0);

        let est = estimate(&map, &[obs(1, rel), obs(2, rel_noisy)], &AnchorPolicy::default());
        let observer = est.observer.expect("resolved");
        // implied x: 0.0 (var 1) and 2.0 (var 3)
        assert_relative_eq!(observer.translation().x, 0.5, epsilon = 1e-12);
        assert_relative_eq!(observer.variance, 0.75, epsilon = 1e-12);
        assert_eq!(est.known, vec![1, 2]);
        assert!(est.candidates.iter().all(|c| c.known));
    }

    #[test]
    fn duplicate_ids_keep_the_later_report() {
        let map = map_with(&[(1, tv(0.0, 0.0, 0.0, 0.1))]);
        let early = obs(5, tv(1.0, 0.0, 0.0, 0.2));
        let late = obs(5, tv(2.0, 0.0, 0.0, 0.3));
        let seen = obs(1, tv(0.5, 0.0, 0.0, 0.1));

        let with_dup = estimate(
            &map,
            &[seen.clone(), early, late.clone()],
            &AnchorPolicy::default(),
        );
        let only_late = estimate(&map, &[seen, late], &AnchorPolicy::default());
        assert_eq!(with_dup, only_late);
    }

    #[test]
    fn unsorted_duplicates_keep_the_last_report() {
        let map = FiducialMap::new(MapParams::default());
        let a = obs(5, tv(1.0, 0.0, 0.0, 0.2));
        let three = obs(3, tv(2.0, 0.0, 0.0, 0.2));
        let c = obs(5, tv(4.0, 0.0, 0.0, 0.2));

        let kept: Vec<FiducialId> = dedup_latest(&[a.clone(), three.clone(), c.clone()])
            .iter()
            .map(|o| o.fiducial_id())
            .collect();
        assert_eq!(kept, vec![3, 5]);

        let unsorted = estimate(&map, &[a, three.clone(), c.clone()], &AnchorPolicy::default());
        let sorted = estimate(&map, &[three, c], &AnchorPolicy::default());
        assert_eq!(unsorted, sorted);
        assert_relative_eq!(unsorted.candidates[1].pose.translation().x, 4.0, epsilon = 1e-12);
    }

    #[test]
    fn empty_batch_is_empty_estimate() {
        let map = FiducialMap::new(MapParams::default());
        assert_eq!(estimate(&map, &[], &AnchorPolicy::default()), PoseEstimate::default());
    }

    #[test]
    fn anchor_policy_json_shape() {
        let p: AnchorPolicy = serde_json::from_str(r#"{"kind":"landmark_at_origin"}"#).expect("json");
        assert_eq!(p, AnchorPolicy::LandmarkAtOrigin);
    }
}
