use std::sync::Arc;

use parking_lot::RwLock;

use fiducial_slam_core::{FiducialId, Observation};
use fiducial_slam_map::{FiducialMap, FusionOutcome, Landmark, ObserverPose};

/// A map shared between a fusing thread and localization readers.
///
/// Writers hold the lock for one whole fusion pass, so readers never see a
/// partially applied batch. Reads proceed concurrently between passes.
#[derive(Clone, Debug, Default)]
pub struct SharedMap {
    inner: Arc<RwLock<FiducialMap>>,
}

impl SharedMap {
    pub fn new(map: FiducialMap) -> Self {
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    /// One exclusive fusion pass.
    pub fn fuse(&self, observations: &[Observation], stamp: f64) -> FusionOutcome {
        self.inner.write().update(observations, stamp)
    }

    pub fn observer_pose(&self) -> Option<ObserverPose> {
        self.inner.read().observer_pose().cloned()
    }

    pub fn landmark(&self, id: FiducialId) -> Option<Landmark> {
        self.inner.read().landmark(id).cloned()
    }

    /// Consistent copy of the whole map.
    pub fn snapshot(&self) -> FiducialMap {
        self.inner.read().clone()
    }

    /// Run `f` with shared access, e.g. to save without copying.
    pub fn read<R>(&self, f: impl FnOnce(&FiducialMap) -> R) -> R {
        f(&self.inner.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fiducial_slam_core::TransformWithVariance;
    use fiducial_slam_map::MapParams;
    use nalgebra::Isometry3;
    use std::thread;

    fn obs(id: FiducialId, x: f64, stamp: f64) -> Observation {
        Observation::new(
            id,
            TransformWithVariance::new(Isometry3::translation(x, 0.0, 0.0), 0.1),
            stamp,
            "camera",
        )
    }

    #[test]
    fn readers_see_whole_passes() {
        let shared = SharedMap::new(FiducialMap::new(MapParams::default()));
        shared.fuse(&[obs(1, 1.0, 0.0)], 0.0);

        let writer = {
            let shared = shared.clone();
            thread::spawn(move || {
                for i in 1..50 {
                    let stamp = i as f64;
                    shared.fuse(&[obs(1, 1.0, stamp), obs(2, 2.0, stamp)], stamp);
                }
            })
        };
        let reader = {
            let shared = shared.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    let snap = shared.snapshot();
                    // landmark 2 is only ever inserted together with a link to 1
                    if let Some(two) = snap.landmark(2) {
                        assert!(two.links.contains(&1));
                        assert!(snap.landmark(1).is_some_and(|l| l.links.contains(&2)));
                    }
                }
            })
        };
        writer.join().expect("writer");
        reader.join().expect("reader");

        assert_eq!(shared.landmark(1).map(|l| l.observations), Some(50));
        assert!(shared.observer_pose().is_some());
        assert_eq!(shared.read(|m| m.len()), 2);
    }
}
