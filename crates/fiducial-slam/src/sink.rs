//! Outbound interface for localization consumers.

use std::io::Write;

use serde::Serialize;

use fiducial_slam_core::{FiducialId, Observation, TransformWithVariance};
use fiducial_slam_map::ObserverPose;

/// Receiver of resolved observer poses.
pub trait PoseSink {
    /// Called for every pose resolved from a batch and for every
    /// re-publication on the maintenance tick.
    fn publish_pose(&mut self, pose: &ObserverPose);

    /// Normalized observations of one batch, sorted by id. Only called when
    /// the session republishes observations.
    fn publish_observations(
        &mut self,
        _stamp: f64,
        _frame_id: &str,
        _observations: &[Observation],
    ) {
    }
}

impl PoseSink for Vec<ObserverPose> {
    fn publish_pose(&mut self, pose: &ObserverPose) {
        self.push(pose.clone());
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Line<'a> {
    Pose(&'a ObserverPose),
    Observations {
        stamp: f64,
        frame_id: &'a str,
        fiducials: Vec<ObservationLine>,
    },
}

#[derive(Serialize)]
struct ObservationLine {
    fiducial_id: FiducialId,
    transform: TransformWithVariance,
}

/// Writes one JSON object per line.
///
/// Write errors are logged once and further output is dropped; a closed
/// consumer must not stop the fusion loop.
pub struct JsonLinesSink<W: Write> {
    out: W,
    broken: bool,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, broken: false }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, line: &Line<'_>) {
        if self.broken {
            return;
        }
        let res = serde_json::to_writer(&mut self.out, line)
            .map_err(std::io::Error::from)
            .and_then(|()| self.out.write_all(b"\n"))
            .and_then(|()| self.out.flush());
        if let Err(e) = res {
            log::error!("pose output failed, dropping further output: {e}");
            self.broken = true;
        }
    }
}

impl<W: Write> PoseSink for JsonLinesSink<W> {
    fn publish_pose(&mut self, pose: &ObserverPose) {
        self.emit(&Line::Pose(pose));
    }

    fn publish_observations(&mut self, stamp: f64, frame_id: &str, observations: &[Observation]) {
        let fiducials = observations
            .iter()
            .map(|o| ObservationLine {
                fiducial_id: o.fiducial_id(),
                transform: *o.transform(),
            })
            .collect();
        self.emit(&Line::Observations {
            stamp,
            frame_id,
            fiducials,
        });
    }
}
