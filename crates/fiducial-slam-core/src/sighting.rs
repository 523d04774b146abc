use serde::{Deserialize, Serialize};

use crate::FiducialId;

/// One marker as reported by the upstream detector, relative to the camera.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawSighting {
    pub fiducial_id: FiducialId,
    /// Camera -> fiducial translation.
    pub translation: [f64; 3],
    /// Camera -> fiducial rotation as `[x, y, z, w]`.
    pub rotation: [f64; 4],
    /// Reprojection error of the fitted marker pose.
    #[serde(default)]
    pub object_error: f64,
    #[serde(default)]
    pub image_error: f64,
    /// Detected marker area in pixels^2.
    #[serde(default)]
    pub fiducial_area: f64,
}

/// All sightings from one camera frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SightingBatch {
    /// Capture time in seconds.
    pub stamp: f64,
    /// Observer frame the transforms are expressed in.
    pub frame_id: String,
    #[serde(default)]
    pub sightings: Vec<RawSighting>,
}
