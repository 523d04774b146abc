//! Fiducial landmark map.
//!
//! Current focus:
//! - resolving the observer pose from landmarks that are already mapped,
//! - inserting first sightings and refining known landmarks by
//!   inverse-variance fusion,
//! - a read-only mode for localization against a frozen map,
//! - JSON persistence with atomic replacement of the previous file.
//!
//! Observation construction lives in `fiducial-slam-core`.
//!
//! The map has a single owner and a single mutator: every `&mut` method is
//! one complete fusion or maintenance step. Hosts that share the map across
//! threads must serialize writers (see `fiducial-slam::SharedMap`).

mod estimator;
mod io;
mod landmark;
mod map;

pub use estimator::{dedup_latest, estimate, AnchorPolicy, LandmarkCandidate, PoseEstimate};
pub use io::{LandmarkRecord, MapFile, MapIoError, SaveOutcome, MAP_FILE_VERSION};
pub use landmark::Landmark;
pub use map::{
    FiducialMap, FusionOutcome, MaintenanceReport, MapMode, MapParams, ObserverPose, PrunePolicy,
};

pub use fiducial_slam_core::{FiducialId, Observation, TransformWithVariance};
