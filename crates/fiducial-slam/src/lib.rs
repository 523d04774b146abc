//! Facade crate for the `fiducial-slam-*` workspace.
//!
//! This crate provides:
//! - re-exports of the geometric core and the landmark map,
//! - [`FiducialSlam`], the engine that turns detector batches into map
//!   updates and observer poses, runs the periodic maintenance tick and
//!   persists the map on shutdown,
//! - a single-thread [`run`] loop fed by a `crossbeam-channel` receiver,
//! - [`SharedMap`] for hosts that fuse and query from different threads,
//! - (feature `cli`) the `fiducial-slam` binary reading JSON-line batches.
//!
//! ## Quickstart
//!
//! ```no_run
//! use fiducial_slam::{FiducialSlam, SlamConfig};
//! use fiducial_slam::core::{RawSighting, SightingBatch};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SlamConfig::load_json("slam.json")?;
//! let mut slam = FiducialSlam::open(config)?;
//! let mut poses = Vec::new();
//!
//! let batch = SightingBatch {
//!     stamp: 0.0,
//!     frame_id: "camera".into(),
//!     sightings: vec![RawSighting {
//!         fiducial_id: 7,
//!         translation: [1.0, 0.0, 0.0],
//!         rotation: [0.0, 0.0, 0.0, 1.0],
//!         object_error: 1e-9,
//!         image_error: 0.0,
//!         fiducial_area: 0.0,
//!     }],
//! };
//! slam.handle_batch(&batch, &mut poses);
//! let report = slam.shutdown();
//! println!("{} landmarks", report.landmarks);
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `fiducial_slam::core`: transforms with variance, sightings, observations.
//! - `fiducial_slam::map`: landmarks, fusion, pose estimation, persistence.

pub use fiducial_slam_core as core;
pub use fiducial_slam_map as map;

pub use fiducial_slam_core::{
    FiducialId, Observation, ObservationParams, RawSighting, SightingBatch, TransformWithVariance,
    WeightingPolicy,
};
pub use fiducial_slam_map::{
    AnchorPolicy, FiducialMap, FusionOutcome, MaintenanceReport, ObserverPose, PrunePolicy,
    SaveOutcome,
};

mod config;
mod engine;
mod runner;
mod scheduler;
mod shared;
mod sink;

pub use config::{ConfigError, SlamConfig};
pub use engine::{EngineError, FiducialSlam, ShutdownReport};
pub use runner::run;
pub use scheduler::MaintenanceScheduler;
pub use shared::SharedMap;
pub use sink::{JsonLinesSink, PoseSink};
