//! Core types for fiducial landmark mapping.
//!
//! This crate is intentionally small and purely geometric. It does *not*
//! depend on any marker detector, transport, or storage format.
//!
//! - [`TransformWithVariance`]: rigid transform plus scalar uncertainty, with
//!   composition and inverse-variance fusion.
//! - [`RawSighting`] / [`SightingBatch`]: what an upstream detector reports.
//! - [`Observation`] / [`ObservationBuilder`]: weighted, sanitized, sorted
//!   per-fiducial measurements ready for fusion.

mod logger;
mod observation;
mod sighting;
mod transform;

pub use observation::{
    FiducialId, Observation, ObservationBuilder, ObservationParams, WeightingPolicy,
};
pub use sighting::{RawSighting, SightingBatch};
pub use transform::{TransformWithVariance, MIN_SLERP_EPSILON};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
