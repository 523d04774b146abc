//! Rigid 3D transform carrying a scalar variance.
//!
//! Combination rules used everywhere in the workspace:
//! - composition: `var(a * b) = var(a) + var(b)`,
//! - fusion: inverse-variance weighting, `var = 1 / (1 / var_a + 1 / var_b)`,
//!   translation interpolated linearly and rotation spherically with the
//!   weight of `b` equal to `var_a / (var_a + var_b)`.

use std::ops::Mul;

use nalgebra::{Isometry3, Quaternion, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Tolerance passed to `try_slerp`; below it the two rotations are treated as equal.
pub const MIN_SLERP_EPSILON: f64 = 1e-12;

/// A rigid transform `A -> B` paired with a scalar uncertainty.
///
/// Lower variance means higher confidence. A variance of exactly zero marks a
/// transform as certain: it absorbs any other estimate during fusion.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformWithVariance {
    pub transform: Isometry3<f64>,
    pub variance: f64,
}

impl TransformWithVariance {
    pub fn new(transform: Isometry3<f64>, variance: f64) -> Self {
        let mut transform = transform;
        transform.rotation.renormalize();
        Self {
            transform,
            variance,
        }
    }

    /// Identity transform with zero variance.
    pub fn identity() -> Self {
        Self::new(Isometry3::identity(), 0.0)
    }

    /// Build from a translation and an `[x, y, z, w]` quaternion.
    ///
    /// The quaternion does not need to be normalized. Returns `None` when any
    /// component is non-finite or the quaternion has (near) zero norm.
    pub fn from_parts(translation: [f64; 3], rotation_xyzw: [f64; 4], variance: f64) -> Option<Self> {
        if !translation.iter().chain(rotation_xyzw.iter()).all(|v| v.is_finite()) {
            return None;
        }
        let [x, y, z, w] = rotation_xyzw;
        let q = Quaternion::new(w, x, y, z);
        if q.norm() < 1e-9 {
            return None;
        }
        let rotation = UnitQuaternion::from_quaternion(q);
        let translation = Translation3::new(translation[0], translation[1], translation[2]);
        Some(Self::new(
            Isometry3::from_parts(translation, rotation),
            variance,
        ))
    }

    #[inline]
    pub fn translation(&self) -> Vector3<f64> {
        self.transform.translation.vector
    }

    #[inline]
    pub fn rotation(&self) -> UnitQuaternion<f64> {
        self.transform.rotation
    }

    /// Rotation as `[x, y, z, w]`.
    pub fn rotation_xyzw(&self) -> [f64; 4] {
        let q = self.transform.rotation;
        [q.i, q.j, q.k, q.w]
    }

    /// `1 / variance`, infinite for a certain transform.
    pub fn confidence(&self) -> f64 {
        if self.variance > 0.0 {
            1.0 / self.variance
        } else {
            f64::INFINITY
        }
    }

    /// True when translation, rotation and variance are all finite.
    pub fn is_finite(&self) -> bool {
        let t = self.translation();
        let q = self.transform.rotation.coords;
        t.iter().chain(q.iter()).all(|v| v.is_finite()) && self.variance.is_finite()
    }

    /// Chain `self: A -> B` with `rhs: B -> C` into `A -> C`.
    ///
    /// Variances add, so the result is never more certain than either operand.
    pub fn compose(&self, rhs: &Self) -> Self {
        Self::new(self.transform * rhs.transform, self.variance + rhs.variance)
    }

    /// Inverse transform `B -> A` with unchanged variance.
    pub fn inverse(&self) -> Self {
        Self::new(self.transform.inverse(), self.variance)
    }

    /// Inverse-variance weighted average of two estimates of the same transform.
    ///
    /// The more certain input dominates. Fusing a transform with itself keeps
    /// the pose and halves the variance.
    pub fn fuse(&self, other: &Self) -> Self {
        if self.variance <= 0.0 {
            return *self;
        }
        if other.variance <= 0.0 {
            return *other;
        }
        let sum = self.variance + other.variance;
        // weight given to `other`; small when `other` is noisy
        let w = self.variance / sum;

        let t = self.translation() * (1.0 - w) + other.translation() * w;
        let q1 = self.rotation();
        let q2 = other.rotation();
        let rotation = q1
            .try_slerp(&q2, w, MIN_SLERP_EPSILON)
            .unwrap_or(if w < 0.5 { q1 } else { q2 });

        Self::new(
            Isometry3::from_parts(Translation3::from(t), rotation),
            self.variance * other.variance / sum,
        )
    }

    /// In-place [`fuse`](Self::fuse).
    pub fn update(&mut self, other: &Self) {
        *self = self.fuse(other);
    }

    /// Keep only the rotation about the world Z axis.
    pub fn flattened(&self) -> Self {
        let (_, _, yaw) = self.transform.rotation.euler_angles();
        let rotation = UnitQuaternion::from_euler_angles(0.0, 0.0, yaw);
        Self::new(
            Isometry3::from_parts(self.transform.translation, rotation),
            self.variance,
        )
    }
}

impl Default for TransformWithVariance {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mul for TransformWithVariance {
    type Output = TransformWithVariance;

    fn mul(self, rhs: TransformWithVariance) -> Self::Output {
        self.compose(&rhs)
    }
}

impl<'a> Mul<&'a TransformWithVariance> for &'a TransformWithVariance {
    type Output = TransformWithVariance;

    fn mul(self, rhs: &'a TransformWithVariance) -> Self::Output {
        self.compose(rhs)
    }
}
