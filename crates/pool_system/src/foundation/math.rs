//! Math utilities and types
//!
//! Provides the small set of math types the pool system needs to place
//! spawned instances in the host's scene hierarchy.

pub use nalgebra::{Quaternion, Unit, Vector3};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Transform representing position, rotation, and scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// Position in 3D space
    pub position: Vec3,

    /// Rotation quaternion
    pub rotation: Quat,

    /// Scale factors
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Quat::identity(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Create a new identity transform
    pub fn identity() -> Self {
        Self::default()
    }

    /// Create a transform with only position
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Combine this transform with another (`self` is the parent)
    pub fn combine(&self, other: &Transform) -> Transform {
        Transform {
            position: self.position + self.rotation * (self.scale.component_mul(&other.position)),
            rotation: self.rotation * other.rotation,
            scale: self.scale.component_mul(&other.scale),
        }
    }

    /// Express this world transform in the local space of `parent`
    ///
    /// Exact for position and rotation under any parent. Scale is divided
    /// per axis, which only round-trips when no shear is involved.
    pub fn relative_to(&self, parent: &Transform) -> Transform {
        let inv_rotation = parent.rotation.inverse();
        Transform {
            position: (inv_rotation * (self.position - parent.position)).component_div(&parent.scale),
            rotation: inv_rotation * self.rotation,
            scale: self.scale.component_div(&parent.scale),
        }
    }
}
