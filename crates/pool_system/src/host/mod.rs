//! Host object-lifecycle contract
//!
//! The pool system never owns the objects it recycles. Templates, instances
//! and containers all live in the host's scene hierarchy; the pools only hold
//! [`ObjectHandle`]s and drive the host through [`ObjectHost`].
//!
//! ```text
//! Pool / PoolSystem
//!         │  instantiate / destroy / set_active / set_parent ...
//!         ▼
//!    ObjectHost ──── Notifier (spawn / despawn notifications)
//!         │
//!   host scene graph (owns every object)
//! ```

pub mod memory;

use crate::foundation::math::{Quat, Vec3};
use thiserror::Error;

/// Opaque identity of a host object
///
/// Assigned by the host when the object is created and stable for the
/// object's whole lifetime. Once the object is destroyed the handle stays
/// detectably invalid ([`ObjectHost::is_alive`] returns false) and is never
/// handed out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(u64);

impl ObjectHandle {
    /// Wrap a host-assigned identifier
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The host-assigned identifier
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque identity of a component (sub-object) attached to a host object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u64);

impl ComponentId {
    /// Wrap a host-assigned identifier
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The host-assigned identifier
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Where a new or recycled instance ends up
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    /// Attach under the parent, keeping either the world pose (`world_space`)
    /// or the local pose
    Attach {
        /// Keep the world pose when reparenting
        world_space: bool,
    },
    /// Attach under the parent and move to an explicit world pose
    Pose {
        /// World position
        position: Vec3,
        /// World rotation
        rotation: Quat,
    },
}

impl Placement {
    /// Attach keeping the world pose
    pub const fn world() -> Self {
        Self::Attach { world_space: true }
    }

    /// Attach keeping the local pose
    pub const fn local() -> Self {
        Self::Attach { world_space: false }
    }

    /// Move to an explicit world pose
    pub const fn at(position: Vec3, rotation: Quat) -> Self {
        Self::Pose { position, rotation }
    }
}

impl Default for Placement {
    fn default() -> Self {
        Self::world()
    }
}

/// Who receives a notification on an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationTarget {
    /// The single best-matching receiver on the instance
    Single,
    /// Every receiver in the instance's component graph
    All,
}

/// A named message sent to an instance when it is spawned or despawned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification<'a> {
    /// Receiver selection
    pub target: NotificationTarget,
    /// Message name
    pub name: &'a str,
    /// Report when nothing handled the message
    pub require_receiver: bool,
}

/// Notification delivery failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    /// The notification required a receiver and none handled it
    #[error("No receiver for notification '{name}' on {object}")]
    MissingReceiver {
        /// Message name
        name: String,
        /// Target object
        object: ObjectHandle,
    },

    /// The target object no longer exists
    #[error("Notification target {0} was destroyed")]
    Destroyed(ObjectHandle),
}

/// Delivers spawn/despawn notifications into an instance's component graph
pub trait Notifier {
    /// Send `notification` to `object`
    fn notify(&mut self, object: ObjectHandle, notification: &Notification<'_>) -> Result<(), NotifyError>;
}

/// Object-lifecycle operations the pool system needs from its host
///
/// Every call is synchronous and happens on the thread that drives the host's
/// frame loop.
pub trait ObjectHost: Notifier {
    /// Clone `template` under `parent` with the given placement
    fn instantiate(&mut self, template: ObjectHandle, parent: Option<ObjectHandle>, placement: Placement) -> ObjectHandle;

    /// Create an empty node used to hold free instances
    fn create_container(&mut self, name: &str) -> ObjectHandle;

    /// Destroy an object (and anything parented under it)
    fn destroy(&mut self, object: ObjectHandle);

    /// Whether the object still exists
    fn is_alive(&self, object: ObjectHandle) -> bool;

    /// Activate or deactivate an object
    fn set_active(&mut self, object: ObjectHandle, active: bool);

    /// Reparent an object, optionally keeping its world pose
    fn set_parent(&mut self, object: ObjectHandle, parent: Option<ObjectHandle>, keep_world: bool);

    /// Move an object to a world pose
    fn set_world_pose(&mut self, object: ObjectHandle, position: Vec3, rotation: Quat);

    /// Local scale of an object
    fn local_scale(&self, object: ObjectHandle) -> Vec3;

    /// Set the local scale of an object
    fn set_local_scale(&mut self, object: ObjectHandle, scale: Vec3);

    /// Display name of an object
    fn name(&self, object: ObjectHandle) -> String;

    /// Rename an object
    fn set_name(&mut self, object: ObjectHandle, name: &str);

    /// Components attached to an object, in a stable order shared between a
    /// template and its clones
    fn components(&self, object: ObjectHandle) -> Vec<ComponentId>;

    /// Object that owns a component
    fn component_owner(&self, component: ComponentId) -> Option<ObjectHandle>;
}
