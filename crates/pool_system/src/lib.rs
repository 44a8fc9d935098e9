//! # Pool System
//!
//! Scene-aware instance pooling: reusable instances cloned from templates,
//! recycled under a capacity policy instead of being created and destroyed
//! over and over.
//!
//! ## Features
//!
//! - **Pools**: preload, spawn, despawn and trim a bounded set of instances
//! - **Inheritable definitions**: per-category overrides on top of shared bases
//! - **Scene-driven registry**: pools are created for the scenes that need them
//!   and torn down once none does
//! - **Host agnostic**: the scene graph is reached through [`host::ObjectHost`];
//!   [`host::memory::MemoryHost`] runs everything headless
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pool_system::prelude::*;
//!
//! let mut host = MemoryHost::new();
//! let bullet = host.create_object("Bullet");
//!
//! let mut definition = PoolDefinition::new(bullet);
//! definition.set_preload_count(8);
//! definition.set_max_capacity(32);
//!
//! let mut system = PoolSystem::new(PoolSystemSettings::default());
//! system.add_pool(&mut host, Pool::new(definition), true).ok();
//!
//! let instance = system.spawn(&mut host, bullet, None, Placement::world())?;
//! if let Some(instance) = instance {
//!     system.despawn(&mut host, instance);
//! }
//! # Ok::<(), PoolError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod host;
pub mod pooling;
pub mod system;

/// Common imports for pool system users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError, ConfigFormat},
        foundation::math::{Quat, Transform, Vec3},
        host::{
            memory::MemoryHost, ComponentId, Notification, NotificationTarget, Notifier, ObjectHandle, ObjectHost,
            Placement,
        },
        pooling::{
            AdvancedOptions, ContainerMode, DefinitionAsset, DespawnResult, NotificationMode, Pool, PoolDefinition,
            PoolError, PoolEvent, PoolEventKind, PoolResult, SpawnFallback,
        },
        system::{
            global, LoadMode, PoolSystem, PoolSystemSettings, SceneId, SearchMode, SearchPriority, SettingsDocument,
            TemplateCatalog,
        },
    };
}
