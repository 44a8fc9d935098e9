//! Instance pooling
//!
//! Pool definitions with inheritable settings, the pool state machine and the
//! events pools publish about their instances.

pub mod definition;
pub mod error;
pub mod events;
pub mod pool;

pub use definition::{
    AdvancedOptions, DefinitionAsset, NotificationMode, Overrides, PoolDefinition, ResolveContext, SpawnFallback,
};
pub use error::{PoolError, PoolResult};
pub use events::{Observer, ObserverId, PoolEvent, PoolEventKind};
pub use pool::{ContainerMode, DespawnResult, Pool, PoolStats};
