//! Pool system
//!
//! The registry that owns every active pool, the scene → definition lookup
//! that drives it and the settings it is configured with.

pub mod global;
pub mod registry;
pub mod resolver;
pub mod settings;

pub use registry::{LoadMode, PoolInfo, PoolSystem};
pub use resolver::{DefinitionMapping, DefinitionResolver, SceneId, SearchMode, SearchPriority};
pub use settings::{PoolSystemSettings, SettingsDocument, TemplateCatalog};
