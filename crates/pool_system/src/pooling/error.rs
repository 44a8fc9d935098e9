//! Pool error types

use crate::config::ConfigError;
use crate::host::ObjectHandle;
use thiserror::Error;

/// Errors reported by pools and the pool system
///
/// None of these are fatal: a failed operation produces no instance or leaves
/// the pool untouched.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool's definition has no template
    #[error("Pool definition has no template")]
    NullTemplate,

    /// Spawn was called on a pool that is not active
    #[error("Pool is not active")]
    InactivePool,

    /// Free instances are exhausted and the capacity forbids creating more
    #[error("Pool for template {template} reached its capacity")]
    CapacityExceeded {
        /// Template of the exhausted pool
        template: ObjectHandle,
    },

    /// A definition can never be resolved (for example a base-definition cycle)
    #[error("Invalid pool definition: {0}")]
    InvalidDefinition(String),

    /// Settings could not be loaded or saved
    #[error("Settings error: {0}")]
    Settings(#[from] ConfigError),
}

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;
