// src/error.rs
//! Error handling for the physics core.
//!
//! The simulation path never fails loudly: world mutations, transform syncs
//! and sensor queries degrade to logged no-ops. Only setup calls (spawning the
//! physics worker, parsing configuration or authored properties) return
//! [`Result`].

use thiserror::Error;

/// Main error type. Send + Sync + 'static so it can cross the worker boundary.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// An operation that requires `PhysicsManager::initialize` ran before it.
    #[error("physics world is not initialized")]
    NotInitialized,

    /// The thread backend refused to start a worker.
    #[error("failed to spawn thread `{0}`")]
    ThreadSpawn(String),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// JSON (de)serialization of configuration or authored properties.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Context chaining.
    #[error("{message}: {source}")]
    WithContext {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap this error with a higher-level message.
    #[inline]
    pub fn context<C: Into<String>>(self, context: C) -> Self {
        Self::WithContext {
            message: context.into(),
            source: Box::new(self),
        }
    }

    #[inline]
    pub fn is_not_initialized(&self) -> bool {
        matches!(self, Error::NotInitialized)
    }

    #[inline]
    pub fn is_thread_spawn(&self) -> bool {
        matches!(self, Error::ThreadSpawn(_))
    }
}

/// Convenient `Result` alias. Use `crate::Result<T>` everywhere.
pub type Result<T> = std::result::Result<T, Error>;
