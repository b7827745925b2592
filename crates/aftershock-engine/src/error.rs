//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every failure that can stop the engine during
//! start-up or the poll loop.

/// Top-level error for the engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: aftershock_core::ConfigError,
    },

    /// Connecting to or migrating the store failed.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: aftershock_db::DbError,
    },

    /// The HTTP client could not be built.
    #[error("feed error: {source}")]
    Feed {
        /// The underlying feed error.
        #[from]
        source: aftershock_feed::FeedError,
    },

    /// Loading reference geography failed.
    #[error("geography error: {source}")]
    Geography {
        /// The underlying geography error.
        #[from]
        source: aftershock_core::GeographyError,
    },

    /// A single-shot poll failed.
    #[error("pipeline error: {source}")]
    Pipeline {
        /// The underlying pipeline error.
        #[from]
        source: aftershock_core::PipelineError,
    },
}
