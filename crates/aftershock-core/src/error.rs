//! Error types for the pipeline.
//!
//! Each stage has its own error enum; [`PipelineError`] wraps them for the
//! saga and maps every failure onto a [`FailureClass`] for logging.

use std::path::PathBuf;

use aftershock_db::DbError;
use aftershock_feed::FeedError;

/// Errors raised while preserving previous artifacts.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// A filesystem operation failed.
    #[error("archive I/O error at {}: {source}", path.display())]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The zip writer failed.
    #[error("archive write error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Every candidate label for the archive is already taken.
    #[error("no free archive label for {0}")]
    LabelExhausted(String),
}

/// Errors raised while aggregating or exporting exposure.
#[derive(Debug, thiserror::Error)]
pub enum ExposureError {
    /// The geometry store failed.
    #[error("store error: {0}")]
    Store(#[from] DbError),

    /// Writing the export file failed.
    #[error("export I/O error at {}: {source}", path.display())]
    Io {
        /// Export path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A record could not be serialized.
    #[error("export serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors raised while loading reference geography.
#[derive(Debug, thiserror::Error)]
pub enum GeographyError {
    /// The source file could not be read.
    #[error("geography I/O error at {}: {source}", path.display())]
    Io {
        /// Source path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The geometry store failed.
    #[error("store error: {0}")]
    Store(#[from] DbError),
}

/// Coarse failure classes used for logging and operator triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Transport failure; the event is retried on the next poll.
    Network,
    /// Malformed document or archive; the event is skipped.
    Parse,
    /// Unusable geometry.
    Geometry,
    /// Local filesystem failure; fatal for the event.
    FileSystem,
    /// Geometry store failure.
    Storage,
}

impl FailureClass {
    /// Stable name for logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Parse => "parse",
            Self::Geometry => "geometry",
            Self::FileSystem => "filesystem",
            Self::Storage => "storage",
        }
    }
}

/// Errors raised by the pipeline saga for one event or one poll.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Fetching or decoding failed.
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    /// The geometry store failed.
    #[error("store error: {0}")]
    Store(#[from] DbError),

    /// Preserving previous artifacts failed.
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Aggregating or exporting exposure failed.
    #[error("exposure error: {0}")]
    Exposure(#[from] ExposureError),

    /// Writing an event file failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// Path being written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Event metadata could not be serialized.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A blocking filesystem task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),
}

impl PipelineError {
    /// The failure class this error belongs to.
    pub const fn class(&self) -> FailureClass {
        match self {
            Self::Feed(FeedError::Io(_)) => FailureClass::FileSystem,
            Self::Feed(e) if e.is_network() => FailureClass::Network,
            Self::Feed(_) | Self::Serialize(_) => FailureClass::Parse,
            Self::Store(_) | Self::Exposure(ExposureError::Store(_)) => FailureClass::Storage,
            Self::Archive(_) | Self::Exposure(_) | Self::Io { .. } | Self::Task(_) => {
                FailureClass::FileSystem
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_map_onto_taxonomy() {
        let network = PipelineError::Feed(FeedError::Timeout { url: "u".to_owned() });
        assert_eq!(network.class(), FailureClass::Network);

        let parse = PipelineError::Feed(FeedError::MissingLayer("mi".to_owned()));
        assert_eq!(parse.class(), FailureClass::Parse);

        let archive = PipelineError::Archive(ArchiveError::LabelExhausted("archive_20240101".to_owned()));
        assert_eq!(archive.class(), FailureClass::FileSystem);

        let store = PipelineError::Store(DbError::Config("x".to_owned()));
        assert_eq!(store.class(), FailureClass::Storage);
    }
}
