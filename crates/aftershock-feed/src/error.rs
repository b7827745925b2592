//! Error types for the feed poller and archive decoder.

/// Errors raised while fetching feed documents or decoding archives.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// The request could not be sent or the connection broke.
    #[error("network failure fetching {url}: {message}")]
    Network {
        /// Requested URL.
        url: String,
        /// Underlying error description.
        message: String,
    },

    /// The request exceeded its deadline.
    #[error("timed out fetching {url}")]
    Timeout {
        /// Requested URL.
        url: String,
    },

    /// The server answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// A document could not be decoded or lacks a required field.
    #[error("failed to parse {what}: {message}")]
    Parse {
        /// Document or field being parsed.
        what: String,
        /// Description of the problem.
        message: String,
    },

    /// The ShakeMap archive is not a readable zip file.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// A hazard layer shapefile could not be opened.
    #[error("shapefile error in layer {layer}: {message}")]
    Shapefile {
        /// Layer name (`mi`, `pga`, `pgv`).
        layer: String,
        /// Description of the problem.
        message: String,
    },

    /// The extracted archive lacks one of the hazard layers.
    #[error("hazard layer {0} missing from archive")]
    MissingLayer(String),

    /// Local filesystem failure while extracting.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FeedError {
    /// Whether the failure is transport-level (network, timeout, status).
    pub const fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Timeout { .. } | Self::Status { .. }
        )
    }

    /// Whether repeating the same request may succeed.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn parse(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            what: what.into(),
            message: message.into(),
        }
    }
}
