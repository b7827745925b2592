//! Ingestion logic for the Aftershock pipeline.
//!
//! Everything between the feed and the store lives here: the versioning
//! gate deciding whether an event needs work, the archival of superseded
//! artifacts, exposure aggregation, and the saga tying them together.
//!
//! # Modules
//!
//! - [`config`] -- YAML configuration with environment overrides
//! - [`versioning`] -- NEW / UPDATED / UNCHANGED classification
//! - [`archive`] -- Bundling previous artifacts into dated zip archives
//! - [`exposure`] -- Per-unit hazard statistics, merge and JSON-lines export
//! - [`geography`] -- Loading reference geography into the store
//! - [`locks`] -- Per-event serialization
//! - [`pipeline`] -- The per-event saga and the poll cycle

pub mod archive;
pub mod config;
pub mod error;
pub mod exposure;
pub mod geography;
pub mod locks;
pub mod pipeline;
pub mod versioning;

pub use archive::{ArchiveManager, ArchiveOutcome, CollisionPolicy, archive_label};
pub use config::{
    AftershockConfig, ArchiveConfig, ConfigError, ExposureConfig, FeedConfig, GeographySource,
    LoggingConfig, PipelineConfig, StorageBackend, StorageConfig,
};
pub use error::{ArchiveError, ExposureError, FailureClass, GeographyError, PipelineError};
pub use exposure::{
    ExportLine, ExposureAggregator, ExposureRun, MergeStrategy, export_file_name, export_jsonl,
    merge_layers,
};
pub use geography::{GeographyLoad, load_source, parse_geography, read_geography_file};
pub use locks::EventLocks;
pub use pipeline::{EPICENTER_FILE, EventOutcome, Pipeline, PipelineSettings, PollSummary};
pub use versioning::{VersionDecision, decide};
