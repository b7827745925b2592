//! Feed side of the Aftershock pipeline.
//!
//! Polls the USGS earthquake feed, screens events by magnitude, product
//! availability and region, and decodes the ShakeMap shapefile bundles of
//! the surviving events into hazard cells.
//!
//! # Modules
//!
//! - [`fetch`] -- HTTP and static document fetchers
//! - [`documents`] -- Feed and detail document models
//! - [`bbox`] -- Region filter
//! - [`poller`] -- Candidate stream
//! - [`shakemap`] -- Archive extraction and shapefile decoding
//! - [`error`] -- Shared error types

pub mod bbox;
pub mod documents;
pub mod error;
pub mod fetch;
pub mod poller;
pub mod shakemap;

pub use bbox::BoundingBox;
pub use documents::{DetailDocument, FeedDocument, FeedFeature};
pub use error::FeedError;
pub use fetch::{Fetcher, HttpConfig, HttpFetcher, StaticFetcher};
pub use poller::{Candidate, Exclusion, FeedPoller, PollerConfig, Screening, screen};
pub use shakemap::{LayerLoad, extract_archive, read_hazard_layers, read_layer};
