//! Feed poller.
//!
//! One call to [`FeedPoller::poll`] fetches the summary feed and yields a
//! lazy stream of candidates. Each listed event goes through three pure
//! exclusion filters, in order:
//!
//! 1. magnitude below the threshold (checked on the summary, so no detail
//!    request is made for small events)
//! 2. no product of the configured kind in the detail document
//! 3. epicenter outside the bounding box
//!
//! The poller keeps no cursor: every call re-derives the sequence from
//! the current feed.

use aftershock_types::{Event, ShakeMapProduct};
use futures::stream::{self, Stream, StreamExt};

use crate::bbox::BoundingBox;
use crate::documents::{DetailDocument, FeedDocument, FeedFeature};
use crate::error::FeedError;
use crate::fetch::Fetcher;

/// Significant earthquakes of the past week.
pub const DEFAULT_FEED_URL: &str =
    "https://earthquake.usgs.gov/earthquakes/feed/v1.0/summary/significant_week.geojson";

/// Product kind carrying the hazard surfaces.
pub const DEFAULT_PRODUCT_KIND: &str = "shakemap";

/// Minimum magnitude worth ingesting.
pub const DEFAULT_MAGNITUDE_THRESHOLD: f64 = 4.0;

/// Poller settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    /// Summary feed URL.
    pub feed_url: String,
    /// Events below this magnitude are excluded.
    pub magnitude_threshold: f64,
    /// Product kind to select from detail documents.
    pub product_kind: String,
    /// Region epicenters must fall in.
    pub bounding_box: BoundingBox,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            feed_url: DEFAULT_FEED_URL.to_owned(),
            magnitude_threshold: DEFAULT_MAGNITUDE_THRESHOLD,
            product_kind: DEFAULT_PRODUCT_KIND.to_owned(),
            bounding_box: BoundingBox::default(),
        }
    }
}

/// An event that passed every filter, with the product to ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// The event as described by its detail document.
    pub event: Event,
    /// Selected hazard product.
    pub product: ShakeMapProduct,
}

/// Why an event was excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    /// Magnitude missing or below the threshold.
    BelowThreshold,
    /// No product of the configured kind.
    NoProduct,
    /// Epicenter outside the bounding box.
    OutsideRegion,
}

impl Exclusion {
    /// Stable name for logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BelowThreshold => "below_threshold",
            Self::NoProduct => "no_product",
            Self::OutsideRegion => "outside_region",
        }
    }
}

/// Result of screening one detail document.
#[derive(Debug, Clone, PartialEq)]
pub enum Screening {
    /// The event should be evaluated by the pipeline.
    Accepted(Candidate),
    /// The event is ignored for this poll.
    Excluded(Exclusion),
}

/// Whether a magnitude passes the threshold. Missing magnitudes do not.
pub fn meets_threshold(magnitude: Option<f64>, threshold: f64) -> bool {
    magnitude.is_some_and(|m| m >= threshold)
}

/// Apply the three filters to a detail document.
///
/// # Errors
///
/// Returns [`FeedError::Parse`] if the document passes the filters but the
/// event or product cannot be materialized.
pub fn screen(
    detail: &DetailDocument,
    detail_url: &str,
    config: &PollerConfig,
) -> Result<Screening, FeedError> {
    if !meets_threshold(detail.properties.mag, config.magnitude_threshold) {
        return Ok(Screening::Excluded(Exclusion::BelowThreshold));
    }

    let Some(product) = detail.product(&config.product_kind)? else {
        return Ok(Screening::Excluded(Exclusion::NoProduct));
    };

    let inside = detail.epicenter().is_some_and(|epicenter| {
        config
            .bounding_box
            .contains(epicenter.longitude, epicenter.latitude)
    });
    if !inside {
        return Ok(Screening::Excluded(Exclusion::OutsideRegion));
    }

    let event = detail.to_event(detail_url)?;
    Ok(Screening::Accepted(Candidate { event, product }))
}

/// Fetches the feed and screens its events.
#[derive(Debug, Clone)]
pub struct FeedPoller {
    fetcher: Fetcher,
    config: PollerConfig,
}

impl FeedPoller {
    /// Create a poller.
    pub const fn new(fetcher: Fetcher, config: PollerConfig) -> Self {
        Self { fetcher, config }
    }

    /// The fetcher, shared with the archive download step.
    pub const fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// The poller settings.
    pub const fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Fetch the feed and return the stream of candidates.
    ///
    /// Detail documents are fetched lazily as the stream is consumed. A
    /// failure for one event yields an `Err` item and the stream moves on
    /// to the next event.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError`] if the summary feed itself cannot be fetched
    /// or decoded.
    pub async fn poll(
        &self,
    ) -> Result<impl Stream<Item = Result<Candidate, FeedError>> + '_, FeedError> {
        let feed: FeedDocument = self.fetcher.fetch_json(&self.config.feed_url).await?;
        tracing::info!(
            url = %self.config.feed_url,
            fetcher = self.fetcher.name(),
            features = feed.features.len(),
            "Fetched feed"
        );

        Ok(stream::iter(feed.features)
            .filter_map(move |feature| async move { self.evaluate(feature).await.transpose() }))
    }

    async fn evaluate(&self, feature: FeedFeature) -> Result<Option<Candidate>, FeedError> {
        if !meets_threshold(feature.properties.mag, self.config.magnitude_threshold) {
            tracing::debug!(
                event_id = %feature.id,
                reason = Exclusion::BelowThreshold.as_str(),
                "Event excluded"
            );
            return Ok(None);
        }

        let detail_url = feature
            .properties
            .detail
            .as_deref()
            .ok_or_else(|| FeedError::parse(format!("event {}", feature.id), "missing detail URL"))?;
        let detail: DetailDocument = self.fetcher.fetch_json(detail_url).await?;

        match screen(&detail, detail_url, &self.config)? {
            Screening::Accepted(candidate) => Ok(Some(candidate)),
            Screening::Excluded(reason) => {
                tracing::debug!(event_id = %feature.id, reason = reason.as_str(), "Event excluded");
                Ok(None)
            }
        }
    }
}
