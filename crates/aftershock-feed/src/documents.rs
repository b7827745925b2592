//! Wire models of the feed and detail documents.
//!
//! Only the fields the pipeline reads are modeled; everything else in the
//! GeoJSON is ignored. Summary features and detail documents share one
//! shape, the detail document additionally listing products.

use std::collections::BTreeMap;

use aftershock_types::{Epicenter, Event, EventId, ShakeMapProduct};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::FeedError;

/// Content key of the zipped shapefile bundle inside a product.
pub const SHAPE_ZIP_CONTENT: &str = "download/shape.zip";

/// A GeoJSON feature collection as served by the summary feed.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedDocument {
    /// Listed events.
    #[serde(default)]
    pub features: Vec<FeedFeature>,
}

/// One event feature, either from the summary feed or a detail document.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedFeature {
    /// Event identifier.
    pub id: String,
    /// Event properties.
    pub properties: FeatureProperties,
    /// Epicenter point.
    pub geometry: Option<PointGeometry>,
}

/// Detail documents have the same shape as summary features.
pub type DetailDocument = FeedFeature;

/// Properties of an event feature.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeatureProperties {
    /// Preferred magnitude.
    pub mag: Option<f64>,
    /// Location description.
    pub place: Option<String>,
    /// Origin time, epoch milliseconds.
    pub time: Option<i64>,
    /// Last revision time, epoch milliseconds.
    pub updated: Option<i64>,
    /// Review status.
    pub status: Option<String>,
    /// Detail document URL.
    pub detail: Option<String>,
    /// Public event page.
    pub url: Option<String>,
    /// Feed title.
    pub title: Option<String>,
    /// Products by kind (detail documents only).
    #[serde(default)]
    pub products: BTreeMap<String, Vec<ProductDocument>>,
}

/// GeoJSON point geometry: `[longitude, latitude, depth]`.
#[derive(Debug, Clone, Deserialize)]
pub struct PointGeometry {
    /// Coordinate triple.
    pub coordinates: Vec<f64>,
}

/// One product listed in a detail document.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductDocument {
    /// Product code.
    #[serde(default)]
    pub code: String,
    /// Contributing network.
    #[serde(default)]
    pub source: String,
    /// Product status.
    pub status: Option<String>,
    /// Product update time, epoch milliseconds.
    #[serde(rename = "updateTime")]
    pub update_time: Option<i64>,
    /// Downloadable contents by path.
    #[serde(default)]
    pub contents: BTreeMap<String, ContentDocument>,
}

/// One downloadable file of a product.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentDocument {
    /// Download URL.
    pub url: Option<String>,
}

/// Convert feed epoch milliseconds to a UTC timestamp.
pub fn millis_to_utc(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

impl FeedFeature {
    /// Materialize the event described by this feature.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Parse`] when a required property (magnitude,
    /// times, status, epicenter) is missing or out of range.
    pub fn to_event(&self, detail_url: &str) -> Result<Event, FeedError> {
        let what = || format!("event {}", self.id);
        let props = &self.properties;

        let magnitude = props
            .mag
            .ok_or_else(|| FeedError::parse(what(), "missing magnitude"))?;
        let time = props
            .time
            .and_then(millis_to_utc)
            .ok_or_else(|| FeedError::parse(what(), "missing or invalid origin time"))?;
        let updated = props
            .updated
            .and_then(millis_to_utc)
            .ok_or_else(|| FeedError::parse(what(), "missing or invalid updated time"))?;
        let status = props
            .status
            .clone()
            .ok_or_else(|| FeedError::parse(what(), "missing status"))?;
        let epicenter = self
            .epicenter()
            .ok_or_else(|| FeedError::parse(what(), "missing epicenter coordinates"))?;

        Ok(Event {
            id: EventId::new(self.id.clone()),
            magnitude,
            place: props.place.clone().unwrap_or_default(),
            title: props.title.clone(),
            time,
            updated,
            status,
            detail_url: props
                .detail
                .clone()
                .unwrap_or_else(|| detail_url.to_owned()),
            url: props.url.clone(),
            epicenter,
        })
    }

    /// Epicenter from the point geometry, if it has at least lon/lat.
    pub fn epicenter(&self) -> Option<Epicenter> {
        let coordinates = &self.geometry.as_ref()?.coordinates;
        Some(Epicenter {
            longitude: *coordinates.first()?,
            latitude: *coordinates.get(1)?,
            depth_km: coordinates.get(2).copied().unwrap_or(0.0),
        })
    }

    /// The first product of `kind`, if one is listed.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Parse`] when the product exists but does not
    /// offer a shapefile bundle.
    pub fn product(&self, kind: &str) -> Result<Option<ShakeMapProduct>, FeedError> {
        let Some(product) = self
            .properties
            .products
            .get(kind)
            .and_then(|listed| listed.first())
        else {
            return Ok(None);
        };

        let shape_zip_url = product
            .contents
            .get(SHAPE_ZIP_CONTENT)
            .and_then(|content| content.url.clone())
            .ok_or_else(|| {
                FeedError::parse(
                    format!("{kind} product of event {}", self.id),
                    format!("no {SHAPE_ZIP_CONTENT} content"),
                )
            })?;

        Ok(Some(ShakeMapProduct {
            kind: kind.to_owned(),
            code: product.code.clone(),
            source: product.source.clone(),
            status: product.status.clone(),
            update_time: product.update_time.and_then(millis_to_utc),
            shape_zip_url,
        }))
    }
}
