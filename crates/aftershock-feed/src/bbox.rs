//! Geographic region filter.

use serde::{Deserialize, Serialize};

/// Axis-aligned longitude/latitude box with inclusive edges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Northern latitude limit.
    pub north: f64,
    /// Southern latitude limit.
    pub south: f64,
    /// Western longitude limit.
    pub west: f64,
    /// Eastern longitude limit.
    pub east: f64,
}

impl BoundingBox {
    /// The contiguous United States.
    pub const CONTIGUOUS_US: Self = Self {
        north: 49.345_786_8,
        south: 24.743_319_5,
        west: -124.784_407_9,
        east: -66.951_381_2,
    };

    /// Whether the point lies inside the box or on its edge.
    pub fn contains(&self, longitude: f64, latitude: f64) -> bool {
        (self.south..=self.north).contains(&latitude) && (self.west..=self.east).contains(&longitude)
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::CONTIGUOUS_US
    }
}
