use crate::{format_address, AddressRow, CoreError, Result};
use serde::{Deserialize, Serialize};

/// Position of a row in the source dataset
pub type RowIndex = usize;

/// One unit of dispatchable work: a single address to geocode.
///
/// Items are built once from the dataset and never mutated; requeueing hands
/// the same value back to the queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItem {
    /// Row position in the source dataset
    pub index: RowIndex,

    /// Formatted address sent to the worker
    pub payload: String,

    /// Municipality the address belongs to
    pub context: String,
}

impl WorkItem {
    pub fn new(index: RowIndex, payload: impl Into<String>, context: impl Into<String>) -> Self {
        WorkItem {
            index,
            payload: payload.into(),
            context: context.into(),
        }
    }

    /// Build the item for a dataset row
    pub fn from_row(index: RowIndex, row: &AddressRow) -> Self {
        let (payload, context) = format_address(row);
        WorkItem { index, payload, context }
    }
}

/// A validated latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    latitude: f64,
    longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(CoreError::NonFiniteCoordinate);
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(CoreError::LatitudeOutOfRange(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(CoreError::LongitudeOutOfRange(longitude));
        }

        Ok(Coordinates { latitude, longitude })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// Output fields computed for one row.
///
/// `coordinates` is `None` when the worker answered but could not geocode the
/// address.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub index: RowIndex,
    pub coordinates: Option<Coordinates>,
}

impl ResultRecord {
    pub fn new(index: RowIndex, coordinates: Option<Coordinates>) -> Self {
        ResultRecord { index, coordinates }
    }

    pub fn latitude(&self) -> Option<f64> {
        self.coordinates.map(|c| c.latitude())
    }

    pub fn longitude(&self) -> Option<f64> {
        self.coordinates.map(|c| c.longitude())
    }
}
