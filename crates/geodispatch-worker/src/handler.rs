use async_trait::async_trait;
use geodispatch_core::Coordinates;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Result of one geocoder call: `Ok(None)` means the address is unknown,
/// `Err` means the geocoder itself failed
pub type GeocodeResult = Result<Option<Coordinates>, String>;

/// Resolves an address to coordinates
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, address: &str, municipality: &str) -> GeocodeResult;
}

/// Answers every address as not found
pub struct NullGeocoder;

#[async_trait]
impl Geocoder for NullGeocoder {
    async fn geocode(&self, _address: &str, _municipality: &str) -> GeocodeResult {
        Ok(None)
    }
}

#[derive(Debug, Deserialize)]
struct LookupRow {
    endereco: String,
    latitude: f64,
    longitude: f64,
}

/// Geocoder backed by a precomputed address table
pub struct LookupGeocoder {
    table: HashMap<String, Coordinates>,
}

impl LookupGeocoder {
    pub fn new(table: HashMap<String, Coordinates>) -> Self {
        LookupGeocoder { table }
    }

    /// Load a CSV with `endereco,latitude,longitude` columns.
    ///
    /// Rows with out-of-range coordinates are skipped.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut table = HashMap::new();

        for row in reader.deserialize() {
            let row: LookupRow = row?;
            match Coordinates::new(row.latitude, row.longitude) {
                Ok(coordinates) => {
                    table.insert(row.endereco.trim().to_string(), coordinates);
                }
                Err(e) => warn!("Skipping lookup row {:?}: {}", row.endereco, e),
            }
        }

        Ok(LookupGeocoder { table })
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[async_trait]
impl Geocoder for LookupGeocoder {
    async fn geocode(&self, address: &str, _municipality: &str) -> GeocodeResult {
        Ok(self.table.get(address.trim()).copied())
    }
}

/// Wraps a geocoder with a fixed delay, to simulate a slow backend
pub struct DelayGeocoder<G> {
    inner: G,
    delay: Duration,
}

impl<G> DelayGeocoder<G> {
    pub fn new(inner: G, delay: Duration) -> Self {
        DelayGeocoder { inner, delay }
    }
}

#[async_trait]
impl<G: Geocoder> Geocoder for DelayGeocoder<G> {
    async fn geocode(&self, address: &str, municipality: &str) -> GeocodeResult {
        tokio::time::sleep(self.delay).await;
        self.inner.geocode(address, municipality).await
    }
}
