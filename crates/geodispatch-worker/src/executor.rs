use crate::handler::{GeocodeResult, Geocoder};
use geodispatch_protocol::GeocodeRequest;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error};

/// Runs geocoder calls with a timeout and panic recovery
pub struct GeocodeExecutor {
    geocoder: Arc<dyn Geocoder>,
    timeout: Duration,
}

impl GeocodeExecutor {
    pub fn new(geocoder: Arc<dyn Geocoder>, timeout: Duration) -> Self {
        GeocodeExecutor { geocoder, timeout }
    }

    /// Geocode one request.
    ///
    /// The call runs on its own task so a panicking geocoder surfaces as an
    /// error instead of taking the worker down.
    pub async fn execute(&self, request: &GeocodeRequest) -> GeocodeResult {
        let geocoder = self.geocoder.clone();
        let address = request.endereco.clone();
        let municipality = request.municipio.clone();
        let limit = self.timeout;

        let call = tokio::spawn(async move {
            timeout(limit, geocoder.geocode(&address, &municipality)).await
        });

        match call.await {
            Ok(Ok(Ok(coordinates))) => {
                debug!("Geocoded {:?}: {:?}", request.endereco, coordinates);
                Ok(coordinates)
            }
            Ok(Ok(Err(e))) => {
                error!("Geocoder failed for {:?}: {}", request.endereco, e);
                Err(e)
            }
            Ok(Err(_)) => {
                error!("Geocoder timed out after {:?} for {:?}", limit, request.endereco);
                Err(format!("Geocoding timed out after {:?}", limit))
            }
            Err(e) if e.is_panic() => {
                error!("Geocoder panicked for {:?}", request.endereco);
                Err("Geocoder panicked".to_string())
            }
            Err(_) => Err("Geocoder task was cancelled".to_string()),
        }
    }
}
