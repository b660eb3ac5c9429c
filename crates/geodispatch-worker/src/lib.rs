pub mod config;
pub mod executor;
pub mod handler;
pub mod worker;

pub use config::WorkerConfig;
pub use executor::GeocodeExecutor;
pub use handler::{Geocoder, LookupGeocoder, NullGeocoder};
pub use worker::Worker;
