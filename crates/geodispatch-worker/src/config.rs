use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub master_address: String,
    /// CSV table of `endereco,latitude,longitude`; without it every address
    /// is answered as not found
    pub lookup_path: Option<PathBuf>,
    pub connect_retries: u32,
    pub retry_delay_ms: u64,
    /// Upper bound on one geocoder call
    pub geocode_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            master_address: "127.0.0.1:3327".to_string(),
            lookup_path: None,
            connect_retries: 5,
            retry_delay_ms: 1000,
            geocode_timeout_secs: 30,
        }
    }
}

impl WorkerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: WorkerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn geocode_timeout(&self) -> Duration {
        Duration::from_secs(self.geocode_timeout_secs)
    }
}
