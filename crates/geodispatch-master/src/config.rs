use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub network: NetworkConfig,
    pub session: SessionConfig,
    pub checkpoint: CheckpointConfig,
    pub data: DataConfig,
    pub shutdown: ShutdownConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    /// Optional cap on concurrent sessions; connections over it are closed at
    /// once. Unset admits every connection.
    pub max_sessions: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub response_timeout_secs: u64,
    pub send_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub every_completions: usize,
    /// Periodic flush interval; 0 disables it
    pub interval_secs: u64,
    pub checkpoint_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Carry coordinates over from an existing output file
    pub seed_from_output: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub grace_secs: u64,
    pub exit_when_drained: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub status_port: Option<u16>,
    pub log_level: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            host: "0.0.0.0".to_string(),
            port: 3327,
            max_sessions: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            response_timeout_secs: 60,
            send_timeout_secs: 10,
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        CheckpointConfig {
            every_completions: 1000,
            interval_secs: 30,
            checkpoint_path: PathBuf::from("progress.txt"),
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            input_path: PathBuf::from("base.csv"),
            output_path: PathBuf::from("enderecos_atualizados.csv"),
            seed_from_output: true,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        ShutdownConfig {
            grace_secs: 10,
            exit_when_drained: true,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        MonitoringConfig {
            status_port: Some(9091),
            log_level: "info".to_string(),
        }
    }
}

impl MasterConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: MasterConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.network.host, self.network.port)
    }
}

impl SessionConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}
