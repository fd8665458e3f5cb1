use std::{path::PathBuf, time::Duration};

use hnpulse_core::{DailySchedule, RefreshPolicy};

use crate::infra::refresh::{
    PipelineCommand,
    event_hub::{
        DEFAULT_HISTORY_CAPACITY, DEFAULT_REPLAY_WINDOW,
        DEFAULT_SUBSCRIBER_CAPACITY,
    },
    scheduler::DEFAULT_POLL_INTERVAL,
};

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub refresh: RefreshPolicy,
    pub schedule: ScheduleConfig,
    pub pipeline: PipelineCommand,
    pub storage: StorageConfig,
    pub stream: StreamConfig,
    pub cors: CorsConfig,
    pub dev_mode: bool,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub daily: DailySchedule,
    pub poll_interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            daily: DailySchedule::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Where the pipeline writes `YYYY-MM-DD_summary.json` and `adhoc/`.
    pub summaries_dir: PathBuf,
    /// Front-end bundle served as the router fallback.
    pub static_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            summaries_dir: PathBuf::from("./summaries"),
            static_dir: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub heartbeat: Duration,
    pub replay: usize,
    pub history_capacity: usize,
    pub subscriber_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(15),
            replay: DEFAULT_REPLAY_WINDOW,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl CorsConfig {
    pub fn is_wildcard_included(&self) -> bool {
        self.allowed_origins.iter().any(|origin| origin.trim() == "*")
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
