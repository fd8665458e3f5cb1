use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as defined in a TOML file.
///
/// Durations are humantime strings (`"1h"`, `"90s"`); they are parsed by the
/// loader so file and environment values share one parser.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub refresh: FileRefreshConfig,
    #[serde(default)]
    pub schedule: FileScheduleConfig,
    #[serde(default)]
    pub pipeline: FilePipelineConfig,
    #[serde(default)]
    pub storage: FileStorageConfig,
    #[serde(default)]
    pub stream: FileStreamConfig,
    #[serde(default)]
    pub cors: FileCorsConfig,
    pub dev_mode: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileRefreshConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adhoc_daily_limit: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileScheduleConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// `HH:MM`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FilePipelineConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adhoc_args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// `"off"` disables the timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileStorageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summaries_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileStreamConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscriber_capacity: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCorsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_origins: Option<Vec<String>>,
}

/// Values read from the process environment.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub refresh_cooldown: Option<String>,
    pub adhoc_daily_limit: Option<u32>,
    pub schedule_enabled: Option<bool>,
    pub schedule_time: Option<String>,
    pub schedule_window: Option<String>,
    pub schedule_timezone: Option<String>,
    pub pipeline_program: Option<String>,
    pub pipeline_args: Option<Vec<String>>,
    pub pipeline_dir: Option<PathBuf>,
    pub pipeline_timeout: Option<String>,
    pub summaries_dir: Option<PathBuf>,
    pub static_dir: Option<PathBuf>,
    pub stream_heartbeat: Option<String>,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub dev_mode: Option<bool>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        let mut env_config = Self::default();

        env_config.config_path =
            std::env::var("HNPULSE_CONFIG_PATH").ok().map(PathBuf::from);
        env_config.server_host = std::env::var("SERVER_HOST").ok();
        env_config.server_port = std::env::var("SERVER_PORT")
            .ok()
            .and_then(|s| s.parse().ok());

        env_config.refresh_cooldown = non_empty_var("REFRESH_COOLDOWN");
        env_config.adhoc_daily_limit = std::env::var("ADHOC_DAILY_LIMIT")
            .ok()
            .and_then(|s| s.trim().parse().ok());

        env_config.schedule_enabled = parse_bool_var("SCHEDULE_ENABLED");
        env_config.schedule_time = non_empty_var("SCHEDULE_TIME");
        env_config.schedule_window = non_empty_var("SCHEDULE_WINDOW");
        env_config.schedule_timezone = non_empty_var("SCHEDULE_TIMEZONE");

        env_config.pipeline_program = non_empty_var("PIPELINE_PROGRAM");
        // Whitespace separated; quoting is not supported.
        env_config.pipeline_args = std::env::var("PIPELINE_ARGS")
            .ok()
            .map(|raw| raw.split_whitespace().map(str::to_string).collect());
        env_config.pipeline_dir =
            std::env::var("PIPELINE_DIR").ok().map(PathBuf::from);
        env_config.pipeline_timeout = non_empty_var("PIPELINE_TIMEOUT");

        env_config.summaries_dir =
            std::env::var("SUMMARIES_DIR").ok().map(PathBuf::from);
        env_config.static_dir =
            std::env::var("STATIC_DIR").ok().map(PathBuf::from);
        env_config.stream_heartbeat = non_empty_var("STREAM_HEARTBEAT");

        env_config.cors_allowed_origins = parse_csv_var("CORS_ALLOWED_ORIGINS");
        env_config.dev_mode = parse_bool_var("DEV_MODE");

        env_config
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn parse_csv_var(name: &str) -> Option<Vec<String>> {
    std::env::var(name).ok().map(|raw| {
        raw.split(',')
            .filter_map(|part| {
                let trimmed = part.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            })
            .collect()
    })
}

fn parse_bool_var(name: &str) -> Option<bool> {
    std::env::var(name).ok().and_then(|raw| {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    })
}
