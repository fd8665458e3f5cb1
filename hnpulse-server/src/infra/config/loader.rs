use std::{
    fs,
    path::PathBuf,
    time::Duration,
};

use hnpulse_core::{
    DailySchedule, RefreshPolicy, ScheduleTimezone, error::ScheduleParseError,
    schedule::parse_time_of_day,
};
use thiserror::Error;

use super::{
    models::{
        Config, ConfigMetadata, CorsConfig, ScheduleConfig, ServerConfig,
        StorageConfig, StreamConfig,
    },
    sources::{EnvConfig, FileConfig},
    validation::{self, ConfigGuardRailError, ConfigWarnings},
};
use crate::infra::refresh::PipelineCommand;

const DEFAULT_CONFIG_LOCATIONS: &[&str] =
    &["hnpulse.toml", "config/hnpulse.toml"];

#[derive(Debug, Default, Clone)]
struct ConfigLoaderOptions {
    config_path: Option<PathBuf>,
    env_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Loads `.env`, reads the process environment and the config file.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };

        self.load_with_env(EnvConfig::gather(), env_file_loaded)
    }

    /// Same as [`Self::load`] against an already gathered environment.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
        env_file_loaded: bool,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        let (config, warnings) =
            compose_config(file_config, env, config_path, env_file_loaded)?;
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env_config: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let mut source = ConfigPathSource::default();

        if let Some(explicit) = &self.options.config_path {
            source.explicit = Some(explicit.clone());
        } else if let Some(from_env) = &env_config.config_path {
            source.env = Some(from_env.clone());
        }

        if source.is_empty() {
            source.default = DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists());
        }

        let Some((path, provenance)) = source.resolved_path() else {
            return Ok((None, None));
        };

        if !path.exists() {
            if provenance.is_explicit() {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents =
            fs::read_to_string(&path).map_err(|err| ConfigLoadError::Io {
                path: path.clone(),
                source: err,
            })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
                path: path.clone(),
                source: err,
            })?;

        Ok((Some(file_config), Some(path)))
    }
}

fn compose_config(
    file_config: Option<FileConfig>,
    env: EnvConfig,
    config_path: Option<PathBuf>,
    env_file_loaded: bool,
) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
    let mut warnings = ConfigWarnings::default();

    if config_path.is_none() {
        warnings.push_with_hint(
            "No hnpulse.toml detected; using defaults and environment variables",
            "Create hnpulse.toml or set HNPULSE_CONFIG_PATH to pin settings",
        );
    }

    let FileConfig {
        server: file_server,
        refresh: file_refresh,
        schedule: file_schedule,
        pipeline: file_pipeline,
        storage: file_storage,
        stream: file_stream,
        cors: file_cors,
        dev_mode: file_dev_mode,
    } = file_config.unwrap_or_default();

    let server_defaults = ServerConfig::default();
    let server = ServerConfig {
        host: env
            .server_host
            .or(file_server.host)
            .unwrap_or(server_defaults.host),
        port: env
            .server_port
            .or(file_server.port)
            .unwrap_or(server_defaults.port),
    };

    let refresh_defaults = RefreshPolicy::default();
    let refresh = RefreshPolicy {
        cooldown: duration_setting(
            "REFRESH_COOLDOWN",
            env.refresh_cooldown.or(file_refresh.cooldown),
        )?
        .unwrap_or(refresh_defaults.cooldown),
        adhoc_daily_limit: env
            .adhoc_daily_limit
            .or(file_refresh.adhoc_daily_limit)
            .unwrap_or(refresh_defaults.adhoc_daily_limit),
    };

    let schedule_defaults = ScheduleConfig::default();
    let start = match env.schedule_time.or(file_schedule.time) {
        Some(raw) => parse_time_of_day(&raw)
            .map_err(|err| invalid("SCHEDULE_TIME", &raw, err))?,
        None => schedule_defaults.daily.start,
    };
    let timezone = match env.schedule_timezone.or(file_schedule.timezone) {
        Some(raw) => raw
            .parse::<ScheduleTimezone>()
            .map_err(|err: ScheduleParseError| {
                invalid("SCHEDULE_TIMEZONE", &raw, err)
            })?,
        None => schedule_defaults.daily.timezone,
    };
    let window = duration_setting(
        "SCHEDULE_WINDOW",
        env.schedule_window.or(file_schedule.window),
    )?
    .unwrap_or(schedule_defaults.daily.window);
    let schedule = ScheduleConfig {
        enabled: env
            .schedule_enabled
            .or(file_schedule.enabled)
            .unwrap_or(schedule_defaults.enabled),
        daily: DailySchedule::new(start, window, timezone),
        poll_interval: duration_setting(
            "schedule.poll_interval",
            file_schedule.poll_interval,
        )?
        .unwrap_or(schedule_defaults.poll_interval),
    };

    let pipeline_defaults = PipelineCommand::default();
    let timeout = match env.pipeline_timeout.or(file_pipeline.timeout) {
        Some(raw) if is_disabled(&raw) => None,
        Some(raw) => Some(parse_duration("PIPELINE_TIMEOUT", &raw)?),
        None => pipeline_defaults.timeout,
    };
    let pipeline = PipelineCommand {
        program: env
            .pipeline_program
            .or(file_pipeline.program)
            .unwrap_or(pipeline_defaults.program),
        args: env
            .pipeline_args
            .or(file_pipeline.args)
            .unwrap_or(pipeline_defaults.args),
        adhoc_args: file_pipeline
            .adhoc_args
            .unwrap_or(pipeline_defaults.adhoc_args),
        working_dir: env.pipeline_dir.or(file_pipeline.working_dir),
        timeout,
    };

    let storage_defaults = StorageConfig::default();
    let storage = StorageConfig {
        summaries_dir: env
            .summaries_dir
            .or(file_storage.summaries_dir)
            .unwrap_or(storage_defaults.summaries_dir),
        static_dir: env.static_dir.or(file_storage.static_dir),
    };

    let stream_defaults = StreamConfig::default();
    let stream = StreamConfig {
        heartbeat: duration_setting(
            "STREAM_HEARTBEAT",
            env.stream_heartbeat.or(file_stream.heartbeat),
        )?
        .unwrap_or(stream_defaults.heartbeat),
        replay: file_stream.replay.unwrap_or(stream_defaults.replay),
        history_capacity: file_stream
            .history_capacity
            .unwrap_or(stream_defaults.history_capacity),
        subscriber_capacity: file_stream
            .subscriber_capacity
            .unwrap_or(stream_defaults.subscriber_capacity),
    };

    let cors = CorsConfig {
        allowed_origins: env
            .cors_allowed_origins
            .or(file_cors.allowed_origins)
            .unwrap_or_else(|| CorsConfig::default().allowed_origins),
    };

    let config = Config {
        server,
        refresh,
        schedule,
        pipeline,
        storage,
        stream,
        cors,
        dev_mode: env.dev_mode.or(file_dev_mode).unwrap_or(false),
        metadata: ConfigMetadata {
            config_path,
            env_file_loaded,
        },
    };

    warnings.extend(validation::apply_guard_rails(&config)?);
    Ok((config, warnings))
}

fn duration_setting(
    key: &'static str,
    raw: Option<String>,
) -> Result<Option<Duration>, ConfigLoadError> {
    raw.map(|raw| parse_duration(key, &raw)).transpose()
}

fn parse_duration(
    key: &'static str,
    raw: &str,
) -> Result<Duration, ConfigLoadError> {
    humantime::parse_duration(raw.trim()).map_err(|err| invalid(key, raw, err))
}

fn is_disabled(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "off" | "none" | "0"
    )
}

fn invalid(
    key: &'static str,
    value: &str,
    reason: impl std::fmt::Display,
) -> ConfigLoadError {
    ConfigLoadError::InvalidValue {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    #[error("failed to load .env file")]
    EnvFile(#[from] dotenvy::Error),
}

#[derive(Debug, Default)]
struct ConfigPathSource {
    explicit: Option<PathBuf>,
    env: Option<PathBuf>,
    default: Option<PathBuf>,
}

impl ConfigPathSource {
    fn is_empty(&self) -> bool {
        self.explicit.is_none() && self.env.is_none() && self.default.is_none()
    }

    fn resolved_path(&self) -> Option<(PathBuf, ConfigPathProvenance)> {
        if let Some(path) = &self.explicit {
            return Some((path.clone(), ConfigPathProvenance::Explicit));
        }
        if let Some(path) = &self.env {
            return Some((path.clone(), ConfigPathProvenance::Env));
        }
        if let Some(path) = &self.default {
            return Some((path.clone(), ConfigPathProvenance::Default));
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigPathProvenance {
    Explicit,
    Env,
    Default,
}

impl ConfigPathProvenance {
    fn is_explicit(self) -> bool {
        matches!(
            self,
            ConfigPathProvenance::Explicit | ConfigPathProvenance::Env
        )
    }
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io::Write, path::Path};

    fn write_config(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("hnpulse.toml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn file_values_are_parsed_and_env_wins() {
        let dir = tempfile::tempdir().unwrap();
        let summaries = dir.path().display().to_string();
        let path = write_config(
            dir.path(),
            &format!(
                r#"
                [server]
                port = 9100

                [refresh]
                cooldown = "30m"
                adhoc_daily_limit = 3

                [schedule]
                time = "07:30"
                window = "10m"
                timezone = "+02:00"

                [pipeline]
                program = "python3"
                timeout = "off"

                [storage]
                summaries_dir = "{summaries}"
                "#
            ),
        );

        let env = EnvConfig {
            server_port: Some(9200),
            adhoc_daily_limit: Some(7),
            ..EnvConfig::default()
        };
        let load = ConfigLoader::new()
            .with_config_path(&path)
            .load_with_env(env, false)
            .unwrap();
        let config = load.config;

        assert_eq!(config.server.port, 9200);
        assert_eq!(config.refresh.cooldown, Duration::from_secs(30 * 60));
        assert_eq!(config.refresh.adhoc_daily_limit, 7);
        assert_eq!(config.schedule.daily.to_string(), "07:30 for 10m (+02:00)");
        assert_eq!(config.pipeline.program, "python3");
        assert_eq!(config.pipeline.timeout, None);
        assert_eq!(config.metadata.config_path.as_deref(), Some(path.as_path()));
        assert!(load.warnings.is_empty(), "{:?}", load.warnings.items);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigLoader::new()
            .with_config_path(dir.path().join("absent.toml"))
            .load_with_env(EnvConfig::default(), false)
            .unwrap_err();
        assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
    }

    #[test]
    fn bad_duration_names_the_setting() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "");
        let env = EnvConfig {
            refresh_cooldown: Some("an hour".into()),
            ..EnvConfig::default()
        };
        let err = ConfigLoader::new()
            .with_config_path(&path)
            .load_with_env(env, false)
            .unwrap_err();
        match err {
            ConfigLoadError::InvalidValue { key, value, .. } => {
                assert_eq!(key, "REFRESH_COOLDOWN");
                assert_eq!(value, "an hour");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn malformed_toml_is_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "[server\nport = ");
        let err = ConfigLoader::new()
            .with_config_path(&path)
            .load_with_env(EnvConfig::default(), false)
            .unwrap_err();
        assert!(matches!(err, ConfigLoadError::Parse { .. }));
    }

    #[test]
    fn missing_env_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "[server]\nport = 9300\n");

        let load = ConfigLoader::new()
            .with_config_path(&path)
            .with_env_file(dir.path().join("absent.env"))
            .load()
            .unwrap();

        assert!(!load.config.metadata.env_file_loaded);
        assert_eq!(
            load.config.metadata.config_path.as_deref(),
            Some(path.as_path())
        );
    }
}
