use std::time::Duration;

use thiserror::Error;

use super::models::Config;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("CORS wildcard origins are not allowed when DEV_MODE is false")]
    DangerousCorsWildcard,
    #[error("pipeline program must not be empty")]
    EmptyPipelineProgram,
    #[error("schedule window must be between 1s and 24h, got {window:?}")]
    InvalidScheduleWindow { window: Duration },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    if !config.dev_mode && config.cors.is_wildcard_included() {
        return Err(ConfigGuardRailError::DangerousCorsWildcard);
    }

    if config.pipeline.program.trim().is_empty() {
        return Err(ConfigGuardRailError::EmptyPipelineProgram);
    }

    let schedule = &config.schedule;
    if schedule.enabled
        && (schedule.daily.window.is_zero() || schedule.daily.window > DAY)
    {
        return Err(ConfigGuardRailError::InvalidScheduleWindow {
            window: schedule.daily.window,
        });
    }

    if schedule.enabled && schedule.poll_interval > schedule.daily.window {
        warnings.push_with_hint(
            format!(
                "Scheduler polls every {}s but the window is only {}s; the daily run may be missed",
                schedule.poll_interval.as_secs(),
                schedule.daily.window.as_secs()
            ),
            "Lower schedule.poll_interval or widen SCHEDULE_WINDOW",
        );
    }

    if config.refresh.cooldown.is_zero() {
        warnings.push(
            "REFRESH_COOLDOWN is zero; manual refreshes are only limited by single-flight",
        );
    }

    if config.refresh.adhoc_daily_limit == 0 {
        warnings.push_with_hint(
            "ADHOC_DAILY_LIMIT is zero; single-article summaries are disabled",
            "Set ADHOC_DAILY_LIMIT to a positive number to allow ad-hoc summaries",
        );
    }

    if !config.storage.summaries_dir.exists() {
        warnings.push_with_hint(
            format!(
                "Summaries directory {} does not exist yet; cooldowns start unrestricted",
                config.storage.summaries_dir.display()
            ),
            "Point SUMMARIES_DIR at the pipeline's output directory",
        );
    }

    if let Some(dir) = &config.storage.static_dir
        && !dir.is_dir()
    {
        warnings.push(format!(
            "STATIC_DIR {} is not a directory; static files will return 404",
            dir.display()
        ));
    }

    Ok(warnings)
}
