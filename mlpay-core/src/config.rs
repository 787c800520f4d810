use std::env;
use std::time::Duration;

use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// The small, fixed set of nightly-pipeline toggles this engine exposes — no
/// free-form config strings evaluated at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NightlyPipelineSchedule {
    pub pipeline_enabled: bool,
    pub hour_local: u32,
    pub minute_local: u32,
    /// Subset of 0..6 (Sunday = 0) on which the legacy CSV export runs.
    pub legacy_export_weekdays: Vec<u32>,
    pub lookback_days: i64,
}

impl Default for NightlyPipelineSchedule {
    fn default() -> Self {
        Self { pipeline_enabled: false, hour_local: 2, minute_local: 30, legacy_export_weekdays: vec![1, 2, 3, 4, 5], lookback_days: 3 }
    }
}

/// Operator-surface configuration loaded from the process environment:
/// OAuth client credentials, API base URLs, the rate-limit interval, the
/// default sync lookback window, and the nightly-pipeline schedule.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub ml_client_id: String,
    pub ml_client_secret: String,
    pub ml_base_url: String,
    pub ca_client_id: String,
    pub ca_client_secret: String,
    pub ca_base_url: String,
    pub release_report_download_timeout: Duration,
    pub backfill_enabled: bool,
    pub nightly_pipeline: NightlyPipelineSchedule,
}

fn env_var(name: &'static str) -> ConfigResult<String> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn env_var_or(name: &'static str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_flag(name: &'static str, default: bool) -> ConfigResult<bool> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(value) => match value.to_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(ConfigError::Invalid { name, value }),
        },
    }
}

fn env_int(name: &'static str, default: i64) -> ConfigResult<i64> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(value) => value.parse().map_err(|_| ConfigError::Invalid { name, value }),
    }
}

impl RuntimeConfig {
    /// Loads `.env` (if present, via `dotenvy`) then reads the process
    /// environment. A missing `.env` file is not an error — production
    /// deployments set these directly in the environment.
    pub fn from_env() -> ConfigResult<Self> {
        let _ = dotenvy::dotenv();

        let lookback_days = env_int("MLPAY_SYNC_LOOKBACK_DAYS", 3)?;
        let nightly_pipeline = NightlyPipelineSchedule {
            pipeline_enabled: env_flag("MLPAY_NIGHTLY_PIPELINE_ENABLED", false)?,
            hour_local: u32::try_from(env_int("MLPAY_NIGHTLY_HOUR_LOCAL", 2)?).unwrap_or(2),
            minute_local: u32::try_from(env_int("MLPAY_NIGHTLY_MINUTE_LOCAL", 30)?).unwrap_or(30),
            legacy_export_weekdays: vec![1, 2, 3, 4, 5],
            lookback_days,
        };

        Ok(Self {
            ml_client_id: env_var("MLPAY_ML_CLIENT_ID")?,
            ml_client_secret: env_var("MLPAY_ML_CLIENT_SECRET")?,
            ml_base_url: env_var_or("MLPAY_ML_BASE_URL", "https://api.mercadolibre.com"),
            ca_client_id: env_var("MLPAY_CA_CLIENT_ID")?,
            ca_client_secret: env_var("MLPAY_CA_CLIENT_SECRET")?,
            ca_base_url: env_var_or("MLPAY_CA_BASE_URL", "https://api.contaazul.com"),
            release_report_download_timeout: Duration::from_secs(u64::try_from(env_int("MLPAY_RELEASE_REPORT_TIMEOUT_SECONDS", 300)?).unwrap_or(300)),
            backfill_enabled: env_flag("MLPAY_BACKFILL_ENABLED", true)?,
            nightly_pipeline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_flag_parses_common_boolean_spellings() {
        // SAFETY-irrelevant: single-threaded test, no concurrent env access.
        unsafe {
            env::set_var("MLPAY_TEST_FLAG", "yes");
        }
        assert!(env_flag("MLPAY_TEST_FLAG", false).expect("flag parses"));
        unsafe {
            env::set_var("MLPAY_TEST_FLAG", "0");
        }
        assert!(!env_flag("MLPAY_TEST_FLAG", true).expect("flag parses"));
        unsafe {
            env::remove_var("MLPAY_TEST_FLAG");
        }
    }

    #[test]
    fn env_flag_rejects_unknown_spelling() {
        unsafe {
            env::set_var("MLPAY_TEST_FLAG_INVALID", "maybe");
        }
        assert!(env_flag("MLPAY_TEST_FLAG_INVALID", false).is_err());
        unsafe {
            env::remove_var("MLPAY_TEST_FLAG_INVALID");
        }
    }

    #[test]
    fn default_nightly_schedule_runs_on_weekdays() {
        let schedule = NightlyPipelineSchedule::default();
        assert_eq!(schedule.legacy_export_weekdays, vec![1, 2, 3, 4, 5]);
        assert!(!schedule.pipeline_enabled);
    }
}
