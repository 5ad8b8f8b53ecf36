//! Load configuration via `config` crate with env-override support.

use std::{ops::Deref, sync::Arc, time::Duration};

use config::{ConfigBuilder, builder::DefaultState};
use serde::Deserialize;

use crate::base::{error::DiagnosisError, prompts};

/// Default Lex locale.
fn default_lex_locale_id() -> String {
    "en_US".to_string()
}

/// Default object key prefix for uploads.
fn default_upload_prefix() -> String {
    "uploads".to_string()
}

/// Default per-attempt storage timeout, in seconds.
fn default_storage_timeout_secs() -> u64 {
    30
}

/// Default per-attempt bot timeout, in seconds.
fn default_bot_timeout_secs() -> u64 {
    30
}

/// Default number of extra attempts for idempotent calls.
fn default_max_retries() -> u32 {
    3
}

/// Default backoff base delay, in milliseconds.
fn default_retry_base_delay_ms() -> u64 {
    500
}

/// Default turn budget for one classification.
fn default_bot_max_turns() -> u32 {
    3
}

/// Default intents that count as a diagnosis.
fn default_diagnosis_intents() -> String {
    "AnalyzeImage,DiagnosePlant".to_string()
}

/// Default first-turn utterance.
fn default_diagnosis_utterance() -> String {
    prompts::DIAGNOSIS_UTTERANCE.to_string()
}

/// Default field location.
fn default_location() -> String {
    "uppsala".to_string()
}

/// Default weather API base URL (SMHI point forecast).
fn default_weather_endpoint() -> String {
    "https://opendata-download-metfcst.smhi.se/api/category/pmp3g/version/2/geotype/point".to_string()
}

/// Default weather request timeout, in seconds.
fn default_weather_timeout_secs() -> u64 {
    10
}

/// Configuration for the potato-health application.
///
/// Loaded once at startup and handed to every component at construction.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub inner: Arc<ConfigInner>,
}

impl Deref for Config {
    type Target = ConfigInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConfigInner {
    /// Region for the S3 and Lex endpoints (`AWS_REGION`).
    pub aws_region: String,
    /// Bucket that receives every image submission (`S3_BUCKET_NAME`).
    pub s3_bucket_name: String,
    /// Lex V2 bot id (`LEX_BOT_ID`).
    pub lex_bot_id: String,
    /// Lex V2 bot alias id (`LEX_BOT_ALIAS_ID`).
    pub lex_bot_alias_id: String,
    /// Bot locale (`LEX_LOCALE_ID`).
    #[serde(default = "default_lex_locale_id")]
    pub lex_locale_id: String,
    /// Object key prefix for uploads (`UPLOAD_PREFIX`).
    #[serde(default = "default_upload_prefix")]
    pub upload_prefix: String,
    /// Per-attempt storage timeout in seconds (`STORAGE_TIMEOUT_SECS`).
    #[serde(default = "default_storage_timeout_secs")]
    pub storage_timeout_secs: u64,
    /// Per-attempt bot timeout in seconds (`BOT_TIMEOUT_SECS`).
    #[serde(default = "default_bot_timeout_secs")]
    pub bot_timeout_secs: u64,
    /// Extra attempts for idempotent calls (`MAX_RETRIES`).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff base delay in milliseconds (`RETRY_BASE_DELAY_MS`).
    /// Attempt `n` waits `base * 2^(n-1)`.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Turn budget for one classification (`BOT_MAX_TURNS`).
    #[serde(default = "default_bot_max_turns")]
    pub bot_max_turns: u32,
    /// Comma separated intents that count as a diagnosis (`DIAGNOSIS_INTENTS`).
    #[serde(default = "default_diagnosis_intents")]
    pub diagnosis_intents: String,
    /// First-turn utterance template (`DIAGNOSIS_UTTERANCE`).
    #[serde(default = "default_diagnosis_utterance")]
    pub diagnosis_utterance: String,
    /// Location used when a submission has none (`DEFAULT_LOCATION`).
    #[serde(default = "default_location")]
    pub default_location: String,
    /// Weather API base URL (`WEATHER_ENDPOINT`).
    #[serde(default = "default_weather_endpoint")]
    pub weather_endpoint: String,
    /// Weather request timeout in seconds (`WEATHER_TIMEOUT_SECS`).
    #[serde(default = "default_weather_timeout_secs")]
    pub weather_timeout_secs: u64,
}

impl Default for ConfigInner {
    fn default() -> Self {
        Self {
            aws_region: String::new(),
            s3_bucket_name: String::new(),
            lex_bot_id: String::new(),
            lex_bot_alias_id: String::new(),
            lex_locale_id: default_lex_locale_id(),
            upload_prefix: default_upload_prefix(),
            storage_timeout_secs: default_storage_timeout_secs(),
            bot_timeout_secs: default_bot_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            bot_max_turns: default_bot_max_turns(),
            diagnosis_intents: default_diagnosis_intents(),
            diagnosis_utterance: default_diagnosis_utterance(),
            default_location: default_location(),
            weather_endpoint: default_weather_endpoint(),
            weather_timeout_secs: default_weather_timeout_secs(),
        }
    }
}

impl Config {
    /// Load the configuration from the process environment, optionally layered over a TOML file.
    ///
    /// Environment values win over the file.
    pub fn load(explicit_path: Option<&std::path::Path>) -> Result<Self, DiagnosisError> {
        let mut cfg = config::Config::builder();

        if let Some(p) = explicit_path {
            cfg = cfg.add_source(config::File::from(p.to_path_buf()));
        } else if std::path::Path::new(".hidden/config.toml").exists() {
            cfg = cfg.add_source(config::File::with_name(".hidden/config.toml"));
        }

        cfg = cfg.add_source(config::Environment::default());

        Self::from_builder(cfg)
    }

    /// Build and validate a configuration from prepared sources.
    pub fn from_builder(cfg: ConfigBuilder<DefaultState>) -> Result<Self, DiagnosisError> {
        let inner: ConfigInner = cfg.build()?.try_deserialize()?;
        let result = Config { inner: Arc::new(inner) };

        result.validate()?;

        Ok(result)
    }

    /// Check that every required value is present and well formed.
    pub fn validate(&self) -> Result<(), DiagnosisError> {
        if !is_valid_region(&self.aws_region) {
            return Err(DiagnosisError::configuration(format!("AWS_REGION `{}` is not a valid region name.", self.aws_region)));
        }

        if !is_valid_bucket_name(&self.s3_bucket_name) {
            return Err(DiagnosisError::configuration(format!("S3_BUCKET_NAME `{}` is not a valid bucket name.", self.s3_bucket_name)));
        }

        if !is_valid_lex_id(&self.lex_bot_id) {
            return Err(DiagnosisError::configuration(format!("LEX_BOT_ID `{}` must be 10 alphanumeric characters.", self.lex_bot_id)));
        }

        if !is_valid_lex_id(&self.lex_bot_alias_id) {
            return Err(DiagnosisError::configuration(format!(
                "LEX_BOT_ALIAS_ID `{}` must be 10 alphanumeric characters.",
                self.lex_bot_alias_id
            )));
        }

        if self.storage_timeout_secs == 0 || self.bot_timeout_secs == 0 || self.weather_timeout_secs == 0 {
            return Err(DiagnosisError::configuration("Timeouts must be greater than zero."));
        }

        if self.max_retries > 10 {
            return Err(DiagnosisError::configuration("MAX_RETRIES must be between 0 and 10."));
        }

        if self.bot_max_turns < 1 {
            return Err(DiagnosisError::configuration("BOT_MAX_TURNS must be at least 1."));
        }

        if self.diagnosis_intents().is_empty() {
            return Err(DiagnosisError::configuration("DIAGNOSIS_INTENTS must name at least one intent."));
        }

        Ok(())
    }

    /// The intents that count as a diagnosis.
    pub fn diagnosis_intents(&self) -> Vec<&str> {
        self.diagnosis_intents.split(',').map(str::trim).filter(|s| !s.is_empty()).collect()
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_timeout_secs)
    }

    pub fn bot_timeout(&self) -> Duration {
        Duration::from_secs(self.bot_timeout_secs)
    }

    pub fn weather_timeout(&self) -> Duration {
        Duration::from_secs(self.weather_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

/// Region names look like `eu-north-1`.
fn is_valid_region(region: &str) -> bool {
    let parts: Vec<&str> = region.split('-').collect();

    parts.len() >= 3
        && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()))
        && parts.last().is_some_and(|p| p.chars().all(|c| c.is_ascii_digit()))
}

/// Bucket names follow the S3 general purpose naming rules.
fn is_valid_bucket_name(bucket: &str) -> bool {
    let bytes = bucket.as_bytes();

    (3..=63).contains(&bytes.len())
        && bytes.iter().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'.' || *b == b'-')
        && bytes.first().is_some_and(|b| b.is_ascii_alphanumeric())
        && bytes.last().is_some_and(|b| b.is_ascii_alphanumeric())
        && !bucket.contains("..")
}

/// Lex V2 bot and alias ids are 10 alphanumerics (e.g. `TSTALIASID`).
fn is_valid_lex_id(id: &str) -> bool {
    id.len() == 10 && id.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::error::ErrorKind;

    fn builder() -> ConfigBuilder<DefaultState> {
        config::Config::builder()
            .set_override("aws_region", "eu-north-1")
            .unwrap()
            .set_override("s3_bucket_name", "potato-health-images")
            .unwrap()
            .set_override("lex_bot_id", "ABCDE12345")
            .unwrap()
            .set_override("lex_bot_alias_id", "TSTALIASID")
            .unwrap()
    }

    #[test]
    fn test_load_with_required_values_applies_defaults() {
        let config = Config::from_builder(builder()).unwrap();

        assert_eq!(config.aws_region, "eu-north-1");
        assert_eq!(config.lex_locale_id, "en_US");
        assert_eq!(config.upload_prefix, "uploads");
        assert_eq!(config.bot_timeout(), Duration::from_secs(30));
        assert_eq!(config.diagnosis_intents(), vec!["AnalyzeImage", "DiagnosePlant"]);
    }

    #[test]
    fn test_missing_bot_id_is_a_configuration_error() {
        let cfg = config::Config::builder()
            .set_override("aws_region", "eu-north-1")
            .unwrap()
            .set_override("s3_bucket_name", "potato-health-images")
            .unwrap()
            .set_override("lex_bot_alias_id", "TSTALIASID")
            .unwrap();

        let err = Config::from_builder(cfg).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("lex_bot_id"));
    }

    #[test]
    fn test_malformed_values_are_rejected() {
        let err = Config::from_builder(builder().set_override("aws_region", "Stockholm").unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = Config::from_builder(builder().set_override("s3_bucket_name", "Bad_Bucket").unwrap()).unwrap_err();
        assert!(err.to_string().contains("S3_BUCKET_NAME"));

        let err = Config::from_builder(builder().set_override("lex_bot_alias_id", "short").unwrap()).unwrap_err();
        assert!(err.to_string().contains("LEX_BOT_ALIAS_ID"));

        let err = Config::from_builder(builder().set_override("bot_timeout_secs", 0).unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_numeric_overrides_from_strings() {
        let config = Config::from_builder(builder().set_override("max_retries", "5").unwrap().set_override("diagnosis_intents", " Foo , ,Bar").unwrap()).unwrap();

        assert_eq!(config.max_retries, 5);
        assert_eq!(config.diagnosis_intents(), vec!["Foo", "Bar"]);
    }

    #[test]
    fn test_name_validators() {
        assert!(is_valid_region("us-east-1"));
        assert!(is_valid_region("us-gov-west-1"));
        assert!(!is_valid_region("eu-north"));
        assert!(!is_valid_region(""));

        assert!(is_valid_bucket_name("my.bucket-01"));
        assert!(!is_valid_bucket_name("ab"));
        assert!(!is_valid_bucket_name("-bucket"));
        assert!(!is_valid_bucket_name("a..b"));

        assert!(is_valid_lex_id("TSTALIASID"));
        assert!(!is_valid_lex_id("TSTALIAS-D"));
    }
}
