use std::time::Duration;

use anyhow::{Context, Result};

use crate::geo::DuplicateWindow;

/// Tunable decision thresholds. None of these are invariants; they are read
/// from the environment with the defaults below.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Policy {
    pub duplicate_window: DuplicateWindow,
    pub min_confidence: f64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            duplicate_window: DuplicateWindow::default(),
            min_confidence: 0.4,
        }
    }
}

impl Policy {
    /// Validated policy from raw settings.
    pub fn from_values(radius_m: f64, window_hours: i64, min_confidence: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&min_confidence) {
            anyhow::bail!("MIN_CONFIDENCE must be between 0 and 1, got {min_confidence}");
        }
        if !radius_m.is_finite() || radius_m <= 0.0 {
            anyhow::bail!("DEDUP_RADIUS_METERS must be a positive number, got {radius_m}");
        }
        if window_hours <= 0 {
            anyhow::bail!("DEDUP_WINDOW_HOURS must be positive, got {window_hours}");
        }
        let window = chrono::Duration::try_hours(window_hours)
            .with_context(|| format!("DEDUP_WINDOW_HOURS is out of range: {window_hours}"))?;

        Ok(Self {
            duplicate_window: DuplicateWindow { radius_m, window },
            min_confidence,
        })
    }
}

/// Delivery settings for outbound email and webhooks.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub smtp_host: Option<String>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: Option<String>,
    pub authority_email: Option<String>,
    pub feedback_webhook_url: Option<String>,
    pub contact_webhook_url: Option<String>,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// How long a request waits on delivery before handing it to the background.
    pub timeout: Duration,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_username: None,
            smtp_password: None,
            smtp_from: None,
            authority_email: None,
            feedback_webhook_url: None,
            contact_webhook_url: None,
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            timeout: Duration::from_secs(2),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Persistence
    pub database_url: Option<String>,
    pub image_dir: Option<String>,

    // External capabilities
    pub detector_url: String,
    pub geocoder_url: String,
    pub assessor_api_key: Option<String>,
    pub assessor_base_url: String,
    pub assessor_model: String,

    // Web server
    pub web_host: String,
    pub web_port: u16,
    pub submissions_per_hour: usize,

    pub policy: Policy,
    pub notify: NotifyConfig,
}

impl Config {
    /// Load configuration from environment variables (and `.env` when present).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Policy::default();
        let notify_defaults = NotifyConfig::default();

        let policy = Policy::from_values(
            parse_env("DEDUP_RADIUS_METERS", defaults.duplicate_window.radius_m)?,
            parse_env(
                "DEDUP_WINDOW_HOURS",
                defaults.duplicate_window.window.num_hours(),
            )?,
            parse_env("MIN_CONFIDENCE", defaults.min_confidence)?,
        )?;

        let config = Self {
            database_url: optional_env("DATABASE_URL"),
            image_dir: optional_env("IMAGE_DIR"),
            detector_url: std::env::var("DETECTOR_URL")
                .unwrap_or_else(|_| "http://localhost:5000/upload".to_string()),
            geocoder_url: std::env::var("GEOCODER_URL")
                .unwrap_or_else(|_| "https://nominatim.openstreetmap.org".to_string()),
            assessor_api_key: optional_env("ASSESSOR_API_KEY"),
            assessor_base_url: std::env::var("ASSESSOR_BASE_URL")
                .unwrap_or_else(|_| "https://models.github.ai/inference".to_string()),
            assessor_model: std::env::var("ASSESSOR_MODEL")
                .unwrap_or_else(|_| "openai/gpt-4.1".to_string()),
            web_host: std::env::var("WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            web_port: parse_env("WEB_PORT", 3000u16)?,
            submissions_per_hour: parse_env("SUBMISSIONS_PER_HOUR", 10usize)?,
            policy,
            notify: NotifyConfig {
                smtp_host: optional_env("SMTP_HOST"),
                smtp_username: optional_env("SMTP_USERNAME"),
                smtp_password: optional_env("SMTP_PASSWORD"),
                smtp_from: optional_env("SMTP_FROM"),
                authority_email: optional_env("AUTHORITY_EMAIL"),
                feedback_webhook_url: optional_env("FEEDBACK_WEBHOOK_URL"),
                contact_webhook_url: optional_env("CONTACT_WEBHOOK_URL"),
                max_attempts: parse_env("NOTIFY_MAX_ATTEMPTS", notify_defaults.max_attempts)?.max(1),
                base_delay: Duration::from_millis(parse_env(
                    "NOTIFY_BASE_DELAY_MS",
                    notify_defaults.base_delay.as_millis() as u64,
                )?),
                max_delay: Duration::from_millis(parse_env(
                    "NOTIFY_MAX_DELAY_MS",
                    notify_defaults.max_delay.as_millis() as u64,
                )?),
                timeout: Duration::from_millis(parse_env(
                    "NOTIFY_TIMEOUT_MS",
                    notify_defaults.timeout.as_millis() as u64,
                )?),
            },
        };

        config.log_keys();
        Ok(config)
    }

    fn log_keys(&self) {
        fn preview(val: &str) -> String {
            let head: String = val.chars().take(5).collect();
            format!("{head}...({} chars)", val.chars().count())
        }
        fn preview_opt(val: &Option<String>) -> String {
            match val {
                Some(v) if !v.is_empty() => preview(v),
                _ => "<not set>".to_string(),
            }
        }

        tracing::info!("Config loaded:");
        tracing::info!("  DATABASE_URL: {}", preview_opt(&self.database_url));
        tracing::info!("  DETECTOR_URL: {}", self.detector_url);
        tracing::info!("  GEOCODER_URL: {}", self.geocoder_url);
        tracing::info!("  ASSESSOR_API_KEY: {}", preview_opt(&self.assessor_api_key));
        tracing::info!("  SMTP_HOST: {}", self.notify.smtp_host.as_deref().unwrap_or("<not set>"));
        tracing::info!("  SMTP_PASSWORD: {}", preview_opt(&self.notify.smtp_password));
        tracing::info!(
            radius_m = self.policy.duplicate_window.radius_m,
            window_hours = self.policy.duplicate_window.window.num_hours(),
            min_confidence = self.policy.min_confidence,
            "  Dedup policy"
        );
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_defaults_match_documented_values() {
        let policy = Policy::default();
        assert_eq!(policy.duplicate_window.radius_m, 50.0);
        assert_eq!(policy.duplicate_window.window, chrono::Duration::days(7));
        assert_eq!(policy.min_confidence, 0.4);
    }

    #[test]
    fn policy_rejects_out_of_range_settings() {
        assert!(Policy::from_values(f64::NAN, 168, 0.4).is_err());
        assert!(Policy::from_values(f64::INFINITY, 168, 0.4).is_err());
        assert!(Policy::from_values(-1.0, 168, 0.4).is_err());
        assert!(Policy::from_values(50.0, 0, 0.4).is_err());
        assert!(Policy::from_values(50.0, i64::MAX, 0.4).is_err());
        assert!(Policy::from_values(50.0, 168, f64::NAN).is_err());
        assert!(Policy::from_values(50.0, 168, 1.5).is_err());
    }

    #[test]
    fn policy_from_defaults_round_trips() {
        let policy = Policy::from_values(50.0, 168, 0.4).unwrap();
        assert_eq!(policy, Policy::default());
    }

    #[test]
    fn parse_env_falls_back_to_default() {
        let v: u32 = parse_env("TOWNSENSE_TEST_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(v, 7);
    }
}
