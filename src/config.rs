use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::alert::{
    AlertChannel, AlertDispatcher, AlertPoolConfig, ChannelKind, EmailChannel, EmailSettings,
    LogChannel, SmsChannel, SmsSettings, DEFAULT_SMS_API_URL,
};
use crate::ingest::IngestSettings;
use crate::trigger::TriggerPolicy;
use crate::{SourceId, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_STREAK_THRESHOLD, DEFAULT_TOP_K};

const DEFAULT_TARGET_FPS: u32 = 10;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_ALERT_WORKERS: usize = 2;
const DEFAULT_ALERT_QUEUE: usize = 4;
const DEFAULT_ALERT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_ATTEMPTS: u32 = 1;
const DEFAULT_STATUS_CLEAR_MS: u64 = 500;
const DEFAULT_EMAIL_API_URL: &str = "https://api.sendgrid.com/v3/mail/send";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RhinoConfigFile {
    source: Option<String>,
    ingest: Option<IngestConfigFile>,
    detection: Option<DetectionConfigFile>,
    alerts: Option<AlertsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct IngestConfigFile {
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionConfigFile {
    confidence_threshold: Option<f32>,
    streak_threshold: Option<u32>,
    top_k: Option<usize>,
    model_path: Option<PathBuf>,
    label_map_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AlertsConfigFile {
    workers: Option<usize>,
    queue_capacity: Option<usize>,
    timeout_secs: Option<u64>,
    max_attempts: Option<u32>,
    status_clear_ms: Option<u64>,
    email: Option<EmailConfigFile>,
    sms: Option<SmsConfigFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EmailConfigFile {
    api_url: Option<String>,
    api_key: Option<String>,
    from: String,
    to: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SmsConfigFile {
    api_url: Option<String>,
    account_sid: String,
    auth_token: Option<String>,
    from: String,
    to: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RhinoConfig {
    /// Source to start on; the daemon can still be given one on the command line.
    pub source: Option<SourceId>,
    pub ingest: IngestSettings,
    pub detection: DetectionSettings,
    pub alerts: AlertSettings,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub policy: TriggerPolicy,
    pub model_path: Option<PathBuf>,
    pub label_map_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    /// Per-request HTTP timeout for both channels.
    pub timeout: Duration,
    pub max_attempts: u32,
    pub status_clear_delay: Duration,
    /// `None` sends email alerts to the log instead.
    pub email: Option<EmailSettings>,
    /// `None` sends SMS alerts to the log instead.
    pub sms: Option<SmsSettings>,
}

impl RhinoConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("RHINO_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RhinoConfigFile) -> Result<Self> {
        let source = file.source.as_deref().map(SourceId::parse).transpose()?;

        let ingest_file = file.ingest.unwrap_or_default();
        let ingest = IngestSettings {
            target_fps: ingest_file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            width: ingest_file.width.unwrap_or(DEFAULT_WIDTH),
            height: ingest_file.height.unwrap_or(DEFAULT_HEIGHT),
        };

        let detection_file = file.detection.unwrap_or_default();
        let detection = DetectionSettings {
            policy: TriggerPolicy {
                confidence_threshold: detection_file
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                streak_threshold: detection_file
                    .streak_threshold
                    .unwrap_or(DEFAULT_STREAK_THRESHOLD),
                top_k: detection_file.top_k.unwrap_or(DEFAULT_TOP_K),
            },
            model_path: detection_file.model_path,
            label_map_path: detection_file.label_map_path,
        };

        let alerts_file = file.alerts.unwrap_or_default();
        let email = alerts_file.email.map(|email| EmailSettings {
            api_url: email
                .api_url
                .unwrap_or_else(|| DEFAULT_EMAIL_API_URL.to_string()),
            api_key: email.api_key.unwrap_or_default(),
            from: email.from,
            to: email.to,
        });
        let sms = alerts_file.sms.map(|sms| SmsSettings {
            api_url: sms.api_url.unwrap_or_else(|| DEFAULT_SMS_API_URL.to_string()),
            account_sid: sms.account_sid,
            auth_token: sms.auth_token.unwrap_or_default(),
            from: sms.from,
            to: sms.to,
        });
        let alerts = AlertSettings {
            workers: alerts_file.workers.unwrap_or(DEFAULT_ALERT_WORKERS),
            queue_capacity: alerts_file.queue_capacity.unwrap_or(DEFAULT_ALERT_QUEUE),
            timeout: Duration::from_secs(
                alerts_file
                    .timeout_secs
                    .unwrap_or(DEFAULT_ALERT_TIMEOUT_SECS),
            ),
            max_attempts: alerts_file.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            status_clear_delay: Duration::from_millis(
                alerts_file
                    .status_clear_ms
                    .unwrap_or(DEFAULT_STATUS_CLEAR_MS),
            ),
            email,
            sms,
        };

        Ok(Self {
            source,
            ingest,
            detection,
            alerts,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(source) = env_value("RHINO_SOURCE") {
            self.source = Some(SourceId::parse(&source)?);
        }
        if let Some(threshold) = env_value("RHINO_CONFIDENCE_THRESHOLD") {
            self.detection.policy.confidence_threshold = threshold.parse().map_err(|_| {
                anyhow!("RHINO_CONFIDENCE_THRESHOLD must be a number in (0, 1]")
            })?;
        }
        if let Some(streak) = env_value("RHINO_STREAK_THRESHOLD") {
            self.detection.policy.streak_threshold = streak
                .parse()
                .map_err(|_| anyhow!("RHINO_STREAK_THRESHOLD must be a positive integer"))?;
        }
        if let Some(path) = env_value("RHINO_MODEL_PATH") {
            self.detection.model_path = Some(PathBuf::from(path));
        }
        if let Some(path) = env_value("RHINO_LABEL_MAP") {
            self.detection.label_map_path = Some(PathBuf::from(path));
        }
        if let Some(timeout) = env_value("RHINO_ALERT_TIMEOUT_SECS") {
            let seconds: u64 = timeout.parse().map_err(|_| {
                anyhow!("RHINO_ALERT_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.alerts.timeout = Duration::from_secs(seconds);
        }
        // Secrets stay out of the config file when they come from the environment.
        if let Some(key) = env_value("RHINO_EMAIL_API_KEY") {
            match self.alerts.email.as_mut() {
                Some(email) => email.api_key = key,
                None => log::warn!("RHINO_EMAIL_API_KEY set but no alerts.email section"),
            }
        }
        if let Some(token) = env_value("RHINO_SMS_AUTH_TOKEN") {
            match self.alerts.sms.as_mut() {
                Some(sms) => sms.auth_token = token,
                None => log::warn!("RHINO_SMS_AUTH_TOKEN set but no alerts.sms section"),
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let policy = &self.detection.policy;
        if !(policy.confidence_threshold > 0.0 && policy.confidence_threshold <= 1.0) {
            return Err(anyhow!(
                "confidence_threshold must be in (0, 1], got {}",
                policy.confidence_threshold
            ));
        }
        if policy.streak_threshold == 0 {
            return Err(anyhow!("streak_threshold must be at least 1"));
        }
        if policy.top_k == 0 {
            return Err(anyhow!("top_k must be at least 1"));
        }
        if self.ingest.width == 0 || self.ingest.height == 0 || self.ingest.target_fps == 0 {
            return Err(anyhow!("ingest width, height and target_fps must be non-zero"));
        }
        if self.alerts.workers == 0 {
            return Err(anyhow!("alerts.workers must be at least 1"));
        }
        if self.alerts.queue_capacity == 0 {
            return Err(anyhow!("alerts.queue_capacity must be at least 1"));
        }
        if self.alerts.max_attempts == 0 {
            return Err(anyhow!("alerts.max_attempts must be at least 1"));
        }
        if self.alerts.timeout.is_zero() {
            return Err(anyhow!("alerts.timeout_secs must be greater than zero"));
        }
        if let Some(email) = &self.alerts.email {
            email.validate().context("alerts.email")?;
        }
        if let Some(sms) = &self.alerts.sms {
            sms.validate().context("alerts.sms")?;
        }
        Ok(())
    }

    pub fn pool_config(&self) -> AlertPoolConfig {
        AlertPoolConfig {
            workers: self.alerts.workers,
            queue_capacity: self.alerts.queue_capacity,
            status_clear_delay: self.alerts.status_clear_delay,
        }
    }

    /// Build the dispatcher; unconfigured channels log alerts instead of sending them.
    pub fn build_dispatcher(&self) -> Result<AlertDispatcher> {
        let email: Box<dyn AlertChannel> = match &self.alerts.email {
            Some(settings) => Box::new(EmailChannel::new(settings.clone(), self.alerts.timeout)?),
            None => {
                log::warn!("no email settings; email alerts go to the log");
                Box::new(LogChannel::new(ChannelKind::Email))
            }
        };
        let sms: Box<dyn AlertChannel> = match &self.alerts.sms {
            Some(settings) => Box::new(SmsChannel::new(settings.clone(), self.alerts.timeout)?),
            None => {
                log::warn!("no sms settings; sms alerts go to the log");
                Box::new(LogChannel::new(ChannelKind::Sms))
            }
        };
        Ok(AlertDispatcher::new(email, sms).with_max_attempts(self.alerts.max_attempts))
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_config_file(path: &Path) -> Result<RhinoConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<RhinoConfig> {
        let file: RhinoConfigFile = serde_json::from_str(raw)?;
        let cfg = RhinoConfig::from_file(file)?;
        cfg.validate()?;
        Ok(cfg)
    }

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = parse("{}").unwrap();
        assert!(cfg.source.is_none());
        assert_eq!(cfg.detection.policy, TriggerPolicy::default());
        assert_eq!(cfg.alerts.workers, 2);
        assert_eq!(cfg.alerts.queue_capacity, 4);
        assert_eq!(cfg.alerts.timeout, Duration::from_secs(10));
        assert_eq!(cfg.alerts.max_attempts, 1);
        assert!(cfg.alerts.email.is_none());
        assert!(cfg.alerts.sms.is_none());
    }

    #[test]
    fn rejects_out_of_range_thresholds() {
        assert!(parse(r#"{"detection": {"confidence_threshold": 0.0}}"#).is_err());
        assert!(parse(r#"{"detection": {"confidence_threshold": 1.2}}"#).is_err());
        assert!(parse(r#"{"detection": {"streak_threshold": 0}}"#).is_err());
        assert!(parse(r#"{"detection": {"top_k": 0}}"#).is_err());
        assert!(parse(r#"{"alerts": {"workers": 0}}"#).is_err());
    }

    #[test]
    fn rejects_zero_queue_capacity() {
        let err = parse(r#"{"alerts": {"queue_capacity": 0}}"#).unwrap_err();
        assert!(err.to_string().contains("queue_capacity"));
        assert_eq!(
            parse(r#"{"alerts": {"queue_capacity": 1}}"#)
                .unwrap()
                .alerts
                .queue_capacity,
            1
        );
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(parse(r#"{"detection": {"treshold": 0.5}}"#).is_err());
    }

    #[test]
    fn sms_defaults_gateway_and_checks_numbers() {
        let cfg = parse(
            r#"{"alerts": {"sms": {"account_sid": "AC1", "auth_token": "t",
                "from": "+15550000000", "to": ["+15551234567"]}}}"#,
        )
        .unwrap();
        assert_eq!(cfg.alerts.sms.unwrap().api_url, DEFAULT_SMS_API_URL);

        assert!(parse(
            r#"{"alerts": {"sms": {"account_sid": "AC1", "auth_token": "t",
                "from": "+15550000000", "to": ["555-1234"]}}}"#,
        )
        .is_err());
    }

    #[test]
    fn unconfigured_channels_fall_back_to_log() {
        let cfg = parse("{}").unwrap();
        let dispatcher = cfg.build_dispatcher().unwrap();
        assert_eq!(
            dispatcher.describe(),
            "email=log(email) sms=log(sms) attempts=1"
        );
    }
}
