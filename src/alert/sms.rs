use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::time::Duration;

use super::email::{describe_ureq_error, validate_https_url};
use super::{AlertChannel, AlertEvent, ChannelKind};
use crate::validate_phone_number;

pub const DEFAULT_SMS_API_URL: &str = "https://api.twilio.com";

/// SMS gateway account and numbers.
#[derive(Clone, Debug)]
pub struct SmsSettings {
    pub api_url: String,
    pub account_sid: String,
    pub auth_token: String,
    pub from: String,
    pub to: Vec<String>,
}

impl SmsSettings {
    pub fn validate(&self) -> Result<()> {
        validate_https_url(&self.api_url).context("sms api_url")?;
        if self.account_sid.trim().is_empty() || self.auth_token.trim().is_empty() {
            return Err(anyhow!("sms account_sid and auth_token must be set"));
        }
        if self.to.is_empty() {
            return Err(anyhow!("sms needs at least one recipient"));
        }
        validate_phone_number(&self.from)?;
        for number in &self.to {
            validate_phone_number(number)?;
        }
        Ok(())
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_url.trim_end_matches('/'),
            self.account_sid
        )
    }
}

/// Sends alerts as text messages, one request per recipient.
pub struct SmsChannel {
    settings: SmsSettings,
    agent: ureq::Agent,
    authorization: String,
}

impl SmsChannel {
    pub fn new(settings: SmsSettings, timeout: Duration) -> Result<Self> {
        settings.validate()?;
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        let credentials = format!("{}:{}", settings.account_sid, settings.auth_token);
        let authorization = format!("Basic {}", STANDARD.encode(credentials));
        Ok(Self {
            settings,
            agent,
            authorization,
        })
    }

    fn send_one(&self, url: &str, to: &str, body: &str) -> Result<()> {
        self.agent
            .post(url)
            .set("Authorization", &self.authorization)
            .send_form(&[("To", to), ("From", self.settings.from.as_str()), ("Body", body)])
            .map_err(describe_ureq_error)
            .with_context(|| format!("send sms to {}", to))?;
        Ok(())
    }
}

impl AlertChannel for SmsChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    fn describe(&self) -> String {
        format!("sms({} recipients)", self.settings.to.len())
    }

    /// Every recipient is attempted; the first failure is returned afterwards.
    fn send(&self, event: &AlertEvent) -> Result<()> {
        let url = self.settings.messages_url();
        let body = event.body();
        let mut first_error = None;
        for to in &self.settings.to {
            if let Err(err) = self.send_one(&url, to, &body) {
                log::warn!("sms to {} failed: {:#}", to, err);
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SmsSettings {
        SmsSettings {
            api_url: format!("{}/", DEFAULT_SMS_API_URL),
            account_sid: "AC123".to_string(),
            auth_token: "secret".to_string(),
            from: "+15550000000".to_string(),
            to: vec!["+15551234567".to_string()],
        }
    }

    #[test]
    fn builds_messages_url_and_basic_auth() {
        let channel = SmsChannel::new(settings(), Duration::from_secs(1)).unwrap();
        assert_eq!(
            channel.settings.messages_url(),
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json"
        );
        assert_eq!(channel.authorization, "Basic QUMxMjM6c2VjcmV0");
    }

    #[test]
    fn rejects_non_e164_numbers() {
        let mut bad = settings();
        bad.to = vec!["555-1234".to_string()];
        assert!(bad.validate().is_err());

        let mut missing_token = settings();
        missing_token.auth_token.clear();
        assert!(missing_token.validate().is_err());
    }
}
