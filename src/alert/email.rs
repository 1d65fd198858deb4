use anyhow::{anyhow, Context, Result};
use serde_json::json;
use std::time::Duration;
use url::Url;

use super::{AlertChannel, AlertEvent, ChannelKind};

/// Mail relay endpoint and envelope.
#[derive(Clone, Debug)]
pub struct EmailSettings {
    /// Relay endpoint accepting a JSON send request (e.g. `https://api.sendgrid.com/v3/mail/send`).
    pub api_url: String,
    pub api_key: String,
    pub from: String,
    pub to: Vec<String>,
}

impl EmailSettings {
    pub fn validate(&self) -> Result<()> {
        validate_https_url(&self.api_url).context("email api_url")?;
        if self.api_key.trim().is_empty() {
            return Err(anyhow!("email api_key must be set"));
        }
        if self.to.is_empty() {
            return Err(anyhow!("email needs at least one recipient"));
        }
        for address in std::iter::once(&self.from).chain(self.to.iter()) {
            if !looks_like_address(address) {
                return Err(anyhow!("'{}' is not an email address", address));
            }
        }
        Ok(())
    }
}

/// Sends alerts through an HTTP mail relay.
pub struct EmailChannel {
    settings: EmailSettings,
    agent: ureq::Agent,
}

impl EmailChannel {
    pub fn new(settings: EmailSettings, timeout: Duration) -> Result<Self> {
        settings.validate()?;
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self { settings, agent })
    }

    fn payload(&self, event: &AlertEvent) -> serde_json::Value {
        let to: Vec<serde_json::Value> = self
            .settings
            .to
            .iter()
            .map(|address| json!({ "email": address }))
            .collect();
        json!({
            "personalizations": [{ "to": to }],
            "from": { "email": self.settings.from },
            "subject": event.subject(),
            "content": [{ "type": "text/plain", "value": event.body() }],
        })
    }
}

impl AlertChannel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    fn describe(&self) -> String {
        format!("email({} recipients)", self.settings.to.len())
    }

    fn send(&self, event: &AlertEvent) -> Result<()> {
        self.agent
            .post(&self.settings.api_url)
            .set("Authorization", &format!("Bearer {}", self.settings.api_key))
            .send_json(self.payload(event))
            .map_err(describe_ureq_error)
            .with_context(|| format!("POST {}", self.settings.api_url))?;
        Ok(())
    }
}

pub(crate) fn validate_https_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw).with_context(|| format!("invalid url '{}'", raw))?;
    match url.scheme() {
        "https" | "http" => Ok(()),
        other => Err(anyhow!("url '{}' must be http(s), got scheme '{}'", raw, other)),
    }
}

/// Status errors carry the relay's response body, which usually says what was wrong.
pub(crate) fn describe_ureq_error(err: ureq::Error) -> anyhow::Error {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            anyhow!("relay returned HTTP {}: {}", code, body.trim())
        }
        ureq::Error::Transport(transport) => anyhow!("transport error: {}", transport),
    }
}

fn looks_like_address(address: &str) -> bool {
    match address.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !address.contains(' '),
        None => false,
    }
}
