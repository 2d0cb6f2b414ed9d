use anyhow::{Context, Result};
use lettre::message::{Mailbox, Mailboxes};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

use crate::error::NotifyError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub mail: MailOptions,
}

/// Options read from the `[notifier.mail]` table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MailOptions {
    /// Sender address, e.g. `"Deploys <ci@example.com>"`
    pub from: Option<String>,
    /// One address or a list of addresses
    #[serde(default)]
    pub to: Recipients,
    #[serde(default)]
    pub method: DeliveryMethod,
    /// Handed to the SMTP transport as-is
    #[serde(default)]
    pub smtp_settings: SmtpSettings,
    /// Repository slug (`owner/repo`) used to build GitHub links
    pub github: Option<String>,
    /// Explicit link prefix, takes precedence over `github`
    pub giturl: Option<String>,
}

impl MailOptions {
    /// Parse the sender mailbox.
    pub fn sender(&self) -> Result<Mailbox, NotifyError> {
        let from = self
            .from
            .as_deref()
            .map(str::trim)
            .filter(|from| !from.is_empty())
            .ok_or_else(|| NotifyError::Configuration("`from` is not set".to_string()))?;

        from.parse::<Mailbox>().map_err(|e| {
            NotifyError::Configuration(format!("invalid `from` address {:?}: {}", from, e))
        })
    }

    /// Parse every recipient mailbox. At least one is required.
    pub fn recipients(&self) -> Result<Vec<Mailbox>, NotifyError> {
        let mut recipients = Vec::new();
        for entry in self.to.entries() {
            let mailboxes = entry.parse::<Mailboxes>().map_err(|e| {
                NotifyError::Configuration(format!("invalid `to` address {:?}: {}", entry, e))
            })?;
            recipients.extend(mailboxes);
        }

        if recipients.is_empty() {
            return Err(NotifyError::Configuration("`to` is not set".to_string()));
        }
        Ok(recipients)
    }
}

/// Recipient list that accepts either `to = "a@x"` or `to = ["a@x", "b@x"]`.
///
/// Each entry is an RFC 5322 mailbox list, so a single string may hold
/// several comma separated mailboxes.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Recipients {
    One(String),
    Many(Vec<String>),
}

impl Default for Recipients {
    fn default() -> Self {
        Recipients::Many(Vec::new())
    }
}

impl Recipients {
    /// Non-blank entries in configuration order, stray separators trimmed
    pub fn entries(&self) -> Vec<&str> {
        let raw: Vec<&str> = match self {
            Recipients::One(list) => vec![list.as_str()],
            Recipients::Many(lists) => lists.iter().map(String::as_str).collect(),
        };
        raw.into_iter()
            .map(|entry| entry.trim().trim_matches(',').trim())
            .filter(|entry| !entry.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
    #[default]
    Smtp,
    Sendmail,
    /// Keep messages in memory and print them instead of sending
    Test,
}

impl std::fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Smtp => write!(f, "smtp"),
            Self::Sendmail => write!(f, "sendmail"),
            Self::Test => write!(f, "test"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpSettings {
    #[serde(default = "default_smtp_address")]
    pub address: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub user_name: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub tls: SmtpTls,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            address: default_smtp_address(),
            port: default_smtp_port(),
            user_name: None,
            password: None,
            tls: SmtpTls::default(),
        }
    }
}

fn default_smtp_address() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    25
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SmtpTls {
    /// Plain connection, for local relays
    None,
    /// Upgrade with STARTTLS when the server offers it
    #[default]
    Opportunistic,
    /// Require STARTTLS
    Starttls,
    /// Implicit TLS (usually port 465)
    Tls,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&content)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse configuration file")
    }
}
