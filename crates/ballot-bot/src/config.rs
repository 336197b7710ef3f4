use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

/// Where the election lives.
#[derive(Clone)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    /// Fixed bearer token. When unset the metadata server is asked instead.
    pub access_token: Option<String>,
}

impl SheetsConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let spreadsheet_id = lookup("SPREADSHEET_ID")
            .filter(|s| !s.trim().is_empty())
            .context("SPREADSHEET_ID environment variable is required")?;

        let access_token = non_blank(lookup("SHEETS_ACCESS_TOKEN"));

        Ok(SheetsConfig {
            spreadsheet_id,
            access_token,
        })
    }
}

/// Settings for the webhook server.
#[derive(Clone)]
pub struct BotConfig {
    pub telegram_token: String,
    pub webhook_secret: String,
    /// Public HTTPS root the webhook is registered under.
    pub public_url: String,
    pub port: u16,
    pub sweep_interval: Duration,
}

impl BotConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let telegram_token = lookup("TELEGRAM_TOKEN")
            .filter(|s| !s.trim().is_empty())
            .context("TELEGRAM_TOKEN environment variable is required")?;

        let webhook_secret = lookup("WEBHOOK_SECRET")
            .context("WEBHOOK_SECRET environment variable is required")?;
        validate_secret(&webhook_secret)?;

        let public_url = lookup("PUBLIC_URL")
            .context("PUBLIC_URL environment variable is required")?
            .trim_end_matches('/')
            .to_string();
        if !public_url.starts_with("https://") {
            bail!("PUBLIC_URL must be an https:// URL");
        }

        let port = lookup("PORT")
            .unwrap_or_else(|| "8080".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let sweep_secs = lookup("SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|| "60".to_string())
            .parse::<u64>()
            .context("SWEEP_INTERVAL_SECS must be a valid number")?;
        if sweep_secs == 0 {
            bail!("SWEEP_INTERVAL_SECS must be positive");
        }

        Ok(BotConfig {
            telegram_token,
            webhook_secret,
            public_url,
            port,
            sweep_interval: Duration::from_secs(sweep_secs),
        })
    }

    pub fn webhook_url(&self) -> String {
        format!("{}/webhook", self.public_url)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Telegram accepts 1-256 characters from `A-Z a-z 0-9 _ -`.
fn validate_secret(secret: &str) -> Result<()> {
    if secret.is_empty() || secret.len() > 256 {
        bail!("WEBHOOK_SECRET must be 1-256 characters long");
    }
    if !secret
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        bail!("WEBHOOK_SECRET may only contain letters, digits, '_' and '-'");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            ("TELEGRAM_TOKEN", "123:abc"),
            ("WEBHOOK_SECRET", "s3cret_token-1"),
            ("PUBLIC_URL", "https://vote.example.org/"),
        ]
    }

    #[test]
    fn test_bot_config_defaults() {
        let config = BotConfig::from_lookup(lookup(&required())).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.webhook_url(), "https://vote.example.org/webhook");
    }

    #[test]
    fn test_bot_config_missing_token() {
        let pairs: Vec<_> = required()
            .into_iter()
            .filter(|(k, _)| *k != "TELEGRAM_TOKEN")
            .collect();
        let err = BotConfig::from_lookup(lookup(&pairs)).err().unwrap();
        assert!(err.to_string().contains("TELEGRAM_TOKEN"));
    }

    #[test]
    fn test_bot_config_rejects_bad_secret() {
        let mut pairs = required();
        pairs[1] = ("WEBHOOK_SECRET", "has spaces");
        assert!(BotConfig::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn test_bot_config_rejects_plain_http() {
        let mut pairs = required();
        pairs[2] = ("PUBLIC_URL", "http://vote.example.org");
        assert!(BotConfig::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn test_bot_config_invalid_port() {
        let mut pairs = required();
        pairs.push(("PORT", "eighty"));
        let err = BotConfig::from_lookup(lookup(&pairs)).err().unwrap();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn test_sheets_config_blank_token_is_unset() {
        let config = SheetsConfig::from_lookup(lookup(&[
            ("SPREADSHEET_ID", "1AbC"),
            ("SHEETS_ACCESS_TOKEN", "   "),
        ]))
        .unwrap();
        assert_eq!(config.spreadsheet_id, "1AbC");
        assert_eq!(config.access_token, None);
    }

    #[test]
    fn test_sheets_config_requires_sheet() {
        assert!(SheetsConfig::from_lookup(lookup(&[])).is_err());
    }
}
