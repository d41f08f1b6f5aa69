use std::path::PathBuf;

use anyhow::Context;

pub const DEFAULT_APP_NAME: &str = "General Institute System";
pub const DEFAULT_MAIL_OUTBOX: &str = "outbox";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub app_name: String,
    pub email_to: Option<String>,
    pub mail_outbox: PathBuf,
    pub db_max_connections: u32,
}

impl AppConfig {
    /// Read settings from the process environment, after loading `.env` if present.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let database_url = non_empty("DATABASE_URL")
            .context("DATABASE_URL must be set to a Postgres connection string")?;
        let db_max_connections = match non_empty("DB_MAX_CONNECTIONS") {
            Some(value) => value
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .with_context(|| format!("DB_MAX_CONNECTIONS must be a positive integer, got '{value}'"))?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        Ok(Self {
            database_url,
            app_name: non_empty("APP_NAME").unwrap_or_else(|| DEFAULT_APP_NAME.to_string()),
            email_to: non_empty("EMAIL_TO"),
            mail_outbox: non_empty("MAIL_OUTBOX")
                .unwrap_or_else(|| DEFAULT_MAIL_OUTBOX.to_string())
                .into(),
            db_max_connections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn applies_defaults() {
        let config = AppConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/institute")])).unwrap();
        assert_eq!(config.app_name, "General Institute System");
        assert_eq!(config.email_to, None);
        assert_eq!(config.mail_outbox, PathBuf::from("outbox"));
        assert_eq!(config.db_max_connections, 5);
    }

    #[test]
    fn reads_overrides_and_ignores_blank_values() {
        let config = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/institute"),
            ("APP_NAME", "Riverside Academy"),
            ("EMAIL_TO", "  "),
            ("DB_MAX_CONNECTIONS", "12"),
        ]))
        .unwrap();
        assert_eq!(config.app_name, "Riverside Academy");
        assert_eq!(config.email_to, None);
        assert_eq!(config.db_max_connections, 12);
    }

    #[test]
    fn requires_database_url() {
        assert!(AppConfig::from_lookup(lookup(&[])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/institute"),
            ("DB_MAX_CONNECTIONS", "many"),
        ]))
        .is_err());
    }

    #[test]
    fn rejects_zero_pool_size() {
        let err = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/institute"),
            ("DB_MAX_CONNECTIONS", "0"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("positive integer, got '0'"));
    }
}
