use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::SecretBox;
use std::env;
use std::time::Duration;

use crate::domains::jobs::DEFAULT_PROCESSOR_TIMEOUT;
use crate::domains::keywords::RetryPolicy;

/// Sign-in credentials for the CLI.
#[derive(Debug)]
pub struct Credentials {
    pub email: String,
    pub password: SecretBox<str>,
}

/// Application configuration loaded from environment variables
#[derive(Debug)]
pub struct Config {
    pub supabase_url: String,
    pub supabase_anon_key: SecretBox<str>,
    pub credentials: Option<Credentials>,
    pub processor_timeout: Duration,
    pub keyword_retry: RetryPolicy,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let credentials = match (get("SUPABASE_EMAIL"), get("SUPABASE_PASSWORD")) {
            (Some(email), Some(password)) => Some(Credentials {
                email,
                password: SecretBox::new(Box::from(password.as_str())),
            }),
            _ => None,
        };

        let defaults = RetryPolicy::default();

        Ok(Self {
            supabase_url: get("SUPABASE_URL").context("SUPABASE_URL must be set")?,
            supabase_anon_key: SecretBox::new(Box::from(
                get("SUPABASE_ANON_KEY")
                    .context("SUPABASE_ANON_KEY must be set")?
                    .as_str(),
            )),
            credentials,
            processor_timeout: match get("PROCESSOR_TIMEOUT_SECS") {
                Some(v) => Duration::from_secs(
                    v.parse()
                        .context("PROCESSOR_TIMEOUT_SECS must be a valid number")?,
                ),
                None => DEFAULT_PROCESSOR_TIMEOUT,
            },
            keyword_retry: RetryPolicy {
                max_retries: match get("KEYWORD_RETRY_LIMIT") {
                    Some(v) => v
                        .parse()
                        .context("KEYWORD_RETRY_LIMIT must be a valid number")?,
                    None => defaults.max_retries,
                },
                delay: match get("KEYWORD_RETRY_DELAY_MS") {
                    Some(v) => Duration::from_millis(
                        v.parse()
                            .context("KEYWORD_RETRY_DELAY_MS must be a valid number")?,
                    ),
                    None => defaults.delay,
                },
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://abc.supabase.co"),
            ("SUPABASE_ANON_KEY", "anon"),
        ]))
        .unwrap();

        assert_eq!(config.supabase_anon_key.expose_secret(), "anon");
        assert!(config.credentials.is_none());
        assert_eq!(config.processor_timeout, Duration::from_secs(30));
        assert_eq!(config.keyword_retry.max_retries, 10);
        assert_eq!(config.keyword_retry.delay, Duration::from_millis(2000));
    }

    #[test]
    fn test_overrides_and_credentials() {
        let config = Config::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://abc.supabase.co"),
            ("SUPABASE_ANON_KEY", "anon"),
            ("SUPABASE_EMAIL", "me@example.com"),
            ("SUPABASE_PASSWORD", "hunter2"),
            ("PROCESSOR_TIMEOUT_SECS", "5"),
            ("KEYWORD_RETRY_LIMIT", "3"),
            ("KEYWORD_RETRY_DELAY_MS", "250"),
        ]))
        .unwrap();

        let credentials = config.credentials.unwrap();
        assert_eq!(credentials.email, "me@example.com");
        assert_eq!(credentials.password.expose_secret(), "hunter2");
        assert_eq!(config.processor_timeout, Duration::from_secs(5));
        assert_eq!(config.keyword_retry.max_retries, 3);
        assert_eq!(config.keyword_retry.delay, Duration::from_millis(250));
    }

    #[test]
    fn test_missing_url_is_an_error() {
        let err = Config::from_lookup(lookup(&[("SUPABASE_ANON_KEY", "anon")])).unwrap_err();
        assert!(err.to_string().contains("SUPABASE_URL"));
    }

    #[test]
    fn test_debug_does_not_leak_secrets() {
        let config = Config::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://abc.supabase.co"),
            ("SUPABASE_ANON_KEY", "very-secret-anon-key"),
            ("SUPABASE_EMAIL", "me@example.com"),
            ("SUPABASE_PASSWORD", "hunter2"),
        ]))
        .unwrap();

        let debug = format!("{:?}", config);
        assert!(!debug.contains("very-secret-anon-key"));
        assert!(!debug.contains("hunter2"));
    }
}
