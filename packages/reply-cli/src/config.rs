use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use reply_handling::{Sentinels, Timeout};
use std::env;

/// Harness configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub generic_instance: char,
    pub generic_series: char,
    pub default_timeout: Timeout,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let generic_instance =
            parse_sentinel("REPLY_GENERIC_INSTANCE", env::var("REPLY_GENERIC_INSTANCE").ok(), '?')?;
        let generic_series =
            parse_sentinel("REPLY_GENERIC_SERIES", env::var("REPLY_GENERIC_SERIES").ok(), '*')?;
        if generic_instance == generic_series {
            bail!("REPLY_GENERIC_INSTANCE and REPLY_GENERIC_SERIES must differ");
        }

        let default_timeout = parse_timeout(
            &env::var("REPLY_DEFAULT_TIMEOUT_MS").unwrap_or_else(|_| "1000".to_string()),
        )
        .context("REPLY_DEFAULT_TIMEOUT_MS must be a whole number of milliseconds")?;

        Ok(Self {
            generic_instance,
            generic_series,
            default_timeout,
        })
    }

    pub fn sentinels(&self) -> Sentinels<char> {
        Sentinels::new(self.generic_instance, self.generic_series)
    }
}

fn parse_sentinel(name: &str, value: Option<String>, default: char) -> Result<char> {
    let Some(value) = value else {
        return Ok(default);
    };
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => bail!("{name} must be a single character, got {value:?}"),
    }
}

/// Milliseconds; `-1` (or any negative count) waits forever.
pub fn parse_timeout(value: &str) -> Result<Timeout> {
    let ms: i64 = value.trim().parse()?;
    Ok(Timeout::millis(ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_sentinel_default_and_override() {
        assert_eq!(parse_sentinel("X", None, '?').unwrap(), '?');
        assert_eq!(parse_sentinel("X", Some("#".into()), '?').unwrap(), '#');
    }

    #[test]
    fn test_sentinel_must_be_one_char() {
        assert!(parse_sentinel("X", Some("".into()), '?').is_err());
        let err = parse_sentinel("REPLY_GENERIC_SERIES", Some("**".into()), '*').unwrap_err();
        assert!(err.to_string().contains("REPLY_GENERIC_SERIES"));
    }

    #[test]
    fn test_timeout_parsing() {
        assert_eq!(
            parse_timeout("250").unwrap(),
            Timeout::After(Duration::from_millis(250))
        );
        assert_eq!(parse_timeout("-1").unwrap(), Timeout::Infinite);
        assert!(parse_timeout("soon").is_err());
    }
}
