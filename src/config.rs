//! Runtime configuration for the ledger and its request rules
use anyhow::{Context, anyhow};
use rust_decimal::Decimal;
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerConfig {
    pub db_path: PathBuf,
    /// Hours charged per chargeable day for hour-based leave types.
    pub hours_per_day: Decimal,
    /// Longest request, in chargeable days. `None` disables the check.
    pub max_span_days: Option<u32>,
    /// Days of notice required before a request may start. `None` disables the check.
    pub min_notice_days: Option<u32>,
    pub allow_overlap: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./leave-ledger.db"),
            hours_per_day: Decimal::from(8),
            max_span_days: None,
            min_notice_days: None,
            allow_overlap: false,
        }
    }
}

impl LedgerConfig {
    /// Read the configuration from the process environment, honouring a `.env` file.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from any key lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let db_path = lookup("LEAVE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let hours_per_day =
            parse_var(&lookup, "LEAVE_HOURS_PER_DAY")?.unwrap_or(defaults.hours_per_day);
        if hours_per_day <= Decimal::ZERO {
            return Err(anyhow!(
                "LEAVE_HOURS_PER_DAY must be positive, got {}",
                hours_per_day
            ));
        }

        Ok(LedgerConfig {
            db_path,
            hours_per_day,
            max_span_days: parse_var(&lookup, "LEAVE_MAX_SPAN_DAYS")?,
            min_notice_days: parse_var(&lookup, "LEAVE_MIN_NOTICE_DAYS")?,
            allow_overlap: parse_var(&lookup, "LEAVE_ALLOW_OVERLAP")?
                .unwrap_or(defaults.allow_overlap),
        })
    }

    pub fn open_db(&self) -> anyhow::Result<sled::Db> {
        sled::open(&self.db_path)
            .with_context(|| format!("failed to open ledger at {}", self.db_path.display()))
    }
}

fn parse_var<F, T>(lookup: &F, name: &str) -> anyhow::Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow!("invalid {} value {:?}: {}", name, raw, e)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = LedgerConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, LedgerConfig::default());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = LedgerConfig::from_lookup(lookup_from(&[
            ("LEAVE_DB_PATH", "/tmp/ledger"),
            ("LEAVE_HOURS_PER_DAY", "7.5"),
            ("LEAVE_MAX_SPAN_DAYS", "30"),
            ("LEAVE_MIN_NOTICE_DAYS", "14"),
            ("LEAVE_ALLOW_OVERLAP", "true"),
        ]))
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/tmp/ledger"));
        assert_eq!(config.hours_per_day, Decimal::new(75, 1));
        assert_eq!(config.max_span_days, Some(30));
        assert_eq!(config.min_notice_days, Some(14));
        assert!(config.allow_overlap);
    }

    #[test]
    fn garbage_is_reported_with_the_variable_name() {
        let err = LedgerConfig::from_lookup(lookup_from(&[("LEAVE_MAX_SPAN_DAYS", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("LEAVE_MAX_SPAN_DAYS"));
    }

    #[test]
    fn hours_per_day_must_be_positive() {
        assert!(LedgerConfig::from_lookup(lookup_from(&[("LEAVE_HOURS_PER_DAY", "0")])).is_err());
    }
}
