//! Runtime configuration: environment variables with CLI overrides,
//! following the teacher's `clap` + env-var pattern.

use crate::errors::{ReplicationError, ReplicationResult};
use clap::{Parser, ValueEnum};
use std::env;
use std::time::Duration;

const DEFAULT_SLOT_NAME: &str = "sub";
const DEFAULT_PUB_NAME: &str = "pub";
const DEFAULT_STATUS_INTERVAL_SECS: u64 = 120;

#[derive(Parser, Debug)]
#[command(name = "pg_replica_rs", about = "Logical-replication CDC ingester", version)]
pub struct Args {
    /// libpq connection string; falls back to DATABASE_URL if omitted.
    #[arg(long)]
    pub database_url: Option<String>,

    /// Replication slot name; falls back to SLOT_NAME, then "sub".
    #[arg(long)]
    pub slot: Option<String>,

    /// Publication name; falls back to PUB_NAME, then "pub".
    #[arg(long)]
    pub publication: Option<String>,

    /// Log output shape.
    #[arg(long, value_enum, default_value_t = LogFormatArg::Pretty)]
    pub log_format: LogFormatArg,
}

#[derive(Copy, Clone, Debug, ValueEnum, PartialEq, Eq)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

/// Fully resolved configuration the session manager runs with.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    pub connection_string: String,
    pub slot_name: String,
    pub publication_name: String,
    pub status_interval: Duration,
}

impl ReplicationConfig {
    /// Resolves configuration from CLI args, falling back to environment
    /// variables, falling back to documented defaults.
    pub fn resolve(args: &Args) -> ReplicationResult<Self> {
        let connection_string = args
            .database_url
            .clone()
            .or_else(|| env::var("DATABASE_URL").ok())
            .ok_or_else(|| ReplicationError::config("DATABASE_URL is required (env var or --database-url)"))?;

        if connection_string.trim().is_empty() {
            return Err(ReplicationError::config("connection string cannot be empty"));
        }

        let slot_name = args
            .slot
            .clone()
            .or_else(|| env::var("SLOT_NAME").ok())
            .unwrap_or_else(|| DEFAULT_SLOT_NAME.to_string());
        validate_identifier(&slot_name, "slot name")?;

        let publication_name = args
            .publication
            .clone()
            .or_else(|| env::var("PUB_NAME").ok())
            .unwrap_or_else(|| DEFAULT_PUB_NAME.to_string());
        validate_identifier(&publication_name, "publication name")?;

        let status_interval_secs = env::var("STATUS_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_STATUS_INTERVAL_SECS);

        Ok(Self {
            connection_string,
            slot_name,
            publication_name,
            status_interval: Duration::from_secs(status_interval_secs),
        })
    }
}

fn validate_identifier(value: &str, label: &str) -> ReplicationResult<()> {
    if value.trim().is_empty() {
        return Err(ReplicationError::config(format!("{label} cannot be empty")));
    }
    if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ReplicationError::config(format!(
            "{label} can only contain alphanumeric characters and underscores"
        )));
    }
    if value.len() > 63 {
        return Err(ReplicationError::config(format!("{label} cannot be longer than 63 characters")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_with(database_url: Option<&str>) -> Args {
        Args {
            database_url: database_url.map(String::from),
            slot: None,
            publication: None,
            log_format: LogFormatArg::Pretty,
        }
    }

    #[test]
    fn missing_database_url_is_a_config_error() {
        // SAFETY-equivalent: tests run single-threaded enough in practice for
        // env var isolation here; we don't rely on DATABASE_URL being unset
        // globally, only that neither source provides a value.
        let args = args_with(None);
        unsafe { env::remove_var("DATABASE_URL") };
        let err = ReplicationConfig::resolve(&args).unwrap_err();
        assert!(matches!(err, ReplicationError::Configuration { .. }));
    }

    #[test]
    fn cli_flag_overrides_defaults() {
        let args = args_with(Some("host=localhost dbname=test"));
        let config = ReplicationConfig::resolve(&args).unwrap();
        assert_eq!(config.connection_string, "host=localhost dbname=test");
        assert_eq!(config.slot_name, DEFAULT_SLOT_NAME);
        assert_eq!(config.publication_name, DEFAULT_PUB_NAME);
    }

    #[test]
    fn invalid_slot_name_is_rejected() {
        let mut args = args_with(Some("host=localhost"));
        args.slot = Some("bad slot!".to_string());
        let err = ReplicationConfig::resolve(&args).unwrap_err();
        assert!(matches!(err, ReplicationError::Configuration { .. }));
    }
}
