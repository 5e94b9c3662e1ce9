//! Log output for the reconciliation service.
//!
//! Events are written as compact single lines without ANSI color so
//! container log collectors keep them greppable. `RUST_LOG` wins over the
//! configured level, which lets an operator enable targeted directives
//! (for example `school_ops::workflows=debug`) without touching config.

use crate::config::TelemetryConfig;
use std::fmt;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
pub enum TelemetryError {
    InvalidDirective { directive: String, source: ParseError },
    SubscriberInstall(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryError::InvalidDirective { directive, .. } => {
                write!(f, "log filter directive '{directive}' does not parse")
            }
            TelemetryError::SubscriberInstall(err) => {
                write!(f, "failed to install tracing subscriber: {err}")
            }
        }
    }
}

impl std::error::Error for TelemetryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TelemetryError::InvalidDirective { source, .. } => Some(source),
            TelemetryError::SubscriberInstall(err) => Some(&**err),
        }
    }
}

pub fn init(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => parse_directives(&config.log_level)?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .with_ansi(false)
        .try_init()
        .map_err(TelemetryError::SubscriberInstall)
}

fn parse_directives(configured: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(configured).map_err(|source| TelemetryError::InvalidDirective {
        directive: configured.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_level_builds_a_filter() {
        assert!(parse_directives("info").is_ok());
        assert!(parse_directives("info,school_ops::workflows=debug").is_ok());
    }

    #[test]
    fn bad_directive_is_reported_with_its_text() {
        let error = parse_directives("recon=chatty").expect_err("bogus level must not parse");
        match error {
            TelemetryError::InvalidDirective { directive, .. } => {
                assert_eq!(directive, "recon=chatty");
            }
            other => panic!("expected directive error, got {other:?}"),
        }
    }
}
