//! Log setup for `quorum-node`.
//!
//! Everything goes to stderr. Stdout is reserved for command output, such as
//! the JSON lines printed by `audit search`.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How log events are rendered. Spelled the same in `config.toml` and on
/// the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Colored text with source locations, for a terminal.
    #[default]
    Pretty,
    /// One JSON object per event, for log shippers.
    Json,
}

/// `RUST_LOG` when it is set, otherwise the configured directives.
fn filter(configured: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured))
}

/// Install the process-wide subscriber.
///
/// `directives` uses `EnvFilter` syntax, e.g.
/// `quorum_node=debug,quorum_core=info`. Fails if a subscriber is already
/// installed.
pub fn init_logging(directives: &str, format: LogFormat) -> Result<()> {
    let pretty = (format == LogFormat::Pretty).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_file(true)
            .with_line_number(true)
    });
    let json = (format == LogFormat::Json).then(|| fmt::layer().json().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter(directives))
        .with(pretty)
        .with(json)
        .try_init()
        .context("failed to install the log subscriber")?;

    tracing::debug!(?format, directives, "logging ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_names_agree_between_cli_and_config() {
        for format in LogFormat::value_variants() {
            let name = format
                .to_possible_value()
                .map(|value| value.get_name().to_string())
                .unwrap();
            let from_config: LogFormat =
                serde_json::from_value(serde_json::Value::String(name.clone())).unwrap();
            assert_eq!(from_config, *format);
            assert_eq!(LogFormat::from_str(&name, false).unwrap(), *format);
        }
    }
}
