//! Subscriber setup for the binary. Library crates only emit events.

use iosra_config::{LogFormat, LoggingSettings};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// Filter directives for the configured level. `debug_can_handle` opens up
/// the per-tick connection decisions.
fn directives(level: &str, debug_can_handle: bool) -> String {
    match debug_can_handle {
        true => format!("{level},iosra_connection=debug"),
        false => level.to_string(),
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
/// Events go to stderr so command output stays clean.
pub fn init(settings: &LoggingSettings, debug_can_handle: bool) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives(&settings.level, debug_can_handle)));
    match settings.format {
        LogFormat::Off => Ok(()),
        LogFormat::Pretty => {
            tracing_subscriber::fmt().pretty().with_env_filter(filter).with_writer(std::io::stderr).finish().try_init()
        },
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).with_writer(std::io::stderr).finish().try_init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("info", false, "info")]
    #[case("warn", true, "warn,iosra_connection=debug")]
    fn test_directives(#[case] level: &str, #[case] debug: bool, #[case] expected: &str) {
        assert_eq!(directives(level, debug), expected);
    }
}
