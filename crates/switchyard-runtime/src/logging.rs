//! Tracing subscriber setup for binaries and tests embedding the runtime.
//!
//! The library itself only emits `tracing` events; nothing is printed
//! unless the host installs a subscriber, for example with
//! [`init_tracing`].

use tracing_subscriber::EnvFilter;

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV: &str = "SWITCHYARD_LOG";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human-readable
    #[default]
    Human,

    /// Single line, terse
    Compact,

    /// One JSON object per event
    Json,
}

impl LogFormat {
    /// Parse from string (case-insensitive).
    pub fn from_arg(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "human" | "pretty" => Some(Self::Human),
            "compact" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Filter from [`LOG_ENV`], or `switchyard_core` and `switchyard_runtime`
/// at `default_level`.
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "switchyard_core={default_level},switchyard_runtime={default_level}"
        ))
    })
}

/// Install a global fmt subscriber writing to stderr.
///
/// Returns false if a global subscriber was already installed, in which
/// case nothing changes.
pub fn init_tracing(format: LogFormat, default_level: &str) -> bool {
    let filter = env_filter(default_level);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Human => builder.pretty().try_init().is_ok(),
        LogFormat::Compact => builder.compact().with_target(true).try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_arg() {
        assert_eq!(LogFormat::from_arg("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::from_arg(" compact "), Some(LogFormat::Compact));
        assert_eq!(LogFormat::from_arg("pretty"), Some(LogFormat::Human));
        assert_eq!(LogFormat::from_arg("xml"), None);
    }

    #[test]
    fn test_second_init_is_noop() {
        init_tracing(LogFormat::Compact, "debug");
        assert!(!init_tracing(LogFormat::Json, "info"));
    }
}
