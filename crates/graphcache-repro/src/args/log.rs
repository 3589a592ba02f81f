use std::fmt;

use clap::ValueEnum;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub(crate) enum LogLevel {
    /// Completely disables logging
    Off,
    /// Only errors from the cache
    Error,
    /// Warnings and errors from the cache, including every recorded cache warning
    #[default]
    Warn,
    /// Info, warning and error messages from the cache
    Info,
    /// Every merge step, rekey and derived relation sync
    Debug,
    /// Trace, debug, info, warning and error messages from all dependencies
    Trace,
}

impl LogLevel {
    pub(crate) fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "graphcache=error,graphcache_repro=error,off",
            LogLevel::Warn => "graphcache=warn,graphcache_repro=warn,off",
            LogLevel::Info => "graphcache=info,graphcache_repro=info,off",
            LogLevel::Debug => "graphcache=debug,graphcache_repro=debug,off",
            LogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };

        f.write_str(name)
    }
}

/// How log lines are written to stderr. The report on stdout is always JSON.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub(crate) enum LogStyle {
    /// One human-readable line per event, colored when stderr is a terminal
    Text,
    /// One JSON object per event, for piping the replay log into other tools
    Json,
}

impl fmt::Display for LogStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogStyle::Text => "text",
            LogStyle::Json => "json",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_the_accepted_values() {
        for level in LogLevel::value_variants() {
            assert_eq!(LogLevel::from_str(&level.to_string(), false), Ok(*level));
        }
        for style in LogStyle::value_variants() {
            assert_eq!(LogStyle::from_str(&style.to_string(), false), Ok(*style));
        }
    }

    #[test]
    fn filters_stay_on_the_cache_crates() {
        assert_eq!(LogLevel::Debug.as_filter_str(), "graphcache=debug,graphcache_repro=debug,off");
        assert_eq!(LogLevel::Trace.as_filter_str(), "trace");
    }
}
