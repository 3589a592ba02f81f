use std::{fs, path::PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing::Subscriber;
use tracing_subscriber::{registry::LookupSpan, Layer};

mod log;

pub(crate) use self::log::{LogLevel, LogStyle};

const BUNDLED_CONFIG: &str = include_str!("../scenarios/episode-media.toml");
const BUNDLED_SCENARIO: &str = include_str!("../scenarios/episode-media.json");

#[derive(Debug, Parser)]
#[command(name = "graphcache-repro", version)]
/// Replays an initial GraphQL payload and its streamed increments against a normalized cache,
/// then prints the normalized store, the denormalized read and every recorded warning.
pub(crate) struct Args {
    /// Path to the TOML cache configuration. Defaults to the bundled episode/media configuration.
    #[arg(long, short, env = "GRAPHCACHE_CONFIG")]
    pub config: Option<PathBuf>,
    /// Path to the JSON scenario. Defaults to the bundled episode/media scenario.
    #[arg(long, short, env = "GRAPHCACHE_SCENARIO")]
    pub scenario: Option<PathBuf>,
    /// Set the logging level
    #[arg(long = "log", env = "GRAPHCACHE_LOG", default_value_t = LogLevel::Warn)]
    pub log_level: LogLevel,
    /// Set the style of log output
    #[arg(long, env = "GRAPHCACHE_LOG_STYLE", default_value_t = LogStyle::Text)]
    log_style: LogStyle,
}

impl Args {
    pub(crate) fn config_source(&self) -> anyhow::Result<String> {
        read_or_bundled(self.config.as_ref(), BUNDLED_CONFIG).context("error loading cache configuration")
    }

    pub(crate) fn scenario_source(&self) -> anyhow::Result<String> {
        read_or_bundled(self.scenario.as_ref(), BUNDLED_SCENARIO).context("error loading scenario")
    }

    /// Logs go to stderr, stdout is reserved for the report.
    pub(crate) fn log_format<S>(&self) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: Subscriber + for<'span> LookupSpan<'span> + Send + Sync,
    {
        let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

        match self.log_style {
            // for interactive terminals we provide colored output
            LogStyle::Text if atty::is(atty::Stream::Stderr) => layer.with_ansi(true).boxed(),
            LogStyle::Text => layer.with_ansi(false).boxed(),
            LogStyle::Json => layer.json().boxed(),
        }
    }
}

fn read_or_bundled(path: Option<&PathBuf>, bundled: &str) -> anyhow::Result<String> {
    match path {
        Some(path) => fs::read_to_string(path).with_context(|| format!("could not read {}", path.display())),
        None => Ok(bundled.to_owned()),
    }
}

pub(crate) fn parse() -> Args {
    Args::parse()
}
