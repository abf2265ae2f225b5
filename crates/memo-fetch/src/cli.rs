//! Exposes the command line application.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Url;
use tracing::level_filters::LevelFilter;

use crate::config::{Config, Variant};
use crate::logging;
use crate::run::{self, Mode, OutputFormat, RunOptions};

/// The URLs requested when none are given.
const DEFAULT_URLS: &[&str] = &[
    "https://golang.org",
    "https://godoc.org",
    "https://play.golang.org",
    "http://gopl.io",
];

/// Fetches URLs through a memo cache.
///
/// Prints `url, elapsed, size` for every request in the order they complete, followed by a
/// report of the cache statistics and request latencies.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about)]
struct Cli {
    /// The URLs to fetch.
    urls: Vec<Url>,

    /// Path to your configuration file.
    #[arg(long, short, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Read URLs from a file, one per line.
    ///
    /// Blank lines and lines starting with `#` are skipped.
    #[arg(long, short, value_name = "FILE")]
    input: Option<PathBuf>,

    /// The memo cache implementation.
    ///
    /// Defaults to the configured variant.
    #[arg(long, value_enum)]
    variant: Option<Variant>,

    /// Whether to issue requests one at a time or all at once.
    #[arg(long, value_enum, default_value = "concurrent")]
    mode: Mode,

    /// How often the list of URLs is requested.
    #[arg(long, default_value_t = 2)]
    repeat: usize,

    /// The severity level of logging output.
    ///
    /// Overrides the configured level. Possible values:
    /// off, error, warn, info, debug, trace
    #[arg(long)]
    log_level: Option<LevelFilter>,

    /// The output format.
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }

    /// Returns all URLs to fetch, in order: the ones from the command line, then the input file.
    fn urls(&self) -> Result<Vec<Url>> {
        let mut urls = self.urls.clone();

        if let Some(ref path) = self.input {
            let input = fs::read_to_string(path)
                .with_context(|| format!("failed to read URLs from {}", path.display()))?;
            urls.extend(parse_url_list(&input)?);
        }

        if urls.is_empty() {
            urls = DEFAULT_URLS
                .iter()
                .map(|url| Url::parse(url))
                .collect::<Result<_, _>>()
                .context("invalid default URL")?;
        }

        Ok(urls)
    }
}

fn parse_url_list(input: &str) -> Result<Vec<Url>> {
    input
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(line_number, line)| {
            Url::parse(line).with_context(|| format!("invalid URL on line {line_number}: {line}"))
        })
        .collect()
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::get(cli.config()).context("failed loading config")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    // SAFETY: the runtime has not been started, so this is still single-threaded.
    unsafe { logging::init_logging(&config.logging) };

    let urls = cli.urls()?;
    let options = RunOptions {
        variant: cli.variant.unwrap_or(config.variant),
        mode: cli.mode,
        repeat: cli.repeat,
        format: cli.format,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the runtime")?;

    runtime.block_on(run::run(&config, &options, &urls, std::io::stdout()))?;

    Ok(())
}
