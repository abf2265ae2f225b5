use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::ValueEnum;
use memocache::naive::{DuplicatingMemo, LockedMemo};
use memocache::{Func, Memo, MemoResult, Memoize, MonitorMemo, StatsSnapshot};
use parking_lot::Mutex;
use reqwest::Url;
use serde::Serialize;
use sketches_ddsketch::DDSketch;
use tokio::sync::Semaphore;

use crate::config::{Config, Variant};
use crate::fetch::{self, FetchError};

/// How the list of URLs is requested.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum Mode {
    /// One request after the other, in list order.
    Sequential,
    /// All requests at once, limited by the configured concurrency.
    #[default]
    Concurrent,
}

/// The output format of the per-request lines and the report.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// `url, elapsed, N bytes` lines, and a human readable report.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

type FetchMemo = Arc<dyn Memoize<Url, Bytes, FetchError>>;

fn create_memo(variant: Variant, func: Func<Url, Bytes, FetchError>) -> FetchMemo {
    match variant {
        Variant::Memo => Arc::new(Memo::from_func(func)),
        Variant::Monitor => Arc::new(MonitorMemo::from_func(func)),
        Variant::Locked => Arc::new(LockedMemo::new(move |url: Url| func(url))),
        Variant::Duplicating => Arc::new(DuplicatingMemo::new(move |url: Url| func(url))),
    }
}

/// The outcome of a single request to the cache.
#[derive(Debug, Serialize)]
struct Line<'a> {
    url: &'a str,
    #[serde(with = "humantime_serde")]
    elapsed: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<'a> Line<'a> {
    fn new(url: &'a Url, elapsed: Duration, result: &MemoResult<Bytes, FetchError>) -> Self {
        let (bytes, error) = match result {
            Ok(body) => (Some(body.len()), None),
            Err(err) => (None, Some(err.to_string())),
        };
        Self {
            url: url.as_str(),
            elapsed,
            bytes,
            error,
        }
    }

    fn print(&self, format: OutputFormat, out: &mut impl Write) -> std::io::Result<()> {
        match format {
            OutputFormat::Text => {
                let Self {
                    url, elapsed, bytes, ..
                } = self;
                match (bytes, &self.error) {
                    (Some(bytes), _) => writeln!(out, "{url}, {elapsed:.2?}, {bytes} bytes"),
                    (None, Some(error)) => writeln!(out, "{url}, {elapsed:.2?}, {error}"),
                    (None, None) => writeln!(out, "{url}, {elapsed:.2?}"),
                }
            }
            OutputFormat::Json => {
                serde_json::to_writer(&mut *out, self)?;
                writeln!(out)
            }
        }
    }
}

/// Latency quantiles of the requests of one run.
#[derive(Debug, Serialize)]
struct Latencies {
    #[serde(with = "humantime_serde")]
    avg: Duration,
    #[serde(with = "humantime_serde")]
    p50: Duration,
    #[serde(with = "humantime_serde")]
    p90: Duration,
    #[serde(with = "humantime_serde")]
    p99: Duration,
}

impl Latencies {
    fn from_sketch(sketch: &DDSketch) -> Option<Self> {
        let count = sketch.count();
        if count == 0 {
            return None;
        }
        let quantile = |q| {
            let secs = sketch.quantile(q).ok().flatten().unwrap_or_default();
            Duration::from_secs_f64(secs)
        };
        Some(Self {
            avg: Duration::from_secs_f64(sketch.sum().unwrap_or_default() / count as f64),
            p50: quantile(0.5),
            p90: quantile(0.9),
            p99: quantile(0.99),
        })
    }
}

/// The summary of a run, printed after all requests completed.
#[derive(Debug, Serialize)]
pub struct Report {
    pub variant: String,
    pub requests: usize,
    pub failed: usize,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    pub stats: StatsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    latencies: Option<Latencies>,
}

impl Report {
    fn print(&self, format: OutputFormat, out: &mut impl Write) -> std::io::Result<()> {
        match format {
            OutputFormat::Text => {
                let Self {
                    variant,
                    requests,
                    failed,
                    elapsed,
                    stats,
                    latencies,
                } = self;
                writeln!(out)?;
                writeln!(
                    out,
                    "{variant}: {requests} requests ({failed} failed) in {elapsed:.2?}"
                )?;
                writeln!(
                    out,
                    "  cache: {} hits, {} misses, {} computations, {} failures",
                    stats.hits,
                    stats.misses(),
                    stats.computations,
                    stats.failures
                )?;
                if let Some(Latencies { avg, p50, p90, p99 }) = latencies {
                    writeln!(
                        out,
                        "  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}"
                    )?;
                }
                Ok(())
            }
            OutputFormat::Json => {
                serde_json::to_writer(&mut *out, &serde_json::json!({ "report": self }))?;
                writeln!(out)
            }
        }
    }
}

/// Everything a run needs, independent of where the output goes.
#[derive(Debug)]
pub struct RunOptions {
    pub variant: Variant,
    pub mode: Mode,
    pub repeat: usize,
    pub format: OutputFormat,
}

/// Requests every URL `repeat` times through the configured memo cache.
///
/// Writes one line per request to `out` in completion order, followed by the report, which is
/// also returned.
pub async fn run<W>(
    config: &Config,
    options: &RunOptions,
    urls: &[Url],
    out: W,
) -> Result<Report>
where
    W: Write + Send + 'static,
{
    let client = fetch::create_client(&config.fetch).context("failed to create HTTP client")?;
    let memo = create_memo(options.variant, fetch::memoizable(client));

    let requests: Vec<Url> = std::iter::repeat_n(urls, options.repeat)
        .flatten()
        .cloned()
        .collect();

    tracing::info!(
        variant = ?options.variant,
        mode = ?options.mode,
        requests = requests.len(),
        "starting run"
    );

    let recorder = Arc::new(Recorder {
        format: options.format,
        out: Mutex::new(out),
        durations: Mutex::new(DDSketch::default()),
        failed: Mutex::new(0),
    });

    let start = Instant::now();
    match options.mode {
        Mode::Sequential => {
            for url in requests.iter() {
                let request_start = Instant::now();
                let result = memo.get(url.clone()).await;
                recorder.record(url, request_start.elapsed(), &result)?;
            }
        }
        Mode::Concurrent => {
            let semaphore = Arc::new(Semaphore::new(config.concurrency));
            let tasks = requests.iter().cloned().map(|url| {
                let memo = Arc::clone(&memo);
                let recorder = Arc::clone(&recorder);
                let semaphore = Arc::clone(&semaphore);
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await?;
                    let request_start = Instant::now();
                    let result = memo.get(url.clone()).await;
                    recorder.record(&url, request_start.elapsed(), &result)?;
                    anyhow::Ok(())
                })
            });

            for task in futures::future::join_all(tasks).await {
                task.context("fetch task panicked")??;
            }
        }
    }
    let elapsed = start.elapsed();

    let report = Report {
        variant: format!("{:?}", options.variant).to_lowercase(),
        requests: requests.len(),
        failed: *recorder.failed.lock(),
        elapsed,
        stats: memo.stats(),
        latencies: Latencies::from_sketch(&recorder.durations.lock()),
    };
    report
        .print(options.format, &mut *recorder.out.lock())
        .context("failed to write report")?;

    Ok(report)
}

struct Recorder<W> {
    format: OutputFormat,
    out: Mutex<W>,
    durations: Mutex<DDSketch>,
    failed: Mutex<usize>,
}

impl<W: Write> Recorder<W> {
    fn record(
        &self,
        url: &Url,
        elapsed: Duration,
        result: &MemoResult<Bytes, FetchError>,
    ) -> Result<()> {
        self.durations.lock().add(elapsed.as_secs_f64());
        if let Err(err) = result {
            tracing::debug!(%url, error = %err, "request failed");
            *self.failed.lock() += 1;
        }

        Line::new(url, elapsed, result)
            .print(self.format, &mut *self.out.lock())
            .context("failed to write output")
    }
}
