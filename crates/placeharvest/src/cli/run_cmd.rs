//! `placeharvest run`: extract every place listed in an input file.

use super::input;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use placeharvest::acquisition::{Gateway, WebGateway};
use placeharvest::config::{parse_proxy_list, HarvestConfig};
use placeharvest::pipeline::{Pipeline, RunStats};
use placeharvest::record::DatasetEntry;
use placeharvest::renderer::chromium::ChromiumRendererFactory;
use placeharvest::renderer::{NoopRendererFactory, RendererFactory};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::Instrument;

/// Flags of the `run` subcommand. Unset values keep the configured ones.
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub reviews: bool,
    pub images: bool,
    pub proxies: Vec<String>,
    pub proxy_file: Option<PathBuf>,
    pub locale: Option<String>,
    pub max_results: Option<usize>,
    pub query: String,
    pub headful: bool,
}

pub async fn run(args: RunArgs, quiet: bool) -> Result<()> {
    let config = resolve_config(&args)?;
    let selectors = Arc::new(config.selectors()?);
    let places = input::read_places(&args.input, &args.query)?;

    let factory: Arc<dyn RendererFactory> = match ChromiumRendererFactory::detect() {
        Some(factory) => Arc::new(factory),
        None => {
            tracing::warn!("Chromium not found, running without the full-render path");
            Arc::new(NoopRendererFactory)
        }
    };
    let gateway = Arc::new(WebGateway::new(
        config.gateway_options(),
        Arc::clone(&selectors),
        factory,
    ));
    let pipeline = Pipeline::new(config, Arc::clone(&gateway) as Arc<dyn Gateway>, selectors)?;

    let progress = if quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(places.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?
                .progress_chars("=> "),
        );
        pb
    };

    let sink = open_output(args.output.as_deref())?;
    let (tx, rx) = mpsc::channel::<DatasetEntry>(256);
    let writer = tokio::spawn(write_entries(rx, sink, progress.clone()));

    let run_id = uuid::Uuid::new_v4();
    tracing::info!(%run_id, places = places.len(), "starting run");
    let stats = pipeline
        .run(futures::stream::iter(places), tx)
        .instrument(tracing::info_span!("run", %run_id))
        .await;
    let written = writer.await.context("output writer panicked")??;
    gateway.shutdown().await;
    progress.finish_and_clear();

    if !quiet {
        print_summary(&stats, written, args.output.as_deref());
    }
    Ok(())
}

/// Load the configuration file and apply command-line overrides on top.
pub fn resolve_config(args: &RunArgs) -> Result<HarvestConfig> {
    let mut config = HarvestConfig::load(args.config.as_deref())?;
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.request_timeout_ms = timeout_ms;
    }
    if args.reviews {
        config.include_reviews = true;
    }
    if args.images {
        config.include_images = true;
    }
    if args.headful {
        config.headless = false;
    }
    if let Some(locale) = &args.locale {
        config.locale = Some(locale.clone());
    }
    if let Some(max_results) = args.max_results {
        config.max_results = Some(max_results);
    }
    if let Some(path) = &args.proxy_file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read proxy file {}", path.display()))?;
        config.proxies.extend(parse_proxy_list(&text));
    }
    config.proxies.extend(args.proxies.iter().cloned());
    config.validate()?;
    Ok(config)
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write + Send>> {
    match path {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            Ok(Box::new(std::io::BufWriter::new(file)))
        }
        None => Ok(Box::new(std::io::BufWriter::new(std::io::stdout()))),
    }
}

/// Drain the sink into JSON lines. Returns the number of entries written.
async fn write_entries(
    mut rx: mpsc::Receiver<DatasetEntry>,
    mut out: Box<dyn Write + Send>,
    progress: ProgressBar,
) -> Result<u64> {
    let mut written = 0u64;
    let mut failures = 0u64;
    while let Some(entry) = rx.recv().await {
        if entry.is_failure() {
            failures += 1;
        }
        let line = serde_json::to_string(&entry)?;
        writeln!(out, "{line}").context("failed to write output")?;
        written += 1;
        progress.inc(1);
        progress.set_message(format!("{failures} failed"));
    }
    out.flush().context("failed to flush output")?;
    Ok(written)
}

fn print_summary(stats: &RunStats, written: u64, output: Option<&Path>) {
    eprintln!();
    eprintln!("  Extracted:   {}", stats.succeeded);
    eprintln!(
        "  Failed:      {} (no name {}, transient {}, challenged {})",
        stats.content_failures + stats.transient_failures + stats.challenge_failures,
        stats.content_failures,
        stats.transient_failures,
        stats.challenge_failures
    );
    eprintln!("  Duplicates:  {}", stats.duplicates);
    if stats.over_limit > 0 {
        eprintln!("  Over limit:  {}", stats.over_limit);
    }
    eprintln!(
        "  Retries:     {} ({} challenges, {} identities retired)",
        stats.retries, stats.challenges, stats.identities_retired
    );
    match output {
        Some(path) => eprintln!("  Wrote {written} entries to {}", path.display()),
        None => eprintln!("  Wrote {written} entries"),
    }
    eprintln!("  Took {:.1}s", stats.elapsed_ms as f64 / 1000.0);
}
