mod classifier;
mod cli;
mod config;
mod enumerate;
mod error;
mod normalize;
mod pipeline;
mod progress;
mod remediate;
mod screen;
mod untag;
mod verdict;

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use console::Style;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use classifier::{Backend, Classifier};
use cli::{Cli, Command};
use config::SieveConfig;
use normalize::ImageNormalizer;
use pipeline::Pipeline;
use progress::{IndicatifSink, print_summary};
use remediate::OutcomeResolver;
use screen::FilenameScreen;
use untag::Untagger;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.log_file.as_deref())?;

    let mut config = SieveConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;

    match cli.command {
        Command::Run {
            root,
            concurrency,
            provider,
            model,
            timeout,
            quarantine,
            no_progress,
            json,
        } => {
            if let Some(n) = concurrency {
                config.max_concurrency = n;
            }
            if let Some(provider) = provider {
                config.set_provider(provider.into());
            }
            if let Some(model) = model {
                config.classifier.model = model;
            }
            if let Some(secs) = timeout {
                config.timeout_secs = secs;
            }
            if let Some(folder) = quarantine {
                config.quarantine_folder = folder;
            }
            config.validate()?;
            config.require_api_key()?;
            run_sieve(&root, &config, !no_progress, json).await
        }
        Command::Count { root } => {
            config.validate()?;
            let quarantine = root.join(&config.quarantine_folder);
            let pending = enumerate::enumerate(&root, &quarantine, &config.approval_marker).count();
            println!("{pending} image(s) awaiting review under {}", root.display());
            Ok(())
        }
        Command::Untag { root, dry_run } => {
            let untagger = Untagger::with_marker(&config.approval_marker)
                .context("invalid approval marker")?;
            let report = untagger.run(&root, dry_run);

            let dim = Style::new().dim();
            if dry_run {
                for change in &report.changes {
                    println!(
                        "  {} {} {}",
                        change.from.display(),
                        dim.apply_to("→"),
                        change.to.display()
                    );
                }
            }
            let verb = if dry_run { "would rename" } else { "renamed" };
            println!(
                "scanned {}, {verb} {}, unchanged {}, errors {}",
                report.scanned, report.renamed, report.unchanged, report.errors
            );
            Ok(())
        }
    }
}

async fn run_sieve(root: &Path, config: &SieveConfig, progress: bool, json: bool) -> Result<()> {
    let backend =
        Backend::from_config(&config.classifier).context("failed to build classifier client")?;
    info!(
        backend = backend.name(),
        model = %config.classifier.model,
        root = %root.display(),
        "starting"
    );

    let quarantine = root.join(&config.quarantine_folder);
    let screen = if config.screen_filenames {
        FilenameScreen::new(config.filename_indicators.iter().cloned())
    } else {
        FilenameScreen::disabled()
    };

    let mut pipeline = Pipeline::new(
        backend,
        config.pipeline_settings(),
        OutcomeResolver::new(&quarantine, &config.approval_marker),
    )
    .with_normalizer(Arc::new(ImageNormalizer::new(config.payload_budget_bytes)))
    .with_screen(screen);
    if progress {
        pipeline = pipeline.with_progress(Arc::new(IndicatifSink::new()));
    }

    let cancel = pipeline.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, waiting for in-flight calls to finish");
            cancel.cancel();
        }
    });

    let items = enumerate::enumerate(root, &quarantine, &config.approval_marker);
    let summary = pipeline.run(items).await;
    print_summary(&summary, json);
    Ok(())
}

fn setup_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let default = if verbose { "picsieve=info,warn" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}
