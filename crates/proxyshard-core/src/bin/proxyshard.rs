//! `proxyshard` command line: assess exported proxy bundles and plan their
//! distribution across environments.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::filter::EnvFilter;

use proxyshard_core::bundle::archive::unpack_bundles;
use proxyshard_core::models::DependencyMap;
use proxyshard_core::sharding::shard_environments;
use proxyshard_core::{AssessmentReport, DependencyPipeline, Inventory, Settings};

#[derive(Parser)]
#[command(name = "proxyshard", version, about = "Split oversized API proxies and shard them across environments")]
#[command(propagate_version = true)]
struct Cli {
    /// Settings file (TOML). Defaults apply when omitted.
    #[arg(short, long, global = true, env = "PROXYSHARD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse, split and analyse every bundle, then shard each environment.
    Assess {
        /// Export metadata JSON listing proxies per environment.
        #[arg(short, long)]
        export: Option<PathBuf>,

        /// Directory of exported `*.zip` bundles to unpack before processing.
        #[arg(short, long)]
        zips: Option<PathBuf>,

        /// Environment name used when no export metadata is given.
        #[arg(long, default_value = "default")]
        env: String,

        /// Report output path; overrides the settings file.
        #[arg(short, long)]
        report: Option<PathBuf>,
    },
    /// Re-shard environments from the dependencies of an existing report.
    Shard {
        /// Report previously written by `assess`.
        #[arg(short, long)]
        from: PathBuf,

        /// Export metadata JSON listing proxies per environment.
        #[arg(short, long)]
        export: PathBuf,

        /// Report output path; overrides the settings file.
        #[arg(short, long)]
        report: Option<PathBuf>,
    },
}

#[derive(Deserialize)]
struct SavedReport {
    dependencies: DependencyMap,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("PROXYSHARD_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => Settings::load(path).with_context(|| format!("loading settings from {}", path.display())),
        None => {
            let mut settings = Settings::default();
            settings.apply_env_overrides()?;
            Ok(settings)
        }
    }
}

fn write_report(report: &AssessmentReport, path: &Path) -> Result<()> {
    report
        .write(path)
        .with_context(|| format!("writing report to {}", path.display()))?;
    info!(path = %path.display(), "report written");
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;
    // Limits are validated before any bundle is touched.
    let config = settings.sharding()?;

    match cli.command {
        Command::Assess {
            export,
            zips,
            env,
            report,
        } => {
            let pipeline = DependencyPipeline::from_settings(&settings)?;
            if let Some(zips) = zips {
                unpack_bundles(&zips, pipeline.source_dir())
                    .with_context(|| format!("unpacking bundles from {}", zips.display()))?;
            }

            let inventory = match export {
                Some(path) => Inventory::load(&path)?,
                None => {
                    let proxies = proxyshard_core::pipeline::discover_proxies(pipeline.source_dir())
                        .with_context(|| format!("listing bundles in {}", pipeline.source_dir().display()))?;
                    Inventory::single_environment(&env, proxies)
                }
            };

            let result = pipeline.run(&inventory)?;
            write_report(&result, &report.unwrap_or(settings.paths.report_file))
        }
        Command::Shard { from, export, report } => {
            let raw = std::fs::read_to_string(&from).with_context(|| format!("reading {}", from.display()))?;
            let saved: SavedReport =
                serde_json::from_str(&raw).with_context(|| format!("parsing {}", from.display()))?;
            let inventory = Inventory::load(&export)?;
            let sharding = shard_environments(config, &saved.dependencies, &inventory)?;

            let result = AssessmentReport {
                dependencies: saved.dependencies,
                sharding,
            };
            write_report(&result, &report.unwrap_or(settings.paths.report_file))
        }
    }
}
