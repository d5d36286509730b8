//! Per-proxy processing with a bounded, retrying worker pool.
//!
//! Every proxy is parsed, analysed and (when oversized) split on its own;
//! tasks share nothing but the filesystem, where each one owns its output
//! subtree. Sharding runs afterwards, once, over the assembled map.

use std::collections::HashSet;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::analysis::{assess_bundle, build_dependency_record, extract_relationships};
use crate::bundle::parse_bundle;
use crate::config::{PipelineSettings, Settings, ShardingConfig};
use crate::errors::{ShardError, ShardResult};
use crate::inventory::Inventory;
use crate::models::{DependencyMap, DependencyRecord, ShardingResult};
use crate::sharding::shard_environments;
use crate::unifier::Unifier;

// ---------------------------------------------------------------------------
// Worker pool
// ---------------------------------------------------------------------------

/// How often, and how patiently, a failed task is retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
    pub backoff: u32,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
            backoff: 1,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay.saturating_mul(self.backoff.max(1).saturating_pow(attempt))
    }
}

impl From<&PipelineSettings> for RetryPolicy {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            delay: settings.retry_delay(),
            backoff: settings.backoff,
        }
    }
}

/// Result of one task after all retries.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Done(T),
    Failed { error: ShardError, attempts: u32 },
}

pub struct WorkerPool {
    workers: usize,
    retry: RetryPolicy,
}

impl WorkerPool {
    pub fn new(workers: usize, retry: RetryPolicy) -> Self {
        Self {
            workers: workers.max(1),
            retry,
        }
    }

    fn run_one<I, T, F>(&self, item: &I, task: &F) -> TaskOutcome<T>
    where
        I: Display,
        F: Fn(&I) -> ShardResult<T>,
    {
        let mut attempt = 0;
        loop {
            match task(item) {
                Ok(value) => return TaskOutcome::Done(value),
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(task = %item, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %e, "retrying task");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    error!(task = %item, attempts = attempt + 1, error = %e, "task failed");
                    return TaskOutcome::Failed {
                        error: e,
                        attempts: attempt + 1,
                    };
                }
            }
        }
    }

    /// Run `task` over every item, returning outcomes in item order.
    ///
    /// Falls back to sequential execution if the thread pool cannot be built.
    pub fn run<I, T, F>(&self, items: &[I], task: F) -> Vec<TaskOutcome<T>>
    where
        I: Display + Sync,
        T: Send,
        F: Fn(&I) -> ShardResult<T> + Sync,
    {
        if items.is_empty() {
            return vec![];
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build();

        match pool {
            Ok(pool) => pool.install(|| items.par_iter().map(|item| self.run_one(item, &task)).collect()),
            Err(e) => {
                warn!(error = %e, "thread pool unavailable, running sequentially");
                items.iter().map(|item| self.run_one(item, &task)).collect()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Dependency pipeline
// ---------------------------------------------------------------------------

/// Everything a run produces.
#[derive(Debug, Default, Serialize)]
pub struct AssessmentReport {
    pub dependencies: DependencyMap,
    pub sharding: IndexMap<String, ShardingResult>,
}

impl AssessmentReport {
    pub fn write(&self, path: &Path) -> ShardResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Names of the subdirectories of `source_dir` holding an `apiproxy` bundle, sorted.
pub fn discover_proxies(source_dir: &Path) -> ShardResult<Vec<String>> {
    let mut names: Vec<String> = std::fs::read_dir(source_dir)?
        .flatten()
        .filter(|entry| entry.path().join("apiproxy").is_dir())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    Ok(names)
}

pub struct DependencyPipeline {
    config: ShardingConfig,
    source_dir: PathBuf,
    unifier: Unifier,
    pool: WorkerPool,
}

impl DependencyPipeline {
    pub fn new(config: ShardingConfig, source_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>, pool: WorkerPool) -> Self {
        Self {
            config,
            source_dir: source_dir.into(),
            unifier: Unifier::new(config, output_dir),
            pool,
        }
    }

    /// Build a pipeline from validated settings.
    pub fn from_settings(settings: &Settings) -> ShardResult<Self> {
        let config = settings.sharding()?;
        Ok(Self::new(
            config,
            settings.unifier.source_unzipped_apis.clone(),
            settings.unifier.unifier_output_dir.clone(),
            WorkerPool::new(settings.pipeline.workers, RetryPolicy::from(&settings.pipeline)),
        ))
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// Parse, analyse and, when oversized, split one proxy.
    ///
    /// Returns the proxy's own record followed by one record per split output.
    /// Split outputs never take a name from `known_proxies`.
    pub fn process_proxy(
        &self,
        name: &str,
        known_proxies: &HashSet<String>,
    ) -> ShardResult<Vec<(String, DependencyRecord)>> {
        let bundle = parse_bundle(&self.source_dir.join(name).join("apiproxy"))?;
        let relationships = extract_relationships(&bundle);
        let qualification = assess_bundle(&bundle);

        if !self.unifier.needs_split(&bundle) {
            let mut record = build_dependency_record(&bundle, &relationships);
            record.qualification = qualification;
            return Ok(vec![(name.to_string(), record)]);
        }

        let outputs = self.unifier.split(&bundle, &relationships, known_proxies)?;
        let mut records = Vec::with_capacity(outputs.len() + 1);
        records.push((
            name.to_string(),
            DependencyRecord::split_parent(outputs.iter().map(|o| o.name.clone()).collect(), qualification),
        ));
        for output in outputs {
            let split = parse_bundle(&output.bundle_dir)?;
            let mut record = build_dependency_record(&split, &extract_relationships(&split));
            record.qualification = assess_bundle(&split);
            record.unifier_created = true;
            records.push((output.name, record));
        }
        Ok(records)
    }

    /// Process every named proxy in parallel.
    ///
    /// A proxy that still fails after its retries gets a placeholder record,
    /// as does one whose records would replace a record already in the map.
    pub fn build_dependency_map(&self, proxies: &[String]) -> DependencyMap {
        let started = Instant::now();
        let known: HashSet<String> = proxies.iter().cloned().collect();
        let outcomes = self.pool.run(proxies, |name| self.process_proxy(name, &known));

        let mut map = DependencyMap::new();
        let mut failed = 0usize;
        for (name, outcome) in proxies.iter().zip(outcomes) {
            match outcome {
                TaskOutcome::Done(records) => {
                    let taken = records
                        .iter()
                        .map(|(record, _)| record)
                        .find(|record| map.contains_key(*record))
                        .cloned();
                    if let Some(taken) = taken {
                        let error =
                            ShardError::Split(format!("proxy '{name}': record name '{taken}' is already in use"));
                        error!(proxy = %name, error = %error, "duplicate record name");
                        failed += 1;
                        map.entry(name.clone())
                            .or_insert_with(|| DependencyRecord::failed(error.to_string()));
                    } else {
                        map.extend(records);
                    }
                }
                TaskOutcome::Failed { error, .. } => {
                    failed += 1;
                    map.insert(name.clone(), DependencyRecord::failed(error.to_string()));
                }
            }
        }
        info!(
            proxies = proxies.len(),
            records = map.len(),
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "built dependency map"
        );
        map
    }

    /// Build the dependency map for the inventory's proxies (or every bundle
    /// under the source directory when the inventory lists none), then shard.
    pub fn run(&self, inventory: &Inventory) -> ShardResult<AssessmentReport> {
        let proxies = if inventory.proxies.is_empty() {
            discover_proxies(&self.source_dir)?
        } else {
            inventory.proxies.clone()
        };
        let dependencies = self.build_dependency_map(&proxies);
        let sharding = shard_environments(self.config, &dependencies, inventory)?;
        Ok(AssessmentReport {
            dependencies,
            sharding,
        })
    }
}
