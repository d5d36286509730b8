//! Environment sharding across every environment in the inventory.

pub mod packer;

use indexmap::IndexMap;
use tracing::{info, warn};

use crate::config::ShardingConfig;
use crate::errors::{ShardError, ShardResult};
use crate::inventory::Inventory;
use crate::models::{DependencyMap, DependencyRecord, ShardingResult};

pub use packer::{Candidate, EnvironmentSharder};

fn lookup<'a>(map: &'a DependencyMap, env: &str, name: &str) -> ShardResult<&'a DependencyRecord> {
    map.get(name).ok_or_else(|| {
        ShardError::Sharding(format!(
            "environment '{env}' deploys '{name}', which has no dependency record"
        ))
    })
}

/// Candidates for one environment, with split proxies replaced by their outputs.
///
/// Proxies whose record carries an error are left out; they stay in the
/// dependency map but never occupy a slot.
pub fn environment_candidates(map: &DependencyMap, env: &str, proxies: &[String]) -> ShardResult<Vec<Candidate>> {
    let mut candidates = Vec::with_capacity(proxies.len());
    for name in proxies {
        let record = lookup(map, env, name)?;
        if let Some(error) = &record.error {
            warn!(env = %env, proxy = %name, error = %error, "skipping failed proxy");
            continue;
        }
        if record.is_split {
            for output in &record.split_output_names {
                candidates.push(Candidate::from_record(output, lookup(map, env, output)?));
            }
        } else {
            candidates.push(Candidate::from_record(name, record));
        }
    }
    Ok(candidates)
}

/// Shard every environment of `inventory` against the dependency map.
///
/// Fails before packing anything if an environment names a proxy (or split
/// output) the map has no record for.
pub fn shard_environments(
    config: ShardingConfig,
    map: &DependencyMap,
    inventory: &Inventory,
) -> ShardResult<IndexMap<String, ShardingResult>> {
    let prepared = inventory
        .environments
        .iter()
        .map(|(env, proxies)| {
            environment_candidates(map, env, proxies).map(|candidates| (env.clone(), candidates))
        })
        .collect::<ShardResult<Vec<_>>>()?;

    let sharder = EnvironmentSharder::new(config);
    let mut results = IndexMap::with_capacity(prepared.len());
    for (env, candidates) in prepared {
        let result = sharder.shard(&env, candidates);
        info!(
            env = %env,
            slots = result.slots.len(),
            not_processed = result.not_processed.len(),
            "sharded environment"
        );
        results.insert(env, result);
    }
    Ok(results)
}
