//! Greedy environment sharder.
//!
//! Candidates are packed into slots in lexicographic order. Each sweep opens
//! one slot and runs four passes over the remaining candidates:
//!
//! 1. union fit: any proxy whose shared flows still fit once merged in;
//! 2. shared-flow reuse: proxies whose shared flows the slot already has;
//! 3. target-server reuse: proxies without shared flows whose target servers
//!    the slot already has;
//! 4. dependency-free proxies.
//!
//! Every pass applies the same capacity check, so a slot never holds more
//! than the proxy limit, nor more proxies plus shared flows than the unit
//! limit. The result depends only on the candidate set, never on input order.
//!
//! That check only gets stricter as a slot fills, and union fit already
//! admits every candidate that passes it. Passes 2 to 4 are kept so the
//! pass order stays that of the established packing procedure, but under
//! the current check they never place a proxy.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::config::ShardingConfig;
use crate::models::{DependencyRecord, EnvironmentSlot, ShardingResult};

/// The dependency view the sharder needs for one proxy.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub shared_flows: BTreeSet<String>,
    pub target_servers: BTreeSet<String>,
}

impl Candidate {
    pub fn from_record(name: &str, record: &DependencyRecord) -> Self {
        Self {
            name: name.to_string(),
            shared_flows: record.shared_flows.clone(),
            target_servers: record.target_servers.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pass {
    UnionFit,
    SharedFlowReuse,
    TargetServerReuse,
    DependencyFree,
}

const PASSES: [Pass; 4] = [
    Pass::UnionFit,
    Pass::SharedFlowReuse,
    Pass::TargetServerReuse,
    Pass::DependencyFree,
];

pub struct EnvironmentSharder {
    config: ShardingConfig,
}

impl EnvironmentSharder {
    pub fn new(config: ShardingConfig) -> Self {
        Self { config }
    }

    /// Whether `candidate` can join `slot` without breaking either limit.
    fn fits(&self, slot: &EnvironmentSlot, candidate: &Candidate) -> bool {
        let proxies = slot.proxy_names.len();
        let shared_flows = slot.shared_flow_names.union(&candidate.shared_flows).count();
        proxies < self.config.per_env_proxy_limit
            && proxies + shared_flows < self.config.total_units_per_env
    }

    fn admits(&self, pass: Pass, slot: &EnvironmentSlot, candidate: &Candidate) -> bool {
        let eligible = match pass {
            Pass::UnionFit => true,
            Pass::SharedFlowReuse => candidate.shared_flows.is_subset(&slot.shared_flow_names),
            Pass::TargetServerReuse => {
                candidate.shared_flows.is_empty()
                    && candidate.target_servers.is_subset(&slot.target_server_names)
            }
            Pass::DependencyFree => {
                candidate.shared_flows.is_empty() && candidate.target_servers.is_empty()
            }
        };
        eligible && self.fits(slot, candidate)
    }

    /// Run one pass, moving admitted candidates into `slot`.
    fn run_pass(&self, pass: Pass, slot: &mut EnvironmentSlot, remaining: Vec<Candidate>) -> Vec<Candidate> {
        let mut rejected = Vec::with_capacity(remaining.len());
        for candidate in remaining {
            if self.admits(pass, slot, &candidate) {
                slot.proxy_names.push(candidate.name);
                slot.shared_flow_names.extend(candidate.shared_flows);
                slot.target_server_names.extend(candidate.target_servers);
            } else {
                rejected.push(candidate);
            }
        }
        rejected
    }

    /// Pack one environment's candidates into slots named `<env><n>`.
    pub fn shard(&self, env: &str, candidates: Vec<Candidate>) -> ShardingResult {
        let mut candidates = candidates;
        candidates.sort_by(|a, b| a.name.cmp(&b.name));
        candidates.dedup_by(|a, b| a.name == b.name);

        let max_shared_flows = self.config.total_units_per_env.saturating_sub(1);
        let mut not_processed = BTreeSet::new();
        let mut remaining: Vec<Candidate> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if candidate.shared_flows.len() > max_shared_flows {
                debug!(env, proxy = %candidate.name, shared_flows = candidate.shared_flows.len(), "proxy cannot fit any slot");
                not_processed.insert(candidate.name);
            } else {
                remaining.push(candidate);
            }
        }

        let mut slots = IndexMap::new();
        let mut slot_counter = 0usize;
        while !remaining.is_empty() {
            slot_counter += 1;
            let mut slot = EnvironmentSlot::default();
            for pass in PASSES {
                remaining = self.run_pass(pass, &mut slot, remaining);
            }

            if slot.proxy_names.is_empty() {
                warn!(env, left = remaining.len(), "no proxy fits an empty slot; leaving the rest unprocessed");
                not_processed.extend(remaining.drain(..).map(|c| c.name));
                break;
            }
            debug!(
                env,
                slot = slot_counter,
                proxies = slot.proxy_names.len(),
                shared_flows = slot.shared_flow_names.len(),
                "filled slot"
            );
            slots.insert(format!("{env}{slot_counter}"), slot);
        }

        ShardingResult {
            slots,
            not_processed,
        }
    }
}
