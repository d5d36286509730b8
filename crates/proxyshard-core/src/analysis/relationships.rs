//! Relationship extraction: which policies and target endpoints each proxy
//! endpoint pulls in.
//!
//! The output drives both splitting (which files a split output must keep)
//! and dependency collection.

use indexmap::IndexMap;
use serde::Serialize;

use crate::models::{Flow, FlowSet, ProxyBundle, ProxyEndpoint};

/// Policies, base path and routed targets of one proxy endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EndpointRelationships {
    /// Distinct policy names, in first-reference order: the endpoint's own
    /// steps first, then those of each routed target endpoint.
    pub policies: Vec<String>,
    pub base_path: Option<String>,
    /// Target endpoint names from route rules, in rule order, deduplicated.
    pub target_endpoints: Vec<String>,
}

/// Proxy endpoint name → relationships, in endpoint order.
pub type ProxyRelationships = IndexMap<String, EndpointRelationships>;

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

/// Policy references from PreFlow, PostFlow, conditional flows and the
/// default fault rule.
fn collect_flow_policies(flows: &FlowSet, into: &mut Vec<String>) {
    let pipeline = flows
        .pre_flow
        .iter()
        .chain(flows.post_flow.iter())
        .chain(flows.flows.iter())
        .flat_map(Flow::steps);
    let default_rule = flows.default_fault_rule.iter().flat_map(|r| r.steps.iter());
    for step in pipeline.chain(default_rule) {
        push_unique(into, &step.policy);
    }
}

/// Relationships of a single proxy endpoint within `bundle`.
pub fn endpoint_relationships(bundle: &ProxyBundle, endpoint: &ProxyEndpoint) -> EndpointRelationships {
    let mut target_endpoints = Vec::new();
    for rule in &endpoint.route_rules {
        if let Some(target) = &rule.target_endpoint {
            push_unique(&mut target_endpoints, target);
        }
    }

    let mut policies = Vec::new();
    collect_flow_policies(&endpoint.flows, &mut policies);
    for name in &target_endpoints {
        if let Some(target) = bundle.targets.get(name) {
            collect_flow_policies(&target.flows, &mut policies);
        }
    }

    EndpointRelationships {
        policies,
        base_path: endpoint.base_path.clone(),
        target_endpoints,
    }
}

/// Relationships for every proxy endpoint of `bundle`.
pub fn extract_relationships(bundle: &ProxyBundle) -> ProxyRelationships {
    bundle
        .endpoints
        .iter()
        .map(|(name, endpoint)| (name.clone(), endpoint_relationships(bundle, endpoint)))
        .collect()
}
