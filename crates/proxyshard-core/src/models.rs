//! Shared typed models used across parsing, analysis, splitting and sharding.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::bundle::xml::XmlElement;

/// Policy kinds the target platform cannot run.
pub const UNSUPPORTED_POLICY_KINDS: &[&str] = &[
    "OAuthV1",
    "ConcurrentRatelimit",
    "ConnectorCallout",
    "StatisticsCollector",
    "DeleteOAuthV1Info",
    "GetOAuthV1Info",
    "Ldap",
];

// ---------------------------------------------------------------------------
// Flow structure
// ---------------------------------------------------------------------------

/// A single policy invocation inside a flow.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Step {
    pub policy: String,
    pub condition: Option<String>,
}

/// A named request/response step pipeline, optionally conditional.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Flow {
    pub name: Option<String>,
    pub description: Option<String>,
    pub condition: Option<String>,
    pub request: Vec<Step>,
    pub response: Vec<Step>,
}

impl Flow {
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.request.iter().chain(self.response.iter())
    }
}

/// A fault rule (or the default fault rule) with its own steps.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FaultRule {
    pub name: Option<String>,
    pub condition: Option<String>,
    pub always_enforce: Option<String>,
    pub steps: Vec<Step>,
}

/// Routing from a proxy endpoint to a target endpoint (or a bare URL).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteRule {
    pub name: Option<String>,
    pub target_endpoint: Option<String>,
    pub url: Option<String>,
    pub condition: Option<String>,
}

/// The flow pipeline shared by proxy and target endpoints.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowSet {
    pub pre_flow: Option<Flow>,
    pub post_flow: Option<Flow>,
    /// Only proxy endpoints carry a post-client flow.
    pub post_client_flow: Option<Flow>,
    pub flows: Vec<Flow>,
    pub fault_rules: Vec<FaultRule>,
    pub default_fault_rule: Option<FaultRule>,
}

impl FlowSet {
    /// Every step in the pipeline, wherever it lives.
    pub fn all_steps(&self) -> impl Iterator<Item = &Step> {
        self.pre_flow
            .iter()
            .chain(self.post_flow.iter())
            .chain(self.post_client_flow.iter())
            .chain(self.flows.iter())
            .flat_map(Flow::steps)
            .chain(self.fault_rules.iter().flat_map(|r| r.steps.iter()))
            .chain(self.default_fault_rule.iter().flat_map(|r| r.steps.iter()))
    }
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// One HTTP entry point of a proxy.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub name: String,
    pub description: Option<String>,
    pub base_path: Option<String>,
    /// `HTTPProxyConnection` children other than `BasePath`, kept verbatim.
    pub connection_extras: Vec<XmlElement>,
    pub flows: FlowSet,
    pub route_rules: Vec<RouteRule>,
}

/// SSL keystore/truststore reference of a target connection.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SslReference {
    pub keystore: Option<String>,
    pub truststore: Option<String>,
}

/// How a target endpoint reaches its backend.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TargetConnection {
    Http {
        url: Option<String>,
        /// `None` when no `LoadBalancer` element exists at all.
        load_balancer: Option<Vec<String>>,
        ssl: Option<SslReference>,
    },
    /// Platform-hosted target; no server or SSL dependency is extractable.
    Hosted,
    /// Proxy chaining to a local proxy; no server or SSL dependency is extractable.
    Local { api_proxy: Option<String>, path: Option<String> },
    #[default]
    Unspecified,
}

impl TargetConnection {
    /// Hosted and local targets hide their backend from dependency extraction.
    pub fn is_opaque(&self) -> bool {
        matches!(self, TargetConnection::Hosted | TargetConnection::Local { .. })
    }
}

/// One backend leg of a proxy.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TargetEndpoint {
    pub name: String,
    pub flows: FlowSet,
    pub connection: TargetConnection,
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// Cache policy flavours relevant to qualification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheKind {
    PopulateCache,
    ResponseCache,
}

impl CacheKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::PopulateCache => "PopulateCache",
            CacheKind::ResponseCache => "ResponseCache",
        }
    }
}

/// Closed set of policy shapes consumed by dependency extraction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyKind {
    FlowCallout { shared_flow: Option<String> },
    KeyValueMapOperations { map_identifier: Option<String> },
    /// `json_variables` is `None` when the policy has no `JSONPayload`.
    ExtractVariables { json_variables: Option<usize> },
    Quota { distributed: Option<String>, synchronous: Option<String> },
    Cache { cache: CacheKind, has_expiry: bool },
    Unsupported { kind: String },
    Unknown { kind: String },
}

/// A parsed policy document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Policy {
    pub name: String,
    pub kind: PolicyKind,
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// One deployable unit read from an `apiproxy` directory.
#[derive(Clone, Debug, Default)]
pub struct ProxyBundle {
    pub name: String,
    /// The `apiproxy` directory the bundle was read from.
    pub root_dir: PathBuf,
    /// The root descriptor file inside `root_dir`.
    pub descriptor_path: PathBuf,
    /// The root descriptor as read, used as the template for split outputs.
    pub descriptor: XmlElement,
    /// Keyed by declared name (the document file stem), in declaration order.
    pub endpoints: IndexMap<String, ProxyEndpoint>,
    pub targets: IndexMap<String, TargetEndpoint>,
    pub policies: IndexMap<String, Policy>,
}

impl ProxyBundle {
    /// Base path of every proxy endpoint, in endpoint order.
    pub fn base_paths(&self) -> Vec<Option<String>> {
        self.endpoints.values().map(|e| e.base_path.clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// Dependency records
// ---------------------------------------------------------------------------

/// Quota settings flagged as an anti-pattern.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaAntiPattern {
    pub distributed: Option<String>,
    pub synchronous: Option<String>,
}

/// Per-bundle metrics consumed by qualification reporting.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qualification {
    pub unsupported_policies: BTreeMap<String, String>,
    pub json_path_enabled: BTreeMap<String, usize>,
    pub anti_pattern_quota: BTreeMap<String, QuotaAntiPattern>,
    pub cache_without_expiry: BTreeMap<String, String>,
    pub base_paths: Vec<Option<String>>,
}

/// Dependencies of one proxy or one split output.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRecord {
    pub shared_flows: BTreeSet<String>,
    pub kvms: BTreeSet<String>,
    pub target_servers: BTreeSet<String>,
    pub references: BTreeSet<SslReference>,
    pub is_split: bool,
    pub split_output_names: Vec<String>,
    /// Set on records describing a bundle synthesized by the unifier.
    #[serde(default)]
    pub unifier_created: bool,
    #[serde(default)]
    pub qualification: Qualification,
    /// Why the proxy could not be processed; the record is a placeholder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DependencyRecord {
    /// Placeholder for a proxy whose processing failed.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Record for a proxy that was split; dependencies live on the outputs.
    pub fn split_parent(split_output_names: Vec<String>, qualification: Qualification) -> Self {
        Self {
            is_split: true,
            split_output_names,
            qualification,
            ..Self::default()
        }
    }
}

/// Proxy (or split output) name → dependency record, in processing order.
pub type DependencyMap = IndexMap<String, DependencyRecord>;

// ---------------------------------------------------------------------------
// Sharding
// ---------------------------------------------------------------------------

/// One capacity-bounded deployment slot inside a target environment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSlot {
    pub proxy_names: Vec<String>,
    pub shared_flow_names: BTreeSet<String>,
    pub target_server_names: BTreeSet<String>,
}

impl EnvironmentSlot {
    /// Deployment units consumed: proxies plus distinct shared flows.
    pub fn units(&self) -> usize {
        self.proxy_names.len() + self.shared_flow_names.len()
    }
}

/// Deployment plan for one source environment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardingResult {
    pub slots: IndexMap<String, EnvironmentSlot>,
    pub not_processed: BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(name: &str) -> Step {
        Step {
            policy: name.to_string(),
            condition: None,
        }
    }

    #[test]
    fn test_flow_set_all_steps_covers_every_section() {
        let mut pre = Flow::named("PreFlow");
        pre.request.push(step("a"));
        let mut post = Flow::named("PostFlow");
        post.response.push(step("b"));
        let mut conditional = Flow::named("get");
        conditional.request.push(step("c"));
        let set = FlowSet {
            pre_flow: Some(pre),
            post_flow: Some(post),
            post_client_flow: None,
            flows: vec![conditional],
            fault_rules: vec![FaultRule {
                steps: vec![step("d")],
                ..FaultRule::default()
            }],
            default_fault_rule: Some(FaultRule {
                steps: vec![step("e")],
                ..FaultRule::default()
            }),
        };
        let names: Vec<&str> = set.all_steps().map(|s| s.policy.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_opaque_target_connections() {
        assert!(TargetConnection::Hosted.is_opaque());
        assert!(TargetConnection::Local {
            api_proxy: None,
            path: Some("/x".into())
        }
        .is_opaque());
        assert!(!TargetConnection::Unspecified.is_opaque());
    }

    #[test]
    fn test_failed_record_is_unsplit_and_empty() {
        let record = DependencyRecord::failed("boom");
        assert!(!record.is_split);
        assert!(record.shared_flows.is_empty());
        assert!(record.split_output_names.is_empty());
        assert_eq!(record.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_dependency_record_json_omits_missing_error() {
        let json = serde_json::to_value(DependencyRecord::default()).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["is_split"], serde_json::Value::Bool(false));
    }
}
