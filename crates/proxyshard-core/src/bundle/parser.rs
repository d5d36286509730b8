//! Bundle parser: reads an `apiproxy` directory into a [`ProxyBundle`].
//!
//! The root descriptor lists proxy endpoints, target endpoints and policies.
//! When a list is empty the corresponding subdirectory is enumerated instead,
//! which tolerates exports whose descriptor is stale relative to their files.
//! Each named document is parsed independently; any missing or malformed
//! document fails the whole bundle, never just the one object.

use std::path::Path;

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::bundle::filesystem::{
    document_path, find_descriptor, list_documents, POLICIES_DIR, PROXIES_DIR, TARGETS_DIR,
};
use crate::bundle::xml::{read_document, XmlElement};
use crate::errors::{ShardError, ShardResult};
use crate::models::{
    CacheKind, FaultRule, Flow, FlowSet, Policy, PolicyKind, ProxyBundle, ProxyEndpoint,
    RouteRule, SslReference, Step, TargetConnection, TargetEndpoint, UNSUPPORTED_POLICY_KINDS,
};

// ---------------------------------------------------------------------------
// Flow structure
// ---------------------------------------------------------------------------

fn parse_steps(container: Option<&XmlElement>) -> Vec<Step> {
    let Some(container) = container else {
        return vec![];
    };
    container
        .children_named("Step")
        .filter_map(|step| {
            step.child_text("Name").map(|name| Step {
                policy: name.to_string(),
                condition: step.child_text("Condition").map(str::to_string),
            })
        })
        .collect()
}

pub(crate) fn parse_flow(element: &XmlElement) -> Flow {
    Flow {
        name: element.attr("name").map(str::to_string),
        description: element.child_text("Description").map(str::to_string),
        condition: element.child_text("Condition").map(str::to_string),
        request: parse_steps(element.child("Request")),
        response: parse_steps(element.child("Response")),
    }
}

fn parse_fault_rule(element: &XmlElement) -> FaultRule {
    FaultRule {
        name: element.attr("name").map(str::to_string),
        condition: element.child_text("Condition").map(str::to_string),
        always_enforce: element.child_text("AlwaysEnforce").map(str::to_string),
        steps: parse_steps(Some(element)),
    }
}

fn parse_flow_set(element: &XmlElement) -> FlowSet {
    FlowSet {
        pre_flow: element.child("PreFlow").map(parse_flow),
        post_flow: element.child("PostFlow").map(parse_flow),
        post_client_flow: element.child("PostClientFlow").map(parse_flow),
        flows: element
            .children_named("Flows")
            .flat_map(|flows| flows.children_named("Flow"))
            .map(parse_flow)
            .collect(),
        fault_rules: element
            .children_named("FaultRules")
            .flat_map(|rules| rules.children_named("FaultRule"))
            .map(parse_fault_rule)
            .collect(),
        default_fault_rule: element.child("DefaultFaultRule").map(parse_fault_rule),
    }
}

fn parse_route_rule(element: &XmlElement) -> RouteRule {
    RouteRule {
        name: element.attr("name").map(str::to_string),
        target_endpoint: element.child_text("TargetEndpoint").map(str::to_string),
        url: element.child_text("URL").map(str::to_string),
        condition: element.child_text("Condition").map(str::to_string),
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

fn expect_root<'a>(element: &'a XmlElement, expected: &str, path: &Path) -> ShardResult<&'a XmlElement> {
    if element.name == expected {
        Ok(element)
    } else {
        Err(ShardError::Parse(format!(
            "{}: expected <{expected}> root, found <{}>",
            path.display(),
            element.name
        )))
    }
}

fn read_named_document(dir: &Path, name: &str, kind: &str) -> ShardResult<(XmlElement, std::path::PathBuf)> {
    let path = document_path(dir, name);
    if !path.is_file() {
        return Err(ShardError::MissingReference(format!(
            "{kind} '{name}' has no document at {}",
            path.display()
        )));
    }
    Ok((read_document(&path)?, path))
}

pub fn parse_proxy_endpoint(element: &XmlElement, declared_name: &str) -> ProxyEndpoint {
    let connection = element.child("HTTPProxyConnection");
    ProxyEndpoint {
        name: element.attr("name").unwrap_or(declared_name).to_string(),
        description: element.child_text("Description").map(str::to_string),
        base_path: connection
            .and_then(|c| c.child_text("BasePath"))
            .map(str::to_string),
        connection_extras: connection
            .map(|c| {
                c.children
                    .iter()
                    .filter(|child| child.name != "BasePath")
                    .cloned()
                    .collect()
            })
            .unwrap_or_default(),
        flows: parse_flow_set(element),
        route_rules: element.children_named("RouteRule").map(parse_route_rule).collect(),
    }
}

fn parse_target_connection(element: &XmlElement) -> TargetConnection {
    if element.child("HostedTarget").is_some() {
        return TargetConnection::Hosted;
    }
    if let Some(local) = element.child("LocalTargetConnection") {
        return TargetConnection::Local {
            api_proxy: local.child_text("APIProxy").map(str::to_string),
            path: local.child_text("Path").map(str::to_string),
        };
    }
    match element.child("HTTPTargetConnection") {
        Some(http) => TargetConnection::Http {
            url: http.child_text("URL").map(str::to_string),
            load_balancer: http.child("LoadBalancer").map(|lb| {
                lb.children_named("Server")
                    .filter_map(|server| server.attr("name"))
                    .map(str::to_string)
                    .collect()
            }),
            ssl: http.child("SSLInfo").map(|ssl| SslReference {
                keystore: ssl.child_text("KeyStore").map(str::to_string),
                truststore: ssl.child_text("TrustStore").map(str::to_string),
            }),
        },
        None => TargetConnection::Unspecified,
    }
}

pub fn parse_target_endpoint(element: &XmlElement, declared_name: &str) -> TargetEndpoint {
    TargetEndpoint {
        name: element.attr("name").unwrap_or(declared_name).to_string(),
        flows: parse_flow_set(element),
        connection: parse_target_connection(element),
    }
}

/// Classify a policy document by its root element.
pub fn classify_policy(element: &XmlElement) -> PolicyKind {
    match element.name.as_str() {
        "FlowCallout" => PolicyKind::FlowCallout {
            shared_flow: element.child_text("SharedFlowBundle").map(str::to_string),
        },
        "KeyValueMapOperations" => PolicyKind::KeyValueMapOperations {
            map_identifier: element.attr("mapIdentifier").map(str::to_string),
        },
        "ExtractVariables" => PolicyKind::ExtractVariables {
            json_variables: element
                .child("JSONPayload")
                .map(|payload| payload.children_named("Variable").count()),
        },
        "Quota" => PolicyKind::Quota {
            distributed: element.child_text("Distributed").map(str::to_string),
            synchronous: element.child_text("Synchronous").map(str::to_string),
        },
        "PopulateCache" | "ResponseCache" => PolicyKind::Cache {
            cache: if element.name == "PopulateCache" {
                CacheKind::PopulateCache
            } else {
                CacheKind::ResponseCache
            },
            has_expiry: element
                .child("ExpirySettings")
                .map(XmlElement::has_content)
                .unwrap_or(false),
        },
        other if UNSUPPORTED_POLICY_KINDS.contains(&other) => PolicyKind::Unsupported {
            kind: other.to_string(),
        },
        other => PolicyKind::Unknown {
            kind: other.to_string(),
        },
    }
}

// ---------------------------------------------------------------------------
// Root descriptor
// ---------------------------------------------------------------------------

/// Declared object names from a descriptor section, or the filesystem
/// listing of `dir` when the section is empty.
fn declared_or_listed(
    descriptor: &XmlElement,
    section: &str,
    item: &str,
    dir: &Path,
    bundle: &str,
) -> Vec<String> {
    let declared: Vec<String> = descriptor
        .children_named(section)
        .flat_map(|s| s.child_texts(item))
        .collect();
    if declared.is_empty() {
        info!(proxy = %bundle, section, "descriptor lists nothing, falling back to filesystem");
        list_documents(dir)
    } else {
        declared
    }
}

/// Check the bundle invariant: every step names an existing policy and every
/// route rule names an existing target endpoint.
pub fn validate_references(bundle: &ProxyBundle) -> ShardResult<()> {
    let endpoint_steps = bundle
        .endpoints
        .values()
        .flat_map(|e| e.flows.all_steps().map(move |s| (e.name.as_str(), s)));
    let target_steps = bundle
        .targets
        .values()
        .flat_map(|t| t.flows.all_steps().map(move |s| (t.name.as_str(), s)));

    for (owner, step) in endpoint_steps.chain(target_steps) {
        if !bundle.policies.contains_key(&step.policy) {
            return Err(ShardError::MissingReference(format!(
                "proxy '{}': '{owner}' references unknown policy '{}'",
                bundle.name, step.policy
            )));
        }
    }

    for endpoint in bundle.endpoints.values() {
        for target in endpoint.route_rules.iter().filter_map(|r| r.target_endpoint.as_ref()) {
            if !bundle.targets.contains_key(target) {
                return Err(ShardError::MissingReference(format!(
                    "proxy '{}': '{}' routes to unknown target endpoint '{target}'",
                    bundle.name, endpoint.name
                )));
            }
        }
    }
    Ok(())
}

/// Parse the `apiproxy` directory at `dir`.
pub fn parse_bundle(dir: &Path) -> ShardResult<ProxyBundle> {
    let descriptor_path = find_descriptor(dir)?;
    let descriptor = read_document(&descriptor_path)?;
    expect_root(&descriptor, "APIProxy", &descriptor_path)?;

    let name = descriptor
        .attr("name")
        .map(str::to_string)
        .or_else(|| {
            descriptor_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
        })
        .unwrap_or_default();

    let proxies_dir = dir.join(PROXIES_DIR);
    let targets_dir = dir.join(TARGETS_DIR);
    let policies_dir = dir.join(POLICIES_DIR);

    let mut endpoints: IndexMap<String, ProxyEndpoint> = IndexMap::new();
    for declared in declared_or_listed(&descriptor, "ProxyEndpoints", "ProxyEndpoint", &proxies_dir, &name) {
        if endpoints.contains_key(&declared) {
            return Err(ShardError::Parse(format!(
                "proxy '{name}': proxy endpoint '{declared}' is declared more than once"
            )));
        }
        let (element, path) = read_named_document(&proxies_dir, &declared, "proxy endpoint")?;
        let element = expect_root(&element, "ProxyEndpoint", &path)?;
        let endpoint = parse_proxy_endpoint(element, &declared);
        if let Some((other, _)) = endpoints.iter().find(|(_, e)| e.name == endpoint.name) {
            return Err(ShardError::Parse(format!(
                "proxy '{name}': proxy endpoints '{other}' and '{declared}' are both named '{}'",
                endpoint.name
            )));
        }
        endpoints.insert(declared, endpoint);
    }

    let mut targets = IndexMap::new();
    for declared in declared_or_listed(&descriptor, "TargetEndpoints", "TargetEndpoint", &targets_dir, &name) {
        let (element, path) = read_named_document(&targets_dir, &declared, "target endpoint")?;
        let element = expect_root(&element, "TargetEndpoint", &path)?;
        targets.insert(declared.clone(), parse_target_endpoint(element, &declared));
    }

    let mut policies = IndexMap::new();
    for declared in declared_or_listed(&descriptor, "Policies", "Policy", &policies_dir, &name) {
        let (element, _) = read_named_document(&policies_dir, &declared, "policy")?;
        policies.insert(
            declared.clone(),
            Policy {
                name: declared,
                kind: classify_policy(&element),
            },
        );
    }

    let bundle = ProxyBundle {
        name,
        root_dir: dir.to_path_buf(),
        descriptor_path,
        descriptor,
        endpoints,
        targets,
        policies,
    };
    validate_references(&bundle)?;

    debug!(
        proxy = %bundle.name,
        endpoints = bundle.endpoints.len(),
        targets = bundle.targets.len(),
        policies = bundle.policies.len(),
        "parsed bundle"
    );
    Ok(bundle)
}
