//! Per-bundle dependency collection: shared flows, KVMs, target servers and
//! SSL references.

use tracing::debug;

use crate::analysis::relationships::ProxyRelationships;
use crate::models::{DependencyRecord, PolicyKind, ProxyBundle, TargetConnection};

/// Walk the relationships of `bundle` and collect its deployment dependencies.
///
/// Endpoints are visited in order; for each, its policies are collected
/// before its target endpoints. The first hosted or local target endpoint
/// encountered ends collection for the whole bundle, so anything that would
/// have been collected after it (later targets, later endpoints) is absent.
pub fn build_dependency_record(bundle: &ProxyBundle, relationships: &ProxyRelationships) -> DependencyRecord {
    let mut record = DependencyRecord::default();

    for (endpoint, related) in relationships {
        for policy_name in &related.policies {
            let Some(policy) = bundle.policies.get(policy_name) else {
                continue;
            };
            match &policy.kind {
                PolicyKind::FlowCallout {
                    shared_flow: Some(shared_flow),
                } => {
                    record.shared_flows.insert(shared_flow.clone());
                }
                PolicyKind::KeyValueMapOperations {
                    map_identifier: Some(map),
                } => {
                    record.kvms.insert(map.clone());
                }
                _ => {}
            }
        }

        for target_name in &related.target_endpoints {
            let Some(target) = bundle.targets.get(target_name) else {
                continue;
            };
            match &target.connection {
                connection if connection.is_opaque() => {
                    debug!(
                        proxy = %bundle.name,
                        endpoint = %endpoint,
                        target = %target_name,
                        "hosted or local target ends dependency collection"
                    );
                    return record;
                }
                TargetConnection::Http {
                    load_balancer: Some(servers),
                    ..
                } => {
                    record.target_servers.extend(servers.iter().cloned());
                }
                TargetConnection::Http {
                    load_balancer: None,
                    ssl: Some(ssl),
                    ..
                } => {
                    record.references.insert(ssl.clone());
                }
                _ => {}
            }
        }
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::relationships::EndpointRelationships;
    use crate::models::{Policy, SslReference, TargetEndpoint};

    fn bundle() -> ProxyBundle {
        let mut bundle = ProxyBundle {
            name: "orders".into(),
            ..ProxyBundle::default()
        };
        for (name, kind) in [
            (
                "callout",
                PolicyKind::FlowCallout {
                    shared_flow: Some("auth-sf".into()),
                },
            ),
            (
                "kvm",
                PolicyKind::KeyValueMapOperations {
                    map_identifier: Some("settings".into()),
                },
            ),
            (
                "other",
                PolicyKind::Unknown {
                    kind: "AssignMessage".into(),
                },
            ),
        ] {
            bundle.policies.insert(
                name.into(),
                Policy {
                    name: name.into(),
                    kind,
                },
            );
        }
        let targets = [
            (
                "lb",
                TargetConnection::Http {
                    url: None,
                    load_balancer: Some(vec!["ts-1".into(), "ts-2".into()]),
                    ssl: None,
                },
            ),
            (
                "ssl",
                TargetConnection::Http {
                    url: Some("https://backend".into()),
                    load_balancer: None,
                    ssl: Some(SslReference {
                        keystore: Some("ks".into()),
                        truststore: Some("ts".into()),
                    }),
                },
            ),
            ("hosted", TargetConnection::Hosted),
        ];
        for (name, connection) in targets {
            bundle.targets.insert(
                name.into(),
                TargetEndpoint {
                    name: name.into(),
                    connection,
                    ..TargetEndpoint::default()
                },
            );
        }
        bundle
    }

    fn related(policies: &[&str], targets: &[&str]) -> EndpointRelationships {
        EndpointRelationships {
            policies: policies.iter().map(|p| p.to_string()).collect(),
            base_path: None,
            target_endpoints: targets.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_collects_every_dependency_kind() {
        let mut relationships = ProxyRelationships::new();
        relationships.insert("default".into(), related(&["callout", "kvm", "other"], &["lb", "ssl"]));

        let record = build_dependency_record(&bundle(), &relationships);
        assert_eq!(record.shared_flows.iter().collect::<Vec<_>>(), vec!["auth-sf"]);
        assert_eq!(record.kvms.iter().collect::<Vec<_>>(), vec!["settings"]);
        assert_eq!(record.target_servers.iter().collect::<Vec<_>>(), vec!["ts-1", "ts-2"]);
        assert_eq!(record.references.len(), 1);
        assert!(!record.is_split);
    }

    #[test]
    fn test_hosted_target_stops_collection_for_whole_proxy() {
        let mut relationships = ProxyRelationships::new();
        relationships.insert("first".into(), related(&["kvm"], &["hosted", "lb"]));
        relationships.insert("second".into(), related(&["callout"], &["ssl"]));

        let record = build_dependency_record(&bundle(), &relationships);
        // Policies of the first endpoint were collected before the hosted target.
        assert_eq!(record.kvms.len(), 1);
        // Nothing after the hosted target is collected.
        assert!(record.target_servers.is_empty());
        assert!(record.shared_flows.is_empty());
        assert!(record.references.is_empty());
    }
}
