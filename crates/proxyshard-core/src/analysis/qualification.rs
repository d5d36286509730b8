//! Qualification metrics reported alongside each dependency record.

use crate::models::{PolicyKind, ProxyBundle, Qualification, QuotaAntiPattern};

/// Assess the policies and base paths of `bundle`.
pub fn assess_bundle(bundle: &ProxyBundle) -> Qualification {
    let mut report = Qualification {
        base_paths: bundle.base_paths(),
        ..Qualification::default()
    };

    for (name, policy) in &bundle.policies {
        match &policy.kind {
            PolicyKind::Unsupported { kind } => {
                report.unsupported_policies.insert(name.clone(), kind.clone());
            }
            PolicyKind::ExtractVariables {
                json_variables: Some(count),
            } => {
                report.json_path_enabled.insert(name.clone(), *count);
            }
            PolicyKind::Quota {
                distributed,
                synchronous,
            } if distributed.as_deref() == Some("false") || synchronous.as_deref() == Some("true") => {
                report.anti_pattern_quota.insert(
                    name.clone(),
                    QuotaAntiPattern {
                        distributed: distributed.clone(),
                        synchronous: synchronous.clone(),
                    },
                );
            }
            PolicyKind::Cache {
                cache,
                has_expiry: false,
            } => {
                report
                    .cache_without_expiry
                    .insert(name.clone(), cache.as_str().to_string());
            }
            _ => {}
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CacheKind, Policy, ProxyEndpoint};

    fn with_policies(policies: Vec<(&str, PolicyKind)>) -> ProxyBundle {
        let mut bundle = ProxyBundle::default();
        for (name, kind) in policies {
            bundle.policies.insert(
                name.to_string(),
                Policy {
                    name: name.to_string(),
                    kind,
                },
            );
        }
        bundle
    }

    #[test]
    fn test_flags_each_metric() {
        let mut bundle = with_policies(vec![
            ("ldap", PolicyKind::Unsupported { kind: "Ldap".into() }),
            ("ev", PolicyKind::ExtractVariables { json_variables: Some(3) }),
            ("ev-plain", PolicyKind::ExtractVariables { json_variables: None }),
            (
                "quota-local",
                PolicyKind::Quota {
                    distributed: Some("false".into()),
                    synchronous: None,
                },
            ),
            (
                "quota-ok",
                PolicyKind::Quota {
                    distributed: Some("true".into()),
                    synchronous: Some("false".into()),
                },
            ),
            (
                "cache",
                PolicyKind::Cache {
                    cache: CacheKind::PopulateCache,
                    has_expiry: false,
                },
            ),
            (
                "cache-ok",
                PolicyKind::Cache {
                    cache: CacheKind::ResponseCache,
                    has_expiry: true,
                },
            ),
        ]);
        bundle.endpoints.insert(
            "default".into(),
            ProxyEndpoint {
                base_path: Some("/v1".into()),
                ..ProxyEndpoint::default()
            },
        );

        let report = assess_bundle(&bundle);
        assert_eq!(report.unsupported_policies["ldap"], "Ldap");
        assert_eq!(report.json_path_enabled.len(), 1);
        assert_eq!(report.json_path_enabled["ev"], 3);
        assert_eq!(report.anti_pattern_quota.keys().collect::<Vec<_>>(), vec!["quota-local"]);
        assert_eq!(report.cache_without_expiry.keys().collect::<Vec<_>>(), vec!["cache"]);
        assert_eq!(report.base_paths, vec![Some("/v1".to_string())]);
    }
}
