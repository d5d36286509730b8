//! Base-path grouping of proxy endpoints.

use indexmap::IndexMap;

use crate::analysis::ProxyRelationships;

/// Group key used for endpoints without a base path.
pub const NULL_GROUP: &str = "_null_";

/// Endpoints that end up merged into a single split output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointGroup {
    /// First non-empty base-path segment shared by the members; `None` for
    /// endpoints without a base path, `Some("")` for endpoints at `/`.
    pub key: Option<String>,
    /// Proxy endpoint names, in original order.
    pub members: Vec<String>,
}

impl EndpointGroup {
    /// Base path of the merged endpoint.
    pub fn base_path(&self) -> Option<String> {
        self.key.as_ref().map(|key| format!("/{key}"))
    }

    /// Human-readable key for logs and manifests.
    pub fn label(&self) -> &str {
        self.key.as_deref().unwrap_or(NULL_GROUP)
    }
}

/// First non-empty path segment, or `""` for a path with no segment.
pub fn group_key(base_path: &str) -> &str {
    base_path.split('/').find(|s| !s.is_empty()).unwrap_or("")
}

/// Group endpoints by base-path prefix, then chunk any group larger than
/// `threshold` into pieces of at most `threshold` members.
///
/// Groups appear in order of their first member; a zero threshold is
/// treated as one.
pub fn plan_groups(relationships: &ProxyRelationships, threshold: usize) -> Vec<EndpointGroup> {
    let mut grouped: IndexMap<Option<String>, Vec<String>> = IndexMap::new();
    for (endpoint, related) in relationships {
        let key = related.base_path.as_deref().map(|bp| group_key(bp).to_string());
        grouped.entry(key).or_default().push(endpoint.clone());
    }

    let chunk = threshold.max(1);
    grouped
        .into_iter()
        .flat_map(|(key, members)| {
            members
                .chunks(chunk)
                .map(|piece| EndpointGroup {
                    key: key.clone(),
                    members: piece.to_vec(),
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::EndpointRelationships;

    fn relationships(endpoints: &[(&str, Option<&str>)]) -> ProxyRelationships {
        endpoints
            .iter()
            .map(|(name, bp)| {
                (
                    name.to_string(),
                    EndpointRelationships {
                        base_path: bp.map(str::to_string),
                        ..EndpointRelationships::default()
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_group_key_takes_first_segment() {
        assert_eq!(group_key("/orders/v1"), "orders");
        assert_eq!(group_key("//orders"), "orders");
        assert_eq!(group_key("/"), "");
    }

    #[test]
    fn test_groups_by_prefix_and_null() {
        let rel = relationships(&[
            ("a", Some("/orders/v1")),
            ("b", None),
            ("c", Some("/users")),
            ("d", Some("/orders/v2")),
            ("e", Some("/")),
        ]);
        let groups = plan_groups(&rel, 5);
        let summary: Vec<(&str, Vec<&str>)> = groups
            .iter()
            .map(|g| (g.label(), g.members.iter().map(String::as_str).collect()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("orders", vec!["a", "d"]),
                (NULL_GROUP, vec!["b"]),
                ("users", vec!["c"]),
                ("", vec!["e"]),
            ]
        );
        assert_eq!(groups[0].base_path().as_deref(), Some("/orders"));
        assert_eq!(groups[1].base_path(), None);
        assert_eq!(groups[3].base_path().as_deref(), Some("/"));
    }

    #[test]
    fn test_large_group_is_chunked_preserving_order() {
        let names: Vec<String> = (0..7).map(|i| format!("ep{i}")).collect();
        let endpoints: Vec<(&str, Option<&str>)> =
            names.iter().map(|n| (n.as_str(), Some("/api/x"))).collect();
        let groups = plan_groups(&relationships(&endpoints), 3);

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].members, vec!["ep0", "ep1", "ep2"]);
        assert_eq!(groups[2].members, vec!["ep6"]);
        let flattened: Vec<&String> = groups.iter().flat_map(|g| &g.members).collect();
        assert_eq!(flattened.len(), 7);
        assert!(groups.iter().all(|g| g.key.as_deref() == Some("api")));
    }
}
