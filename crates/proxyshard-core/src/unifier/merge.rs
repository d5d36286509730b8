//! Merging a group of proxy endpoints into one synthetic endpoint.
//!
//! Every step, flow, fault rule and route rule taken from a member is gated
//! on the member's original base path, so the merged endpoint only runs a
//! member's logic for requests that member would have received.

use crate::errors::{ShardError, ShardResult};
use crate::models::{FaultRule, Flow, FlowSet, ProxyBundle, ProxyEndpoint, RouteRule, Step};
use crate::unifier::grouping::EndpointGroup;

/// Routing predicate matching requests under `base_path`.
pub fn path_condition(base_path: &str) -> String {
    format!("request.path Matches \"{base_path}*\"")
}

/// AND-combine an injected predicate with an existing condition.
///
/// Without an injected predicate the existing condition is kept as is.
pub fn inject_condition(existing: Option<&str>, injected: Option<&str>) -> Option<String> {
    let existing = existing.map(str::trim).filter(|c| !c.is_empty());
    match (injected, existing) {
        (None, existing) => existing.map(str::to_string),
        (Some(injected), None) => Some(injected.to_string()),
        (Some(injected), Some(existing)) => Some(format!("{injected} and {existing}")),
    }
}

fn gate_step(step: &Step, injected: Option<&str>) -> Step {
    Step {
        policy: step.policy.clone(),
        condition: inject_condition(step.condition.as_deref(), injected),
    }
}

fn gate_steps<'a>(steps: &'a [Step], injected: Option<&str>) -> impl Iterator<Item = Step> + 'a {
    let injected = injected.map(str::to_string);
    steps.iter().map(move |s| gate_step(s, injected.as_deref()))
}

fn gate_flow(flow: &Flow, injected: Option<&str>) -> Flow {
    Flow {
        name: flow.name.clone(),
        description: flow.description.clone(),
        condition: inject_condition(flow.condition.as_deref(), injected),
        request: gate_steps(&flow.request, injected).collect(),
        response: gate_steps(&flow.response, injected).collect(),
    }
}

fn gate_fault_rule(rule: &FaultRule, injected: Option<&str>) -> FaultRule {
    FaultRule {
        condition: inject_condition(rule.condition.as_deref(), injected),
        ..rule.clone()
    }
}

fn gate_route_rule(rule: &RouteRule, injected: Option<&str>) -> RouteRule {
    RouteRule {
        condition: inject_condition(rule.condition.as_deref(), injected),
        ..rule.clone()
    }
}

/// Append a member's flow steps into the merged flow of the same kind.
fn absorb(merged: &mut Option<Flow>, member: Option<&Flow>, kind: &str, injected: Option<&str>) {
    let Some(member) = member else {
        return;
    };
    let target = merged.get_or_insert_with(|| Flow::named(kind));
    target.request.extend(gate_steps(&member.request, injected));
    target.response.extend(gate_steps(&member.response, injected));
}

/// Merge the members of `group` into one endpoint.
///
/// Name, description, connection settings and the default fault rule come
/// from the first member; flows and rules are concatenated in member order.
/// The other members' default fault rules are dropped, and the splitter
/// prunes their policies unless something else still references them.
pub fn merge_endpoints(bundle: &ProxyBundle, group: &EndpointGroup) -> ShardResult<ProxyEndpoint> {
    let members = group
        .members
        .iter()
        .map(|name| {
            bundle.endpoints.get(name).ok_or_else(|| {
                ShardError::Split(format!(
                    "proxy '{}' has no endpoint '{name}' to merge",
                    bundle.name
                ))
            })
        })
        .collect::<ShardResult<Vec<_>>>()?;

    let first = members
        .first()
        .ok_or_else(|| ShardError::Split(format!("empty endpoint group for proxy '{}'", bundle.name)))?;

    let mut merged = ProxyEndpoint {
        name: members
            .iter()
            .map(|e| e.name.as_str())
            .collect::<Vec<_>>()
            .join("-"),
        description: first.description.clone(),
        base_path: group.base_path(),
        connection_extras: first.connection_extras.clone(),
        flows: FlowSet {
            pre_flow: Some(Flow::named("PreFlow")),
            post_flow: Some(Flow::named("PostFlow")),
            default_fault_rule: first.flows.default_fault_rule.clone(),
            ..FlowSet::default()
        },
        route_rules: Vec::new(),
    };

    for member in &members {
        let injected = member.base_path.as_deref().map(path_condition);
        let injected = injected.as_deref();
        let flows = &member.flows;

        absorb(&mut merged.flows.pre_flow, flows.pre_flow.as_ref(), "PreFlow", injected);
        absorb(&mut merged.flows.post_flow, flows.post_flow.as_ref(), "PostFlow", injected);
        absorb(
            &mut merged.flows.post_client_flow,
            flows.post_client_flow.as_ref(),
            "PostClientFlow",
            injected,
        );
        merged
            .flows
            .flows
            .extend(flows.flows.iter().map(|f| gate_flow(f, injected)));
        merged
            .flows
            .fault_rules
            .extend(flows.fault_rules.iter().map(|r| gate_fault_rule(r, injected)));
        merged
            .route_rules
            .extend(member.route_rules.iter().map(|r| gate_route_rule(r, injected)));
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(policy: &str, condition: Option<&str>) -> Step {
        Step {
            policy: policy.into(),
            condition: condition.map(str::to_string),
        }
    }

    fn endpoint(name: &str, base_path: Option<&str>, pre: Vec<Step>, route_condition: Option<&str>) -> ProxyEndpoint {
        let mut pre_flow = Flow::named("PreFlow");
        pre_flow.request = pre;
        ProxyEndpoint {
            name: name.into(),
            description: Some(format!("{name} endpoint")),
            base_path: base_path.map(str::to_string),
            flows: FlowSet {
                pre_flow: Some(pre_flow),
                ..FlowSet::default()
            },
            route_rules: vec![RouteRule {
                name: Some("default".into()),
                target_endpoint: Some("backend".into()),
                url: None,
                condition: route_condition.map(str::to_string),
            }],
            ..ProxyEndpoint::default()
        }
    }

    fn bundle(endpoints: Vec<ProxyEndpoint>) -> ProxyBundle {
        let mut bundle = ProxyBundle {
            name: "orders".into(),
            ..ProxyBundle::default()
        };
        for e in endpoints {
            bundle.endpoints.insert(e.name.clone(), e);
        }
        bundle
    }

    #[test]
    fn test_inject_condition_forms() {
        assert_eq!(
            inject_condition(None, Some(r#"request.path Matches "/a*""#)).as_deref(),
            Some(r#"request.path Matches "/a*""#)
        );
        assert_eq!(
            inject_condition(Some(r#"request.verb = "GET""#), Some(r#"request.path Matches "/a*""#)).as_deref(),
            Some(r#"request.path Matches "/a*" and request.verb = "GET""#)
        );
        assert_eq!(inject_condition(Some("  "), Some("x")).as_deref(), Some("x"));
        assert_eq!(inject_condition(Some("c"), None).as_deref(), Some("c"));
        assert_eq!(inject_condition(None, None), None);
    }

    #[test]
    fn test_merge_gates_member_steps_and_routes() {
        let b = bundle(vec![
            endpoint("a", Some("/orders/v1"), vec![step("p1", None)], None),
            endpoint(
                "b",
                Some("/orders/v2"),
                vec![step("p2", Some(r#"request.verb = "POST""#))],
                Some(r#"request.header.x = "1""#),
            ),
        ]);
        let group = EndpointGroup {
            key: Some("orders".into()),
            members: vec!["a".into(), "b".into()],
        };

        let merged = merge_endpoints(&b, &group).unwrap();
        assert_eq!(merged.name, "a-b");
        assert_eq!(merged.base_path.as_deref(), Some("/orders"));
        assert_eq!(merged.description.as_deref(), Some("a endpoint"));

        let pre = merged.flows.pre_flow.as_ref().unwrap();
        assert_eq!(
            pre.request[0].condition.as_deref(),
            Some(r#"request.path Matches "/orders/v1*""#)
        );
        assert_eq!(
            pre.request[1].condition.as_deref(),
            Some(r#"request.path Matches "/orders/v2*" and request.verb = "POST""#)
        );
        assert_eq!(merged.route_rules.len(), 2);
        assert_eq!(
            merged.route_rules[0].condition.as_deref(),
            Some(r#"request.path Matches "/orders/v1*""#)
        );
        assert_eq!(
            merged.route_rules[1].condition.as_deref(),
            Some(r#"request.path Matches "/orders/v2*" and request.header.x = "1""#)
        );
    }

    #[test]
    fn test_null_base_path_members_are_not_gated() {
        let b = bundle(vec![endpoint("n", None, vec![step("p", Some("c"))], None)]);
        let group = EndpointGroup {
            key: None,
            members: vec!["n".into()],
        };
        let merged = merge_endpoints(&b, &group).unwrap();
        assert_eq!(merged.base_path, None);
        let pre = merged.flows.pre_flow.as_ref().unwrap();
        assert_eq!(pre.request[0].condition.as_deref(), Some("c"));
        assert_eq!(merged.route_rules[0].condition, None);
    }

    #[test]
    fn test_conditional_flows_are_gated() {
        let mut a = endpoint("a", Some("/x"), vec![], None);
        let mut get = Flow::named("get");
        get.condition = Some(r#"request.verb = "GET""#.into());
        get.response.push(step("r", None));
        a.flows.flows.push(get);
        let b = bundle(vec![a]);
        let group = EndpointGroup {
            key: Some("x".into()),
            members: vec!["a".into()],
        };

        let merged = merge_endpoints(&b, &group).unwrap();
        let flow = &merged.flows.flows[0];
        assert_eq!(
            flow.condition.as_deref(),
            Some(r#"request.path Matches "/x*" and request.verb = "GET""#)
        );
        assert_eq!(flow.response[0].condition.as_deref(), Some(r#"request.path Matches "/x*""#));
    }

    #[test]
    fn test_unknown_member_is_split_error() {
        let b = bundle(vec![]);
        let group = EndpointGroup {
            key: None,
            members: vec!["ghost".into()],
        };
        assert!(matches!(merge_endpoints(&b, &group), Err(ShardError::Split(_))));
    }
}
