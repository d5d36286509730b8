//! Serialization of typed endpoints and root descriptors back into XML trees.

use crate::bundle::xml::XmlElement;
use crate::models::{FaultRule, Flow, FlowSet, ProxyEndpoint, RouteRule, Step};

fn text_child(name: &str, text: &str) -> XmlElement {
    XmlElement::new(name).with_text(text)
}

fn push_optional(parent: &mut XmlElement, name: &str, value: Option<&str>) {
    if let Some(value) = value {
        parent.children.push(text_child(name, value));
    }
}

fn step_element(step: &Step) -> XmlElement {
    let mut element = XmlElement::new("Step").with_child(text_child("Name", &step.policy));
    push_optional(&mut element, "Condition", step.condition.as_deref());
    element
}

fn steps_container(name: &str, steps: &[Step]) -> XmlElement {
    let mut container = XmlElement::new(name);
    container.children.extend(steps.iter().map(step_element));
    container
}

fn flow_element(tag: &str, flow: &Flow) -> XmlElement {
    let mut element = XmlElement::new(tag);
    if let Some(name) = &flow.name {
        element.set_attr("name", name.as_str());
    }
    push_optional(&mut element, "Description", flow.description.as_deref());
    element.children.push(steps_container("Request", &flow.request));
    element.children.push(steps_container("Response", &flow.response));
    push_optional(&mut element, "Condition", flow.condition.as_deref());
    element
}

fn fault_rule_element(tag: &str, rule: &FaultRule) -> XmlElement {
    let mut element = XmlElement::new(tag);
    if let Some(name) = &rule.name {
        element.set_attr("name", name.as_str());
    }
    element.children.extend(rule.steps.iter().map(step_element));
    push_optional(&mut element, "AlwaysEnforce", rule.always_enforce.as_deref());
    push_optional(&mut element, "Condition", rule.condition.as_deref());
    element
}

fn route_rule_element(rule: &RouteRule) -> XmlElement {
    let mut element = XmlElement::new("RouteRule");
    if let Some(name) = &rule.name {
        element.set_attr("name", name.as_str());
    }
    push_optional(&mut element, "TargetEndpoint", rule.target_endpoint.as_deref());
    push_optional(&mut element, "URL", rule.url.as_deref());
    push_optional(&mut element, "Condition", rule.condition.as_deref());
    element
}

fn push_flow_set(parent: &mut XmlElement, flows: &FlowSet) {
    let mut fault_rules = XmlElement::new("FaultRules");
    fault_rules
        .children
        .extend(flows.fault_rules.iter().map(|r| fault_rule_element("FaultRule", r)));
    parent.children.push(fault_rules);

    if let Some(rule) = &flows.default_fault_rule {
        parent.children.push(fault_rule_element("DefaultFaultRule", rule));
    }
    if let Some(flow) = &flows.pre_flow {
        parent.children.push(flow_element("PreFlow", flow));
    }
    if let Some(flow) = &flows.post_flow {
        parent.children.push(flow_element("PostFlow", flow));
    }
    if let Some(flow) = &flows.post_client_flow {
        parent.children.push(flow_element("PostClientFlow", flow));
    }

    let mut conditional = XmlElement::new("Flows");
    conditional
        .children
        .extend(flows.flows.iter().map(|f| flow_element("Flow", f)));
    parent.children.push(conditional);
}

/// Build the `<ProxyEndpoint>` document for an endpoint.
pub fn proxy_endpoint_element(endpoint: &ProxyEndpoint) -> XmlElement {
    let mut root = XmlElement::new("ProxyEndpoint").with_attr("name", endpoint.name.as_str());
    push_optional(&mut root, "Description", endpoint.description.as_deref());
    push_flow_set(&mut root, &endpoint.flows);

    let mut connection = XmlElement::new("HTTPProxyConnection");
    push_optional(&mut connection, "BasePath", endpoint.base_path.as_deref());
    connection.children.extend(endpoint.connection_extras.iter().cloned());
    root.children.push(connection);

    root.children
        .extend(endpoint.route_rules.iter().map(route_rule_element));
    root
}

/// Contents of a rewritten root descriptor.
#[derive(Clone, Debug, Default)]
pub struct DescriptorContents<'a> {
    pub name: &'a str,
    pub base_path: Option<&'a str>,
    pub proxy_endpoints: &'a [String],
    pub target_endpoints: &'a [String],
    pub policies: &'a [String],
}

fn list_element(section: &str, item: &str, names: &[String]) -> XmlElement {
    let mut element = XmlElement::new(section);
    element
        .children
        .extend(names.iter().map(|n| text_child(item, n)));
    element
}

/// Rewrite a root descriptor for a derived bundle.
///
/// Everything in `template` other than the name, base paths and object
/// lists is preserved in place; lists that were absent are appended.
pub fn rewrite_descriptor(template: &XmlElement, contents: &DescriptorContents<'_>) -> XmlElement {
    let mut root = template.clone();
    root.set_attr("name", contents.name);

    let basepaths = XmlElement::new("Basepaths");
    let basepaths = match contents.base_path {
        Some(bp) => basepaths.with_text(bp),
        None => basepaths,
    };
    let sections = [
        ("Basepaths", basepaths),
        (
            "Policies",
            list_element("Policies", "Policy", contents.policies),
        ),
        (
            "ProxyEndpoints",
            list_element("ProxyEndpoints", "ProxyEndpoint", contents.proxy_endpoints),
        ),
        (
            "TargetEndpoints",
            list_element("TargetEndpoints", "TargetEndpoint", contents.target_endpoints),
        ),
    ];

    for (section, replacement) in sections {
        match root.children.iter().position(|c| c.name == section) {
            Some(index) => {
                root.children[index] = replacement;
                // Drop any duplicate sections after the first.
                let mut seen = false;
                root.children.retain(|c| {
                    if c.name != section {
                        return true;
                    }
                    let keep = !seen;
                    seen = true;
                    keep
                });
            }
            None => root.children.push(replacement),
        }
    }
    root
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::parser::parse_proxy_endpoint;
    use crate::bundle::xml::{parse_document, to_document};

    fn sample_endpoint() -> ProxyEndpoint {
        let mut pre = Flow::named("PreFlow");
        pre.request.push(Step {
            policy: "verify".into(),
            condition: Some(r#"request.path Matches "/a*""#.into()),
        });
        let mut get = Flow::named("get");
        get.condition = Some(r#"request.verb = "GET""#.into());
        get.response.push(Step {
            policy: "log".into(),
            condition: None,
        });
        ProxyEndpoint {
            name: "a-b".into(),
            description: Some("merged".into()),
            base_path: Some("/a".into()),
            connection_extras: vec![XmlElement::new("VirtualHost").with_text("secure")],
            flows: FlowSet {
                pre_flow: Some(pre),
                post_flow: Some(Flow::named("PostFlow")),
                flows: vec![get],
                default_fault_rule: Some(FaultRule {
                    name: Some("all".into()),
                    always_enforce: Some("true".into()),
                    ..FaultRule::default()
                }),
                ..FlowSet::default()
            },
            route_rules: vec![RouteRule {
                name: Some("default".into()),
                target_endpoint: Some("backend".into()),
                url: None,
                condition: Some(r#"request.path Matches "/a*""#.into()),
            }],
        }
    }

    #[test]
    fn test_endpoint_survives_render_and_reparse() {
        let endpoint = sample_endpoint();
        let rendered = to_document(&proxy_endpoint_element(&endpoint)).unwrap();
        let reparsed = parse_proxy_endpoint(&parse_document(&rendered).unwrap(), "ignored");
        assert_eq!(reparsed, endpoint);
    }

    #[test]
    fn test_connection_keeps_base_path_first() {
        let element = proxy_endpoint_element(&sample_endpoint());
        let connection = element.child("HTTPProxyConnection").unwrap();
        let names: Vec<&str> = connection.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["BasePath", "VirtualHost"]);
    }

    #[test]
    fn test_rewrite_descriptor_replaces_lists_and_name() {
        let template = parse_document(
            r#"<APIProxy name="orders" revision="3">
                <Basepaths>/orders</Basepaths>
                <Description>keep me</Description>
                <Policies><Policy>a</Policy><Policy>b</Policy></Policies>
                <ProxyEndpoints><ProxyEndpoint>x</ProxyEndpoint></ProxyEndpoints>
            </APIProxy>"#,
        )
        .unwrap();
        let policies = vec!["a".to_string()];
        let endpoints = vec!["x-y".to_string()];
        let targets = vec!["backend".to_string()];
        let rewritten = rewrite_descriptor(
            &template,
            &DescriptorContents {
                name: "orders-1",
                base_path: Some("/v1"),
                proxy_endpoints: &endpoints,
                target_endpoints: &targets,
                policies: &policies,
            },
        );

        assert_eq!(rewritten.attr("name"), Some("orders-1"));
        assert_eq!(rewritten.attr("revision"), Some("3"));
        assert_eq!(rewritten.child_text("Basepaths"), Some("/v1"));
        assert_eq!(rewritten.child_text("Description"), Some("keep me"));
        assert_eq!(rewritten.child("Policies").unwrap().child_texts("Policy"), vec!["a"]);
        assert_eq!(
            rewritten.child("ProxyEndpoints").unwrap().child_texts("ProxyEndpoint"),
            vec!["x-y"]
        );
        assert_eq!(
            rewritten.child("TargetEndpoints").unwrap().child_texts("TargetEndpoint"),
            vec!["backend"]
        );
    }
}
