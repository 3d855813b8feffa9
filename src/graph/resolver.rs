//! Reference resolution.
//!
//! Walks every property tree, checks each reference marker against the
//! deployment, and turns markers into dependency edges.

use std::collections::BTreeSet;

use crate::error::PlanError;
use crate::model::{AttributeRef, Deployment, Properties, PropertyValue, ResolvedProperties};

/// A resolved dependency edge: `source` consumes `attribute` of `target`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    /// Resource holding the reference.
    pub source: String,
    /// Resource being referenced.
    pub target: String,
    /// Output attribute consumed.
    pub attribute: String,
}

/// Resolves reference markers into dependency edges.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceResolver;

impl ReferenceResolver {
    /// Creates a new resolver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Resolves every reference in the deployment.
    ///
    /// Edges are deduplicated: two markers for the same attribute of the same
    /// target count once. Self-references are returned as edges; the graph
    /// builder reports them as cycles.
    ///
    /// # Errors
    ///
    /// - [`PlanError::UnknownReference`] if a target is not declared
    /// - [`PlanError::InvalidAttribute`] if the target kind lacks the attribute
    pub fn resolve(&self, deployment: &Deployment) -> Result<BTreeSet<Reference>, PlanError> {
        let mut edges = BTreeSet::new();

        for node in deployment.nodes() {
            for (path, marker) in crate::model::references_in(&node.properties) {
                let Some(target) = deployment.get(&marker.node) else {
                    return Err(PlanError::UnknownReference {
                        source_id: node.id.clone(),
                        target: marker.node,
                        path,
                    });
                };

                if !target.kind.exposes(&marker.attribute) {
                    return Err(PlanError::InvalidAttribute {
                        source_id: node.id.clone(),
                        target: marker.node,
                        kind: target.kind.to_string(),
                        attribute: marker.attribute,
                        available: target.kind.attributes().join(", "),
                    });
                }

                edges.insert(Reference {
                    source: node.id.clone(),
                    target: marker.node,
                    attribute: marker.attribute,
                });
            }
        }

        tracing::debug!(
            deployment = deployment.id(),
            edges = edges.len(),
            "Resolved references"
        );

        Ok(edges)
    }
}

/// Substitutes every reference with the value returned by `lookup`.
///
/// # Errors
///
/// Returns the first reference `lookup` has no value for.
pub fn substitute<F>(properties: &Properties, lookup: F) -> Result<ResolvedProperties, AttributeRef>
where
    F: Fn(&AttributeRef) -> Option<String>,
{
    properties
        .iter()
        .map(|(key, value)| substitute_value(value, &lookup).map(|v| (key.clone(), v)))
        .collect()
}

fn substitute_value<F>(value: &PropertyValue, lookup: &F) -> Result<serde_json::Value, AttributeRef>
where
    F: Fn(&AttributeRef) -> Option<String>,
{
    use serde_json::Value;

    Ok(match value {
        PropertyValue::Reference(marker) => {
            Value::String(lookup(marker).ok_or_else(|| marker.clone())?)
        }
        PropertyValue::List(items) => Value::Array(
            items
                .iter()
                .map(|item| substitute_value(item, lookup))
                .collect::<Result<_, _>>()?,
        ),
        PropertyValue::Map(map) => Value::Object(
            map.iter()
                .map(|(k, v)| substitute_value(v, lookup).map(|v| (k.clone(), v)))
                .collect::<Result<_, _>>()?,
        ),
        literal => Value::from(literal.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceKind;

    fn deployment_with_service(service_yaml: &str) -> Deployment {
        let mut deployment = Deployment::new("demo");
        deployment
            .define_resource(
                ResourceKind::Network,
                "vpc",
                serde_yaml::from_str("is_default: true").unwrap(),
            )
            .unwrap();
        deployment
            .define_resource(
                ResourceKind::Service,
                "web",
                serde_yaml::from_str(service_yaml).unwrap(),
            )
            .unwrap();
        deployment
    }

    #[test]
    fn test_resolve_collects_unique_edges() {
        let deployment = deployment_with_service(
            r"
service_name: web
network: { ref: vpc.id }
task_definition: { ref: vpc.id }
security_groups: [{ ref: vpc.cidr }]
",
        );
        let edges = ReferenceResolver::new().resolve(&deployment).unwrap();

        assert_eq!(edges.len(), 2);
        assert!(edges.iter().all(|e| e.source == "web" && e.target == "vpc"));
    }

    #[test]
    fn test_unknown_target_reported_with_path() {
        let deployment = deployment_with_service(
            r"
service_name: web
network: { ref: vpc.id }
task_definition: { ref: missing-task.arn }
",
        );
        let err = ReferenceResolver::new().resolve(&deployment).unwrap_err();

        match err {
            PlanError::UnknownReference {
                source_id,
                target,
                path,
            } => {
                assert_eq!(source_id, "web");
                assert_eq!(target, "missing-task");
                assert_eq!(path, "task_definition");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unexposed_attribute_rejected() {
        let deployment = deployment_with_service(
            r"
service_name: web
network: { ref: vpc.arn }
task_definition: task
",
        );
        let err = ReferenceResolver::new().resolve(&deployment).unwrap_err();

        assert!(matches!(
            err,
            PlanError::InvalidAttribute { ref attribute, ref available, .. }
                if attribute == "arn" && available == "id, cidr"
        ));
    }

    #[test]
    fn test_substitute_nested_values() {
        let properties: Properties = serde_yaml::from_str(
            r"
cpu: 256
task_role: { ref: app-role.arn }
containers:
  - name: web
    environment: { ROLE: { ref: app-role.name } }
",
        )
        .unwrap();

        let resolved = substitute(&properties, |r| Some(format!("<{r}>"))).unwrap();

        assert_eq!(resolved["cpu"], 256);
        assert_eq!(resolved["task_role"], "<app-role.arn>");
        assert_eq!(
            resolved["containers"][0]["environment"]["ROLE"],
            "<app-role.name>"
        );

        let missing = substitute(&properties, |_| None).unwrap_err();
        assert_eq!(missing.node, "app-role");
    }
}
