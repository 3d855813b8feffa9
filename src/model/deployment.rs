//! Deployment root and resource nodes.

use std::collections::HashMap;

use crate::config::StackConfig;
use crate::error::PlanError;

use super::kind::ResourceKind;
use super::property::Properties;
use super::schema;

/// A declared resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNode {
    /// Unique id within the deployment.
    pub id: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Declared properties, references unresolved.
    pub properties: Properties,
    /// Declaration order, zero-based.
    pub position: usize,
}

/// The root container of all declared resources.
///
/// Nodes are kept in declaration order; every later stage breaks ties by
/// that order, so the same input always yields the same plan.
#[derive(Debug, Clone, Default)]
pub struct Deployment {
    id: String,
    nodes: Vec<ResourceNode>,
    index: HashMap<String, usize>,
}

impl Deployment {
    /// Creates an empty deployment.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Builds a deployment from every resource in a configuration.
    ///
    /// # Errors
    ///
    /// Returns the first [`PlanError`] raised by [`Self::define_resource`].
    pub fn from_config(config: &StackConfig) -> Result<Self, PlanError> {
        let mut deployment = Self::new(config.deployment_id());
        for resource in &config.resources {
            deployment.define_resource(resource.kind, &resource.id, resource.properties.clone())?;
        }
        Ok(deployment)
    }

    /// Adds a resource node.
    ///
    /// # Errors
    ///
    /// - [`PlanError::DuplicateId`] if the id is already declared
    /// - [`PlanError::InvalidId`] if the id breaks the naming rules
    /// - [`PlanError::SchemaValidation`] listing every violated field
    pub fn define_resource(
        &mut self,
        kind: ResourceKind,
        id: &str,
        properties: Properties,
    ) -> Result<&ResourceNode, PlanError> {
        if self.index.contains_key(id) {
            return Err(PlanError::DuplicateId { id: id.to_string() });
        }

        validate_id(id)?;

        let violations = schema::validate(kind, &properties);
        if !violations.is_empty() {
            return Err(PlanError::SchemaValidation {
                id: id.to_string(),
                kind: kind.to_string(),
                violations,
            });
        }

        let position = self.nodes.len();
        self.index.insert(id.to_string(), position);
        self.nodes.push(ResourceNode {
            id: id.to_string(),
            kind,
            properties,
            position,
        });

        Ok(&self.nodes[position])
    }

    /// Deployment id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Looks up a node by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ResourceNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Nodes in declaration order.
    #[must_use]
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    /// Returns true if the id is declared.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Number of declared nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no resource is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn validate_id(id: &str) -> Result<(), PlanError> {
    let invalid = |reason: &str| PlanError::InvalidId {
        id: id.to_string(),
        reason: reason.to_string(),
    };

    let Some(first) = id.chars().next() else {
        return Err(invalid("id cannot be empty"));
    };

    if !first.is_ascii_alphabetic() {
        return Err(invalid("id must start with a letter"));
    }

    if id.len() > 128 {
        return Err(invalid("id must be at most 128 characters"));
    }

    if let Some(c) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(invalid(&format!(
            "'{c}' is not allowed (letters, digits, '-' and '_' only)"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PropertyValue;

    fn network() -> Properties {
        Properties::from([(String::from("is_default"), PropertyValue::from(true))])
    }

    #[test]
    fn test_define_keeps_declaration_order() {
        let mut deployment = Deployment::new("demo");
        deployment
            .define_resource(ResourceKind::Network, "vpc", network())
            .unwrap();
        let node = deployment
            .define_resource(ResourceKind::Network, "backup-vpc", network())
            .unwrap();

        assert_eq!(node.position, 1);
        assert_eq!(deployment.len(), 2);
        assert_eq!(deployment.nodes()[0].id, "vpc");
        assert!(deployment.contains("backup-vpc"));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut deployment = Deployment::new("demo");
        deployment
            .define_resource(ResourceKind::Network, "vpc", network())
            .unwrap();
        let err = deployment
            .define_resource(ResourceKind::Network, "vpc", network())
            .unwrap_err();

        assert!(matches!(err, PlanError::DuplicateId { id } if id == "vpc"));
        assert_eq!(deployment.len(), 1);
    }

    #[test]
    fn test_invalid_ids_rejected() {
        let mut deployment = Deployment::new("demo");
        for id in ["", "1vpc", "my.vpc", "my vpc"] {
            let err = deployment
                .define_resource(ResourceKind::Network, id, network())
                .unwrap_err();
            assert!(matches!(err, PlanError::InvalidId { .. }), "{id:?} accepted");
        }
    }

    #[test]
    fn test_schema_violation_names_resource() {
        let mut deployment = Deployment::new("demo");
        let err = deployment
            .define_resource(ResourceKind::Role, "app-role", Properties::new())
            .unwrap_err();

        let PlanError::SchemaValidation { id, violations, .. } = err else {
            panic!("expected schema validation error");
        };
        assert_eq!(id, "app-role");
        assert_eq!(violations.len(), 2);
        assert!(deployment.is_empty());
    }
}
