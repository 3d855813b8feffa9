//! Property values and reference markers.
//!
//! Declared properties are parsed into an explicit tree before anything else
//! looks at them. A reference to another resource's output is written as the
//! single-key object `{ ref: "<node-id>.<attribute>" }` and becomes
//! [`PropertyValue::Reference`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key marking a reference object.
pub const REFERENCE_KEY: &str = "ref";

/// Declared property bag of a resource.
pub type Properties = BTreeMap<String, PropertyValue>;

/// Properties with every reference substituted, as sent to a provider.
pub type ResolvedProperties = serde_json::Map<String, serde_json::Value>;

/// Reference to an output attribute of another resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttributeRef {
    /// Target resource id.
    pub node: String,
    /// Attribute name on the target.
    pub attribute: String,
}

/// A declared property value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub enum PropertyValue {
    /// Explicit null, treated as absent.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Numeric literal.
    Number(serde_json::Number),
    /// String literal.
    String(String),
    /// Ordered list.
    List(Vec<PropertyValue>),
    /// Nested object.
    Map(BTreeMap<String, PropertyValue>),
    /// Reference to another resource's output attribute.
    Reference(AttributeRef),
}

impl AttributeRef {
    /// Creates a new attribute reference.
    #[must_use]
    pub fn new(node: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            attribute: attribute.into(),
        }
    }

    /// Parses a marker string like `app-role.arn`.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker has no `.` or an empty side.
    pub fn parse(marker: &str) -> Result<Self, String> {
        let Some((node, attribute)) = marker.split_once('.') else {
            return Err(format!(
                "Invalid reference '{marker}'. Expected format: <resource-id>.<attribute>"
            ));
        };

        if node.is_empty() || attribute.is_empty() {
            return Err(format!(
                "Invalid reference '{marker}'. Resource id and attribute must be non-empty"
            ));
        }

        Ok(Self::new(node, attribute))
    }
}

impl std::fmt::Display for AttributeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.node, self.attribute)
    }
}

impl TryFrom<serde_json::Value> for PropertyValue {
    type Error = String;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value;

        Ok(match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::List(
                items
                    .into_iter()
                    .map(Self::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => {
                if let Some(marker) = map.get(REFERENCE_KEY) {
                    if map.len() != 1 {
                        return Err(String::from(
                            "A reference object must contain only the 'ref' key",
                        ));
                    }
                    let Value::String(marker) = marker else {
                        return Err(String::from("The 'ref' key must hold a string"));
                    };
                    return AttributeRef::parse(marker).map(Self::Reference);
                }

                Self::Map(
                    map.into_iter()
                        .map(|(k, v)| Self::try_from(v).map(|v| (k, v)))
                        .collect::<Result<_, _>>()?,
                )
            }
        })
    }
}

impl From<PropertyValue> for serde_json::Value {
    fn from(value: PropertyValue) -> Self {
        match value {
            PropertyValue::Null => Self::Null,
            PropertyValue::Bool(b) => Self::Bool(b),
            PropertyValue::Number(n) => Self::Number(n),
            PropertyValue::String(s) => Self::String(s),
            PropertyValue::List(items) => Self::Array(items.into_iter().map(Into::into).collect()),
            PropertyValue::Map(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
            PropertyValue::Reference(r) => {
                let mut object = serde_json::Map::new();
                object.insert(String::from(REFERENCE_KEY), Self::String(r.to_string()));
                Self::Object(object)
            }
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<AttributeRef> for PropertyValue {
    fn from(r: AttributeRef) -> Self {
        Self::Reference(r)
    }
}

impl PropertyValue {
    /// Creates a reference value.
    #[must_use]
    pub fn reference(node: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::Reference(AttributeRef::new(node, attribute))
    }

    /// Returns the string literal, if this is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer literal, if this is one.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    /// Returns the boolean literal, if this is one.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns true for [`PropertyValue::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short type name for diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Reference(_) => "reference",
        }
    }

    /// Stable textual key used to order set members.
    #[must_use]
    pub fn sort_key(&self) -> String {
        serde_json::Value::from(self.clone()).to_string()
    }

    /// Collects every reference marker under this value with its property path.
    pub fn collect_references(&self, path: &str, out: &mut Vec<(String, AttributeRef)>) {
        match self {
            Self::Reference(r) => out.push((path.to_string(), r.clone())),
            Self::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.collect_references(&format!("{path}[{i}]"), out);
                }
            }
            Self::Map(map) => {
                for (key, value) in map {
                    value.collect_references(&format!("{path}.{key}"), out);
                }
            }
            Self::Null | Self::Bool(_) | Self::Number(_) | Self::String(_) => {}
        }
    }
}

/// Collects every reference in a property bag, keyed by property path.
#[must_use]
pub fn references_in(properties: &Properties) -> Vec<(String, AttributeRef)> {
    let mut out = Vec::new();
    for (key, value) in properties {
        value.collect_references(key, &mut out);
    }
    out
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Reference(r) => write!(f, "${{{r}}}"),
            other => write!(f, "{}", other.sort_key()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reference_marker() {
        let value: PropertyValue =
            serde_json::from_str(r#"{"ref": "app-role.arn"}"#).unwrap();
        assert_eq!(value, PropertyValue::reference("app-role", "arn"));
    }

    #[test]
    fn test_reference_marker_must_be_alone() {
        let result: Result<PropertyValue, _> =
            serde_json::from_str(r#"{"ref": "app-role.arn", "extra": 1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_reference_rejected() {
        assert!(AttributeRef::parse("app-role").is_err());
        assert!(AttributeRef::parse(".arn").is_err());
        assert!(AttributeRef::parse("app-role.").is_err());
    }

    #[test]
    fn test_nested_references_collected_with_paths() {
        let yaml = r"
task_role:
  ref: app-role.arn
containers:
  - name: web
    environment:
      LB_HOST:
        ref: my-lb.dns_name
";
        let properties: Properties = serde_yaml::from_str(yaml).unwrap();
        let refs = references_in(&properties);

        assert_eq!(refs.len(), 2);
        assert!(refs.contains(&(
            String::from("containers[0].environment.LB_HOST"),
            AttributeRef::new("my-lb", "dns_name"),
        )));
        assert!(refs.contains(&(
            String::from("task_role"),
            AttributeRef::new("app-role", "arn"),
        )));
    }

    #[test]
    fn test_reference_serializes_back_to_marker() {
        let value = PropertyValue::reference("vpc", "id");
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"ref":"vpc.id"}"#);
    }
}
