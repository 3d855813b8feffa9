//! Static per-kind property schemas.
//!
//! Validation collects every violation instead of stopping at the first one,
//! so a single run reports everything wrong with a resource.

use std::collections::{BTreeMap, HashSet};

use crate::error::FieldViolation;

use super::kind::ResourceKind;
use super::property::{Properties, PropertyValue};

/// Type of a schema field.
#[derive(Debug, Clone, Copy)]
pub enum FieldType {
    /// Boolean literal.
    Bool,
    /// Integer literal within an inclusive range.
    Integer {
        /// Smallest allowed value.
        min: i64,
        /// Largest allowed value.
        max: i64,
    },
    /// List of integers within an inclusive range.
    IntegerList {
        /// Smallest allowed value.
        min: i64,
        /// Largest allowed value.
        max: i64,
    },
    /// String literal or reference.
    String,
    /// Unordered set of strings or references.
    StringSet,
    /// Map of string keys to strings or references.
    StringMap,
    /// List of objects following a nested schema.
    ObjectList(&'static [FieldSpec]),
}

/// A single field of a schema.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Property name.
    pub name: &'static str,
    /// Expected type.
    pub field_type: FieldType,
    /// Whether the property must be present.
    pub required: bool,
}

const fn required(name: &'static str, field_type: FieldType) -> FieldSpec {
    FieldSpec {
        name,
        field_type,
        required: true,
    }
}

const fn optional(name: &'static str, field_type: FieldType) -> FieldSpec {
    FieldSpec {
        name,
        field_type,
        required: false,
    }
}

/// Fargate CPU tiers in CPU units.
pub const FARGATE_CPU_TIERS: &[i64] = &[256, 512, 1024, 2048, 4096, 8192, 16384];

const NETWORK_FIELDS: &[FieldSpec] = &[
    optional("is_default", FieldType::Bool),
    optional("cidr", FieldType::String),
    optional("subnets", FieldType::StringSet),
];

const ROLE_FIELDS: &[FieldSpec] = &[
    required("role_name", FieldType::String),
    required("assumed_by", FieldType::String),
    optional("managed_policies", FieldType::StringSet),
];

const CONTAINER_FIELDS: &[FieldSpec] = &[
    required("name", FieldType::String),
    required("image", FieldType::String),
    optional("port_mappings", FieldType::IntegerList { min: 1, max: 65535 }),
    optional("cpu", FieldType::Integer { min: 0, max: 16384 }),
    optional("memory_reservation_mib", FieldType::Integer { min: 4, max: 122_880 }),
    optional("environment", FieldType::StringMap),
];

const TASK_DEFINITION_FIELDS: &[FieldSpec] = &[
    required("cpu", FieldType::Integer { min: 256, max: 16384 }),
    required("memory", FieldType::Integer { min: 512, max: 122_880 }),
    optional("task_role", FieldType::String),
    optional("execution_role", FieldType::String),
    required("containers", FieldType::ObjectList(CONTAINER_FIELDS)),
];

const SERVICE_FIELDS: &[FieldSpec] = &[
    required("service_name", FieldType::String),
    required("network", FieldType::String),
    required("task_definition", FieldType::String),
    optional("desired_count", FieldType::Integer { min: 0, max: 1000 }),
    optional("assign_public_ip", FieldType::Bool),
    optional("load_balancer", FieldType::String),
    optional("security_groups", FieldType::StringSet),
];

const LOAD_BALANCER_FIELDS: &[FieldSpec] = &[
    required("network", FieldType::String),
    optional("public", FieldType::Bool),
    required("listener_port", FieldType::Integer { min: 1, max: 65535 }),
    optional("security_groups", FieldType::StringSet),
];

/// Returns the schema fields of a kind.
#[must_use]
pub const fn schema_for(kind: ResourceKind) -> &'static [FieldSpec] {
    match kind {
        ResourceKind::Network => NETWORK_FIELDS,
        ResourceKind::Role => ROLE_FIELDS,
        ResourceKind::TaskDefinition => TASK_DEFINITION_FIELDS,
        ResourceKind::Service => SERVICE_FIELDS,
        ResourceKind::LoadBalancer => LOAD_BALANCER_FIELDS,
    }
}

/// Validates properties against the kind's schema and rules.
///
/// Returns every violation found; an empty list means the properties are valid.
#[must_use]
pub fn validate(kind: ResourceKind, properties: &Properties) -> Vec<FieldViolation> {
    let mut violations = Vec::new();
    validate_fields(schema_for(kind), properties, "", &mut violations);

    match kind {
        ResourceKind::Network => validate_network(properties, &mut violations),
        ResourceKind::TaskDefinition => validate_task_definition(properties, &mut violations),
        ResourceKind::Role | ResourceKind::Service | ResourceKind::LoadBalancer => {}
    }

    violations
}

/// Returns the canonical form of a property bag.
///
/// Set-valued fields are sorted and deduplicated, recursively through object
/// lists, and null entries are dropped. Two bags are equivalent exactly when
/// their canonical forms are equal.
#[must_use]
pub fn canonicalize(kind: ResourceKind, properties: &Properties) -> Properties {
    canonicalize_fields(schema_for(kind), properties)
}

fn canonicalize_fields(fields: &[FieldSpec], properties: &Properties) -> Properties {
    properties
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let spec = fields.iter().find(|f| f.name == key.as_str());
            let value = match (spec.map(|s| s.field_type), value) {
                (Some(FieldType::StringSet), PropertyValue::List(items)) => {
                    let mut items = items.clone();
                    items.sort_by_key(PropertyValue::sort_key);
                    items.dedup();
                    PropertyValue::List(items)
                }
                (Some(FieldType::ObjectList(nested)), PropertyValue::List(items)) => {
                    PropertyValue::List(
                        items
                            .iter()
                            .map(|item| match item {
                                PropertyValue::Map(map) => {
                                    PropertyValue::Map(canonicalize_fields(nested, map))
                                }
                                other => other.clone(),
                            })
                            .collect(),
                    )
                }
                _ => value.clone(),
            };
            (key.clone(), value)
        })
        .collect()
}

fn field_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn validate_fields(
    fields: &[FieldSpec],
    properties: &BTreeMap<String, PropertyValue>,
    prefix: &str,
    violations: &mut Vec<FieldViolation>,
) {
    for key in properties.keys() {
        if !fields.iter().any(|f| f.name == key.as_str()) {
            let known: Vec<&str> = fields.iter().map(|f| f.name).collect();
            violations.push(FieldViolation::new(
                field_path(prefix, key),
                format!("unknown property (expected one of: {})", known.join(", ")),
            ));
        }
    }

    for spec in fields {
        let path = field_path(prefix, spec.name);
        match properties.get(spec.name).filter(|v| !v.is_null()) {
            None if spec.required => {
                violations.push(FieldViolation::new(path, "required property is missing"));
            }
            None => {}
            Some(value) => validate_value(spec, value, &path, violations),
        }
    }
}

fn validate_value(
    spec: &FieldSpec,
    value: &PropertyValue,
    path: &str,
    violations: &mut Vec<FieldViolation>,
) {
    match spec.field_type {
        FieldType::Bool => {
            if value.as_bool().is_none() {
                violations.push(type_violation(path, "a boolean", value));
            }
        }
        FieldType::Integer { min, max } => check_integer(value, min, max, path, violations),
        FieldType::IntegerList { min, max } => {
            let PropertyValue::List(items) = value else {
                violations.push(type_violation(path, "a list of integers", value));
                return;
            };
            for (i, item) in items.iter().enumerate() {
                check_integer(item, min, max, &format!("{path}[{i}]"), violations);
            }
        }
        FieldType::String => {
            if !is_stringish(value) {
                violations.push(type_violation(path, "a string or reference", value));
            }
        }
        FieldType::StringSet => {
            let PropertyValue::List(items) = value else {
                violations.push(type_violation(path, "a list of strings", value));
                return;
            };
            for (i, item) in items.iter().enumerate() {
                if !is_stringish(item) {
                    violations.push(type_violation(
                        &format!("{path}[{i}]"),
                        "a string or reference",
                        item,
                    ));
                }
            }
        }
        FieldType::StringMap => {
            let PropertyValue::Map(map) = value else {
                violations.push(type_violation(path, "a map of strings", value));
                return;
            };
            for (key, item) in map {
                if !is_stringish(item) {
                    violations.push(type_violation(
                        &format!("{path}.{key}"),
                        "a string or reference",
                        item,
                    ));
                }
            }
        }
        FieldType::ObjectList(nested) => {
            let PropertyValue::List(items) = value else {
                violations.push(type_violation(path, "a list of objects", value));
                return;
            };
            if spec.required && items.is_empty() {
                violations.push(FieldViolation::new(path, "must contain at least one entry"));
            }
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{path}[{i}]");
                match item {
                    PropertyValue::Map(map) => validate_fields(nested, map, &item_path, violations),
                    other => violations.push(type_violation(&item_path, "an object", other)),
                }
            }
        }
    }
}

fn check_integer(
    value: &PropertyValue,
    min: i64,
    max: i64,
    path: &str,
    violations: &mut Vec<FieldViolation>,
) {
    match value.as_i64() {
        Some(n) if (min..=max).contains(&n) => {}
        Some(n) => violations.push(FieldViolation::new(
            path,
            format!("{n} is out of range ({min}..={max})"),
        )),
        None => violations.push(type_violation(path, "an integer", value)),
    }
}

const fn is_stringish(value: &PropertyValue) -> bool {
    matches!(value, PropertyValue::String(_) | PropertyValue::Reference(_))
}

fn type_violation(path: &str, expected: &str, found: &PropertyValue) -> FieldViolation {
    FieldViolation::new(path, format!("must be {expected}, found {}", found.type_name()))
}

fn validate_network(properties: &Properties, violations: &mut Vec<FieldViolation>) {
    let is_default = properties
        .get("is_default")
        .and_then(PropertyValue::as_bool)
        .unwrap_or(false);
    let cidr = properties.get("cidr").filter(|v| !v.is_null());

    match (is_default, cidr) {
        (true, Some(_)) => violations.push(FieldViolation::new(
            "cidr",
            "cannot be set when is_default is true",
        )),
        (false, None) => violations.push(FieldViolation::new(
            "cidr",
            "required unless is_default is true",
        )),
        (false, Some(PropertyValue::String(block))) if !is_valid_cidr(block) => {
            violations.push(FieldViolation::new(
                "cidr",
                format!("'{block}' is not an IPv4 CIDR block"),
            ));
        }
        _ => {}
    }
}

fn is_valid_cidr(block: &str) -> bool {
    let Some((addr, prefix)) = block.split_once('/') else {
        return false;
    };
    addr.parse::<std::net::Ipv4Addr>().is_ok() && prefix.parse::<u8>().is_ok_and(|p| p <= 32)
}

/// Returns true if the memory size (MiB) is allowed for the Fargate CPU tier.
#[must_use]
pub fn fargate_memory_allowed(cpu: i64, memory: i64) -> bool {
    let stepped = |low: i64, high: i64, step: i64| {
        (low..=high).contains(&memory) && memory % step == 0
    };

    match cpu {
        256 => matches!(memory, 512 | 1024 | 2048),
        512 => stepped(1024, 4096, 1024),
        1024 => stepped(2048, 8192, 1024),
        2048 => stepped(4096, 16384, 1024),
        4096 => stepped(8192, 30720, 1024),
        8192 => stepped(16384, 61440, 4096),
        16384 => stepped(32768, 122_880, 8192),
        _ => false,
    }
}

fn validate_task_definition(properties: &Properties, violations: &mut Vec<FieldViolation>) {
    let cpu = properties.get("cpu").and_then(PropertyValue::as_i64);
    let memory = properties.get("memory").and_then(PropertyValue::as_i64);

    if let Some(cpu) = cpu
        && !FARGATE_CPU_TIERS.contains(&cpu)
    {
        let tiers: Vec<String> = FARGATE_CPU_TIERS.iter().map(ToString::to_string).collect();
        violations.push(FieldViolation::new(
            "cpu",
            format!("{cpu} is not a Fargate CPU tier ({})", tiers.join(", ")),
        ));
    }

    if let (Some(cpu), Some(memory)) = (cpu, memory)
        && FARGATE_CPU_TIERS.contains(&cpu)
        && !fargate_memory_allowed(cpu, memory)
    {
        violations.push(FieldViolation::new(
            "memory",
            format!("{memory} MiB is not allowed with {cpu} CPU units"),
        ));
    }

    let Some(PropertyValue::List(containers)) = properties.get("containers") else {
        return;
    };

    let mut names = HashSet::new();
    let mut cpu_sum = 0_i64;

    for (i, container) in containers.iter().enumerate() {
        let PropertyValue::Map(container) = container else {
            continue;
        };

        if let Some(name) = container.get("name").and_then(PropertyValue::as_str)
            && !names.insert(name)
        {
            violations.push(FieldViolation::new(
                format!("containers[{i}].name"),
                format!("duplicate container name '{name}'"),
            ));
        }

        cpu_sum = cpu_sum.saturating_add(
            container
                .get("cpu")
                .and_then(PropertyValue::as_i64)
                .unwrap_or(0),
        );

        if let (Some(reservation), Some(memory)) = (
            container
                .get("memory_reservation_mib")
                .and_then(PropertyValue::as_i64),
            memory,
        ) && reservation > memory
        {
            violations.push(FieldViolation::new(
                format!("containers[{i}].memory_reservation_mib"),
                format!("{reservation} MiB exceeds the task memory of {memory} MiB"),
            ));
        }
    }

    if let Some(cpu) = cpu
        && cpu_sum > cpu
    {
        violations.push(FieldViolation::new(
            "containers",
            format!("container cpu total {cpu_sum} exceeds the task cpu of {cpu}"),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Properties {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn fields(violations: &[FieldViolation]) -> Vec<&str> {
        violations.iter().map(|v| v.field.as_str()).collect()
    }

    #[test]
    fn test_valid_task_definition() {
        let props = parse(
            r"
cpu: 256
memory: 512
task_role:
  ref: app-role.arn
containers:
  - name: MyContainer
    image: docker/getting-started
    port_mappings: [80]
    cpu: 256
    memory_reservation_mib: 256
",
        );
        assert!(validate(ResourceKind::TaskDefinition, &props).is_empty());
    }

    #[test]
    fn test_every_violation_reported() {
        let props = parse(
            r"
cpu: 300
bogus: true
containers: []
",
        );
        let violations = validate(ResourceKind::TaskDefinition, &props);
        let fields = fields(&violations);

        assert!(fields.contains(&"bogus"));
        assert!(fields.contains(&"memory"));
        assert!(fields.contains(&"containers"));
        assert!(fields.contains(&"cpu"));
    }

    #[test]
    fn test_memory_must_match_cpu_tier() {
        assert!(fargate_memory_allowed(256, 512));
        assert!(!fargate_memory_allowed(256, 4096));
        assert!(fargate_memory_allowed(1024, 3072));
        assert!(!fargate_memory_allowed(1024, 1024));
        assert!(fargate_memory_allowed(8192, 20480));
        assert!(!fargate_memory_allowed(8192, 17408));

        let props = parse(
            r"
cpu: 256
memory: 4096
containers:
  - name: web
    image: nginx
",
        );
        assert_eq!(fields(&validate(ResourceKind::TaskDefinition, &props)), vec!["memory"]);
    }

    #[test]
    fn test_container_limits() {
        let props = parse(
            r"
cpu: 256
memory: 512
containers:
  - name: web
    image: nginx
    cpu: 200
    memory_reservation_mib: 1024
  - name: web
    image: sidecar
    cpu: 100
",
        );
        let violations = validate(ResourceKind::TaskDefinition, &props);
        let fields = fields(&violations);

        assert!(fields.contains(&"containers[0].memory_reservation_mib"));
        assert!(fields.contains(&"containers[1].name"));
        assert!(fields.contains(&"containers"));
    }

    #[test]
    fn test_huge_container_cpu_is_a_violation() {
        let props = parse(
            r"
cpu: 256
memory: 512
containers:
  - name: web
    image: nginx
    cpu: 9223372036854775807
  - name: sidecar
    image: envoy
    cpu: 9223372036854775807
",
        );
        let violations = validate(ResourceKind::TaskDefinition, &props);

        assert!(fields(&violations).contains(&"containers"));
    }

    #[test]
    fn test_network_rules() {
        assert!(validate(ResourceKind::Network, &parse("is_default: true")).is_empty());
        assert!(validate(ResourceKind::Network, &parse("cidr: 10.0.0.0/16")).is_empty());
        assert_eq!(fields(&validate(ResourceKind::Network, &parse("{}"))), vec!["cidr"]);
        assert_eq!(
            fields(&validate(ResourceKind::Network, &parse("cidr: 10.0.0/40"))),
            vec!["cidr"]
        );
    }

    #[test]
    fn test_integer_fields_reject_references() {
        let props = parse(
            r"
network:
  ref: vpc.id
listener_port:
  ref: other.id
",
        );
        let violations = validate(ResourceKind::LoadBalancer, &props);
        assert_eq!(fields(&violations), vec!["listener_port"]);
        assert!(violations[0].message.contains("found reference"));
    }

    #[test]
    fn test_canonicalize_sorts_sets_only() {
        let a = parse(
            r"
service_name: web
network: vpc
task_definition: task
security_groups: [sg-b, sg-a, sg-b]
",
        );
        let b = parse(
            r"
service_name: web
network: vpc
task_definition: task
security_groups: [sg-a, sg-b]
load_balancer: null
",
        );
        assert_eq!(
            canonicalize(ResourceKind::Service, &a),
            canonicalize(ResourceKind::Service, &b)
        );

        let ports_a = parse("cpu: 256\nmemory: 512\ncontainers: [{name: a, image: x, port_mappings: [80, 443]}]");
        let ports_b = parse("cpu: 256\nmemory: 512\ncontainers: [{name: a, image: x, port_mappings: [443, 80]}]");
        assert_ne!(
            canonicalize(ResourceKind::TaskDefinition, &ports_a),
            canonicalize(ResourceKind::TaskDefinition, &ports_b)
        );
    }
}
