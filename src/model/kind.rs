//! Resource kinds and the output attributes each kind exposes.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Kind of a provisionable resource.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Virtual network (VPC).
    Network,
    /// IAM role.
    Role,
    /// Container task definition.
    TaskDefinition,
    /// Long-running container service.
    Service,
    /// Public or internal load balancer.
    LoadBalancer,
}

const NETWORK_ATTRIBUTES: &[&str] = &["id", "cidr"];
const ROLE_ATTRIBUTES: &[&str] = &["id", "arn", "name"];
const TASK_DEFINITION_ATTRIBUTES: &[&str] = &["id", "arn", "family"];
const SERVICE_ATTRIBUTES: &[&str] = &["id", "arn", "name"];
const LOAD_BALANCER_ATTRIBUTES: &[&str] = &["id", "arn", "dns_name"];

impl ResourceKind {
    /// All kinds, in the order they are documented.
    pub const ALL: [Self; 5] = [
        Self::Network,
        Self::Role,
        Self::TaskDefinition,
        Self::Service,
        Self::LoadBalancer,
    ];

    /// Returns the configuration name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Role => "role",
            Self::TaskDefinition => "task_definition",
            Self::Service => "service",
            Self::LoadBalancer => "load_balancer",
        }
    }

    /// Output attributes other resources may reference.
    #[must_use]
    pub const fn attributes(self) -> &'static [&'static str] {
        match self {
            Self::Network => NETWORK_ATTRIBUTES,
            Self::Role => ROLE_ATTRIBUTES,
            Self::TaskDefinition => TASK_DEFINITION_ATTRIBUTES,
            Self::Service => SERVICE_ATTRIBUTES,
            Self::LoadBalancer => LOAD_BALANCER_ATTRIBUTES,
        }
    }

    /// Returns true if the kind exposes the named attribute.
    #[must_use]
    pub fn exposes(self, attribute: &str) -> bool {
        self.attributes().contains(&attribute)
    }

    /// Short prefix used when minting provider ids.
    #[must_use]
    pub const fn id_prefix(self) -> &'static str {
        match self {
            Self::Network => "net",
            Self::Role => "role",
            Self::TaskDefinition => "td",
            Self::Service => "svc",
            Self::LoadBalancer => "lb",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|k| k.as_str()).collect();
                format!("Unknown resource kind '{s}'. Expected one of: {}", known.join(", "))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_name() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>(), Ok(kind));
        }
        assert!("bucket".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_every_kind_exposes_id() {
        for kind in ResourceKind::ALL {
            assert!(kind.exposes("id"), "{kind} should expose id");
        }
        assert!(ResourceKind::Role.exposes("arn"));
        assert!(!ResourceKind::Network.exposes("arn"));
    }
}
