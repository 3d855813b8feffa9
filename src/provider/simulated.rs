//! Simulated cloud provider.
//!
//! Keeps provisioned resources in memory, optionally mirrored to a JSON file
//! so local runs survive between invocations. Output attributes are
//! synthesized per kind the way the real services shape them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ProviderError, Result, StateError};
use crate::model::{ResolvedProperties, ResourceKind};

use super::api::{Attributes, ProvisionedResource, ResourceProvider};

const ACCOUNT_ID: &str = "000000000000";
const REGION: &str = "us-east-1";
const DEFAULT_VPC_CIDR: &str = "172.31.0.0/16";

/// Kind of provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    /// `create_resource`
    Create,
    /// `update_resource`
    Update,
    /// `delete_resource`
    Delete,
    /// `read_resource`
    Read,
}

/// A recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderCall {
    /// Which method was called.
    pub kind: CallKind,
    /// Resource kind, for create and update.
    pub resource_kind: Option<ResourceKind>,
    /// Provider id, for everything but create.
    pub provider_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SimulatedResource {
    kind: ResourceKind,
    properties: ResolvedProperties,
    attributes: Attributes,
    #[serde(default)]
    revision: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SimulatedCloud {
    resources: BTreeMap<String, SimulatedResource>,
    #[serde(skip)]
    calls: Vec<ProviderCall>,
    #[serde(skip)]
    mutations: usize,
    #[serde(skip)]
    fail_on_mutation: Option<usize>,
}

/// In-memory provider with failure injection and a call log.
#[derive(Debug, Default)]
pub struct SimulatedProvider {
    cloud: Mutex<SimulatedCloud>,
    path: Option<PathBuf>,
}

impl SimulatedProvider {
    /// Creates an empty in-memory provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a provider backed by a JSON file, creating it on first write.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let cloud = if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
                message: format!("Failed to parse simulated cloud {}: {e}", path.display()),
            })?
        } else {
            SimulatedCloud::default()
        };

        info!(
            "Opened simulated cloud at {} ({} resources)",
            path.display(),
            cloud.resources.len()
        );

        Ok(Self {
            cloud: Mutex::new(cloud),
            path: Some(path),
        })
    }

    /// Makes the n-th mutating call (create, update or delete, 1-based) fail.
    #[must_use]
    pub fn fail_on_mutation(mut self, n: usize) -> Self {
        self.cloud.get_mut().fail_on_mutation = Some(n);
        self
    }

    /// Every call made so far, in order.
    pub async fn calls(&self) -> Vec<ProviderCall> {
        self.cloud.lock().await.calls.clone()
    }

    /// Number of mutating calls made so far, failed ones included.
    pub async fn mutation_count(&self) -> usize {
        self.cloud.lock().await.mutations
    }

    /// Number of live resources.
    pub async fn resource_count(&self) -> usize {
        self.cloud.lock().await.resources.len()
    }

    /// Properties a resource was last created or updated with.
    pub async fn properties_of(&self, provider_id: &str) -> Option<ResolvedProperties> {
        self.cloud
            .lock()
            .await
            .resources
            .get(provider_id)
            .map(|r| r.properties.clone())
    }

    /// Deletes a resource behind the engine's back.
    pub async fn remove_out_of_band(&self, provider_id: &str) -> bool {
        self.cloud.lock().await.resources.remove(provider_id).is_some()
    }

    /// Overwrites an output attribute behind the engine's back.
    pub async fn set_attribute_out_of_band(&self, provider_id: &str, name: &str, value: &str) {
        if let Some(resource) = self.cloud.lock().await.resources.get_mut(provider_id) {
            resource
                .attributes
                .insert(name.to_string(), value.to_string());
        }
    }

    async fn persist(&self, cloud: &SimulatedCloud) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(cloud)
            .map_err(|e| StateError::serialization(format!("Failed to serialize simulated cloud: {e}")))?;
        tokio::fs::write(path, content).await?;

        debug!("Persisted simulated cloud to {}", path.display());
        Ok(())
    }
}

impl SimulatedCloud {
    fn record(&mut self, kind: CallKind, resource_kind: Option<ResourceKind>, provider_id: Option<&str>) {
        self.calls.push(ProviderCall {
            kind,
            resource_kind,
            provider_id: provider_id.map(ToString::to_string),
        });
    }

    fn begin_mutation(&mut self) -> Result<()> {
        self.mutations += 1;
        if self.fail_on_mutation == Some(self.mutations) {
            return Err(ProviderError::rejected(format!(
                "injected failure on mutating call {}",
                self.mutations
            ))
            .into());
        }
        Ok(())
    }
}

fn string_property<'a>(properties: &'a ResolvedProperties, key: &str) -> Option<&'a str> {
    properties.get(key).and_then(Value::as_str)
}

/// Builds the output attributes a real provider would report.
fn synthesize_attributes(
    kind: ResourceKind,
    provider_id: &str,
    properties: &ResolvedProperties,
    revision: u32,
) -> Attributes {
    let mut attributes = Attributes::new();
    attributes.insert(String::from("id"), provider_id.to_string());

    match kind {
        ResourceKind::Network => {
            let cidr = string_property(properties, "cidr").unwrap_or(DEFAULT_VPC_CIDR);
            attributes.insert(String::from("cidr"), cidr.to_string());
        }
        ResourceKind::Role => {
            let name = string_property(properties, "role_name").unwrap_or(provider_id);
            attributes.insert(
                String::from("arn"),
                format!("arn:aws:iam::{ACCOUNT_ID}:role/{name}"),
            );
            attributes.insert(String::from("name"), name.to_string());
        }
        ResourceKind::TaskDefinition => {
            attributes.insert(
                String::from("arn"),
                format!("arn:aws:ecs:{REGION}:{ACCOUNT_ID}:task-definition/{provider_id}:{revision}"),
            );
            attributes.insert(String::from("family"), provider_id.to_string());
        }
        ResourceKind::Service => {
            let name = string_property(properties, "service_name").unwrap_or(provider_id);
            attributes.insert(
                String::from("arn"),
                format!("arn:aws:ecs:{REGION}:{ACCOUNT_ID}:service/{name}"),
            );
            attributes.insert(String::from("name"), name.to_string());
        }
        ResourceKind::LoadBalancer => {
            attributes.insert(
                String::from("arn"),
                format!(
                    "arn:aws:elasticloadbalancing:{REGION}:{ACCOUNT_ID}:loadbalancer/app/{provider_id}"
                ),
            );
            attributes.insert(
                String::from("dns_name"),
                format!("{provider_id}.{REGION}.elb.simulated.internal"),
            );
        }
    }

    attributes
}

#[async_trait]
impl ResourceProvider for SimulatedProvider {
    async fn create_resource(
        &self,
        kind: ResourceKind,
        properties: &ResolvedProperties,
    ) -> Result<ProvisionedResource> {
        let mut cloud = self.cloud.lock().await;
        cloud.record(CallKind::Create, Some(kind), None);
        cloud.begin_mutation()?;

        let provider_id = format!(
            "{}-{}",
            kind.id_prefix(),
            &Uuid::new_v4().simple().to_string()[..12]
        );
        let attributes = synthesize_attributes(kind, &provider_id, properties, 1);

        cloud.resources.insert(
            provider_id.clone(),
            SimulatedResource {
                kind,
                properties: properties.clone(),
                attributes: attributes.clone(),
                revision: 1,
            },
        );
        self.persist(&cloud).await?;

        debug!("Simulated create {kind} -> {provider_id}");
        Ok(ProvisionedResource {
            provider_id,
            attributes,
        })
    }

    async fn update_resource(
        &self,
        provider_id: &str,
        kind: ResourceKind,
        properties: &ResolvedProperties,
    ) -> Result<Attributes> {
        let mut cloud = self.cloud.lock().await;
        cloud.record(CallKind::Update, Some(kind), Some(provider_id));
        cloud.begin_mutation()?;

        let Some(resource) = cloud.resources.get_mut(provider_id) else {
            return Err(ProviderError::NotFound {
                provider_id: provider_id.to_string(),
            }
            .into());
        };

        if resource.kind != kind {
            return Err(ProviderError::rejected(format!(
                "{provider_id} is a {}, not a {kind}",
                resource.kind
            ))
            .into());
        }

        resource.revision += 1;
        resource.properties = properties.clone();
        resource.attributes = synthesize_attributes(kind, provider_id, properties, resource.revision);
        let attributes = resource.attributes.clone();
        self.persist(&cloud).await?;

        debug!("Simulated update {kind} {provider_id}");
        Ok(attributes)
    }

    async fn delete_resource(&self, provider_id: &str) -> Result<()> {
        let mut cloud = self.cloud.lock().await;
        cloud.record(CallKind::Delete, None, Some(provider_id));
        cloud.begin_mutation()?;

        if cloud.resources.remove(provider_id).is_none() {
            return Err(ProviderError::NotFound {
                provider_id: provider_id.to_string(),
            }
            .into());
        }
        self.persist(&cloud).await?;

        debug!("Simulated delete {provider_id}");
        Ok(())
    }

    async fn read_resource(&self, provider_id: &str) -> Result<Option<ProvisionedResource>> {
        let mut cloud = self.cloud.lock().await;
        cloud.record(CallKind::Read, None, Some(provider_id));

        Ok(cloud
            .resources
            .get(provider_id)
            .map(|resource| ProvisionedResource {
                provider_id: provider_id.to_string(),
                attributes: resource.attributes.clone(),
            }))
    }

    fn provider_type(&self) -> &'static str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StackError;
    use serde_json::json;

    fn props(value: Value) -> ResolvedProperties {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[tokio::test]
    async fn test_create_synthesizes_attributes() {
        let provider = SimulatedProvider::new();

        let role = provider
            .create_resource(
                ResourceKind::Role,
                &props(json!({"role_name": "AppRole", "assumed_by": "ecs-tasks.amazonaws.com"})),
            )
            .await
            .unwrap();
        assert!(role.provider_id.starts_with("role-"));
        assert_eq!(role.attributes["arn"], "arn:aws:iam::000000000000:role/AppRole");
        assert_eq!(role.attributes["name"], "AppRole");

        let vpc = provider
            .create_resource(ResourceKind::Network, &props(json!({"is_default": true})))
            .await
            .unwrap();
        assert_eq!(vpc.attributes["cidr"], DEFAULT_VPC_CIDR);
        assert_eq!(vpc.attributes["id"], vpc.provider_id);
    }

    #[tokio::test]
    async fn test_update_bumps_task_definition_revision() {
        let provider = SimulatedProvider::new();
        let task = provider
            .create_resource(ResourceKind::TaskDefinition, &props(json!({"cpu": 256})))
            .await
            .unwrap();

        let attributes = provider
            .update_resource(
                &task.provider_id,
                ResourceKind::TaskDefinition,
                &props(json!({"cpu": 512})),
            )
            .await
            .unwrap();

        assert!(attributes["arn"].ends_with(":2"));
        assert_eq!(
            provider.properties_of(&task.provider_id).await.unwrap()["cpu"],
            512
        );
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let provider = SimulatedProvider::new();
        let err = provider.delete_resource("lb-123").await.unwrap_err();

        assert!(matches!(
            err,
            StackError::Provider(ProviderError::NotFound { .. })
        ));
        assert!(provider.read_resource("lb-123").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injected_failure_counts_mutations_only() {
        let provider = SimulatedProvider::new().fail_on_mutation(2);
        let network = props(json!({"is_default": true}));

        let first = provider
            .create_resource(ResourceKind::Network, &network)
            .await
            .unwrap();
        provider.read_resource(&first.provider_id).await.unwrap();

        assert!(provider
            .create_resource(ResourceKind::Network, &network)
            .await
            .is_err());
        assert!(provider
            .create_resource(ResourceKind::Network, &network)
            .await
            .is_ok());

        assert_eq!(provider.mutation_count().await, 3);
        assert_eq!(provider.resource_count().await, 2);

        let kinds: Vec<CallKind> = provider.calls().await.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![CallKind::Create, CallKind::Read, CallKind::Create, CallKind::Create]
        );
    }

    #[tokio::test]
    async fn test_file_backed_cloud_survives_reopen() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("cloud").join("simulated.json");

        let provider = SimulatedProvider::open(&path).await.unwrap();
        let lb = provider
            .create_resource(
                ResourceKind::LoadBalancer,
                &props(json!({"listener_port": 80})),
            )
            .await
            .unwrap();

        let reopened = SimulatedProvider::open(&path).await.unwrap();
        let read = reopened.read_resource(&lb.provider_id).await.unwrap();

        assert_eq!(read, Some(lb));
    }
}
