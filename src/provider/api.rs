//! Provider interface the executor issues operations against.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::model::{ResolvedProperties, ResourceKind};

/// Output attributes reported by a provider, e.g. `arn` or `dns_name`.
pub type Attributes = BTreeMap<String, String>;

/// A resource as the provider knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedResource {
    /// Provider-assigned id.
    pub provider_id: String,
    /// Output attributes.
    #[serde(default)]
    pub attributes: Attributes,
}

/// External provisioning API.
///
/// Each call completes before the executor issues the next one. Calls are
/// never retried by the engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Creates a resource from fully resolved properties.
    async fn create_resource(
        &self,
        kind: ResourceKind,
        properties: &ResolvedProperties,
    ) -> Result<ProvisionedResource>;

    /// Updates a resource in place, returning its new attributes.
    async fn update_resource(
        &self,
        provider_id: &str,
        kind: ResourceKind,
        properties: &ResolvedProperties,
    ) -> Result<Attributes>;

    /// Deletes a resource.
    ///
    /// Fails with [`crate::error::ProviderError::NotFound`] if the provider
    /// has no such resource.
    async fn delete_resource(&self, provider_id: &str) -> Result<()>;

    /// Reads a resource, returning `None` if it no longer exists.
    async fn read_resource(&self, provider_id: &str) -> Result<Option<ProvisionedResource>>;

    /// Short provider name for logs and output.
    fn provider_type(&self) -> &'static str;
}

#[async_trait]
impl ResourceProvider for Box<dyn ResourceProvider> {
    async fn create_resource(
        &self,
        kind: ResourceKind,
        properties: &ResolvedProperties,
    ) -> Result<ProvisionedResource> {
        (**self).create_resource(kind, properties).await
    }

    async fn update_resource(
        &self,
        provider_id: &str,
        kind: ResourceKind,
        properties: &ResolvedProperties,
    ) -> Result<Attributes> {
        (**self).update_resource(provider_id, kind, properties).await
    }

    async fn delete_resource(&self, provider_id: &str) -> Result<()> {
        (**self).delete_resource(provider_id).await
    }

    async fn read_resource(&self, provider_id: &str) -> Result<Option<ProvisionedResource>> {
        (**self).read_resource(provider_id).await
    }

    fn provider_type(&self) -> &'static str {
        (**self).provider_type()
    }
}
