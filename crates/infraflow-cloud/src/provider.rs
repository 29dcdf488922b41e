//! Provider and inventory abstractions

use crate::action::{ApplyResult, Plan};
use crate::error::Result;
use crate::state::ProviderState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Cloud provider abstraction trait
///
/// A provider turns a desired [`ResourceSet`] into a [`Plan`] and applies it.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Returns the provider name (e.g., "local")
    fn name(&self) -> &str;

    /// Get the current state of all resources managed by this provider
    async fn get_state(&self) -> Result<ProviderState>;

    /// Calculate the diff between desired and current state
    async fn plan(&self, desired: &ResourceSet) -> Result<Plan>;

    /// Apply the planned actions
    async fn apply(&self, plan: &Plan) -> Result<ApplyResult>;

    /// Destroy a specific resource by URN
    async fn destroy(&self, urn: &str) -> Result<()>;

    /// Destroy all resources managed by this provider
    async fn destroy_all(&self) -> Result<ApplyResult>;
}

/// Ordered set of resources to be managed
///
/// Insertion order is preserved and is a valid creation order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResourceSet {
    resources: Vec<ResourceConfig>,
    #[serde(skip)]
    index: HashMap<String, usize>,

    /// Stack exports in output-marker form
    pub exports: BTreeMap<String, Value>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource, replacing an earlier one with the same key in place
    pub fn add(&mut self, resource: ResourceConfig) {
        let key = resource.key();
        match self.index.get(&key) {
            Some(&idx) => self.resources[idx] = resource,
            None => {
                self.index.insert(key, self.resources.len());
                self.resources.push(resource);
            }
        }
    }

    pub fn get(&self, resource_type: &str, id: &str) -> Option<&ResourceConfig> {
        self.get_by_key(&format!("{}:{}", resource_type, id))
    }

    pub fn get_by_key(&self, key: &str) -> Option<&ResourceConfig> {
        self.index.get(key).map(|&idx| &self.resources[idx])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceConfig> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Configuration for a cloud resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Resource type (e.g., "vpc", "launch-template")
    pub resource_type: String,

    /// Resource name, unique per type
    pub id: String,

    /// Provider name
    pub provider: String,

    /// Resource properties, possibly containing output markers
    pub config: Value,

    /// URN of the owning resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// URNs that must be applied first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl ResourceConfig {
    pub fn new(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        provider: impl Into<String>,
        config: Value,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            provider: provider.into(),
            config,
            parent: None,
            depends_on: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent: Option<String>) -> Self {
        self.parent = parent;
        self
    }

    pub fn with_dependencies(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    /// Get the full resource key (type:id), which is also its URN
    pub fn key(&self) -> String {
        format!("{}:{}", self.resource_type, self.id)
    }
}

/// Read-only account facts builders need at declaration time
pub trait CloudInventory: Send + Sync {
    /// Region resources are declared in
    fn region(&self) -> &str;

    /// Availability zones currently available in the region, in order
    fn availability_zones(&self) -> Result<Vec<String>>;

    /// Most recent image matching the query
    fn latest_image(&self, query: &ImageQuery) -> Result<ImageRecord>;
}

/// Machine image lookup filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageQuery {
    pub owners: Vec<String>,

    /// Glob pattern on the image name
    pub name_pattern: String,

    pub virtualization_type: String,
}

impl ImageQuery {
    /// Amazon Linux 2023, x86_64, HVM
    pub fn amazon_linux_2023() -> Self {
        Self {
            owners: vec!["amazon".to_string()],
            name_pattern: "al2023-ami-*-x86_64".to_string(),
            virtualization_type: "hvm".to_string(),
        }
    }
}

/// A machine image known to the inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub virtualization_type: String,

    /// ISO-8601 creation date; lexical order is chronological
    pub creation_date: String,
}
