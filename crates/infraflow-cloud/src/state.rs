//! State management for deployed resources
//!
//! Manages the `.infraflow/state.json` file which records every applied
//! resource of every stack, keyed by `<provider>:<stack>:<urn>`, together with
//! the exports each stack published at its last apply.

use crate::error::{CloudError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

const STATE_VERSION: u32 = 1;
const STATE_DIR: &str = ".infraflow";
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const STATE_PARTIAL: &str = "state.json.partial";
const LOCK_FILE: &str = "lock.json";
const LOCK_STALE_AFTER_HOURS: i64 = 1;

/// Build the state key of a resource
pub fn state_key(provider: &str, stack: &str, urn: &str) -> String {
    format!("{}:{}:{}", provider, stack, urn)
}

/// Build the key a stack's exports are recorded under
pub fn stack_key(provider: &str, stack: &str) -> String {
    format!("{}:{}", provider, stack)
}

/// Global state containing all stacks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalState {
    /// State file version
    pub version: u32,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Next creation sequence number
    #[serde(default)]
    pub next_sequence: u64,

    /// Resources indexed by provider:stack:urn
    pub resources: BTreeMap<String, ResourceState>,

    /// Exports recorded at the last apply, indexed by provider:stack
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exports: BTreeMap<String, RecordedExports>,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            next_sequence: 0,
            resources: BTreeMap::new(),
            exports: BTreeMap::new(),
        }
    }
}

impl GlobalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resources whose key starts with `prefix`, in creation order
    pub fn resources_with_prefix(&self, prefix: &str) -> Vec<(&String, &ResourceState)> {
        let mut found: Vec<_> = self
            .resources
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .collect();
        found.sort_by_key(|(_, r)| r.sequence);
        found
    }

    /// Add or update a resource
    ///
    /// New resources get the next creation sequence number; updates keep theirs.
    pub fn set_resource(&mut self, key: String, mut state: ResourceState) {
        match self.resources.get(&key) {
            Some(existing) => {
                state.sequence = existing.sequence;
                state.created_at = existing.created_at;
            }
            None => {
                state.sequence = self.next_sequence;
                self.next_sequence += 1;
            }
        }
        self.resources.insert(key, state);
        self.updated_at = Utc::now();
    }

    /// Remove a resource
    pub fn remove_resource(&mut self, key: &str) -> Option<ResourceState> {
        let result = self.resources.remove(key);
        if result.is_some() {
            self.updated_at = Utc::now();
        }
        result
    }

    /// Get a resource by key
    pub fn get_resource(&self, key: &str) -> Option<&ResourceState> {
        self.resources.get(key)
    }

    /// Replace the exports recorded for a stack
    pub fn record_exports(&mut self, stack_key: String, values: BTreeMap<String, Value>) {
        self.exports.insert(
            stack_key,
            RecordedExports {
                recorded_at: Utc::now(),
                values,
            },
        );
        self.updated_at = Utc::now();
    }
}

/// Exports a stack published, resolved to concrete values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedExports {
    pub recorded_at: DateTime<Utc>,
    pub values: BTreeMap<String, Value>,
}

/// State for a single provider, keyed by URN
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderState {
    pub resources: BTreeMap<String, ResourceState>,
}

impl ProviderState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, urn: String, state: ResourceState) {
        self.resources.insert(urn, state);
    }

    pub fn get(&self, urn: &str) -> Option<&ResourceState> {
        self.resources.get(urn)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ResourceState)> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// State of a single resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    /// Provider-assigned identifier; empty until a create succeeds
    pub id: String,

    /// Resource type
    pub resource_type: String,

    /// Graph URN
    pub urn: String,

    /// URN of the owning resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// Current status
    pub status: ResourceStatus,

    /// Message of the last failed apply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Declared properties, as planned (may contain output markers)
    #[serde(default)]
    pub inputs: Value,

    /// Resource attributes (id, arn, dns name, resolved inputs)
    pub attributes: Map<String, Value>,

    /// Creation order within the state file
    #[serde(default)]
    pub sequence: u64,

    /// When the resource was created
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl ResourceState {
    pub fn new(
        id: impl Into<String>,
        resource_type: impl Into<String>,
        urn: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            urn: urn.into(),
            parent: None,
            status: ResourceStatus::Unknown,
            error: None,
            inputs: Value::Null,
            attributes: Map::new(),
            sequence: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_parent(mut self, parent: Option<String>) -> Self {
        self.parent = parent;
        self
    }

    pub fn with_inputs(mut self, inputs: Value) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Mark the resource failed; it is planned again on the next run
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ResourceStatus::Error;
        self.error = Some(error.into());
        self.updated_at = Utc::now();
    }

    /// Whether a provider identifier has been assigned
    pub fn is_provisioned(&self) -> bool {
        !self.id.is_empty()
    }

    pub fn get_attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Status of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Resource exists and matches its last applied inputs
    Ready,
    /// Last create or update failed
    Error,
    /// Status is unknown
    Unknown,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStatus::Ready => write!(f, "ready"),
            ResourceStatus::Error => write!(f, "error"),
            ResourceStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Reads and writes the state file of one project
pub struct StateManager {
    dir: PathBuf,
}

impl StateManager {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            dir: project_root.as_ref().join(STATE_DIR),
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// Load the current state; a missing file is an empty state
    pub async fn load(&self) -> Result<GlobalState> {
        let path = self.state_path();
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No state file yet");
                return Ok(GlobalState::new());
            }
            Err(e) => return Err(e.into()),
        };

        let state: GlobalState = serde_json::from_str(&content)?;
        if state.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "{} was written by a newer infraflow (version {}, supported {})",
                path.display(),
                state.version,
                STATE_VERSION
            )));
        }
        tracing::debug!(resources = state.resources.len(), "Loaded state");
        Ok(state)
    }

    /// Write the state through a partial file, keeping the previous state as a backup
    pub async fn save(&self, state: &GlobalState) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;

        let path = self.state_path();
        let partial = self.dir.join(STATE_PARTIAL);
        fs::write(&partial, serde_json::to_string_pretty(state)?).await?;

        if fs::try_exists(&path).await? {
            fs::copy(&path, self.dir.join(STATE_BACKUP)).await?;
        }
        fs::rename(&partial, &path).await?;

        tracing::debug!(resources = state.resources.len(), "Saved state");
        Ok(())
    }

    /// Take the project lock for `operation` (`apply`, `destroy`, ...)
    ///
    /// A lock older than an hour is taken over with a warning.
    pub async fn acquire_lock(&self, operation: &str) -> Result<StateLock> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(LOCK_FILE);

        if let Ok(content) = fs::read_to_string(&path).await {
            let held: LockInfo = serde_json::from_str(&content)?;
            let age = Utc::now().signed_duration_since(held.acquired_at);
            if age.num_hours() < LOCK_STALE_AFTER_HOURS {
                return Err(CloudError::LockError(format!(
                    "State is locked by {} (pid {}) for {} since {}",
                    held.holder, held.pid, held.operation, held.acquired_at
                )));
            }
            tracing::warn!(holder = %held.holder, operation = %held.operation, "Taking over stale state lock");
        }

        let info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            operation: operation.to_string(),
            acquired_at: Utc::now(),
        };
        fs::write(&path, serde_json::to_string_pretty(&info)?).await?;

        tracing::debug!(operation, "Acquired state lock");
        Ok(StateLock {
            path,
            released: false,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    pid: u32,
    operation: String,
    acquired_at: DateTime<Utc>,
}

/// Held project lock; dropped locks are removed synchronously
pub struct StateLock {
    path: PathBuf,
    released: bool,
}

impl StateLock {
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        match fs::remove_file(&self.path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
