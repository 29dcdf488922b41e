//! Local engine
//!
//! A [`CloudProvider`] that applies plans into the project state file instead
//! of a real cloud account. Identifiers, ARNs and network addresses are
//! synthesised so that every output a builder references resolves to a
//! plausible concrete value.

use crate::action::{
    Action, ActionType, ApplyResult, DETAIL_CHANGED, DETAIL_CONFIG, DETAIL_PARENT, Plan,
};
use crate::error::{CloudError, Result};
use crate::output::resolve_value;
use crate::provider::{CloudProvider, ResourceSet};
use crate::state::{
    GlobalState, ProviderState, ResourceState, ResourceStatus, StateManager, stack_key,
    state_key,
};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

const PROVIDER_NAME: &str = "local";
const DEFAULT_REGION: &str = "us-east-1";
const ACCOUNT_ID: &str = "000000000000";

/// Provider that records resources in `.infraflow/state.json`
pub struct LocalProvider {
    stack: String,
    region: String,
    state: StateManager,
}

impl LocalProvider {
    pub fn new(project_root: impl AsRef<Path>, stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            region: DEFAULT_REGION.to_string(),
            state: StateManager::new(project_root),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }

    fn key(&self, urn: &str) -> String {
        state_key(PROVIDER_NAME, &self.stack, urn)
    }

    fn prefix(&self) -> String {
        format!("{}:{}:", PROVIDER_NAME, self.stack)
    }

    /// Resolve the stack exports of `desired` against the applied state
    pub async fn resolve_exports(&self, desired: &ResourceSet) -> Result<BTreeMap<String, Value>> {
        let state = self.state.load().await?;
        self.resolve_against(&state, desired)
    }

    /// Resolve the exports of `desired` and store them as the stack's published outputs
    pub async fn record_exports(&self, desired: &ResourceSet) -> Result<BTreeMap<String, Value>> {
        let lock = self.state.acquire_lock("record exports").await?;
        let mut state = self.state.load().await?;
        let resolved = self.resolve_against(&state, desired)?;
        state.record_exports(stack_key(PROVIDER_NAME, &self.stack), resolved.clone());
        self.state.save(&state).await?;
        lock.release().await?;
        debug!(stack = %self.stack, exports = resolved.len(), "Recorded exports");
        Ok(resolved)
    }

    /// Exports recorded by the last successful apply, if any
    pub async fn recorded_exports(&self) -> Result<Option<BTreeMap<String, Value>>> {
        let state = self.state.load().await?;
        Ok(state
            .exports
            .get(&stack_key(PROVIDER_NAME, &self.stack))
            .map(|recorded| recorded.values.clone()))
    }

    fn resolve_against(
        &self,
        state: &GlobalState,
        desired: &ResourceSet,
    ) -> Result<BTreeMap<String, Value>> {
        let lookup = |urn: &str, attribute: &str| self.lookup(state, urn, attribute);
        let mut resolved = BTreeMap::new();
        for (key, value) in &desired.exports {
            resolved.insert(key.clone(), resolve_value(value, &lookup)?);
        }
        Ok(resolved)
    }

    fn lookup(&self, state: &GlobalState, urn: &str, attribute: &str) -> Option<Value> {
        state
            .get_resource(&self.key(urn))
            .and_then(|r| r.attributes.get(attribute).cloned())
    }

    fn apply_action(&self, state: &mut GlobalState, action: &Action) -> Result<String> {
        let urn = action.urn();
        let key = self.key(&urn);

        match action.action_type {
            ActionType::NoOp => Ok(format!("{} unchanged", urn)),
            ActionType::Delete => {
                state
                    .remove_resource(&key)
                    .ok_or_else(|| CloudError::ResourceNotFound(urn.clone()))?;
                Ok(format!("Deleted {}", urn))
            }
            ActionType::Create | ActionType::Update => {
                let inputs = action
                    .details
                    .get(DETAIL_CONFIG)
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let resolved = {
                    let applied: &GlobalState = state;
                    let lookup = |u: &str, a: &str| self.lookup(applied, u, a);
                    resolve_value(&inputs, &lookup)?
                };
                let parent = action
                    .details
                    .get(DETAIL_PARENT)
                    .and_then(Value::as_str)
                    .map(str::to_string);

                let previous = state.get_resource(&key).filter(|p| p.is_provisioned());
                let (id, attributes) = self.synthesize(
                    &action.resource_type,
                    &action.resource_id,
                    &resolved,
                    previous,
                );

                let resource = ResourceState::new(id, &action.resource_type, &urn)
                    .with_status(ResourceStatus::Ready)
                    .with_parent(parent)
                    .with_inputs(inputs)
                    .with_attributes(attributes);
                state.set_resource(key, resource);

                let verb = if action.action_type == ActionType::Create {
                    "Created"
                } else {
                    "Updated"
                };
                Ok(format!("{} {}", verb, urn))
            }
        }
    }

    /// Mark the resource of a failed create or update as `Error`
    ///
    /// A failed create leaves an unprovisioned entry so the next plan retries it.
    fn record_failure(&self, state: &mut GlobalState, action: &Action, error: &CloudError) {
        let urn = action.urn();
        let key = self.key(&urn);
        if let Some(existing) = state.resources.get_mut(&key) {
            existing.fail(error.to_string());
            return;
        }
        let inputs = action
            .details
            .get(DETAIL_CONFIG)
            .cloned()
            .unwrap_or_else(|| json!({}));
        let parent = action
            .details
            .get(DETAIL_PARENT)
            .and_then(Value::as_str)
            .map(str::to_string);
        let mut pending = ResourceState::new("", &action.resource_type, &urn)
            .with_parent(parent)
            .with_inputs(inputs);
        pending.fail(error.to_string());
        state.set_resource(key, pending);
    }

    /// Attributes of an applied resource: resolved inputs plus provider-assigned values
    fn synthesize(
        &self,
        resource_type: &str,
        name: &str,
        resolved: &Value,
        previous: Option<&ResourceState>,
    ) -> (String, Map<String, Value>) {
        let mut attributes = resolved.as_object().cloned().unwrap_or_default();

        let id = match previous {
            Some(p) => p.id.clone(),
            None => match id_prefix(resource_type) {
                Some(prefix) => format!("{}-{}", prefix, short_hex(17)),
                None => attributes
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or(name)
                    .to_string(),
            },
        };
        let seed = Uuid::new_v4();
        let octets = seed.as_bytes();

        attributes.insert("id".into(), json!(id));
        attributes.entry("name").or_insert_with(|| json!(name));
        attributes.insert("arn".into(), json!(self.arn(resource_type, &id)));

        match resource_type {
            "load-balancer" => {
                let dns = format!(
                    "{}-{}.{}.elb.amazonaws.com",
                    name,
                    u32::from_be_bytes([octets[0], octets[1], octets[2], octets[3]]) % 1_000_000_000,
                    self.region
                );
                attributes.insert("dns_name".into(), json!(dns));
                attributes.insert("zone_id".into(), json!("Z35SXDOTRQ7X7K"));
            }
            "instance" => {
                let public_ip = format!("203.0.113.{}", octets[0].max(1));
                attributes.insert(
                    "public_dns".into(),
                    json!(format!(
                        "ec2-{}.compute-1.amazonaws.com",
                        public_ip.replace('.', "-")
                    )),
                );
                attributes.insert("public_ip".into(), json!(public_ip));
                attributes.insert(
                    "private_ip".into(),
                    json!(format!("10.0.{}.{}", octets[1] % 10, octets[2].max(4))),
                );
            }
            "eip" => {
                attributes.insert("public_ip".into(), json!(format!("198.51.100.{}", octets[0].max(1))));
                attributes.insert("allocation_id".into(), json!(id));
            }
            "launch-template" => {
                let version = previous
                    .and_then(|p| p.get_attribute::<u64>("latest_version"))
                    .map_or(1, |v| v + 1);
                attributes.insert("latest_version".into(), json!(version));
                attributes.insert("default_version".into(), json!(1));
            }
            "s3-bucket" => {
                let bucket = previous
                    .and_then(|p| p.get_attribute::<String>("bucket"))
                    .or_else(|| attributes.get("bucket").and_then(Value::as_str).map(str::to_string))
                    .unwrap_or_else(|| format!("{}-{}", name, short_hex(7)));
                attributes.insert("id".into(), json!(bucket));
                attributes.insert("arn".into(), json!(format!("arn:aws:s3:::{}", bucket)));
                attributes.insert(
                    "bucket_domain_name".into(),
                    json!(format!("{}.s3.amazonaws.com", bucket)),
                );
                attributes.insert("bucket".into(), json!(bucket));
            }
            "vpc-endpoint" => {
                attributes.insert("prefix_list_id".into(), json!(format!("pl-{}", short_hex(8))));
            }
            "vpc-ipv6-cidr-block-association" => {
                attributes.insert(
                    "ipv6_cidr_block".into(),
                    json!(format!("2600:1f18:{:02x}{:02x}:ff00::/56", octets[0], octets[1])),
                );
            }
            "iam-role" | "iam-instance-profile" => {
                attributes.insert("name".into(), json!(id));
            }
            _ => {}
        }

        let id = attributes
            .get("id")
            .and_then(Value::as_str)
            .map_or(id, str::to_string);
        debug!(resource_type, name, id = %id, "Synthesised attributes");
        (id, attributes)
    }

    fn arn(&self, resource_type: &str, id: &str) -> String {
        match resource_type {
            "iam-role" => format!("arn:aws:iam::{}:role/{}", ACCOUNT_ID, id),
            "iam-instance-profile" => format!("arn:aws:iam::{}:instance-profile/{}", ACCOUNT_ID, id),
            "load-balancer" => format!(
                "arn:aws:elasticloadbalancing:{}:{}:loadbalancer/app/{}",
                self.region, ACCOUNT_ID, id
            ),
            "target-group" | "listener" => format!(
                "arn:aws:elasticloadbalancing:{}:{}:{}/{}",
                self.region, ACCOUNT_ID, resource_type, id
            ),
            "autoscaling-group" | "autoscaling-policy" => format!(
                "arn:aws:autoscaling:{}:{}:{}/{}",
                self.region, ACCOUNT_ID, resource_type, id
            ),
            _ => format!("arn:aws:ec2:{}:{}:{}/{}", self.region, ACCOUNT_ID, resource_type, id),
        }
    }
}

/// Identifier prefix of resources whose ids are provider-generated
fn id_prefix(resource_type: &str) -> Option<&'static str> {
    match resource_type {
        "vpc" => Some("vpc"),
        "vpc-ipv6-cidr-block-association" => Some("vpc-cidr-assoc"),
        "internet-gateway" => Some("igw"),
        "managed-prefix-list" => Some("pl"),
        "subnet" => Some("subnet"),
        "route-table" => Some("rtb"),
        "route" => Some("r"),
        "route-table-association" => Some("rtbassoc"),
        "eip" => Some("eipalloc"),
        "nat-gateway" => Some("nat"),
        "security-group" => Some("sg"),
        "instance" => Some("i"),
        "launch-template" => Some("lt"),
        "vpc-endpoint" => Some("vpce"),
        _ => None,
    }
}

fn short_hex(len: usize) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    hex[..len.min(hex.len())].to_string()
}

/// Top-level properties whose values differ between two property objects
fn changed_keys(previous: &Value, desired: &Value) -> Vec<String> {
    let empty = Map::new();
    let before = previous.as_object().unwrap_or(&empty);
    let after = desired.as_object().unwrap_or(&empty);
    let mut keys: Vec<String> = before
        .keys()
        .chain(after.keys())
        .filter(|k| before.get(*k) != after.get(*k))
        .cloned()
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

#[async_trait]
impl CloudProvider for LocalProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn get_state(&self) -> Result<ProviderState> {
        let state = self.state.load().await?;
        let mut provider_state = ProviderState::new();
        for (_, resource) in state.resources_with_prefix(&self.prefix()) {
            provider_state.add(resource.urn.clone(), resource.clone());
        }
        Ok(provider_state)
    }

    async fn plan(&self, desired: &ResourceSet) -> Result<Plan> {
        let state = self.state.load().await?;
        let mut actions = Vec::new();

        for resource in desired.iter() {
            let urn = resource.key();
            let action = match state.get_resource(&self.key(&urn)) {
                None => Action::new(ActionType::Create, &resource.resource_type, &resource.id),
                Some(existing)
                    if existing.status == ResourceStatus::Ready
                        && existing.inputs == resource.config =>
                {
                    Action::new(ActionType::NoOp, &resource.resource_type, &resource.id)
                }
                Some(existing) => {
                    Action::new(ActionType::Update, &resource.resource_type, &resource.id)
                        .with_detail(
                            DETAIL_CHANGED,
                            json!(changed_keys(&existing.inputs, &resource.config)),
                        )
                }
            };
            let action = action
                .with_detail(DETAIL_CONFIG, resource.config.clone())
                .with_detail(DETAIL_PARENT, json!(resource.parent));
            actions.push(action);
        }

        let stale = state.resources_with_prefix(&self.prefix());
        for (_, resource) in stale.into_iter().rev() {
            if !desired.contains(&resource.urn) {
                let name = resource
                    .urn
                    .strip_prefix(&format!("{}:", resource.resource_type))
                    .unwrap_or(&resource.urn);
                actions.push(Action::new(ActionType::Delete, &resource.resource_type, name));
            }
        }

        let plan = Plan::new(actions);
        debug!(stack = %self.stack, summary = %plan.summary(), "Planned");
        Ok(plan)
    }

    async fn apply(&self, plan: &Plan) -> Result<ApplyResult> {
        let started = Instant::now();
        let lock = self.state.acquire_lock("apply").await?;
        let mut state = self.state.load().await?;
        let mut result = ApplyResult::new();

        for action in &plan.actions {
            match self.apply_action(&mut state, action) {
                Ok(message) => {
                    if action.action_type != ActionType::NoOp {
                        info!("{}", message);
                    }
                    result.add_success(action.id.clone(), message);
                }
                Err(e) => {
                    warn!(urn = %action.urn(), error = %e, "Apply failed");
                    if matches!(action.action_type, ActionType::Create | ActionType::Update) {
                        self.record_failure(&mut state, action, &e);
                    }
                    result.add_failure(action.id.clone(), e.to_string());
                    break;
                }
            }
        }

        self.state.save(&state).await?;
        lock.release().await?;

        result.duration_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }

    async fn destroy(&self, urn: &str) -> Result<()> {
        let lock = self.state.acquire_lock("destroy").await?;
        let mut state = self.state.load().await?;
        state
            .remove_resource(&self.key(urn))
            .ok_or_else(|| CloudError::ResourceNotFound(urn.to_string()))?;
        self.state.save(&state).await?;
        lock.release().await?;
        info!("Deleted {}", urn);
        Ok(())
    }

    async fn destroy_all(&self) -> Result<ApplyResult> {
        let started = Instant::now();
        let lock = self.state.acquire_lock("destroy").await?;
        let mut state = self.state.load().await?;
        let mut result = ApplyResult::new();

        let keys: Vec<(String, String)> = state
            .resources_with_prefix(&self.prefix())
            .into_iter()
            .rev()
            .map(|(k, r)| (k.clone(), r.urn.clone()))
            .collect();
        for (key, urn) in keys {
            state.remove_resource(&key);
            result.add_success(format!("delete:{}", urn), format!("Deleted {}", urn));
        }
        state.exports.remove(&stack_key(PROVIDER_NAME, &self.stack));

        self.state.save(&state).await?;
        lock.release().await?;
        info!(stack = %self.stack, count = result.succeeded.len(), "Destroyed stack");

        result.duration_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Stack;
    use crate::output::Output;
    use tempfile::tempdir;

    fn web_stack(with_bucket: bool) -> Stack {
        let mut stack = Stack::new("demo", "dev");
        let vpc = stack
            .resource("vpc", "net-vpc", json!({"cidr_block": "10.0.0.0/16"}))
            .create()
            .unwrap();
        let subnet = stack
            .resource(
                "subnet",
                "net-public-0",
                json!({"vpc_id": vpc.id(), "cidr_block": "10.0.0.0/24"}),
            )
            .parent(&vpc)
            .create()
            .unwrap();
        let lb = stack
            .resource("load-balancer", "web-alb", json!({"subnets": [subnet.id()]}))
            .create()
            .unwrap();
        stack
            .resource(
                "launch-template",
                "web-lt",
                json!({"user_data": Output::from("#!/bin/bash\necho hi").base64()}),
            )
            .create()
            .unwrap();
        if with_bucket {
            stack
                .resource("s3-bucket", "artifacts", json!({}))
                .create()
                .unwrap();
        }
        stack.export(
            "application_url",
            Output::concat([Output::from("http://"), lb.attr("dns_name")]),
        );
        stack.export("vpc_id", vpc.id());
        stack
    }

    #[tokio::test]
    async fn test_apply_then_replan_is_noop() {
        let dir = tempdir().unwrap();
        let provider = LocalProvider::new(dir.path(), "dev");
        let desired = web_stack(false).to_resource_set(provider.name());

        let plan = provider.plan(&desired).await.unwrap();
        assert_eq!(plan.summary().create, 4);
        let result = provider.apply(&plan).await.unwrap();
        assert!(result.is_success());

        let replan = provider.plan(&desired).await.unwrap();
        assert!(!replan.has_changes);
        assert_eq!(replan.summary().no_change, 4);
    }

    #[tokio::test]
    async fn test_outputs_resolve_after_apply() {
        let dir = tempdir().unwrap();
        let provider = LocalProvider::new(dir.path(), "dev");
        let desired = web_stack(false).to_resource_set(provider.name());
        provider.apply(&provider.plan(&desired).await.unwrap()).await.unwrap();

        let exports = provider.resolve_exports(&desired).await.unwrap();
        let url = exports["application_url"].as_str().unwrap();
        assert!(url.starts_with("http://web-alb-"));
        assert!(url.ends_with(".us-east-1.elb.amazonaws.com"));
        assert!(exports["vpc_id"].as_str().unwrap().starts_with("vpc-"));

        let state = provider.get_state().await.unwrap();
        let subnet = state.get("subnet:net-public-0").unwrap();
        assert_eq!(subnet.attributes["vpc_id"], exports["vpc_id"]);
        assert_eq!(subnet.parent.as_deref(), Some("vpc:net-vpc"));

        let lt = state.get("launch-template:web-lt").unwrap();
        assert_eq!(lt.attributes["user_data"], json!("IyEvYmluL2Jhc2gKZWNobyBoaQ=="));
        assert_eq!(lt.attributes["latest_version"], json!(1));
    }

    #[tokio::test]
    async fn test_exports_before_apply_are_unresolved() {
        let dir = tempdir().unwrap();
        let provider = LocalProvider::new(dir.path(), "dev");
        let desired = web_stack(false).to_resource_set(provider.name());

        let err = provider.resolve_exports(&desired).await.unwrap_err();
        assert!(matches!(err, CloudError::UnresolvedOutput { .. }));
    }

    #[tokio::test]
    async fn test_update_and_delete_are_planned() {
        let dir = tempdir().unwrap();
        let provider = LocalProvider::new(dir.path(), "dev");
        let first = web_stack(true).to_resource_set(provider.name());
        provider.apply(&provider.plan(&first).await.unwrap()).await.unwrap();

        let mut stack = Stack::new("demo", "dev");
        stack
            .resource("vpc", "net-vpc", json!({"cidr_block": "10.1.0.0/16"}))
            .create()
            .unwrap();
        let second = stack.to_resource_set(provider.name());

        let plan = provider.plan(&second).await.unwrap();
        let summary = plan.summary();
        assert_eq!(summary.update, 1);
        assert_eq!(summary.delete, 4);
        assert_eq!(plan.actions[0].details[DETAIL_CHANGED], json!(["cidr_block"]));

        // Deletes run newest first
        assert_eq!(plan.actions[1].urn(), "s3-bucket:artifacts");

        provider.apply(&plan).await.unwrap();
        let state = provider.get_state().await.unwrap();
        assert_eq!(state.len(), 1);
        assert_eq!(
            state.get("vpc:net-vpc").unwrap().attributes["cidr_block"],
            json!("10.1.0.0/16")
        );
    }

    #[tokio::test]
    async fn test_destroy_all_only_touches_own_stack() {
        let dir = tempdir().unwrap();
        let dev = LocalProvider::new(dir.path(), "dev");
        let prod = LocalProvider::new(dir.path(), "prod");
        let desired = web_stack(false).to_resource_set("local");
        dev.apply(&dev.plan(&desired).await.unwrap()).await.unwrap();
        prod.apply(&prod.plan(&desired).await.unwrap()).await.unwrap();

        let result = dev.destroy_all().await.unwrap();
        assert_eq!(result.succeeded.len(), 4);
        assert!(dev.get_state().await.unwrap().is_empty());
        assert_eq!(prod.get_state().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_failed_create_is_recorded_and_retried() {
        let dir = tempdir().unwrap();
        let provider = LocalProvider::new(dir.path(), "dev");
        let broken = Plan::new(vec![
            Action::new(ActionType::Create, "vpc", "net-vpc")
                .with_detail(DETAIL_CONFIG, json!({"cidr_block": "10.0.0.0/16"}))
                .with_detail(DETAIL_PARENT, Value::Null),
            Action::new(ActionType::Create, "subnet", "net-public-0")
                .with_detail(
                    DETAIL_CONFIG,
                    json!({"vpc_id": Output::attribute("vpc:elsewhere", "id")}),
                )
                .with_detail(DETAIL_PARENT, json!("vpc:net-vpc")),
        ]);

        let result = provider.apply(&broken).await.unwrap();
        assert!(!result.is_success());
        assert_eq!(result.succeeded.len(), 1);

        let state = provider.get_state().await.unwrap();
        assert_eq!(state.get("vpc:net-vpc").unwrap().status, ResourceStatus::Ready);
        let subnet = state.get("subnet:net-public-0").unwrap();
        assert_eq!(subnet.status, ResourceStatus::Error);
        assert!(!subnet.is_provisioned());
        assert!(subnet.error.as_deref().unwrap().contains("vpc:elsewhere.id"));

        let mut stack = Stack::new("demo", "dev");
        let vpc = stack
            .resource("vpc", "net-vpc", json!({"cidr_block": "10.0.0.0/16"}))
            .create()
            .unwrap();
        stack
            .resource("subnet", "net-public-0", json!({"vpc_id": vpc.id()}))
            .parent(&vpc)
            .create()
            .unwrap();
        let desired = stack.to_resource_set(provider.name());

        let plan = provider.plan(&desired).await.unwrap();
        assert_eq!(plan.actions[0].action_type, ActionType::NoOp);
        assert_eq!(plan.actions[1].action_type, ActionType::Update);
        assert!(provider.apply(&plan).await.unwrap().is_success());

        let subnet = provider.get_state().await.unwrap().get("subnet:net-public-0").cloned().unwrap();
        assert_eq!(subnet.status, ResourceStatus::Ready);
        assert!(subnet.id.starts_with("subnet-"));
    }

    #[tokio::test]
    async fn test_failed_update_marks_existing_resource() {
        let dir = tempdir().unwrap();
        let provider = LocalProvider::new(dir.path(), "dev");
        let desired = web_stack(false).to_resource_set(provider.name());
        provider.apply(&provider.plan(&desired).await.unwrap()).await.unwrap();
        let vpc_id = provider.get_state().await.unwrap().get("vpc:net-vpc").unwrap().id.clone();

        let broken = Plan::new(vec![
            Action::new(ActionType::Update, "vpc", "net-vpc")
                .with_detail(DETAIL_CONFIG, json!({"ipv6": Output::attribute("vpc:gone", "id")})),
        ]);
        assert!(!provider.apply(&broken).await.unwrap().is_success());

        let vpc = provider.get_state().await.unwrap().get("vpc:net-vpc").cloned().unwrap();
        assert_eq!(vpc.status, ResourceStatus::Error);
        assert_eq!(vpc.id, vpc_id);

        let replan = provider.plan(&desired).await.unwrap();
        assert_eq!(replan.actions[0].action_type, ActionType::Update);
        provider.apply(&replan).await.unwrap();
        let vpc = provider.get_state().await.unwrap().get("vpc:net-vpc").cloned().unwrap();
        assert_eq!(vpc.status, ResourceStatus::Ready);
        assert_eq!(vpc.id, vpc_id);
    }

    #[tokio::test]
    async fn test_recorded_exports_survive_config_changes() {
        let dir = tempdir().unwrap();
        let provider = LocalProvider::new(dir.path(), "dev");
        assert!(provider.recorded_exports().await.unwrap().is_none());

        let desired = web_stack(false).to_resource_set(provider.name());
        provider.apply(&provider.plan(&desired).await.unwrap()).await.unwrap();
        let recorded = provider.record_exports(&desired).await.unwrap();

        let mut changed = web_stack(false);
        changed.export("extra", Output::from("never applied"));
        let changed = changed.to_resource_set(provider.name());
        assert!(provider.resolve_exports(&changed).await.unwrap().contains_key("extra"));

        let stored = provider.recorded_exports().await.unwrap().unwrap();
        assert_eq!(stored, recorded);
        assert!(!stored.contains_key("extra"));

        provider.destroy_all().await.unwrap();
        assert!(provider.recorded_exports().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_destroy_single_resource() {
        let dir = tempdir().unwrap();
        let provider = LocalProvider::new(dir.path(), "dev");
        let desired = web_stack(false).to_resource_set(provider.name());
        provider.apply(&provider.plan(&desired).await.unwrap()).await.unwrap();

        provider.destroy("launch-template:web-lt").await.unwrap();
        let state = provider.get_state().await.unwrap();
        assert_eq!(state.len(), 3);
        assert!(state.get("launch-template:web-lt").is_none());

        let err = provider.destroy("launch-template:web-lt").await.unwrap_err();
        assert!(matches!(err, CloudError::ResourceNotFound(_)));
    }
}
