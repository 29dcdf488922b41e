//! Desired-state resource graph
//!
//! Builders declare resources into a [`Stack`]. Every resource is keyed by its
//! URN (`<type>:<name>`), optionally parented to a component, and depends on
//! every resource whose outputs appear in its properties. The graph is
//! append-only: a resource can only reference resources declared before it,
//! so declaration order is always a valid creation order.

use crate::error::{CloudError, Result};
use crate::output::{Output, value_references};
use crate::provider::{ResourceConfig, ResourceSet};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Build the URN of a resource
pub fn urn(resource_type: &str, name: &str) -> String {
    format!("{}:{}", resource_type, name)
}

/// Whether a node is a logical grouping or a real cloud resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Component,
    Custom,
}

/// A declared node of the graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub urn: String,
    pub resource_type: String,
    pub name: String,
    pub kind: ResourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    pub props: Value,
    /// Outputs registered by a component
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub outputs: Map<String, Value>,
}

impl Resource {
    /// Property lookup, `None` when absent
    pub fn prop(&self, key: &str) -> Option<&Value> {
        self.props.get(key)
    }
}

/// Handle to a declared resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub urn: String,
    pub resource_type: String,
    pub name: String,
}

impl ResourceRef {
    pub fn attr(&self, attribute: &str) -> Output {
        Output::attribute(&self.urn, attribute)
    }

    pub fn id(&self) -> Output {
        self.attr("id")
    }

    pub fn arn(&self) -> Output {
        self.attr("arn")
    }
}

/// The resource graph of one stack
#[derive(Debug, Clone, Default)]
pub struct Stack {
    project: String,
    name: String,
    resources: Vec<Resource>,
    index: HashMap<String, usize>,
    exports: BTreeMap<String, Output>,
}

impl Stack {
    pub fn new(project: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare a component node
    pub fn component(
        &mut self,
        type_token: &str,
        name: &str,
        parent: Option<&ResourceRef>,
    ) -> Result<ResourceRef> {
        let parent = match parent {
            Some(p) => Some(self.require(&p.urn)?.urn.clone()),
            None => None,
        };
        self.insert(Resource {
            urn: urn(type_token, name),
            resource_type: type_token.to_string(),
            name: name.to_string(),
            kind: ResourceKind::Component,
            parent,
            depends_on: Vec::new(),
            props: Value::Object(Map::new()),
            outputs: Map::new(),
        })
    }

    /// Start declaring a cloud resource
    pub fn resource(
        &mut self,
        resource_type: &str,
        name: impl Into<String>,
        props: Value,
    ) -> ResourceBuilder<'_> {
        ResourceBuilder {
            stack: self,
            resource_type: resource_type.to_string(),
            name: name.into(),
            props,
            parent: None,
            depends_on: Vec::new(),
        }
    }

    /// Attach outputs to a component
    pub fn register_outputs(&mut self, component: &ResourceRef, outputs: Value) -> Result<()> {
        let Value::Object(outputs) = outputs else {
            return Err(CloudError::InvalidOutput(format!(
                "outputs of {} must be an object",
                component.urn
            )));
        };
        let idx = *self
            .index
            .get(&component.urn)
            .ok_or_else(|| CloudError::ResourceNotFound(component.urn.clone()))?;
        let resource = &mut self.resources[idx];
        if resource.kind != ResourceKind::Component {
            return Err(CloudError::InvalidConfig(format!(
                "{} is not a component",
                component.urn
            )));
        }
        resource.outputs = outputs;
        Ok(())
    }

    /// Publish a stack export
    pub fn export(&mut self, key: impl Into<String>, value: impl Into<Output>) {
        self.exports.insert(key.into(), value.into());
    }

    pub fn get(&self, urn: &str) -> Option<&Resource> {
        self.index.get(urn).map(|&idx| &self.resources[idx])
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn resources_of_type(&self, resource_type: &str) -> Vec<&Resource> {
        self.resources
            .iter()
            .filter(|r| r.resource_type == resource_type)
            .collect()
    }

    pub fn children_of(&self, urn: &str) -> Vec<&Resource> {
        self.resources
            .iter()
            .filter(|r| r.parent.as_deref() == Some(urn))
            .collect()
    }

    pub fn exports(&self) -> &BTreeMap<String, Output> {
        &self.exports
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Convert the graph into the desired resource set handed to a provider
    ///
    /// Components carry no cloud state and are left out.
    pub fn to_resource_set(&self, provider: &str) -> ResourceSet {
        let mut set = ResourceSet::new();
        for resource in &self.resources {
            if resource.kind == ResourceKind::Component {
                continue;
            }
            set.add(
                ResourceConfig::new(
                    &resource.resource_type,
                    &resource.name,
                    provider,
                    resource.props.clone(),
                )
                .with_parent(resource.parent.clone())
                .with_dependencies(resource.depends_on.clone()),
            );
        }
        for (key, value) in &self.exports {
            set.exports.insert(key.clone(), value.to_value());
        }
        set
    }

    fn require(&self, urn: &str) -> Result<&Resource> {
        self.get(urn).ok_or_else(|| {
            CloudError::InvalidConfig(format!("{} has not been declared", urn))
        })
    }

    fn insert(&mut self, resource: Resource) -> Result<ResourceRef> {
        if self.index.contains_key(&resource.urn) {
            return Err(CloudError::ResourceAlreadyExists(resource.urn));
        }
        debug!(urn = %resource.urn, parent = ?resource.parent, "Declared resource");
        let handle = ResourceRef {
            urn: resource.urn.clone(),
            resource_type: resource.resource_type.clone(),
            name: resource.name.clone(),
        };
        self.index.insert(resource.urn.clone(), self.resources.len());
        self.resources.push(resource);
        Ok(handle)
    }
}

/// Pending declaration of a cloud resource
pub struct ResourceBuilder<'a> {
    stack: &'a mut Stack,
    resource_type: String,
    name: String,
    props: Value,
    parent: Option<String>,
    depends_on: Vec<String>,
}

impl ResourceBuilder<'_> {
    pub fn parent(mut self, parent: &ResourceRef) -> Self {
        self.parent = Some(parent.urn.clone());
        self
    }

    /// Explicit ordering edge in addition to the ones implied by outputs
    pub fn depends_on(mut self, dependency: &ResourceRef) -> Self {
        self.depends_on.push(dependency.urn.clone());
        self
    }

    pub fn create(self) -> Result<ResourceRef> {
        let ResourceBuilder {
            stack,
            resource_type,
            name,
            props,
            parent,
            mut depends_on,
        } = self;

        if let Some(parent) = &parent {
            stack.require(parent)?;
        }
        for dependency in &depends_on {
            stack.require(dependency)?;
        }
        for reference in value_references(&props) {
            stack.require(&reference)?;
            if !depends_on.contains(&reference) {
                depends_on.push(reference);
            }
        }

        stack.insert(Resource {
            urn: urn(&resource_type, &name),
            resource_type,
            name,
            kind: ResourceKind::Custom,
            parent,
            depends_on,
            props,
            outputs: Map::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_declare_with_parent_and_implicit_dependency() {
        let mut stack = Stack::new("demo", "dev");
        let network = stack.component("infraflow:network:VpcNetwork", "net", None).unwrap();
        let vpc = stack
            .resource("vpc", "net-vpc", json!({"cidr_block": "10.0.0.0/16"}))
            .parent(&network)
            .create()
            .unwrap();
        let igw = stack
            .resource("internet-gateway", "net-igw", json!({"vpc_id": vpc.id()}))
            .parent(&vpc)
            .create()
            .unwrap();

        let igw = stack.get(&igw.urn).unwrap();
        assert_eq!(igw.parent.as_deref(), Some("vpc:net-vpc"));
        assert_eq!(igw.depends_on, vec!["vpc:net-vpc".to_string()]);
        assert_eq!(stack.children_of(&network.urn).len(), 1);
    }

    #[test]
    fn test_duplicate_urn_is_rejected() {
        let mut stack = Stack::new("demo", "dev");
        stack.resource("vpc", "a", json!({})).create().unwrap();
        let err = stack.resource("vpc", "a", json!({})).create().unwrap_err();
        assert!(matches!(err, CloudError::ResourceAlreadyExists(_)));
    }

    #[test]
    fn test_reference_to_undeclared_resource_is_rejected() {
        let mut stack = Stack::new("demo", "dev");
        let err = stack
            .resource(
                "subnet",
                "a",
                json!({"vpc_id": Output::attribute("vpc:ghost", "id")}),
            )
            .create()
            .unwrap_err();
        assert!(matches!(err, CloudError::InvalidConfig(_)));
    }

    #[test]
    fn test_resource_set_skips_components_and_carries_exports() {
        let mut stack = Stack::new("demo", "dev");
        let network = stack.component("infraflow:network:VpcNetwork", "net", None).unwrap();
        let vpc = stack
            .resource("vpc", "net-vpc", json!({}))
            .parent(&network)
            .create()
            .unwrap();
        stack
            .register_outputs(&network, json!({"vpc_id": vpc.id()}))
            .unwrap();
        stack.export("vpc_id", vpc.id());

        let set = stack.to_resource_set("local");
        assert_eq!(set.len(), 1);
        assert!(set.get("vpc", "net-vpc").is_some());
        assert_eq!(set.exports["vpc_id"], json!({"$ref": "vpc:net-vpc", "attr": "id"}));
        assert_eq!(
            stack.get(&network.urn).unwrap().outputs["vpc_id"],
            json!({"$ref": "vpc:net-vpc", "attr": "id"})
        );
    }
}
