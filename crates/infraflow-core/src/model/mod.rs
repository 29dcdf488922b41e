//! Project and stack definitions

mod config;

pub use config::{ConfigNamespace, StackConfig};

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything declared in one `infra.kdl`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    /// Config shared by every stack, overridden per stack
    #[serde(default)]
    pub config: StackConfig,
    #[serde(default)]
    pub stacks: BTreeMap<String, StackDefinition>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            config: StackConfig::new(&name),
            name,
            stacks: BTreeMap::new(),
        }
    }

    pub fn stack(&self, name: &str) -> Result<&StackDefinition> {
        self.stacks
            .get(name)
            .ok_or_else(|| CoreError::StackNotFound(name.to_string()))
    }

    /// The named stack, or the only stack when no name is given
    pub fn select_stack(&self, name: Option<&str>) -> Result<&StackDefinition> {
        match name {
            Some(name) => self.stack(name),
            None if self.stacks.len() == 1 => self
                .stacks
                .values()
                .next()
                .ok_or_else(|| CoreError::NoStackSelected(Vec::new())),
            None => Err(CoreError::NoStackSelected(
                self.stacks.keys().cloned().collect(),
            )),
        }
    }

    pub fn stack_names(&self) -> Vec<&str> {
        self.stacks.keys().map(String::as_str).collect()
    }
}

/// One deployable stack
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackDefinition {
    pub name: String,
    /// Composition program to run
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Project config merged with the stack's own
    #[serde(default)]
    pub config: StackConfig,
}
