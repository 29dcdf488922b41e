//! KDL parser for `infra.kdl`
//!
//! ```kdl
//! project "tech-branch"
//! config "aws" { region "us-east-1" }
//! stack "dev" {
//!     program "web-asg"
//!     config { branch "feature-x"; env "dev" }
//!     config "ec2" { instanceType "t3.micro"; minSize 2 }
//! }
//! ```

mod value;

pub use value::{kdl_value_to_json, node_to_value};

use crate::error::{CoreError, Result};
use crate::model::{Project, StackConfig, StackDefinition};
use kdl::{KdlDocument, KdlNode};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Parse a stack file from disk
pub fn parse_stack_file<P: AsRef<Path>>(path: P) -> Result<Project> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| CoreError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_stack_string(&content, default_project_name(path))
}

/// Parse stack file content; `default_name` is used when there is no
/// `project` node
pub fn parse_stack_string(content: &str, default_name: String) -> Result<Project> {
    let doc: KdlDocument = content.parse()?;

    let name = doc
        .nodes()
        .iter()
        .find(|n| n.name().value() == "project")
        .and_then(first_string)
        .unwrap_or(default_name);
    let mut project = Project::new(name);
    let mut stack_nodes = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "project" => {}
            "config" => parse_config(node, &mut project.config)?,
            "stack" => stack_nodes.push(node),
            // Consumed by template expansion
            "variables" => {}
            other => warn!(node = other, "Ignoring unknown top-level node"),
        }
    }

    // Stacks see the complete project config regardless of node order
    for node in stack_nodes {
        let stack = parse_stack(node, &project.config)?;
        if project.stacks.contains_key(&stack.name) {
            return Err(CoreError::InvalidConfig(format!(
                "stack {} is declared twice",
                stack.name
            )));
        }
        project.stacks.insert(stack.name.clone(), stack);
    }

    debug!(project = %project.name, stacks = project.stacks.len(), "Parsed stack file");
    Ok(project)
}

fn parse_stack(node: &KdlNode, project_config: &StackConfig) -> Result<StackDefinition> {
    let name = first_string(node)
        .ok_or_else(|| CoreError::InvalidConfig("stack needs a name: stack \"dev\" { ... }".into()))?;

    let mut own = StackConfig::new(project_config.project());
    let mut stack = StackDefinition {
        name,
        ..Default::default()
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "program" => stack.program = first_string(child),
                "description" => stack.description = first_string(child),
                "config" => parse_config(child, &mut own)?,
                "variables" => {}
                other => warn!(stack = %stack.name, node = other, "Ignoring unknown stack node"),
            }
        }
    }

    let mut config = project_config.clone();
    config.merge(&own);
    stack.config = config;
    Ok(stack)
}

/// `config [namespace] { key value ... }`
fn parse_config(node: &KdlNode, config: &mut StackConfig) -> Result<()> {
    let namespace = first_string(node);
    let Some(children) = node.children() else {
        return Err(CoreError::InvalidConfig(format!(
            "config{} has no values",
            namespace.map(|ns| format!(" \"{}\"", ns)).unwrap_or_default()
        )));
    };
    for child in children.nodes() {
        config.set(
            namespace.as_deref(),
            child.name().value(),
            node_to_value(child)?,
        );
    }
    Ok(())
}

fn first_string(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(str::to_string)
}

fn default_project_name(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string()
}

#[cfg(test)]
mod tests;
