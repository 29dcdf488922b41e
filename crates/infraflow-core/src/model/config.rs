//! Namespaced configuration values
//!
//! Values live under a namespace (`aws`, `vpc`, ...). The project namespace
//! is the default; `config { branch "x" }` sets `<project>:branch`. Absent
//! keys read as `Ok(None)`, a value of the wrong type is an error.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    project: String,
    namespaces: BTreeMap<String, Map<String, Value>>,
}

impl StackConfig {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            namespaces: BTreeMap::new(),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Set `key` in `namespace`, the project namespace when `None`
    ///
    /// A key of the form `ns:key` names its namespace explicitly.
    pub fn set(&mut self, namespace: Option<&str>, key: &str, value: Value) {
        let (namespace, key) = match (namespace, key.split_once(':')) {
            (None, Some((ns, k))) => (ns.to_string(), k),
            (Some(ns), _) => (ns.to_string(), key),
            (None, None) => (self.project.clone(), key),
        };
        self.namespaces
            .entry(namespace)
            .or_default()
            .insert(key.to_string(), value);
    }

    /// Overlay `other` on top of this config
    pub fn merge(&mut self, other: &StackConfig) {
        for (namespace, values) in &other.namespaces {
            let namespace = if *namespace == other.project {
                self.project.clone()
            } else {
                namespace.clone()
            };
            let target = self.namespaces.entry(namespace).or_default();
            for (key, value) in values {
                target.insert(key.clone(), value.clone());
            }
        }
    }

    /// Values of the project namespace
    pub fn project_namespace(&self) -> ConfigNamespace<'_> {
        self.namespace(&self.project)
    }

    pub fn namespace<'a>(&'a self, name: &'a str) -> ConfigNamespace<'a> {
        ConfigNamespace {
            name,
            values: self.namespaces.get(name),
        }
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.values().all(Map::is_empty)
    }
}

/// Read view of one namespace
#[derive(Debug, Clone, Copy)]
pub struct ConfigNamespace<'a> {
    name: &'a str,
    values: Option<&'a Map<String, Value>>,
}

impl<'a> ConfigNamespace<'a> {
    pub fn name(&self) -> &str {
        self.name
    }

    /// Raw value; explicit nulls read as absent
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.values?.get(key).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, key: &str) -> Result<Option<&'a str>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(self.mismatch(key, "a string", other)),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(self.mismatch(key, "a boolean", other)),
        }
    }

    pub fn get_int(&self, key: &str) -> Result<Option<i64>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Number(n)) if n.is_i64() => Ok(n.as_i64()),
            Some(other) => Err(self.mismatch(key, "an integer", other)),
        }
    }

    pub fn get_float(&self, key: &str) -> Result<Option<f64>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(other) => Err(self.mismatch(key, "a number", other)),
        }
    }

    pub fn get_object(&self, key: &str) -> Result<Option<&'a Map<String, Value>>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map)),
            Some(other) => Err(self.mismatch(key, "an object", other)),
        }
    }

    /// A single string reads as a one-element list
    pub fn get_str_list(&self, key: &str) -> Result<Option<Vec<String>>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(vec![s.clone()])),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(self.mismatch(key, "a list of strings", other)),
                })
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(other) => Err(self.mismatch(key, "a list of strings", other)),
        }
    }

    /// Like [`get_str`](Self::get_str) but absent is an error
    pub fn require_str(&self, key: &str) -> Result<&'a str> {
        self.get_str(key)?.ok_or_else(|| {
            CoreError::InvalidConfig(format!("{}:{} must be set", self.name, key))
        })
    }

    fn mismatch(&self, key: &str, expected: &'static str, found: &Value) -> CoreError {
        CoreError::ConfigType {
            key: format!("{}:{}", self.name, key),
            expected,
            found: kind_of(found),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "an integer",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
