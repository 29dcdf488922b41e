//! Template expansion of stack files
//!
//! `infra.kdl` is rendered with tera before it is parsed. The context holds
//! `PROJECT_ROOT`, environment variables prefixed `INFRA_` or `CI_`, values
//! from a project `.env` file and the `variables { ... }` blocks of the file
//! itself (the selected stack's block overriding the top-level one).

use crate::error::{CoreError, Result};
use crate::parser::kdl_value_to_json;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use tera::{Context, Tera};
use tracing::{debug, info};

/// Template variables
pub type Variables = HashMap<String, serde_json::Value>;

const ALLOWED_ENV_PREFIXES: &[&str] = &["INFRA_", "CI_"];

pub struct TemplateProcessor {
    tera: Tera,
    context: Context,
}

impl TemplateProcessor {
    pub fn new() -> Self {
        Self {
            tera: Tera::default(),
            context: Context::new(),
        }
    }

    pub fn add_variable(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.context.insert(key.into(), &value);
    }

    pub fn add_variables(&mut self, variables: Variables) {
        for (key, value) in variables {
            self.context.insert(key, &value);
        }
    }

    /// Add environment variables with an allowed prefix
    #[tracing::instrument(skip(self))]
    pub fn add_env_variables(&mut self) {
        let mut count = 0;
        for (key, value) in std::env::vars() {
            if ALLOWED_ENV_PREFIXES
                .iter()
                .any(|prefix| key.starts_with(prefix))
            {
                debug!(key = %key, "Adding environment variable");
                self.context.insert(key, &serde_json::Value::String(value));
                count += 1;
            }
        }
        info!(env_var_count = count, "Added filtered environment variables");
    }

    /// Add every `KEY=VALUE` line of a `.env` file
    #[tracing::instrument(skip(self))]
    pub fn add_env_file_variables(&mut self, env_file_path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(env_file_path).map_err(|e| CoreError::Io {
            path: env_file_path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut count = 0;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let value = strip_quotes(value.trim());
                self.context
                    .insert(key.trim(), &serde_json::Value::String(value.to_string()));
                count += 1;
            }
        }

        info!(
            env_file = %env_file_path.display(),
            variable_count = count,
            "Loaded variables from .env file"
        );
        Ok(())
    }

    pub fn render_str(&mut self, template: &str) -> Result<String> {
        self.tera
            .render_str(template, &self.context)
            .map_err(|e| CoreError::TemplateRender(tera_error_detail(&e)))
    }

    /// Render a file, attributing errors to it
    pub fn render_file(&mut self, path: &Path) -> Result<String> {
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        self.render_str(&content).map_err(|e| match e {
            CoreError::TemplateRender(message) => CoreError::Template {
                file: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }
}

impl Default for TemplateProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Variables of the top-level `variables` blocks and, when given, of the
/// named stack's blocks
///
/// The blocks are cut out textually: the rest of the file may contain
/// template syntax that is not valid KDL before rendering.
pub fn extract_variables(kdl_content: &str, stack: Option<&str>) -> Result<Variables> {
    let stack_re = Regex::new(r#"stack\s+"([^"]+)"\s*\{"#)
        .map_err(|e| CoreError::InvalidConfig(format!("regex compile error: {}", e)))?;

    let mut top_level = String::with_capacity(kdl_content.len());
    let mut selected = String::new();
    let mut last_end = 0;
    for caps in stack_re.captures_iter(kdl_content) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if whole.start() < last_end {
            continue;
        }
        let Some(close) = find_matching_brace(kdl_content, whole.end() - 1) else {
            continue;
        };
        top_level.push_str(&kdl_content[last_end..whole.start()]);
        if Some(name.as_str()) == stack {
            selected.push_str(&kdl_content[whole.end()..close]);
        }
        last_end = close + 1;
    }
    top_level.push_str(&kdl_content[last_end..]);

    let mut vars = variables_in(&top_level)?;
    vars.extend(variables_in(&selected)?);
    Ok(vars)
}

fn variables_in(content: &str) -> Result<Variables> {
    let re = Regex::new(r"(?s)variables\s*\{(?P<content>.*?)\}")
        .map_err(|e| CoreError::InvalidConfig(format!("regex compile error: {}", e)))?;

    let mut vars = HashMap::new();
    for cap in re.captures_iter(content) {
        let Some(block) = cap.name("content") else {
            continue;
        };
        let doc: kdl::KdlDocument = block.as_str().parse().map_err(|e| {
            CoreError::InvalidConfig(format!("KDL parse error in variables block: {}", e))
        })?;
        for node in doc.nodes() {
            if let Some(entry) = node.entries().first() {
                vars.insert(node.name().value().to_string(), kdl_value_to_json(entry.value()));
            }
        }
    }
    Ok(vars)
}

/// Position of the brace closing the one at `open_pos`
fn find_matching_brace(content: &str, open_pos: usize) -> Option<usize> {
    let bytes = content.as_bytes();
    if bytes.get(open_pos) != Some(&b'{') {
        return None;
    }

    let mut depth = 1;
    let mut in_string = false;
    let mut escaped = false;
    for (pos, &c) in bytes.iter().enumerate().skip(open_pos + 1) {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            b'\\' => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(pos);
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_quotes(s: &str) -> &str {
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

/// Flatten a tera error chain, naming the undefined variable when that is
/// the cause
fn tera_error_detail(e: &tera::Error) -> String {
    use std::error::Error;

    let mut details = vec![e.to_string()];
    let mut source = e.source();
    while let Some(err) = source {
        details.push(err.to_string());
        source = err.source();
    }
    let full_error = details.join(" | ");

    if let Some(start) = full_error.find("Variable `")
        && let Some(end) = full_error[start..].find("` not found")
    {
        let var_name = &full_error[start + 10..start + end];
        return format!(
            "undefined variable `{}`\nhint: define it in a variables block, .env or an INFRA_ environment variable",
            var_name
        );
    }
    full_error
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serial_test::serial;

    #[test]
    fn test_render_variables_and_filters() {
        let mut processor = TemplateProcessor::new();
        processor.add_variable("branch", json!("Feature-X"));
        processor.add_variable("is_prod", json!(false));

        let rendered = processor
            .render_str(
                r#"config { branch "{{ branch | lower }}" }
{% if is_prod %}config "ec2" { minSize 4 }{% else %}config "ec2" { minSize 1 }{% endif %}"#,
            )
            .unwrap();
        assert!(rendered.contains(r#"branch "feature-x""#));
        assert!(rendered.contains("minSize 1"));
    }

    #[test]
    fn test_undefined_variable_is_named() {
        let mut processor = TemplateProcessor::new();
        let err = processor.render_str("keyName \"{{ KEY }}\"").unwrap_err();
        assert!(err.to_string().contains("undefined variable `KEY`"));
    }

    #[test]
    #[serial]
    fn test_env_variables_filtering() {
        temp_env::with_vars(
            [
                ("INFRA_REGION", Some("us-west-2")),
                ("CI_COMMIT_REF", Some("main")),
                ("AWS_SECRET_ACCESS_KEY", Some("do-not-leak")),
            ],
            || {
                let mut processor = TemplateProcessor::new();
                processor.add_env_variables();
                assert_eq!(
                    processor.render_str("{{ INFRA_REGION }}/{{ CI_COMMIT_REF }}").unwrap(),
                    "us-west-2/main"
                );
                assert!(processor.render_str("{{ AWS_SECRET_ACCESS_KEY }}").is_err());
            },
        );
    }

    #[test]
    fn test_env_file_variables() {
        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join(".env");
        std::fs::write(&env_file, "# comment\nKEY_NAME=\"deploy\"\n\nBRANCH='main'\n").unwrap();

        let mut processor = TemplateProcessor::new();
        processor.add_env_file_variables(&env_file).unwrap();
        assert_eq!(
            processor.render_str("{{ KEY_NAME }}@{{ BRANCH }}").unwrap(),
            "deploy@main"
        );
    }

    #[test]
    fn test_extract_variables_with_stack_override() {
        let content = r#"
variables {
    owner "platform"
    size 2
}
stack "dev" {
    variables { size 1 }
    config "ec2" { minSize {{ size }} }
}
stack "prod" {
    variables { size 4 }
}
"#;
        let global = extract_variables(content, None).unwrap();
        assert_eq!(global["owner"], json!("platform"));
        assert_eq!(global["size"], json!(2));

        let dev = extract_variables(content, Some("dev")).unwrap();
        assert_eq!(dev["size"], json!(1));
        assert_eq!(dev["owner"], json!("platform"));

        let prod = extract_variables(content, Some("prod")).unwrap();
        assert_eq!(prod["size"], json!(4));
    }

    #[test]
    fn test_find_matching_brace() {
        let content = r#"a { b { "}" } c }"#;
        assert_eq!(find_matching_brace(content, 2), Some(content.len() - 1));
        assert_eq!(find_matching_brace(content, 0), None);
        assert_eq!(find_matching_brace("{ unclosed", 0), None);
    }

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("\"value\""), "value");
        assert_eq!(strip_quotes("'value'"), "value");
        assert_eq!(strip_quotes("value"), "value");
        assert_eq!(strip_quotes("\""), "\"");
    }
}
