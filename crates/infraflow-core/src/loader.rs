//! Stack file loading: template expansion followed by parsing

use crate::error::{CoreError, Result};
use crate::model::Project;
use crate::parser::parse_stack_string;
use crate::template::{TemplateProcessor, extract_variables};
use std::path::Path;
use tracing::{debug, info, instrument};

/// Load a stack file
///
/// `stack` selects which stack's `variables` block takes part in template
/// expansion; the returned project still holds every stack.
#[instrument(skip_all, fields(file = %stack_file.display()))]
pub fn load_project(stack_file: &Path, project_root: &Path, stack: Option<&str>) -> Result<Project> {
    let content = std::fs::read_to_string(stack_file).map_err(|e| CoreError::Io {
        path: stack_file.to_path_buf(),
        message: e.to_string(),
    })?;

    let default_name = project_root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();

    load_project_str(&content, project_root, stack, default_name).map_err(|e| match e {
        CoreError::TemplateRender(message) => CoreError::Template {
            file: stack_file.to_path_buf(),
            message,
        },
        other => other,
    })
}

/// Load stack file content that has already been read
pub fn load_project_str(
    content: &str,
    project_root: &Path,
    stack: Option<&str>,
    default_name: String,
) -> Result<Project> {
    debug!("Preparing template processor");
    let mut processor = TemplateProcessor::new();
    processor.add_variable(
        "PROJECT_ROOT",
        serde_json::Value::String(project_root.to_string_lossy().to_string()),
    );
    processor.add_env_variables();

    let env_file = project_root.join(".env");
    if env_file.is_file() {
        processor.add_env_file_variables(&env_file)?;
    }
    processor.add_variables(extract_variables(content, stack)?);

    let expanded = processor.render_str(content)?;
    let project = parse_stack_string(&expanded, default_name)?;
    info!(
        project = %project.name,
        stacks = project.stacks.len(),
        "Project loaded"
    );
    Ok(project)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    #[serial]
    fn test_load_with_variables_and_env() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".env"), "KEY_NAME=deployer\n").unwrap();
        let stack_file = dir.path().join("infra.kdl");
        fs::write(
            &stack_file,
            r#"
project "tech-branch"
variables { env "dev" }
stack "dev" {
    variables { instance "t3.small" }
    program "web-instance"
    config {
        env "{{ env }}"
        keyName "{{ KEY_NAME }}"
        branch "{{ INFRA_BRANCH | default(value='main') }}"
    }
    config "ec2" { instanceType "{{ instance }}" }
}
"#,
        )
        .unwrap();

        temp_env::with_var("INFRA_BRANCH", Some("feature-x"), || {
            let project = load_project(&stack_file, dir.path(), Some("dev")).unwrap();
            let config = &project.stack("dev").unwrap().config;
            let defaults = config.project_namespace();
            assert_eq!(defaults.get_str("env").unwrap(), Some("dev"));
            assert_eq!(defaults.get_str("keyName").unwrap(), Some("deployer"));
            assert_eq!(defaults.get_str("branch").unwrap(), Some("feature-x"));
            assert_eq!(
                config.namespace("ec2").get_str("instanceType").unwrap(),
                Some("t3.small")
            );
        });
    }

    #[test]
    #[serial]
    fn test_project_root_variable() {
        let dir = tempfile::tempdir().unwrap();
        let project = load_project_str(
            r#"stack "dev" { config { root "{{ PROJECT_ROOT }}" } }"#,
            dir.path(),
            None,
            "demo".to_string(),
        )
        .unwrap();
        let root = project.stack("dev").unwrap().config.project_namespace();
        assert_eq!(
            root.get_str("root").unwrap(),
            Some(dir.path().to_string_lossy().as_ref())
        );
    }

    #[test]
    #[serial]
    fn test_template_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let stack_file = dir.path().join("infra.kdl");
        fs::write(&stack_file, r#"stack "dev" { config { x "{{ nope }}" } }"#).unwrap();

        let err = load_project(&stack_file, dir.path(), None).unwrap_err();
        assert!(matches!(err, CoreError::Template { ref file, .. } if *file == stack_file));
    }
}
