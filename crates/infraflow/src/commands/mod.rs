pub mod destroy;
pub mod graph;
pub mod outputs;
pub mod preview;
pub mod up;
pub mod validate;

use crate::program::{self, Deployment};
use colored::Colorize;
use infraflow_cloud::{ActionType, CloudProvider, LocalProvider, Plan, ResourceSet};
use infraflow_core::Project;
use std::path::PathBuf;
use tracing::debug;

/// A loaded project with its selected stack declared and ready to plan
pub struct Session {
    pub stack_file: PathBuf,
    pub project_root: PathBuf,
    pub project: Project,
    pub deployment: Deployment,
    pub desired: ResourceSet,
    pub provider: LocalProvider,
}

impl Session {
    pub fn open(stack: Option<&str>) -> anyhow::Result<Self> {
        let stack_file = infraflow_config::find_stack_file()?;
        let project_root = infraflow_config::project_root_of(&stack_file);
        debug!(file = %stack_file.display(), root = %project_root.display(), "Using stack file");

        let project = infraflow_core::load_project(&stack_file, &project_root, stack)?;
        let definition = project.select_stack(stack)?;
        let deployment = program::synthesize(&project.name, definition)?;

        let provider = LocalProvider::new(&project_root, &definition.name)
            .with_region(&deployment.region);
        let desired = deployment.stack.to_resource_set(provider.name());

        Ok(Self {
            stack_file,
            project_root,
            project,
            deployment,
            desired,
            provider,
        })
    }

    pub fn stack_name(&self) -> &str {
        self.deployment.stack.name()
    }

    pub fn print_header(&self) {
        println!(
            "{} {} {} ({})",
            "Stack".blue(),
            self.project.name.cyan(),
            self.stack_name().cyan().bold(),
            self.deployment.program.name()
        );
        println!("  region: {}", self.deployment.region);
        println!("  state:  {}", self.project_root.join(".infraflow").display());
        println!();
    }
}

/// Print every action that changes something, then the summary
pub fn print_plan(plan: &Plan) {
    for action in &plan.actions {
        let line = format!(
            "  {} {:<34} {}",
            action.action_type.symbol(),
            action.resource_type,
            action.resource_id
        );
        match action.action_type {
            ActionType::Create => println!("{}", line.green()),
            ActionType::Update => {
                let changed = action
                    .details
                    .get(infraflow_cloud::action::DETAIL_CHANGED)
                    .and_then(|v| v.as_array())
                    .map(|keys| {
                        keys.iter()
                            .filter_map(|k| k.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .unwrap_or_default();
                let note = if changed.is_empty() {
                    "[retry failed]".to_string()
                } else {
                    format!("[{}]", changed)
                };
                println!("{} {}", line.yellow(), note.dimmed());
            }
            ActionType::Delete => println!("{}", line.red()),
            ActionType::NoOp => debug!(urn = %action.urn(), "unchanged"),
        }
    }
    println!();
    println!("{}", plan.summary().to_string().bold());
}

/// Abort unless `--yes` was passed
pub fn confirmed(yes: bool, verb: &str) -> bool {
    if !yes {
        println!();
        println!(
            "{}",
            format!("Pass --yes to {} these changes", verb).yellow()
        );
    }
    yes
}
