//! Stack configuration for infraflow
//!
//! `infra.kdl` is rendered with tera, parsed into a [`Project`] and exposes
//! per-stack, namespaced configuration through [`StackConfig`].

pub mod error;
pub mod loader;
pub mod model;
pub mod parser;
pub mod template;

pub use error::{CoreError, Result};
pub use loader::{load_project, load_project_str};
pub use model::{ConfigNamespace, Project, StackConfig, StackDefinition};
pub use parser::{parse_stack_file, parse_stack_string};
pub use template::{TemplateProcessor, Variables, extract_variables};
