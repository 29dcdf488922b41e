use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("KDL parse error: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("IO error: {path}\nreason: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Template error: {file}\nreason: {message}")]
    Template { file: PathBuf, message: String },

    #[error("Template render error: {0}")]
    TemplateRender(String),

    #[error("Stack not found: {0}")]
    StackNotFound(String),

    #[error("No stack selected, choose one of: {}\nhint: pass --stack or set INFRA_STACK", .0.join(", "))]
    NoStackSelected(Vec<String>),

    #[error("Config {key} must be {expected}, found {found}")]
    ConfigType {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, CoreError>;
