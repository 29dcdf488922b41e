use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error(
        "Stack file not found. Looked in:\n\
        - current directory: infra.local.kdl, .infra.local.kdl, infra.kdl, .infra.kdl\n\
        - ./.infraflow/\n\
        - ~/.config/infraflow/infra.kdl\n\
        Set INFRA_CONFIG_PATH to point at a file directly"
    )]
    StackFileNotFound,

    #[error("INFRA_CONFIG_PATH points at {0}, which does not exist")]
    ConfigPathMissing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
