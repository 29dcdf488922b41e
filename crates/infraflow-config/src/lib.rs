pub mod error;

pub use error::*;

use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming the stack file directly
pub const CONFIG_PATH_ENV: &str = "INFRA_CONFIG_PATH";

/// Directory of project-local infraflow files
pub const PROJECT_DIR: &str = ".infraflow";

const CANDIDATES: [&str; 4] = ["infra.local.kdl", ".infra.local.kdl", "infra.kdl", ".infra.kdl"];

/// User config directory (`~/.config/infraflow`), created on first use
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("infraflow");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Locate the stack file
///
/// Search order:
/// 1. `INFRA_CONFIG_PATH`
/// 2. current directory: infra.local.kdl, .infra.local.kdl, infra.kdl, .infra.kdl
/// 3. the same names under `./.infraflow/`
/// 4. `~/.config/infraflow/infra.kdl`
pub fn find_stack_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(&config_path);
        if !path.is_file() {
            return Err(ConfigError::ConfigPathMissing(config_path));
        }
        debug!(path = %path.display(), "Stack file from {}", CONFIG_PATH_ENV);
        return Ok(path);
    }

    let current_dir = std::env::current_dir()?;
    if let Some(path) = first_candidate(&current_dir) {
        return Ok(path);
    }

    let project_dir = current_dir.join(PROJECT_DIR);
    if project_dir.is_dir()
        && let Some(path) = first_candidate(&project_dir)
    {
        return Ok(path);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("infraflow").join("infra.kdl");
        if global.is_file() {
            debug!(path = %global.display(), "Using global stack file");
            return Ok(global);
        }
    }

    Err(ConfigError::StackFileNotFound)
}

/// Project root a stack file belongs to
///
/// Files kept under `.infraflow/` belong to the directory above it.
pub fn project_root_of(stack_file: &Path) -> PathBuf {
    let dir = stack_file.parent().unwrap_or_else(|| Path::new("."));
    match dir.file_name() {
        Some(name) if name == PROJECT_DIR => dir.parent().unwrap_or(dir).to_path_buf(),
        _ => dir.to_path_buf(),
    }
}

fn first_candidate(dir: &Path) -> Option<PathBuf> {
    CANDIDATES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}
