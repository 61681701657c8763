use std::path::PathBuf;

use directories::ProjectDirs;

pub const APP_NAME: &str = "scriptbot";

/// Platform directories for the bot (XDG on Linux, Application Support on
/// macOS, AppData on Windows). `None` when no home directory can be found.
pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
}

pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

pub fn log_dir() -> Option<PathBuf> {
    data_dir().map(|dir| dir.join("logs"))
}

/// Where scripts are looked up when the configuration names no directory
pub fn default_script_dir() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("scripts"))
}
