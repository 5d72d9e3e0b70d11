//! Configuration system for expkit.
//!
//! Uses `figment` for layered configuration: defaults -> user config ->
//! project config (`.expkit/config.toml`) -> environment variables
//! (`EXPKIT_` prefix) -> explicit overrides.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Directory, relative to the project root, holding expkit state.
pub const CONFIG_DIR: &str = ".expkit";

/// Per-project settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project name injected into every dispatch. Falls back to the project
    /// directory's name.
    pub project_name: Option<String>,
    /// Where declaration files live, relative to the project root unless
    /// absolute.
    pub declarations_dir: PathBuf,
    /// Extension of declaration files, without the dot.
    pub file_extension: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            project_name: None,
            declarations_dir: PathBuf::from("src"),
            file_extension: "py".to_string(),
        }
    }
}

impl ProjectConfig {
    /// Check required fields and normalize the extension.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.declarations_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingField {
                field: "declarations_dir".into(),
            });
        }
        self.file_extension = self.file_extension.trim_start_matches('.').to_string();
        if self.file_extension.is_empty() {
            return Err(ConfigError::MissingField {
                field: "file_extension".into(),
            });
        }
        if self.project_name.as_deref() == Some("") {
            self.project_name = None;
        }
        Ok(self)
    }

    /// The declarations directory resolved against `workspace`.
    pub fn declarations_root(&self, workspace: &Path) -> PathBuf {
        if self.declarations_dir.is_absolute() {
            self.declarations_dir.clone()
        } else {
            workspace.join(&self.declarations_dir)
        }
    }

    /// The configured project name, or the workspace directory's name.
    pub fn resolve_project_name(&self, workspace: &Path) -> Option<String> {
        if let Some(name) = &self.project_name {
            return Some(name.clone());
        }
        let resolved = workspace
            .canonicalize()
            .unwrap_or_else(|_| workspace.to_path_buf());
        resolved
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }
}

/// Values set explicitly by the caller, taking precedence over every other
/// layer. Unset fields leave lower layers untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declarations_dir: Option<PathBuf>,
}

/// Path of the project-level config file.
pub fn config_path(workspace: &Path) -> PathBuf {
    workspace.join(CONFIG_DIR).join("config.toml")
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "expkit", "expkit")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load configuration by merging all layers.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&ConfigOverrides>,
) -> Result<ProjectConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(ProjectConfig::default()));

    // User-level config
    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Project-level config
    if let Some(ws) = workspace {
        let project_config = config_path(ws);
        if project_config.exists() {
            figment = figment.merge(Toml::file(&project_config));
        }
    }

    // Environment variables (EXPKIT_PROJECT_NAME, EXPKIT_DECLARATIONS_DIR, ...)
    figment = figment.merge(Env::prefixed("EXPKIT_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: ProjectConfig = figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;
    config.validate()
}

/// Check whether a user-level or project-level config file exists.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if user_config_path().is_some_and(|path| path.exists()) {
        return true;
    }
    workspace.is_some_and(|ws| config_path(ws).exists())
}

/// Write `config` to the project config file, creating `.expkit/`.
pub fn write_config(workspace: &Path, config: &ProjectConfig) -> crate::error::Result<PathBuf> {
    let path = config_path(workspace);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let rendered = toml::to_string_pretty(config).map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;
    std::fs::write(&path, rendered)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProjectConfig::default();
        assert_eq!(config.declarations_dir, PathBuf::from("src"));
        assert_eq!(config.file_extension, "py");
        assert!(config.project_name.is_none());
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(CONFIG_DIR)).unwrap();
        std::fs::write(
            config_path(dir.path()),
            r#"
project_name = "llama"
declarations_dir = "experiments"
file_extension = ".py"
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.project_name.as_deref(), Some("llama"));
        assert_eq!(config.declarations_dir, PathBuf::from("experiments"));
        assert_eq!(config.file_extension, "py");
        assert_eq!(
            config.declarations_root(dir.path()),
            dir.path().join("experiments")
        );
    }

    #[test]
    fn test_overrides_win() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(CONFIG_DIR)).unwrap();
        std::fs::write(config_path(dir.path()), "project_name = \"from_file\"\n").unwrap();

        let overrides = ConfigOverrides {
            project_name: Some("from_cli".into()),
            ..Default::default()
        };
        let config = load_config(Some(dir.path()), Some(&overrides)).unwrap();
        assert_eq!(config.project_name.as_deref(), Some("from_cli"));
        assert_eq!(config.declarations_dir, PathBuf::from("src"));
    }

    #[test]
    fn test_malformed_config_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(CONFIG_DIR)).unwrap();
        std::fs::write(config_path(dir.path()), "declarations_dir = [1, 2]\n").unwrap();

        let err = load_config(Some(dir.path()), None).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_validate_rejects_empty_fields() {
        let config = ProjectConfig {
            file_extension: ".".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField { field }) if field == "file_extension"
        ));
    }

    #[test]
    fn test_write_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProjectConfig {
            project_name: Some("alpaca".into()),
            ..Default::default()
        };
        let path = write_config(dir.path(), &config).unwrap();
        assert!(path.ends_with(".expkit/config.toml"));
        assert!(config_exists(Some(dir.path())));

        let reloaded = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_resolve_project_name_falls_back_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path().join("my_project");
        std::fs::create_dir(&workspace).unwrap();
        let config = ProjectConfig::default();
        assert_eq!(
            config.resolve_project_name(&workspace).as_deref(),
            Some("my_project")
        );
    }
}
