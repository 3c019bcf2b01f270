use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable overriding the registry location
pub const REGISTRY_ENV: &str = "REQTRACE_REGISTRY_PATH";

/// A project known to the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredProject {
    /// Project root directory
    pub path: String,
    #[serde(default)]
    pub description: String,
}

/// Registry of named projects
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub projects: BTreeMap<String, RegisteredProject>,
    /// Optional default project name
    #[serde(default)]
    pub default_project: Option<String>,
}

impl Registry {
    /// Loads the registry from the provided path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Registry(format!("Failed to read registry file {}: {}", path.display(), e))
        })?;
        serde_yaml::from_str(&content).map_err(|e| {
            Error::Registry(format!("Failed to parse registry file {}: {}", path.display(), e))
        })
    }

    /// Loads the registry, or an empty one if the file does not exist yet
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn get_project(&self, name: &str) -> Option<&RegisteredProject> {
        self.projects.get(name)
    }

    pub fn list_projects(&self) -> Vec<&str> {
        self.projects.keys().map(|k| k.as_str()).collect()
    }

    /// Registers a new project or updates an existing one
    pub fn register_project(&mut self, name: String, path: String, description: String) {
        self.projects
            .insert(name, RegisteredProject { path, description });
    }

    pub fn unregister_project(&mut self, name: &str) -> bool {
        if self.default_project.as_deref() == Some(name) {
            self.default_project = None;
        }
        self.projects.remove(name).is_some()
    }

    /// Sets a project as the default
    pub fn set_default_project(&mut self, name: &str) -> Result<()> {
        if !self.projects.contains_key(name) {
            return Err(Error::Registry(format!(
                "Project '{}' not found in registry",
                name
            )));
        }
        self.default_project = Some(name.to_string());
        Ok(())
    }

    /// Gets the default project if set
    pub fn get_default_project(&self) -> Option<(&str, &RegisteredProject)> {
        let name = self.default_project.as_deref()?;
        self.projects.get(name).map(|p| (name, p))
    }

    /// The only registered project, if there is exactly one
    pub fn sole_project(&self) -> Option<(&str, &RegisteredProject)> {
        if self.projects.len() != 1 {
            return None;
        }
        self.projects.iter().next().map(|(n, p)| (n.as_str(), p))
    }

    /// Save the registry to the specified path
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(&self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content).map_err(|e| {
            Error::Registry(format!("Failed to write registry to {}: {}", path.display(), e))
        })
    }
}

/// Gets the path to the registry file
pub fn get_registry_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(REGISTRY_ENV) {
        return Ok(PathBuf::from(path));
    }
    let home_dir = dirs::home_dir()
        .ok_or_else(|| Error::Registry("Failed to determine home directory".to_string()))?;
    Ok(home_dir.join(".reqtrace.config"))
}
