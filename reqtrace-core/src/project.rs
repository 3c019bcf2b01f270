use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::registry::{get_registry_path, Registry};
use crate::storage::PROJECT_FILE;

/// Environment variable naming the project to open
pub const PROJECT_ENV: &str = "REQTRACE_PROJECT";
/// Environment variable naming the author of revisions
pub const AUTHOR_ENV: &str = "REQTRACE_AUTHOR";

/// Determines the project root to open.
///
/// Priority: explicit option, `REQTRACE_PROJECT`, a project in the current
/// directory, the only registered project, the registry default. `None`
/// means the caller has to ask.
pub fn determine_project_root(project_option: Option<&str>) -> Result<Option<PathBuf>> {
    let registry = Registry::load_or_default(get_registry_path()?)?;
    let env_project = env::var(PROJECT_ENV).ok();
    let cwd = env::current_dir()?;
    resolve_project_root(project_option, env_project.as_deref(), &cwd, &registry)
}

/// A registry name, or a directory that holds a project
fn lookup(name: &str, registry: &Registry, source: &str) -> Result<PathBuf> {
    if let Some(project) = registry.get_project(name) {
        return Ok(PathBuf::from(&project.path));
    }
    let as_path = Path::new(name);
    if as_path.join(PROJECT_FILE).exists() {
        return Ok(as_path.to_path_buf());
    }
    Err(Error::Registry(format!(
        "Project '{}'{} not found in registry",
        name, source
    )))
}

pub fn resolve_project_root(
    project_option: Option<&str>,
    env_project: Option<&str>,
    cwd: &Path,
    registry: &Registry,
) -> Result<Option<PathBuf>> {
    if let Some(name) = project_option {
        return lookup(name, registry, "").map(Some);
    }
    if let Some(name) = env_project {
        return lookup(name, registry, &format!(" from {}", PROJECT_ENV)).map(Some);
    }
    if cwd.join(PROJECT_FILE).exists() {
        return Ok(Some(cwd.to_path_buf()));
    }
    if let Some((_, project)) = registry.sole_project() {
        return Ok(Some(PathBuf::from(&project.path)));
    }
    if let Some((_, project)) = registry.get_default_project() {
        return Ok(Some(PathBuf::from(&project.path)));
    }
    Ok(None)
}

/// Lists available projects from the registry as (name, description)
pub fn list_available_projects() -> Result<Vec<(String, String)>> {
    let registry = Registry::load_or_default(get_registry_path()?)?;
    Ok(registry
        .projects
        .iter()
        .map(|(name, project)| (name.clone(), project.description.clone()))
        .collect())
}

/// Author recorded on issued revisions: option, `REQTRACE_AUTHOR`, then `USER`
pub fn determine_author(author_option: Option<&str>) -> String {
    author_option
        .map(str::to_string)
        .or_else(|| env::var(AUTHOR_ENV).ok())
        .or_else(|| env::var("USER").ok())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn registry_with(names: &[(&str, &str)]) -> Registry {
        let mut registry = Registry::default();
        for (name, path) in names {
            registry.register_project(name.to_string(), path.to_string(), String::new());
        }
        registry
    }

    #[test]
    fn test_option_beats_everything() {
        let cwd = TempDir::new().unwrap();
        fs::write(cwd.path().join(PROJECT_FILE), "").unwrap();
        let registry = registry_with(&[("a", "/a"), ("b", "/b")]);

        let root = resolve_project_root(Some("b"), Some("a"), cwd.path(), &registry).unwrap();
        assert_eq!(root, Some(PathBuf::from("/b")));
        let root = resolve_project_root(None, Some("a"), cwd.path(), &registry).unwrap();
        assert_eq!(root, Some(PathBuf::from("/a")));
    }

    #[test]
    fn test_unknown_name_is_an_error() {
        let cwd = TempDir::new().unwrap();
        let registry = registry_with(&[("a", "/a")]);
        assert!(resolve_project_root(Some("zzz"), None, cwd.path(), &registry).is_err());
    }

    #[test]
    fn test_directory_option_is_accepted() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(PROJECT_FILE), "").unwrap();
        let name = dir.path().to_string_lossy().to_string();
        let root = resolve_project_root(Some(&name), None, Path::new("/"), &Registry::default())
            .unwrap();
        assert_eq!(root, Some(dir.path().to_path_buf()));
    }

    #[test]
    fn test_fallbacks() {
        let cwd = TempDir::new().unwrap();
        let empty = Registry::default();
        assert_eq!(resolve_project_root(None, None, cwd.path(), &empty).unwrap(), None);

        let single = registry_with(&[("only", "/only")]);
        assert_eq!(
            resolve_project_root(None, None, cwd.path(), &single).unwrap(),
            Some(PathBuf::from("/only"))
        );

        let mut two = registry_with(&[("a", "/a"), ("b", "/b")]);
        assert_eq!(resolve_project_root(None, None, cwd.path(), &two).unwrap(), None);
        two.set_default_project("b").unwrap();
        assert_eq!(
            resolve_project_root(None, None, cwd.path(), &two).unwrap(),
            Some(PathBuf::from("/b"))
        );

        fs::write(cwd.path().join(PROJECT_FILE), "").unwrap();
        assert_eq!(
            resolve_project_root(None, None, cwd.path(), &two).unwrap(),
            Some(cwd.path().to_path_buf())
        );
    }

    #[test]
    fn test_author_option_wins() {
        assert_eq!(determine_author(Some("ann")), "ann");
    }
}
