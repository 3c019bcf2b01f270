use anyhow::Result;
use inquire::{Confirm, Select, Text};
use std::path::PathBuf;

use reqtrace_core::{list_available_projects, Category, DocumentType};

/// Prompts the user to pick a document type
pub fn prompt_document_type() -> Result<DocumentType> {
    let options: Vec<String> = DocumentType::all()
        .iter()
        .map(|t| format!("{} - {}", t.code(), t.label()))
        .collect();
    let selection = Select::new("Document type:", options).prompt()?;
    let code = selection.split(' ').next().unwrap_or_default();
    DocumentType::from_code(code).ok_or_else(|| anyhow::anyhow!("Unknown document type '{}'", code))
}

/// Prompts the user to pick a node category
pub fn prompt_category() -> Result<Category> {
    let options: Vec<String> = Category::all()
        .iter()
        .map(|c| format!("{} - {}", c.code(), c.label()))
        .collect();
    let selection = Select::new("Category:", options).prompt()?;
    let code = selection.split(' ').next().unwrap_or_default();
    Category::from_code(code).ok_or_else(|| anyhow::anyhow!("Unknown category '{}'", code))
}

pub fn prompt_text(label: &str) -> Result<String> {
    Ok(Text::new(label).prompt()?)
}

/// Multiline input through the user's editor
pub fn prompt_editor(label: &str, current: &str) -> Result<String> {
    Ok(inquire::Editor::new(label)
        .with_predefined_text(current)
        .prompt()?)
}

pub fn confirm(question: &str) -> Result<bool> {
    Ok(Confirm::new(question).with_default(false).prompt()?)
}

/// Prompts the user to select a project
pub fn prompt_select_project() -> Result<String> {
    let projects = list_available_projects()?;

    if projects.is_empty() {
        anyhow::bail!("No projects found in registry; run `reqtrace init` or `reqtrace db register`");
    }

    let options: Vec<String> = projects
        .iter()
        .map(|(name, desc)| format!("{} ({})", name, desc))
        .collect();

    let selection = Select::new("Select a project:", options).prompt()?;

    // The project name is everything before the description
    let project_name = selection.split(" (").next().unwrap_or_default();

    Ok(project_name.to_string())
}

/// Prompts the user for project registration details
pub fn prompt_register_project() -> Result<(String, PathBuf, String, bool)> {
    let name = Text::new("Project name:").prompt()?;
    let path = PathBuf::from(Text::new("Project directory:").prompt()?);
    let description = Text::new("Project description:").prompt()?;
    let default = Confirm::new("Set as default project?").prompt()?;

    Ok((name, path, description, default))
}
