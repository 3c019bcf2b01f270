mod cli;
mod prompts;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::path::{Path, PathBuf};

use reqtrace_core::store::{migrate_legacy_project, retry_pending_documents};
use reqtrace_core::{
    determine_author, determine_project_root, export, get_registry_path, AuditReport, Category,
    ContentNode, Contributor, DocumentType, Graph, IssueKind, NodeField, Parent, ParseMode,
    Registry, Relation, Repository, RevisionTrack, Storage, PROJECT_FILE,
};

use crate::cli::{
    Cli, Command, ContributorCommand, DbCommand, DocCommand, NodeCommand, TraceCommand,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let mode = if cli.strict {
        ParseMode::Strict
    } else {
        ParseMode::Fix
    };

    match &cli.command {
        Command::Init { path, remote, name } => {
            init_project(path.as_deref(), remote.as_deref(), name.as_deref())?;
        }
        Command::Db(db_cmd) => {
            handle_db_command(db_cmd)?;
        }
        Command::Migrate => {
            migrate(&project_root(&cli)?, mode)?;
        }
        command => {
            let root = project_root(&cli)?;
            let mut graph = Graph::open(&root, mode)
                .with_context(|| format!("Failed to open project at {}", root.display()))?;
            run(&cli, command, &mut graph)?;
        }
    }

    Ok(())
}

fn run(cli: &Cli, command: &Command, graph: &mut Graph) -> Result<()> {
    match command {
        Command::Doc(doc_cmd) => handle_doc_command(cli, doc_cmd, graph),
        Command::Node(node_cmd) => handle_node_command(node_cmd, graph),
        Command::Trace(trace_cmd) => handle_trace_command(trace_cmd, graph),
        Command::Audit { doc, problems } => audit(graph, *doc, *problems),
        Command::Export {
            doc,
            format,
            output,
        } => handle_export_command(graph, *doc, format, output.as_deref()),
        Command::Gc { dry_run } => collect_garbage(graph, *dry_run),
        Command::Contributor(cmd) => handle_contributor_command(cmd, graph),
        Command::Init { .. } | Command::Db(_) | Command::Migrate => Ok(()),
    }
}

/// Resolves the project root, prompting when nothing else decides
fn project_root(cli: &Cli) -> Result<PathBuf> {
    if let Some(root) = determine_project_root(cli.project.as_deref())? {
        return Ok(root);
    }
    let name = prompts::prompt_select_project()?;
    determine_project_root(Some(&name))?.context("Project selection failed")
}

fn init_project(path: Option<&Path>, remote: Option<&str>, name: Option<&str>) -> Result<()> {
    let root = match path {
        Some(p) => p.to_path_buf(),
        None => std::env::current_dir()?,
    };
    let repository = Repository {
        root: root.to_string_lossy().to_string(),
        remote: remote.unwrap_or_default().to_string(),
        pathspec: String::new(),
    };
    Graph::create_project(&root, repository)
        .with_context(|| format!("Failed to create project at {}", root.display()))?;
    println!("{} {}", "Created project at".green(), root.display());

    if let Some(name) = name {
        let absolute = std::fs::canonicalize(&root)?;
        register(name, &absolute, "", false)?;
    }
    Ok(())
}

fn migrate(root: &Path, mode: ParseMode) -> Result<()> {
    let storage = Storage::open(root, mode)?;
    let raw = storage
        .read_raw(PROJECT_FILE)?
        .with_context(|| format!("No project file in {}", root.display()))?;

    let report = match migrate_legacy_project(&storage, &raw)? {
        Some(report) => report,
        None => match retry_pending_documents(&storage)? {
            Some(report) => report,
            None => {
                println!("{}", "Project is already in the current format.".yellow());
                return Ok(());
            }
        },
    };

    println!(
        "{} {} node(s) converted",
        "Migration complete:".green(),
        report.nodes_converted
    );
    for name in &report.migrated {
        println!("  {} {}", "converted".green(), name);
    }
    for (name, reason) in &report.failed {
        println!("  {} {}: {}", "failed".red(), name, reason);
    }
    if !report.failed.is_empty() {
        println!("Fix the failed documents' node files and run `reqtrace migrate` again.");
    }
    Ok(())
}

// =========================================================================
// Documents
// =========================================================================

fn handle_doc_command(cli: &Cli, cmd: &DocCommand, graph: &mut Graph) -> Result<()> {
    match cmd {
        DocCommand::Add { r#type, name } => {
            let doc_type = match r#type {
                Some(t) => parse_document_type(t)?,
                None => prompts::prompt_document_type()?,
            };
            let name = match name {
                Some(n) => n.clone(),
                None => prompts::prompt_text("Document name:")?,
            };
            let doc = graph.create_document(doc_type, &name)?;
            println!("{} #{} {} ({})", "Created document".green(), doc.id, doc.name, doc.doc_type);
        }
        DocCommand::List => list_documents(graph),
        DocCommand::Show { id } => show_document(graph, *id)?,
        DocCommand::Issue {
            id,
            major,
            report,
            details,
        } => {
            let kind = if *major { IssueKind::Major } else { IssueKind::Minor };
            let track = if *report {
                RevisionTrack::TraceReport
            } else {
                RevisionTrack::Body
            };
            let author = determine_author(cli.author.as_deref());
            let entry = graph.issue_document(*id, track, kind, &author, details.clone())?;
            println!(
                "{} {} on {} by {}",
                "Issued version".green(),
                entry.version_string(),
                entry.date_string(),
                entry.author
            );
        }
        DocCommand::Del { id, yes } => {
            let doc = graph.load_document(*id)?;
            println!("{}", "Document to delete:".yellow());
            println!("  #{} {} ({}), {} root node(s)", doc.id, doc.name, doc.doc_type, doc.children.len());
            if !*yes && !prompts::confirm("Delete this document and all of its nodes?")? {
                println!("Deletion cancelled.");
                return Ok(());
            }
            let removed = graph.delete_document(*id)?;
            println!("{} ({} node(s) removed)", "Document deleted.".green(), removed.len());
        }
    }
    Ok(())
}

fn parse_document_type(s: &str) -> Result<DocumentType> {
    DocumentType::from_code(s)
        .or_else(|| DocumentType::from_label(s))
        .with_context(|| format!("Unknown document type '{}'", s))
}

fn list_documents(graph: &Graph) {
    let documents = graph.documents();
    if documents.is_empty() {
        println!("{}", "No documents found.".yellow());
        return;
    }
    println!("{:<6} | {:<4} | {}", "ID", "Type", "Name");
    println!("{}", "-".repeat(60));
    for doc in documents {
        println!("{:<6} | {:<4} | {}", doc.id, doc.doc_type.code().cyan(), doc.name);
    }
}

fn node_line(node: &ContentNode) -> String {
    let code_text = node.category.code();
    let code = match node.category {
        Category::Heading => code_text.as_str().bold(),
        Category::Requirement(..) => code_text.as_str().blue(),
        Category::Test(_) => code_text.as_str().magenta(),
        _ => code_text.as_str().dimmed(),
    };
    let suspect = if node.trace.suspect.is_empty() {
        String::new()
    } else {
        format!(" {}", "[suspect]".red())
    };
    format!("#{} [{}] {}{}", node.id, code, node.summary(), suspect)
}

fn show_document(graph: &Graph, id: u64) -> Result<()> {
    let doc = graph.load_document(id)?;
    println!("{} {} ({})", "Document".bold(), doc.name, doc.doc_type.label());
    if let Some(last) = doc.revisions.last() {
        println!("Version {} issued {} by {}", last.version_string(), last.date_string(), last.author);
    }
    println!();
    for (depth, node) in graph.walk_document(id)? {
        println!("{}{}", "  ".repeat(depth), node_line(&node));
    }
    Ok(())
}

// =========================================================================
// Nodes
// =========================================================================

fn parent_of(doc: Option<u64>, parent: Option<u64>) -> Result<Parent> {
    match (doc, parent) {
        (Some(doc), None) => Ok(Parent::Document(doc)),
        (None, Some(node)) => Ok(Parent::Node(node)),
        _ => anyhow::bail!("Give exactly one of --doc or --parent"),
    }
}

fn report_reorder(done: bool, what: &str) {
    if done {
        println!("{}", what.green());
    } else {
        println!("{}", "Not allowed here; nothing changed.".yellow());
    }
}

fn handle_node_command(cmd: &NodeCommand, graph: &mut Graph) -> Result<()> {
    match cmd {
        NodeCommand::Add {
            doc,
            parent,
            category,
            text,
        } => {
            let parent = parent_of(*doc, *parent)?;
            let category = match category {
                Some(c) => Category::from_code(c)
                    .or_else(|| Category::from_label(c))
                    .with_context(|| format!("Unknown category '{}'", c))?,
                None => prompts::prompt_category()?,
            };
            let text = match text {
                Some(t) => t.clone(),
                None => prompts::prompt_editor("Text:", "")?,
            };
            let node = graph.new_child(parent, category, &text)?;
            println!("{} {}", "Created".green(), node_line(&node));
        }
        NodeCommand::Edit { id, field, value } => {
            let field: NodeField = field.parse().map_err(anyhow::Error::msg)?;
            let value = match value {
                Some(v) => v.clone(),
                None => {
                    let node = graph.load_node(*id)?;
                    let current = match field {
                        NodeField::Text => node.text.clone(),
                        NodeField::Rationale => node.rationale.clone().unwrap_or_default(),
                        NodeField::ExpectedResults => node.expected_results.clone().unwrap_or_default(),
                        NodeField::ImagePath => node.image.as_ref().map(|i| i.path.clone()).unwrap_or_default(),
                        NodeField::Caption => node.image.as_ref().map(|i| i.caption.clone()).unwrap_or_default(),
                        NodeField::Category => node.category.code(),
                    };
                    prompts::prompt_editor("New value:", &current)?
                }
            };
            let node = graph.edit_node_field(*id, field, &value)?;
            println!("{} {}", "Updated".green(), node_line(&node));
        }
        NodeCommand::Show { id } => show_node(graph, *id)?,
        NodeCommand::Del { id, yes } => {
            let node = graph.load_node(*id)?;
            println!("{}", "Node to delete:".yellow());
            println!("  {}", node_line(&node));
            if !node.children.is_empty() {
                println!("  with {} direct child node(s)", node.children.len());
            }
            if !*yes && !prompts::confirm("Are you sure you want to delete this node?")? {
                println!("Deletion cancelled.");
                return Ok(());
            }
            let removed = graph.delete_node(*id)?;
            println!("{} ({} node(s) removed)", "Node deleted.".green(), removed.len());
        }
        NodeCommand::Promote { id } => report_reorder(graph.promote(*id)?, "Promoted."),
        NodeCommand::Demote { id } => report_reorder(graph.demote(*id)?, "Demoted."),
        NodeCommand::Up { id } => report_reorder(graph.move_up(*id)?, "Moved up."),
        NodeCommand::Down { id } => report_reorder(graph.move_down(*id)?, "Moved down."),
        NodeCommand::Move {
            id,
            doc,
            parent,
            index,
        } => {
            let target = parent_of(*doc, *parent)?;
            report_reorder(graph.move_node(*id, target, *index)?, "Moved.");
        }
    }
    Ok(())
}

fn print_classification(graph: &Graph, id: u64) -> Result<()> {
    let classes = graph.classify_traces(id)?;
    if classes.is_empty() {
        println!("  {}", "(no classified traces)".dimmed());
    }
    for relation in Relation::all() {
        for partner in classes.get(*relation) {
            let summary = graph
                .try_load_node(*partner)
                .map(|n| node_line(&n))
                .unwrap_or_else(|| format!("#{} (missing)", partner));
            println!("  {:<16} {}", relation.label(), summary);
        }
    }
    Ok(())
}

fn print_findings(report: &AuditReport) {
    if report.upstream_missing {
        println!("  {}", "missing upstream trace".red());
    }
    if report.downstream_missing {
        println!("  {}", "missing downstream trace".red());
    }
    if report.test_missing {
        println!("  {}", "missing test trace".red());
    }
    for partner in &report.suspect {
        println!("  {} #{}", "suspect link to".yellow(), partner);
    }
}

fn show_node(graph: &Graph, id: u64) -> Result<()> {
    let node = graph.load_node(id)?;
    println!("{}", node_line(&node).bold());
    println!("Category: {}", node.category.label());
    if let Some(parent) = node.parent {
        println!("Parent: #{}", parent);
    }
    let document = graph.document_of(&node)?;
    if let Some(doc) = &document {
        println!("Document: #{} {} ({})", doc.id, doc.name, doc.doc_type);
    }
    println!("\n{}", node.text);
    if let Some(rationale) = &node.rationale {
        println!("\n{} {}", "Rationale:".bold(), rationale);
    }
    if let Some(expected) = &node.expected_results {
        println!("\n{} {}", "Expected results:".bold(), expected);
    }
    if let Some(image) = &node.image {
        println!("\n{} {} ({})", "Image:".bold(), image.path, image.caption);
    }

    println!("\n{}", "Traces:".bold());
    print_classification(graph, id)?;

    if let Some(doc) = document {
        let report = graph.audit_node(id, doc.doc_type)?;
        if !report.is_clean() {
            println!("\n{}", "Audit:".bold());
            print_findings(&report);
        }
    }
    Ok(())
}

// =========================================================================
// Traces, audit, export
// =========================================================================

fn handle_trace_command(cmd: &TraceCommand, graph: &mut Graph) -> Result<()> {
    match cmd {
        TraceCommand::Add { a, b } => {
            if graph.add_trace(*a, *b)? {
                println!("{} #{} <-> #{}", "Linked".green(), a, b);
            } else {
                println!("{}", "Already linked.".yellow());
            }
        }
        TraceCommand::Rm { a, b } => {
            if graph.remove_trace(*a, *b)? {
                println!("{} #{} <-> #{}", "Unlinked".green(), a, b);
            } else {
                println!("{}", "No such link.".yellow());
            }
        }
        TraceCommand::Verify { a, b, both } => {
            let cleared = if *both {
                graph.verify_trace_both(*a, *b)?
            } else {
                graph.verify_trace(*a, *b)?
            };
            if cleared {
                println!("{}", "Link verified.".green());
            } else {
                println!("{}", "Link was not suspect.".yellow());
            }
        }
        TraceCommand::Classify { id } => {
            println!("{}", node_line(&graph.load_node(*id)?).bold());
            print_classification(graph, *id)?;
        }
    }
    Ok(())
}

fn audit(graph: &Graph, only: Option<u64>, problems_only: bool) -> Result<()> {
    let doc_ids: Vec<u64> = match only {
        Some(id) => vec![id],
        None => graph.documents().iter().map(|d| d.id).collect(),
    };

    let mut findings = 0;
    for doc_id in doc_ids {
        let doc = graph.load_document(doc_id)?;
        println!("{} #{} {} ({})", "Document".bold(), doc.id, doc.name, doc.doc_type);
        for (node, report) in graph.audit_document(doc_id)? {
            if report.is_clean() {
                if !problems_only && (node.category.is_requirement() || node.category.is_test()) {
                    println!("{} {}", "ok".green(), node_line(&node));
                }
                continue;
            }
            findings += 1;
            println!("{} {}", "!!".red(), node_line(&node));
            print_findings(&report);
        }
        println!();
    }

    if findings == 0 {
        println!("{}", "No trace findings.".green());
    } else {
        println!("{}", format!("{} node(s) with findings.", findings).as_str().red());
    }
    Ok(())
}

fn handle_export_command(graph: &Graph, doc: u64, format: &str, output: Option<&Path>) -> Result<()> {
    let format = format.to_lowercase();
    let Some(path) = output else {
        let text = match format.as_str() {
            "markdown" | "md" => export::render_document(graph, doc)?,
            "report" | "trace" => export::render_trace_report(graph, doc)?,
            "json" => anyhow::bail!("JSON export needs --output"),
            other => anyhow::bail!("Unknown export format '{}'. Use markdown, report or json", other),
        };
        print!("{}", text);
        return Ok(());
    };

    match format.as_str() {
        "markdown" | "md" => export::export_markdown(graph, doc, path)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        "report" | "trace" => export::export_trace_report(graph, doc, path)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        "json" => {
            let count = export::export_json(graph, doc, path)?;
            println!("Exported to JSON: {}", path.display());
            println!("  Total nodes: {}", count);
            return Ok(());
        }
        other => anyhow::bail!("Unknown export format '{}'. Use markdown, report or json", other),
    }
    println!("Exported to {}", path.display());
    Ok(())
}

fn collect_garbage(graph: &mut Graph, dry_run: bool) -> Result<()> {
    let orphans = if dry_run {
        graph.orphans()?
    } else {
        graph.collect_garbage()?
    };
    if orphans.is_empty() {
        println!("{}", "No orphaned nodes.".green());
        return Ok(());
    }
    let verb = if dry_run { "Orphaned" } else { "Removed" };
    let ids: Vec<String> = orphans.iter().map(|id| format!("#{}", id)).collect();
    println!("{} {} node(s): {}", verb, orphans.len(), ids.join(", "));
    Ok(())
}

fn handle_contributor_command(cmd: &ContributorCommand, graph: &mut Graph) -> Result<()> {
    match cmd {
        ContributorCommand::Add { name, email } => {
            graph.add_contributor(Contributor {
                name: name.clone(),
                email: email.clone(),
            })?;
            println!("{} {}", "Added contributor".green(), name);
        }
        ContributorCommand::Rm { name } => {
            if graph.remove_contributor(name)? {
                println!("{} {}", "Removed contributor".green(), name);
            } else {
                println!("{}", format!("No contributor named '{}'.", name).as_str().yellow());
            }
        }
        ContributorCommand::List => {
            let project = graph.project();
            println!(
                "{} of {} contributor slot(s) used",
                project.contributors.len(),
                project.max_contributors
            );
            for c in &project.contributors {
                println!("  {} <{}>", c.name, c.email);
            }
        }
    }
    Ok(())
}

// =========================================================================
// Registry
// =========================================================================

fn register(name: &str, path: &Path, description: &str, default: bool) -> Result<()> {
    let registry_path = get_registry_path()?;
    let mut registry = Registry::load_or_default(&registry_path)?;
    registry.register_project(
        name.to_string(),
        path.to_string_lossy().to_string(),
        description.to_string(),
    );
    if default {
        registry.set_default_project(name)?;
    }
    registry.save(&registry_path)?;
    println!("{} '{}' -> {}", "Registered project".green(), name, path.display());
    Ok(())
}

fn handle_db_command(cmd: &DbCommand) -> Result<()> {
    match cmd {
        DbCommand::Register {
            name,
            path,
            description,
            default,
            interactive,
        } => {
            let (name, path, description, default) = if *interactive || name.is_none() {
                prompts::prompt_register_project()?
            } else {
                (
                    name.clone().unwrap_or_default(),
                    path.clone().unwrap_or_else(|| PathBuf::from(".")),
                    description.clone().unwrap_or_default(),
                    *default,
                )
            };
            if !path.join(PROJECT_FILE).exists() {
                log::warn!("No {} in {} yet", PROJECT_FILE, path.display());
            }
            let absolute = std::fs::canonicalize(&path)
                .with_context(|| format!("No such directory: {}", path.display()))?;
            register(&name, &absolute, &description, default)?;
        }
        DbCommand::List => {
            let registry = Registry::load_or_default(get_registry_path()?)?;
            if registry.projects.is_empty() {
                println!("{}", "No projects registered.".yellow());
            }
            for (name, project) in &registry.projects {
                let marker = if registry.default_project.as_deref() == Some(name.as_str()) {
                    "*".green().to_string()
                } else {
                    " ".to_string()
                };
                println!("{} {:<20} {} {}", marker, name, project.path, project.description.as_str().dimmed());
            }
        }
        DbCommand::Path { name } => {
            let root = determine_project_root(name.as_deref())?
                .context("No project selected; pass --name or register a default")?;
            println!("{}", root.display());
        }
    }
    Ok(())
}
