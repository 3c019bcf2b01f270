//! One-way upgrade of the legacy flat layout
//!
//! Legacy projects keep a flat `ids` array in the project file, documents
//! inline in the project with long display-string types, and one JSON file
//! per node at `<root>/<id>.json`. Each document converts on its own: a
//! document with any unreadable node stays behind and is reported, without
//! touching its siblings.

use serde_yaml::Value;
use std::collections::BTreeSet;
use std::fs;

use super::records::{parse_contributor, parse_history, parse_repository, record_list};
use super::{rehomogenize, Fields, Invalid, ParseMode};
use crate::error::{Error, Result};
use crate::journal::Transaction;
use crate::models::{
    Category, ContentNode, Document, DocumentRef, DocumentType, ImageRef, Project, RevisionEntry,
    TraceData, DEFAULT_ID_BASE, SCHEMA_VERSION,
};
use crate::storage::{Storage, PROJECT_FILE};

/// Outcome of a migration
#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    pub project: Project,
    /// Names of converted documents
    pub migrated: Vec<String>,
    /// Documents left unconverted, with the reason
    pub failed: Vec<(String, String)>,
    pub nodes_converted: usize,
}

/// Whether a raw project value has the legacy shape
pub fn is_legacy_project(raw: &Value) -> bool {
    let version = raw.get("version").and_then(|v| v.as_u64());
    if matches!(version, Some(v) if v >= SCHEMA_VERSION as u64) {
        return false;
    }
    matches!(
        raw.get("ids"),
        Some(Value::Sequence(_)) | Some(Value::Number(_))
    )
}

/// A document converted in isolation, not yet merged into the project
struct ConvertedDocument {
    name: String,
    doc_type: DocumentType,
    children: Vec<u64>,
    revisions: Vec<RevisionEntry>,
    report_revisions: Vec<RevisionEntry>,
    nodes: Vec<ContentNode>,
    legacy_files: Vec<String>,
}

fn legacy_node_file(id: u64) -> String {
    format!("{}.json", id)
}

fn parse_doc_type(s: &str) -> Option<DocumentType> {
    DocumentType::from_label(s).or_else(|| DocumentType::from_code(s))
}

fn parse_category(s: &str) -> Option<Category> {
    Category::from_label(s).or_else(|| Category::from_code(s))
}

/// Converts one legacy node. The tree position is taken from the walk,
/// not from the node's own `parent` field.
fn convert_node(raw: &Value, id: u64, parent: Option<u64>) -> std::result::Result<ContentNode, Invalid> {
    let strict = Fields::new(raw, ParseMode::Strict, "")?;
    let category = strict.parsed("type", Category::Comment, parse_category)?;

    let f = Fields::new(raw, ParseMode::Fix, "")?;
    let ids = f.id_list("traces")?;
    let suspects: Vec<u64> = f
        .id_list("suspects")
        .unwrap_or_default()
        .into_iter()
        .filter(|s| ids.contains(s))
        .collect();

    let mut node = ContentNode::new(id, parent, category, f.string("text")?);
    node.children = f.id_list("children")?;
    node.trace = TraceData {
        ids: ids.into_iter().filter(|t| *t != id).collect(),
        suspect: suspects,
    };
    if category.has_rationale() {
        node.rationale = Some(f.string_or("rationale", String::new())?);
    }
    if category.has_expected_results() {
        node.expected_results = Some(f.string_or("expected_results", String::new())?);
    }
    if category.has_image() {
        node.image = Some(ImageRef {
            path: f.string_or("image_path", String::new())?,
            caption: f.string_or("caption", String::new())?,
        });
    }
    Ok(node)
}

fn convert_subtree(
    storage: &Storage,
    id: u64,
    parent: Option<u64>,
    out: &mut ConvertedDocument,
    seen: &mut BTreeSet<u64>,
) -> std::result::Result<(), String> {
    if !seen.insert(id) {
        return Err(format!("node {} is reachable twice", id));
    }
    let file = legacy_node_file(id);
    let text = fs::read_to_string(storage.resolve(&file))
        .map_err(|e| format!("node {}: {}", id, e))?;
    let json: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| format!("node {}: {}", id, e))?;
    let raw = serde_yaml::to_value(&json).map_err(|e| format!("node {}: {}", id, e))?;
    let node = convert_node(&raw, id, parent).map_err(|e| format!("node {}: {}", id, e))?;

    let children = node.children.clone();
    out.nodes.push(node);
    out.legacy_files.push(file);
    for child in children {
        convert_subtree(storage, child, Some(id), out, seen)?;
    }
    Ok(())
}

fn convert_document(
    storage: &Storage,
    raw: &Value,
) -> std::result::Result<ConvertedDocument, String> {
    let f = Fields::new(raw, ParseMode::Fix, "").map_err(|e| e.to_string())?;
    let type_name = f.string("type").map_err(|e| e.to_string())?;
    let doc_type = parse_doc_type(&type_name)
        .ok_or_else(|| format!("unknown document type '{}'", type_name))?;

    let mut out = ConvertedDocument {
        name: f.string("name").map_err(|e| e.to_string())?,
        doc_type,
        children: f.id_list("children").map_err(|e| e.to_string())?,
        revisions: parse_history(&f, "revisions").map_err(|e| e.to_string())?,
        report_revisions: parse_history(&f, "report_revisions").map_err(|e| e.to_string())?,
        nodes: Vec::new(),
        legacy_files: Vec::new(),
    };
    let mut seen = BTreeSet::new();
    for root in out.children.clone() {
        convert_subtree(storage, root, None, &mut out, &mut seen)?;
    }
    Ok(out)
}

/// Legacy documents that failed to convert, kept for a later retry
pub const PENDING_FILE: &str = "reqtrace.legacy.yaml";

fn document_label(raw_doc: &Value, index: usize) -> String {
    raw_doc
        .get("name")
        .and_then(|n| n.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("document {}", index + 1))
}

/// Converts each raw legacy document into `project`, staging its records.
/// Returns the raw documents that could not be converted.
fn convert_documents(
    storage: &Storage,
    raw_docs: Vec<&Value>,
    project: &mut Project,
    tx: &mut Transaction,
    report: &mut MigrationReport,
) -> Result<Vec<Value>> {
    let mut pending = Vec::new();
    for (i, raw_doc) in raw_docs.into_iter().enumerate() {
        let label = document_label(raw_doc, i);
        let converted = match convert_document(storage, raw_doc) {
            Ok(converted) => converted,
            Err(reason) => {
                let err = Error::LegacyConversion {
                    document: label.clone(),
                    reason: reason.clone(),
                };
                log::warn!("{}", err);
                report.failed.push((label, reason));
                pending.push(raw_doc.clone());
                continue;
            }
        };

        let id = project.ids.allocate()?;
        let path = Storage::document_file(id);
        let mut doc = Document::new(id, converted.doc_type, converted.name.clone());
        doc.children = converted.children;
        doc.revisions = converted.revisions;
        doc.report_revisions = converted.report_revisions;

        report.nodes_converted += converted.nodes.len();
        for node in converted.nodes {
            tx.put_node(node);
        }
        for file in converted.legacy_files {
            tx.remove_file(file);
        }
        project.documents.push(DocumentRef {
            id,
            name: converted.name.clone(),
            doc_type: converted.doc_type,
            path: path.clone(),
        });
        tx.put_document(path, doc);
        report.migrated.push(converted.name);
    }
    Ok(pending)
}

/// Stages the pending file: rewritten with what is left, or removed
fn stage_pending(tx: &mut Transaction, pending: Vec<Value>, existed: bool) {
    if pending.is_empty() {
        if existed {
            tx.remove_file(PENDING_FILE.to_string());
        }
        return;
    }
    let mut map = serde_yaml::Mapping::new();
    map.insert(Value::from("documents"), Value::Sequence(pending));
    tx.put_file(PENDING_FILE.to_string(), Value::Mapping(map));
}

/// Rewrites a legacy project into the current layout.
///
/// Returns `None` when `raw` is not a legacy project. Converted node files
/// move to `nodes/`, and their JSON originals are removed in the same
/// commit. Nodes of a failed document stay in place as JSON, and the
/// document itself is kept in [`PENDING_FILE`] for
/// [`retry_pending_documents`].
pub fn migrate_legacy_project(storage: &Storage, raw: &Value) -> Result<Option<MigrationReport>> {
    if !is_legacy_project(raw) {
        return Ok(None);
    }
    let lock = storage.lock()?;
    let malformed = |source: Invalid| Error::MalformedRecord {
        path: storage.resolve(PROJECT_FILE),
        source,
    };

    let f = Fields::new(raw, ParseMode::Fix, "").map_err(malformed)?;
    let legacy_ids: BTreeSet<u64> = f.id_list("ids").map_err(malformed)?.into_iter().collect();

    let mut project = Project::new();
    project.ids.base = legacy_ids
        .first()
        .copied()
        .map_or(DEFAULT_ID_BASE, |min| min.min(DEFAULT_ID_BASE));
    project.ids.issued = legacy_ids;
    if f.raw("repository").is_some() {
        let raw_repository = f.nested("repository").map_err(malformed)?;
        project.repository =
            parse_repository(raw_repository, ParseMode::Fix, "repository").map_err(malformed)?;
    }
    if f.raw("contributors").is_some() {
        project.contributors =
            record_list(&f, "contributors", parse_contributor).map_err(malformed)?;
    }

    let mut tx = Transaction::new();
    let mut report = MigrationReport::default();
    let raw_docs = f.items("documents").map_err(malformed)?;
    let pending = convert_documents(storage, raw_docs, &mut project, &mut tx, &mut report)?;
    stage_pending(&mut tx, pending, false);

    tx.put_project(project.clone());
    storage.commit_locked(&lock, tx)?;
    log::info!(
        "Upgraded {} to schema version {}",
        storage.project_path().display(),
        SCHEMA_VERSION
    );
    report.project = project;
    Ok(Some(report))
}

/// Number of legacy documents still waiting in [`PENDING_FILE`]
pub fn pending_document_count(storage: &Storage) -> Result<usize> {
    Ok(storage
        .read_raw(PENDING_FILE)?
        .and_then(|raw| raw.get("documents").map(|docs| rehomogenize(docs).len()))
        .unwrap_or(0))
}

/// Converts documents left behind by an earlier migration into the current
/// project. Returns `None` when nothing is pending.
pub fn retry_pending_documents(storage: &Storage) -> Result<Option<MigrationReport>> {
    let lock = storage.lock()?;
    let Some(raw) = storage.read_raw(PENDING_FILE)? else {
        return Ok(None);
    };
    let malformed = |source: Invalid| Error::MalformedRecord {
        path: storage.resolve(PENDING_FILE),
        source,
    };
    let f = Fields::new(&raw, ParseMode::Fix, "").map_err(malformed)?;

    let mut project = storage.load_project()?;
    let mut tx = Transaction::new();
    let mut report = MigrationReport::default();
    let raw_docs = f.items("documents").map_err(malformed)?;
    let pending = convert_documents(storage, raw_docs, &mut project, &mut tx, &mut report)?;
    stage_pending(&mut tx, pending, true);

    if !report.migrated.is_empty() {
        tx.put_project(project.clone());
    }
    storage.commit_locked(&lock, tx)?;
    report.project = project;
    Ok(Some(report))
}
