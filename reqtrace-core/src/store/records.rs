//! [`Record`] implementations for the schema types

use serde_yaml::Value;
use std::collections::BTreeSet;

use super::{Fields, Invalid, ParseMode, Record};
use crate::models::{
    is_monotonic, Category, ContentNode, Contributor, Document, DocumentRef, DocumentType,
    IdAllocation, ImageRef, IssueKind, Project, Repository, RevisionEntry, TraceData,
    DEFAULT_ID_BASE, DEFAULT_MAX_CONTRIBUTORS, SCHEMA_VERSION,
};

/// Parses every mapping element of a list field. Fix mode drops elements
/// that are not mappings instead of inventing records for them.
pub(super) fn record_list<T>(
    fields: &Fields<'_>,
    name: &str,
    parse: impl Fn(&Value, ParseMode, &str) -> Result<T, Invalid>,
) -> Result<Vec<T>, Invalid> {
    let mut out = Vec::new();
    for (i, item) in fields.items(name)?.into_iter().enumerate() {
        let path = fields.path_of(&format!("{}[{}]", name, i));
        if !item.is_mapping() {
            fields.repair(&format!("{}[{}]", name, i), "expected a mapping", ())?;
            continue;
        }
        out.push(parse(item, fields.mode(), &path)?);
    }
    Ok(out)
}

/// Removes duplicate IDs, keeping first occurrences
pub(super) fn dedup_ids(fields: &Fields<'_>, name: &str, ids: Vec<u64>) -> Result<Vec<u64>, Invalid> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if seen.insert(id) {
            out.push(id);
        } else {
            fields.repair(name, &format!("duplicate identifier {}", id), ())?;
        }
    }
    Ok(out)
}

pub(super) fn parse_repository(raw: &Value, mode: ParseMode, path: &str) -> Result<Repository, Invalid> {
    let f = Fields::new(raw, mode, path)?;
    Ok(Repository {
        root: f.string("root")?,
        remote: f.string("remote")?,
        pathspec: f.string("pathspec")?,
    })
}

pub(super) fn parse_contributor(raw: &Value, mode: ParseMode, path: &str) -> Result<Contributor, Invalid> {
    let f = Fields::new(raw, mode, path)?;
    Ok(Contributor {
        name: f.string("name")?,
        email: f.string("email")?,
    })
}

fn parse_ids(raw: &Value, mode: ParseMode, path: &str) -> Result<IdAllocation, Invalid> {
    let f = Fields::new(raw, mode, path)?;
    let base = f.u64_or("base", DEFAULT_ID_BASE)?;
    let listed = f.id_list("issued")?;
    let mut issued = BTreeSet::new();
    for id in listed {
        if id < base {
            // Kept in Fix mode: dropping it could let the ID be issued twice
            f.repair("issued", &format!("identifier {} is below base {}", id, base), ())?;
        }
        if !issued.insert(id) {
            f.repair("issued", &format!("duplicate identifier {}", id), ())?;
        }
    }
    Ok(IdAllocation { base, issued })
}

fn parse_document_ref(raw: &Value, mode: ParseMode, path: &str) -> Result<DocumentRef, Invalid> {
    let f = Fields::new(raw, mode, path)?;
    let id = f.u64_or("id", 0)?;
    Ok(DocumentRef {
        id,
        name: f.string("name")?,
        doc_type: f.parsed("type", DocumentType::Urs, DocumentType::from_code)?,
        path: f.string_or("path", format!("documents/{}.yaml", id))?,
    })
}

fn parse_revision(raw: &Value, mode: ParseMode, path: &str) -> Result<RevisionEntry, Invalid> {
    let f = Fields::new(raw, mode, path)?;
    Ok(RevisionEntry {
        day: f.u32_or("day", 0)?,
        month: f.u32_or("month", 0)?,
        year: f.i32_or("year", 0)?,
        major: f.u32_or("major", 0)?,
        minor: f.u32_or("minor", 0)?,
        details: f.string_list("details")?,
        author: f.string("author")?,
        issue: f.parsed("issue", IssueKind::Minor, |s| s.parse().ok())?,
    })
}

pub(super) fn parse_history(f: &Fields<'_>, name: &str) -> Result<Vec<RevisionEntry>, Invalid> {
    let history = record_list(f, name, parse_revision)?;
    if !is_monotonic(&history) {
        // Entries are history; Fix mode reports but never rewrites them
        f.repair(name, "versions decrease", ())?;
    }
    Ok(history)
}

fn parse_trace(raw: &Value, mode: ParseMode, path: &str) -> Result<TraceData, Invalid> {
    let f = Fields::new(raw, mode, path)?;
    let ids = dedup_ids(&f, "ids", f.id_list("ids")?)?;
    let mut suspect = Vec::new();
    for id in dedup_ids(&f, "suspect", f.id_list("suspect")?)? {
        if ids.contains(&id) {
            suspect.push(id);
        } else {
            f.repair("suspect", &format!("{} is not a trace partner", id), ())?;
        }
    }
    Ok(TraceData { ids, suspect })
}

fn parse_image(raw: &Value, mode: ParseMode, path: &str) -> Result<ImageRef, Invalid> {
    let f = Fields::new(raw, mode, path)?;
    Ok(ImageRef {
        path: f.string("path")?,
        caption: f.string("caption")?,
    })
}

impl Record for Project {
    fn parse(raw: &Value, mode: ParseMode) -> Result<Self, Invalid> {
        let f = Fields::new(raw, mode, "")?;
        let documents = record_list(&f, "documents", parse_document_ref)?;
        let mut seen = BTreeSet::new();
        for doc in &documents {
            if !seen.insert(doc.id) {
                f.repair("documents", &format!("duplicate document id {}", doc.id), ())?;
            }
        }
        Ok(Project {
            version: f.u32_or("version", SCHEMA_VERSION)?,
            repository: parse_repository(f.nested("repository")?, mode, &f.path_of("repository"))?,
            contributors: record_list(&f, "contributors", parse_contributor)?,
            max_contributors: f.u32_or("max_contributors", DEFAULT_MAX_CONTRIBUTORS)?,
            ids: parse_ids(f.nested("ids")?, mode, &f.path_of("ids"))?,
            documents,
        })
    }
}

impl Record for Document {
    fn parse(raw: &Value, mode: ParseMode) -> Result<Self, Invalid> {
        let f = Fields::new(raw, mode, "")?;
        let children = f.id_list("children")?;
        Ok(Document {
            id: f.u64_or("id", 0)?,
            doc_type: f.parsed("type", DocumentType::Urs, DocumentType::from_code)?,
            name: f.string("name")?,
            revisions: parse_history(&f, "revisions")?,
            report_revisions: parse_history(&f, "report_revisions")?,
            children: dedup_ids(&f, "children", children)?,
        })
    }
}

impl Record for ContentNode {
    fn parse(raw: &Value, mode: ParseMode) -> Result<Self, Invalid> {
        let f = Fields::new(raw, mode, "")?;
        let id = f.u64_or("id", 0)?;
        let category = f.parsed("category", Category::Comment, Category::from_code)?;
        let children = dedup_ids(&f, "children", f.id_list("children")?)?;

        let mut node = ContentNode {
            id,
            parent: f.opt_id("parent")?,
            category,
            text: f.string("text")?,
            children,
            trace: parse_trace(f.nested("trace")?, mode, &f.path_of("trace"))?,
            rationale: None,
            expected_results: None,
            image: None,
        };

        if category.has_rationale() {
            node.rationale = Some(f.string("rationale")?);
        }
        if category.has_expected_results() {
            node.expected_results = Some(f.string("expected_results")?);
        }
        if category.has_image() {
            let raw_image = f.nested("image")?;
            node.image = Some(parse_image(raw_image, mode, &f.path_of("image"))?);
        }
        if node.trace.contains(id) {
            f.repair("trace", "node traces to itself", ())?;
            node.trace.unlink(id);
        }
        Ok(node)
    }
}
