//! Markdown and JSON exports of a document
//!
//! Headings are numbered by an explicit [`OutlineContext`] threaded through
//! the walk rather than by any shared counter, so two exports never
//! interfere.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::audit::{required_family, Direction};
use crate::error::Result;
use crate::graph::Graph;
use crate::models::{Category, ContentNode, Document, RevisionEntry};
use crate::trace::Relation;

/// Outline numbering state for one export
#[derive(Debug, Clone, Default)]
pub struct OutlineContext {
    counters: Vec<u32>,
}

impl OutlineContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number for the next heading at `depth` (0 = top level): 1, 1.1, 1.2, 2, ...
    pub fn next_heading(&mut self, depth: usize) -> String {
        self.counters.truncate(depth + 1);
        while self.counters.len() < depth + 1 {
            self.counters.push(0);
        }
        self.counters[depth] += 1;
        self.counters
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(".")
    }
}

fn revision_table(output: &mut String, title: &str, history: &[RevisionEntry]) {
    if history.is_empty() {
        return;
    }
    output.push_str(&format!("**{}**\n\n", title));
    output.push_str("| Version | Date | Author | Details |\n");
    output.push_str("|---------|------|--------|---------|\n");
    for entry in history {
        output.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            entry.version_string(),
            entry.date_string(),
            entry.author,
            entry.details.join("; ")
        ));
    }
    output.push('\n');
}

struct Renderer<'a> {
    graph: &'a Graph,
    outline: OutlineContext,
    seen: BTreeSet<u64>,
    output: String,
}

impl Renderer<'_> {
    fn node(&mut self, id: u64, heading_depth: usize) {
        if !self.seen.insert(id) {
            return;
        }
        let Some(node) = self.graph.try_load_node(id) else {
            return;
        };
        let child_depth = match node.category {
            Category::Heading => {
                let number = self.outline.next_heading(heading_depth);
                let hashes = "#".repeat((heading_depth + 2).min(6));
                self.output
                    .push_str(&format!("{} {} {}\n\n", hashes, number, node.summary()));
                heading_depth + 1
            }
            _ => {
                self.body(&node);
                heading_depth
            }
        };
        for child in &node.children {
            self.node(*child, child_depth);
        }
    }

    fn body(&mut self, node: &ContentNode) {
        let out = &mut self.output;
        match node.category {
            Category::Heading => {}
            Category::Comment => {
                for line in node.text.lines() {
                    out.push_str(&format!("> {}\n", line));
                }
                out.push('\n');
            }
            Category::Image => {
                let (path, caption) = node
                    .image
                    .as_ref()
                    .map(|i| (i.path.as_str(), i.caption.as_str()))
                    .unwrap_or(("", ""));
                out.push_str(&format!("![{}]({})\n\n", caption, path));
            }
            Category::Diagram => {
                out.push_str(&format!("```\n{}\n```\n\n", node.text));
            }
            Category::Requirement(..) | Category::Test(_) => {
                out.push_str(&format!(
                    "**[{}-{}]** {}\n\n",
                    node.category.code(),
                    node.id,
                    node.text
                ));
                if let Some(rationale) = node.rationale.as_deref().filter(|r| !r.is_empty()) {
                    out.push_str(&format!("*Rationale:* {}\n\n", rationale));
                }
                if let Some(expected) = node.expected_results.as_deref().filter(|r| !r.is_empty()) {
                    out.push_str(&format!("*Expected results:* {}\n\n", expected));
                }
            }
        }
    }
}

/// Renders a document body as a numbered Markdown outline
pub fn render_document(graph: &Graph, doc_id: u64) -> Result<String> {
    let doc = graph.load_document(doc_id)?;
    let mut renderer = Renderer {
        graph,
        outline: OutlineContext::new(),
        seen: BTreeSet::new(),
        output: String::new(),
    };
    renderer
        .output
        .push_str(&format!("# {}\n\n*{}*\n\n", doc.name, doc.doc_type.label()));
    revision_table(&mut renderer.output, "Revision history", &doc.revisions);
    for root in &doc.children {
        renderer.node(*root, 0);
    }
    Ok(renderer.output)
}

fn flag(doc: &Document, node: &ContentNode, direction: Direction, missing: bool) -> &'static str {
    if required_family(direction, doc.doc_type, node.category).is_none() {
        "-"
    } else if missing {
        "MISSING"
    } else {
        "ok"
    }
}

fn id_list(ids: &[u64]) -> String {
    ids.iter()
        .map(|id| format!("#{}", id))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Renders the trace report of a document: relations and audit flags for
/// every requirement and test, in document order
pub fn render_trace_report(graph: &Graph, doc_id: u64) -> Result<String> {
    let doc = graph.load_document(doc_id)?;
    let mut output = format!("# Trace report: {}\n\n", doc.name);
    revision_table(&mut output, "Report revision history", &doc.report_revisions);

    output.push_str("| Node | Code | Summary | Relations | Upstream | Downstream | Test | Suspect |\n");
    output.push_str("|------|------|---------|-----------|----------|------------|------|---------|\n");

    let mut rows = 0;
    for (node, report) in graph.audit_document(doc_id)? {
        if !node.category.is_requirement() && !node.category.is_test() {
            continue;
        }
        let classes = graph.classify_traces(node.id)?;
        let relations = Relation::all()
            .iter()
            .filter(|r| !classes.get(**r).is_empty())
            .map(|r| format!("{}: {}", r, id_list(classes.get(*r))))
            .collect::<Vec<_>>()
            .join("; ");

        output.push_str(&format!(
            "| #{} | {} | {} | {} | {} | {} | {} | {} |\n",
            node.id,
            node.category.code(),
            node.summary().replace('|', "\\|"),
            relations,
            flag(&doc, &node, Direction::Upstream, report.upstream_missing),
            flag(&doc, &node, Direction::Downstream, report.downstream_missing),
            flag(&doc, &node, Direction::Test, report.test_missing),
            id_list(&report.suspect),
        ));
        rows += 1;
    }
    if rows == 0 {
        output.push_str("\n_No requirements or tests in this document._\n");
    }
    Ok(output)
}

/// Writes the Markdown outline of a document
pub fn export_markdown(graph: &Graph, doc_id: u64, output_path: &Path) -> Result<()> {
    fs::write(output_path, render_document(graph, doc_id)?)?;
    Ok(())
}

/// Writes the Markdown trace report of a document
pub fn export_trace_report(graph: &Graph, doc_id: u64, output_path: &Path) -> Result<()> {
    fs::write(output_path, render_trace_report(graph, doc_id)?)?;
    Ok(())
}

#[derive(Serialize)]
struct DocumentBundle<'a> {
    document: &'a Document,
    nodes: Vec<ContentNode>,
}

/// Writes a document and all of its nodes as one JSON file.
/// Returns the number of nodes written.
pub fn export_json(graph: &Graph, doc_id: u64, output_path: &Path) -> Result<usize> {
    let document = graph.load_document(doc_id)?;
    let nodes: Vec<ContentNode> = graph
        .walk_document(doc_id)?
        .into_iter()
        .map(|(_, node)| node)
        .collect();
    let count = nodes.len();
    let json = serde_json::to_string_pretty(&DocumentBundle {
        document: &document,
        nodes,
    })?;
    fs::write(output_path, json)?;
    Ok(count)
}
