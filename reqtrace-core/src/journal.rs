//! Staged multi-record commits
//!
//! A logical mutation (new child, promote, delete, ...) touches several
//! records. All of them are staged in a [`Transaction`] and then written
//! as one journal entry before being applied, so a crash between record
//! writes is rolled forward on the next open instead of leaving a dangling
//! child reference or an orphaned node.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::models::{ContentNode, Document, Project};
use crate::store::Record;

/// One file operation in a journal entry. Paths are relative to the project root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalOp {
    Put { path: String, record: Value },
    Remove { path: String },
}

impl JournalOp {
    pub fn path(&self) -> &str {
        match self {
            JournalOp::Put { path, .. } | JournalOp::Remove { path } => path,
        }
    }
}

/// The persisted form of a pending commit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub ops: Vec<JournalOp>,
}

/// Record writes staged for a single logical mutation
///
/// Reads made while a transaction is open should go through
/// [`Transaction::node`] / [`Transaction::document`] first so later steps
/// see the effect of earlier ones.
#[derive(Debug, Default)]
pub struct Transaction {
    nodes: BTreeMap<u64, Option<ContentNode>>,
    documents: BTreeMap<u64, (String, Option<Document>)>,
    project: Option<Project>,
    extra_puts: Vec<(String, Value)>,
    extra_removals: Vec<String>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
            && self.documents.is_empty()
            && self.project.is_none()
            && self.extra_puts.is_empty()
            && self.extra_removals.is_empty()
    }

    /// Staged state of a node: `Some(Some(n))` written, `Some(None)` removed,
    /// `None` untouched by this transaction
    pub fn node(&self, id: u64) -> Option<Option<&ContentNode>> {
        self.nodes.get(&id).map(|n| n.as_ref())
    }

    pub fn document(&self, id: u64) -> Option<Option<&Document>> {
        self.documents.get(&id).map(|(_, d)| d.as_ref())
    }

    pub fn put_node(&mut self, node: ContentNode) {
        self.nodes.insert(node.id, Some(node));
    }

    pub fn remove_node(&mut self, id: u64) {
        self.nodes.insert(id, None);
    }

    pub fn put_document(&mut self, path: String, document: Document) {
        self.documents.insert(document.id, (path, Some(document)));
    }

    pub fn remove_document(&mut self, path: String, id: u64) {
        self.documents.insert(id, (path, None));
    }

    pub fn put_project(&mut self, project: Project) {
        self.project = Some(project);
    }

    /// Writes a raw YAML file that is not a current-layout record
    pub fn put_file(&mut self, path: String, value: Value) {
        self.extra_puts.push((path, value));
    }

    /// Removes a file that is not a current-layout record (legacy leftovers)
    pub fn remove_file(&mut self, path: String) {
        self.extra_removals.push(path);
    }

    /// Ids of nodes removed by this transaction
    pub fn removed_nodes(&self) -> Vec<u64> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.is_none())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Orders the staged writes child-first, parent-second: nodes, then
    /// documents, then raw files, then the project, then removals.
    pub fn into_entry(self, node_path: impl Fn(u64) -> String) -> Result<JournalEntry> {
        let mut puts = Vec::new();
        let mut removes = Vec::new();

        for (id, node) in self.nodes {
            match node {
                Some(node) => puts.push(JournalOp::Put {
                    path: node_path(id),
                    record: Record::serialize(&node)?,
                }),
                None => removes.push(JournalOp::Remove {
                    path: node_path(id),
                }),
            }
        }
        for (_, (path, document)) in self.documents {
            match document {
                Some(document) => puts.push(JournalOp::Put {
                    path,
                    record: Record::serialize(&document)?,
                }),
                None => removes.push(JournalOp::Remove { path }),
            }
        }
        puts.extend(
            self.extra_puts
                .into_iter()
                .map(|(path, record)| JournalOp::Put { path, record }),
        );
        if let Some(project) = self.project {
            puts.push(JournalOp::Put {
                path: crate::storage::PROJECT_FILE.to_string(),
                record: Record::serialize(&project)?,
            });
        }
        removes.extend(
            self.extra_removals
                .into_iter()
                .map(|path| JournalOp::Remove { path }),
        );

        puts.extend(removes);
        Ok(JournalEntry { ops: puts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, DocumentType};

    #[test]
    fn test_staged_reads_see_writes() {
        let mut tx = Transaction::new();
        assert!(tx.node(4).is_none());

        tx.put_node(ContentNode::new(4, None, Category::Heading, "Intro".into()));
        assert_eq!(tx.node(4).flatten().map(|n| n.text.as_str()), Some("Intro"));

        tx.remove_node(4);
        assert_eq!(tx.node(4), Some(None));
        assert_eq!(tx.removed_nodes(), vec![4]);
    }

    #[test]
    fn test_entry_orders_puts_before_removes() {
        let mut tx = Transaction::new();
        tx.remove_node(9);
        tx.put_node(ContentNode::new(10, None, Category::Heading, String::new()));
        tx.put_document(
            "documents/1.yaml".into(),
            Document::new(1, DocumentType::Urs, "URS".into()),
        );
        tx.put_project(Project::new());
        tx.remove_file("9.json".into());

        let entry = tx.into_entry(|id| format!("nodes/{}.yaml", id)).unwrap();
        let paths: Vec<&str> = entry.ops.iter().map(|op| op.path()).collect();
        assert_eq!(
            paths,
            vec![
                "nodes/10.yaml",
                "documents/1.yaml",
                "reqtrace.yaml",
                "nodes/9.yaml",
                "9.json"
            ]
        );
        assert!(matches!(entry.ops[3], JournalOp::Remove { .. }));
    }

    #[test]
    fn test_entry_serializes() {
        let mut tx = Transaction::new();
        tx.put_node(ContentNode::new(1, None, Category::Comment, "c".into()));
        let entry = tx.into_entry(|id| format!("nodes/{}.yaml", id)).unwrap();
        let text = serde_yaml::to_string(&entry).unwrap();
        let back: JournalEntry = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back, entry);
    }
}
