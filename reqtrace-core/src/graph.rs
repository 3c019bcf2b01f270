//! ID-addressed node graph
//!
//! Documents and content nodes are independent records cross-linked by
//! numeric ID. [`Graph`] performs the ID→record lookup, owns ID
//! allocation through the in-memory [`Project`], and runs every mutation
//! as one staged [`Transaction`] under the project lock.

use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::path::Path;

use crate::audit::{self, AuditReport};
use crate::error::{Error, Result};
use crate::journal::Transaction;
use crate::models::{
    Category, ContentNode, Contributor, Document, DocumentRef, DocumentType, IssueKind, Project,
    Repository, RevisionEntry, RevisionTrack,
};
use crate::storage::{Storage, PROJECT_FILE};
use crate::store::{migrate_legacy_project, pending_document_count, ParseMode};
use crate::trace::{self, CategoryCode, Classification};

/// Where a node hangs: directly under a document, or under another node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parent {
    Document(u64),
    Node(u64),
}

/// Editable fields of a content node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeField {
    Text,
    Rationale,
    ExpectedResults,
    ImagePath,
    Caption,
    Category,
}

impl std::str::FromStr for NodeField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "text" => Ok(NodeField::Text),
            "rationale" => Ok(NodeField::Rationale),
            "expected_results" | "expected" => Ok(NodeField::ExpectedResults),
            "image_path" | "path" => Ok(NodeField::ImagePath),
            "caption" => Ok(NodeField::Caption),
            "category" => Ok(NodeField::Category),
            _ => Err(format!("Unknown node field: {}", s)),
        }
    }
}

/// The record whose child list holds a node
enum Container {
    Document(String, Document),
    Node(ContentNode),
}

impl Container {
    fn children(&self) -> &Vec<u64> {
        match self {
            Container::Document(_, doc) => &doc.children,
            Container::Node(node) => &node.children,
        }
    }

    fn children_mut(&mut self) -> &mut Vec<u64> {
        match self {
            Container::Document(_, doc) => &mut doc.children,
            Container::Node(node) => &mut node.children,
        }
    }

    /// Value of the `parent` field for a child of this container
    fn parent_field(&self) -> Option<u64> {
        match self {
            Container::Document(..) => None,
            Container::Node(node) => Some(node.id),
        }
    }

    fn stage(self, tx: &mut Transaction) {
        match self {
            Container::Document(path, doc) => tx.put_document(path, doc),
            Container::Node(node) => tx.put_node(node),
        }
    }
}

/// Logs why a structural mutation was refused and reports it as a no-op
fn refuse(op: &str, id: u64, reason: &str) -> Result<bool> {
    log::debug!("{} of #{} refused: {}", op, id, reason);
    Ok(false)
}

/// A project opened for reading and mutation
pub struct Graph {
    storage: Storage,
    project: Project,
}

impl Graph {
    /// Creates a new project in `root`, refusing to overwrite an existing one
    pub fn create_project<P: AsRef<Path>>(root: P, repository: Repository) -> Result<Self> {
        let storage = Storage::open(root, ParseMode::Strict)?;
        if storage.project_exists() {
            return Err(Error::Refused(format!(
                "A project already exists at {}",
                storage.project_path().display()
            )));
        }
        let mut project = Project::new();
        project.repository = repository;

        let mut tx = Transaction::new();
        tx.put_project(project.clone());
        storage.commit(tx)?;
        Ok(Self { storage, project })
    }

    /// Opens a project, replaying an interrupted commit and upgrading the
    /// legacy layout on first open
    pub fn open<P: AsRef<Path>>(root: P, mode: ParseMode) -> Result<Self> {
        let storage = Storage::open(root, mode)?;
        if let Some(raw) = storage.read_raw(PROJECT_FILE)? {
            if let Some(report) = migrate_legacy_project(&storage, &raw)? {
                log::info!(
                    "Migrated legacy project: {} document(s) converted, {} failed",
                    report.migrated.len(),
                    report.failed.len()
                );
            }
        }
        match pending_document_count(&storage) {
            Ok(0) => {}
            Ok(pending) => log::warn!(
                "{} legacy document(s) could not be converted; fix their node files and run `reqtrace migrate`",
                pending
            ),
            Err(e) => log::warn!("Unreadable list of pending legacy documents: {}", e),
        }
        let project = storage.load_project()?;
        Ok(Self { storage, project })
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn documents(&self) -> &[DocumentRef] {
        &self.project.documents
    }

    /// Runs `f` as one logical mutation: lock, refresh the project, stage,
    /// commit. On failure nothing is written and the project is reloaded.
    fn transact<T>(&mut self, f: impl FnOnce(&mut Self, &mut Transaction) -> Result<T>) -> Result<T> {
        let lock = self.storage.lock()?;
        self.project = self.storage.load_project()?;
        let before = self.project.clone();

        let in_use = self
            .storage
            .list_node_ids()?
            .into_iter()
            .chain(self.project.documents.iter().map(|d| d.id));
        let recovered = self.project.ids.reserve(in_use);
        if recovered > 0 {
            log::warn!("{} identifier(s) in use were missing from the issued list", recovered);
        }

        let mut tx = Transaction::new();
        let result = match f(self, &mut tx) {
            Ok(value) => {
                if self.project != before {
                    tx.put_project(self.project.clone());
                }
                self.storage.commit_locked(&lock, tx).map(|_| value)
            }
            Err(e) => Err(e),
        };
        if result.is_err() {
            if let Ok(project) = self.storage.load_project() {
                self.project = project;
            }
        }
        result
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Loads one node in isolation
    pub fn load_node(&self, id: u64) -> Result<ContentNode> {
        self.storage
            .load_node(id)?
            .ok_or_else(|| Error::NotFound(format!("node #{}", id)))
    }

    /// Loads a node, treating missing or unreadable records as absent
    pub fn try_load_node(&self, id: u64) -> Option<ContentNode> {
        match self.storage.load_node(id) {
            Ok(Some(node)) => Some(node),
            Ok(None) => {
                log::debug!("{}", Error::DanglingReference(id));
                None
            }
            Err(e) => {
                log::warn!("Skipping node #{}: {}", id, e);
                None
            }
        }
    }

    /// Loads a document by ID
    pub fn load_document(&self, id: u64) -> Result<Document> {
        let doc_ref = self
            .project
            .document_ref(id)
            .ok_or_else(|| Error::NotFound(format!("document #{}", id)))?;
        let mut doc = self
            .storage
            .load_document(&doc_ref.path)?
            .ok_or_else(|| Error::NotFound(format!("document file {}", doc_ref.path)))?;
        doc.id = doc_ref.id;
        Ok(doc)
    }

    /// Loads a document, treating a missing or unreadable record as absent
    pub fn try_load_document(&self, id: u64) -> Option<Document> {
        match self.load_document(id) {
            Ok(doc) => Some(doc),
            Err(e) => {
                log::warn!("Skipping document #{}: {}", id, e);
                None
            }
        }
    }

    /// Saves one node record
    pub fn save_node(&mut self, node: &ContentNode) -> Result<()> {
        let node = node.clone();
        self.transact(|_, tx| {
            tx.put_node(node);
            Ok(())
        })
    }

    /// Saves one document record; its project reference name follows the record
    pub fn save_document(&mut self, doc: &Document) -> Result<()> {
        let doc = doc.clone();
        self.transact(|graph, tx| {
            let doc_ref = graph
                .project
                .documents
                .iter_mut()
                .find(|d| d.id == doc.id)
                .ok_or_else(|| Error::NotFound(format!("document #{}", doc.id)))?;
            doc_ref.name = doc.name.clone();
            let path = doc_ref.path.clone();
            tx.put_document(path, doc);
            Ok(())
        })
    }

    fn node_in(&self, tx: &Transaction, id: u64) -> Result<Option<ContentNode>> {
        match tx.node(id) {
            Some(staged) => Ok(staged.cloned()),
            None => self.storage.load_node(id),
        }
    }

    fn require_node(&self, tx: &Transaction, id: u64) -> Result<ContentNode> {
        self.node_in(tx, id)?
            .ok_or_else(|| Error::NotFound(format!("node #{}", id)))
    }

    fn document_in(&self, tx: &Transaction, id: u64) -> Result<Option<(String, Document)>> {
        let Some(doc_ref) = self.project.document_ref(id) else {
            return Ok(None);
        };
        let doc = match tx.document(id) {
            Some(staged) => staged.cloned(),
            None => self.storage.load_document(&doc_ref.path)?,
        };
        Ok(doc.map(|mut d| {
            d.id = doc_ref.id;
            (doc_ref.path.clone(), d)
        }))
    }

    fn container_for(&self, tx: &Transaction, parent: Parent) -> Result<Container> {
        match parent {
            Parent::Document(id) => self
                .document_in(tx, id)?
                .map(|(path, doc)| Container::Document(path, doc))
                .ok_or_else(|| Error::NotFound(format!("document #{}", id))),
            Parent::Node(id) => Ok(Container::Node(self.require_node(tx, id)?)),
        }
    }

    /// The record listing `node` among its children, if any
    fn container_of(&self, tx: &Transaction, node: &ContentNode) -> Result<Option<Container>> {
        match node.parent {
            Some(pid) => Ok(self.node_in(tx, pid)?.map(Container::Node)),
            None => {
                for doc_id in self.project.documents.iter().map(|d| d.id) {
                    if let Some((path, doc)) = self.document_in(tx, doc_id)? {
                        if doc.children.contains(&node.id) {
                            return Ok(Some(Container::Document(path, doc)));
                        }
                    }
                }
                Ok(None)
            }
        }
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Children in order; dangling child IDs are skipped
    pub fn children(&self, node: &ContentNode) -> Vec<ContentNode> {
        node.children
            .iter()
            .filter_map(|id| self.try_load_node(*id))
            .collect()
    }

    pub fn parent(&self, node: &ContentNode) -> Option<ContentNode> {
        node.parent.and_then(|id| self.try_load_node(id))
    }

    /// Walks parent references to the top, then finds the owning document
    pub fn document_of(&self, node: &ContentNode) -> Result<Option<Document>> {
        let mut current = node.clone();
        let mut seen = BTreeSet::from([current.id]);
        while let Some(pid) = current.parent {
            if !seen.insert(pid) {
                log::warn!("Parent cycle through #{}", pid);
                return Ok(None);
            }
            match self.try_load_node(pid) {
                Some(parent) => current = parent,
                None => return Ok(None),
            }
        }
        Ok(self
            .project
            .documents
            .iter()
            .filter_map(|doc_ref| self.try_load_document(doc_ref.id))
            .find(|doc| doc.children.contains(&current.id)))
    }

    /// Pre-order walk of a document as (depth, node) pairs
    pub fn walk_document(&self, doc_id: u64) -> Result<Vec<(usize, ContentNode)>> {
        let doc = self.load_document(doc_id)?;
        let mut out = Vec::new();
        let mut seen = BTreeSet::new();
        let mut stack: Vec<(usize, u64)> = doc.children.iter().rev().map(|id| (0, *id)).collect();
        while let Some((depth, id)) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Some(node) = self.try_load_node(id) else {
                continue;
            };
            stack.extend(node.children.iter().rev().map(|c| (depth + 1, *c)));
            out.push((depth, node));
        }
        Ok(out)
    }

    // =========================================================================
    // Creation and deletion
    // =========================================================================

    /// Creates a document of `doc_type` with its own record file
    pub fn create_document(&mut self, doc_type: DocumentType, name: &str) -> Result<Document> {
        let name = name.to_string();
        self.transact(|graph, tx| {
            let id = graph.project.ids.allocate()?;
            let path = Storage::document_file(id);
            let doc = Document::new(id, doc_type, name.clone());
            graph.project.documents.push(DocumentRef {
                id,
                name,
                doc_type,
                path: path.clone(),
            });
            tx.put_document(path, doc.clone());
            Ok(doc)
        })
    }

    /// Deletes a document and every node under it
    pub fn delete_document(&mut self, id: u64) -> Result<Vec<u64>> {
        self.transact(|graph, tx| {
            let (path, doc) = graph
                .document_in(tx, id)?
                .ok_or_else(|| Error::NotFound(format!("document #{}", id)))?;
            let mut removed = Vec::new();
            let mut seen = BTreeSet::new();
            for root in &doc.children {
                graph.delete_subtree(tx, *root, &mut seen, &mut removed)?;
            }
            tx.remove_document(path, id);
            graph.project.documents.retain(|d| d.id != id);
            Ok(removed)
        })
    }

    /// Creates a node under `parent`, allocating a fresh project-wide ID
    pub fn new_child(&mut self, parent: Parent, category: Category, text: &str) -> Result<ContentNode> {
        let text = text.to_string();
        self.transact(|graph, tx| {
            let mut container = graph.container_for(tx, parent)?;
            let id = graph.project.ids.allocate()?;
            let node = ContentNode::new(id, container.parent_field(), category, text);
            container.children_mut().push(id);
            tx.put_node(node.clone());
            container.stage(tx);
            Ok(node)
        })
    }

    /// Deletes a node and all descendants, removing their IDs from every
    /// trace partner and from the parent's child list. Returns removed IDs.
    pub fn delete_node(&mut self, id: u64) -> Result<Vec<u64>> {
        self.transact(|graph, tx| {
            let node = graph.require_node(tx, id)?;
            let mut removed = Vec::new();
            let mut seen = BTreeSet::new();
            graph.delete_subtree(tx, id, &mut seen, &mut removed)?;

            // Read after the subtree so trace clean-up on the parent is kept
            if let Some(mut container) = graph.container_of(tx, &node)? {
                container.children_mut().retain(|c| *c != id);
                container.stage(tx);
            }
            Ok(removed)
        })
    }

    fn delete_subtree(
        &self,
        tx: &mut Transaction,
        id: u64,
        seen: &mut BTreeSet<u64>,
        removed: &mut Vec<u64>,
    ) -> Result<()> {
        if !seen.insert(id) {
            return Ok(());
        }
        let Some(node) = self.node_in(tx, id)? else {
            log::debug!("Delete skipped: {}", Error::DanglingReference(id));
            return Ok(());
        };
        for child in &node.children {
            self.delete_subtree(tx, *child, seen, removed)?;
        }
        for partner in &node.trace.ids {
            if let Some(mut other) = self.node_in(tx, *partner)? {
                if other.trace.unlink(id) {
                    tx.put_node(other);
                }
            }
        }
        tx.remove_node(id);
        removed.push(id);
        Ok(())
    }

    // =========================================================================
    // Editing
    // =========================================================================

    /// Sets one field of a node. A change flags the node suspect on the
    /// far end of each of its trace links.
    pub fn edit_node_field(&mut self, id: u64, field: NodeField, value: &str) -> Result<ContentNode> {
        let value = value.to_string();
        self.transact(|graph, tx| {
            let mut node = graph.require_node(tx, id)?;
            let current = node.category;
            let not_applicable = move || {
                Error::Refused(format!("{:?} does not apply to a {} node", field, current))
            };
            let changed = match field {
                NodeField::Text => replace(&mut node.text, value),
                NodeField::Rationale => {
                    let slot = node.rationale.as_mut().ok_or_else(not_applicable)?;
                    replace(slot, value)
                }
                NodeField::ExpectedResults => {
                    let slot = node.expected_results.as_mut().ok_or_else(not_applicable)?;
                    replace(slot, value)
                }
                NodeField::ImagePath => {
                    let image = node.image.as_mut().ok_or_else(not_applicable)?;
                    replace(&mut image.path, value)
                }
                NodeField::Caption => {
                    let image = node.image.as_mut().ok_or_else(not_applicable)?;
                    replace(&mut image.caption, value)
                }
                NodeField::Category => {
                    let category = Category::from_code(&value)
                        .or_else(|| Category::from_label(&value))
                        .ok_or_else(|| Error::Refused(format!("Unknown category '{}'", value)))?;
                    let changed = category != node.category;
                    node.category = category;
                    node.conform_payload();
                    changed
                }
            };

            if changed {
                for partner in &node.trace.ids {
                    if let Some(mut other) = graph.node_in(tx, *partner)? {
                        if other.trace.mark_suspect(id) {
                            tx.put_node(other);
                        }
                    }
                }
                tx.put_node(node.clone());
            }
            Ok(node)
        })
    }

    // =========================================================================
    // Trace links
    // =========================================================================

    /// Links two nodes on both ends. Returns false if already linked.
    pub fn add_trace(&mut self, a: u64, b: u64) -> Result<bool> {
        if a == b {
            return Err(Error::Refused("Cannot trace a node to itself".to_string()));
        }
        self.transact(|graph, tx| {
            let mut node_a = graph.require_node(tx, a)?;
            let mut node_b = graph.require_node(tx, b)?;
            let added_a = node_a.trace.link(b);
            let added_b = node_b.trace.link(a);
            if added_a {
                tx.put_node(node_a);
            }
            if added_b {
                tx.put_node(node_b);
            }
            Ok(added_a || added_b)
        })
    }

    /// Unlinks two nodes on both ends; `b` may already be gone
    pub fn remove_trace(&mut self, a: u64, b: u64) -> Result<bool> {
        self.transact(|graph, tx| {
            let mut node_a = graph.require_node(tx, a)?;
            let mut removed = false;
            if node_a.trace.unlink(b) {
                tx.put_node(node_a);
                removed = true;
            }
            if let Some(mut node_b) = graph.node_in(tx, b)? {
                if node_b.trace.unlink(a) {
                    tx.put_node(node_b);
                    removed = true;
                }
            }
            Ok(removed)
        })
    }

    /// Confirms the link from `a`'s end: clears `b` from `a`'s suspect list only
    pub fn verify_trace(&mut self, a: u64, b: u64) -> Result<bool> {
        self.transact(|graph, tx| {
            let mut node_a = graph.require_node(tx, a)?;
            let cleared = node_a.trace.clear_suspect(b);
            if cleared {
                tx.put_node(node_a);
            }
            Ok(cleared)
        })
    }

    /// Confirms the link from both ends
    pub fn verify_trace_both(&mut self, a: u64, b: u64) -> Result<bool> {
        self.transact(|graph, tx| {
            let mut cleared = false;
            for (this, other) in [(a, b), (b, a)] {
                let mut node = graph.require_node(tx, this)?;
                if node.trace.clear_suspect(other) {
                    tx.put_node(node);
                    cleared = true;
                }
            }
            Ok(cleared)
        })
    }

    fn partner_codes(&self, node: &ContentNode) -> Vec<(u64, CategoryCode)> {
        node.trace
            .ids
            .iter()
            .map(|id| {
                let category = self.try_load_node(*id).map(|n| n.category);
                (*id, CategoryCode::of_partner(category))
            })
            .collect()
    }

    /// Groups a node's trace partners by named relation
    pub fn classify_traces(&self, id: u64) -> Result<Classification> {
        let node = self.load_node(id)?;
        Ok(trace::classify(
            CategoryCode::of(node.category),
            self.partner_codes(&node),
        ))
    }

    /// Missing and suspect traces of a node, as if it lived in a `doc_type` document
    pub fn audit_node(&self, id: u64, doc_type: DocumentType) -> Result<AuditReport> {
        let node = self.load_node(id)?;
        Ok(self.audit_loaded(&node, doc_type))
    }

    fn audit_loaded(&self, node: &ContentNode, doc_type: DocumentType) -> AuditReport {
        let codes: Vec<CategoryCode> = self.partner_codes(node).into_iter().map(|(_, c)| c).collect();
        audit::audit(doc_type, node, &codes, &self.project.document_types())
    }

    /// Audits every node of a document in document order
    pub fn audit_document(&self, doc_id: u64) -> Result<Vec<(ContentNode, AuditReport)>> {
        let doc_type = self
            .project
            .document_ref(doc_id)
            .map(|d| d.doc_type)
            .ok_or_else(|| Error::NotFound(format!("document #{}", doc_id)))?;
        Ok(self
            .walk_document(doc_id)?
            .into_iter()
            .map(|(_, node)| {
                let report = self.audit_loaded(&node, doc_type);
                (node, report)
            })
            .collect())
    }

    // =========================================================================
    // Reordering
    // =========================================================================

    /// Headings always permit promotion; other nodes inherit it from the
    /// nearest ancestor, and a chain ending without a heading forbids it.
    fn permits_promotion(&self, tx: &Transaction, node: &ContentNode) -> Result<bool> {
        let mut current = node.clone();
        let mut seen = BTreeSet::from([current.id]);
        loop {
            if current.category == Category::Heading {
                return Ok(true);
            }
            let Some(pid) = current.parent else {
                return Ok(false);
            };
            if !seen.insert(pid) {
                return Ok(false);
            }
            match self.node_in(tx, pid)? {
                Some(parent) => current = parent,
                None => return Ok(false),
            }
        }
    }

    /// Moves a node up one level, right after its former parent
    pub fn promote(&mut self, id: u64) -> Result<bool> {
        self.transact(|graph, tx| {
            let mut node = graph.require_node(tx, id)?;
            let Some(pid) = node.parent else {
                return refuse("promote", id, "already a document root");
            };
            let Some(mut parent) = graph.node_in(tx, pid)? else {
                return refuse("promote", id, "parent is missing");
            };
            if !graph.permits_promotion(tx, &node)? {
                return refuse("promote", id, "parent category forbids promotion");
            }
            let Some(mut grand) = graph.container_of(tx, &parent)? else {
                return refuse("promote", id, "grandparent is missing");
            };

            parent.children.retain(|c| *c != id);
            let at = grand
                .children()
                .iter()
                .position(|c| *c == pid)
                .map(|p| p + 1)
                .unwrap_or(grand.children().len());
            grand.children_mut().insert(at, id);
            node.parent = grand.parent_field();

            tx.put_node(parent);
            tx.put_node(node);
            grand.stage(tx);
            Ok(true)
        })
    }

    /// Makes a node the last child of its preceding sibling, which must be a heading
    pub fn demote(&mut self, id: u64) -> Result<bool> {
        self.transact(|graph, tx| {
            let mut node = graph.require_node(tx, id)?;
            let Some(mut container) = graph.container_of(tx, &node)? else {
                return refuse("demote", id, "not attached to a parent");
            };
            let Some(idx) = container.children().iter().position(|c| *c == id) else {
                return refuse("demote", id, "missing from its parent's children");
            };
            if idx == 0 {
                return refuse("demote", id, "no preceding sibling");
            }
            let prev_id = container.children()[idx - 1];
            let Some(mut prev) = graph.node_in(tx, prev_id)? else {
                return refuse("demote", id, "preceding sibling is missing");
            };
            if prev.category != Category::Heading {
                return refuse("demote", id, "preceding sibling is not a heading");
            }

            container.children_mut().remove(idx);
            prev.children.push(id);
            node.parent = Some(prev_id);

            tx.put_node(node);
            tx.put_node(prev);
            container.stage(tx);
            Ok(true)
        })
    }

    fn shift(&mut self, id: u64, up: bool) -> Result<bool> {
        let op = if up { "move up" } else { "move down" };
        self.transact(|graph, tx| {
            let node = graph.require_node(tx, id)?;
            let Some(mut container) = graph.container_of(tx, &node)? else {
                return refuse(op, id, "not attached to a parent");
            };
            let Some(idx) = container.children().iter().position(|c| *c == id) else {
                return refuse(op, id, "missing from its parent's children");
            };
            let other = if up {
                idx.checked_sub(1)
            } else {
                Some(idx + 1).filter(|i| *i < container.children().len())
            };
            let Some(other) = other else {
                return refuse(op, id, "already at the boundary");
            };
            container.children_mut().swap(idx, other);
            container.stage(tx);
            Ok(true)
        })
    }

    /// Swaps a node with its previous sibling; no-op for the first child
    pub fn move_up(&mut self, id: u64) -> Result<bool> {
        self.shift(id, true)
    }

    /// Swaps a node with its next sibling; no-op for the last child
    pub fn move_down(&mut self, id: u64) -> Result<bool> {
        self.shift(id, false)
    }

    /// Re-parents a node, at `index` in the new child list or at the end.
    /// Refused when the new parent is the node itself or one of its descendants.
    pub fn move_node(&mut self, id: u64, new_parent: Parent, index: Option<usize>) -> Result<bool> {
        self.transact(|graph, tx| {
            let mut node = graph.require_node(tx, id)?;
            if let Parent::Node(target) = new_parent {
                let mut cursor = Some(target);
                let mut seen = BTreeSet::new();
                while let Some(cid) = cursor {
                    if cid == id {
                        return refuse("move", id, "target is inside the moved subtree");
                    }
                    if !seen.insert(cid) {
                        break;
                    }
                    cursor = graph.node_in(tx, cid)?.and_then(|n| n.parent);
                }
            }

            if let Some(mut old) = graph.container_of(tx, &node)? {
                old.children_mut().retain(|c| *c != id);
                old.stage(tx);
            }
            // Re-read so a move within the same parent sees the removal
            let mut target = graph.container_for(tx, new_parent)?;
            let len = target.children().len();
            let at = index.map(|i| i.min(len)).unwrap_or(len);
            target.children_mut().insert(at, id);
            node.parent = target.parent_field();
            target.stage(tx);
            tx.put_node(node);
            Ok(true)
        })
    }

    // =========================================================================
    // Documents and project
    // =========================================================================

    /// Issues a new revision of a document dated today
    pub fn issue_document(
        &mut self,
        doc_id: u64,
        track: RevisionTrack,
        kind: IssueKind,
        author: &str,
        details: Vec<String>,
    ) -> Result<RevisionEntry> {
        let today = chrono::Local::now().date_naive();
        self.issue_document_on(doc_id, track, kind, author, details, today)
    }

    pub fn issue_document_on(
        &mut self,
        doc_id: u64,
        track: RevisionTrack,
        kind: IssueKind,
        author: &str,
        details: Vec<String>,
        date: NaiveDate,
    ) -> Result<RevisionEntry> {
        let author = author.to_string();
        self.transact(|graph, tx| {
            let (path, mut doc) = graph
                .document_in(tx, doc_id)?
                .ok_or_else(|| Error::NotFound(format!("document #{}", doc_id)))?;
            let entry = doc.issue(track, kind, author, details, date);
            tx.put_document(path, doc);
            Ok(entry)
        })
    }

    pub fn add_contributor(&mut self, contributor: Contributor) -> Result<()> {
        self.transact(|graph, _| graph.project.add_contributor(contributor))
    }

    pub fn remove_contributor(&mut self, name: &str) -> Result<bool> {
        self.transact(|graph, _| Ok(graph.project.remove_contributor(name)))
    }

    pub fn set_repository(&mut self, repository: Repository) -> Result<()> {
        self.transact(|graph, _| {
            graph.project.repository = repository;
            Ok(())
        })
    }

    /// Node IDs reachable from document roots, plus the documents that
    /// could not be read
    fn reachable(&self) -> (BTreeSet<u64>, Vec<u64>) {
        let mut reachable = BTreeSet::new();
        let mut unreadable = Vec::new();
        for doc_ref in &self.project.documents {
            match self.walk_document(doc_ref.id) {
                Ok(walk) => reachable.extend(walk.into_iter().map(|(_, node)| node.id)),
                Err(e) => {
                    log::warn!("Skipping document #{}: {}", doc_ref.id, e);
                    unreadable.push(doc_ref.id);
                }
            }
        }
        (reachable, unreadable)
    }

    /// Node records on disk that no readable document root reaches
    pub fn orphans(&self) -> Result<Vec<u64>> {
        let (reachable, _) = self.reachable();
        Ok(self
            .storage
            .list_node_ids()?
            .into_iter()
            .filter(|id| !reachable.contains(id))
            .collect())
    }

    /// Removes orphaned node records, unlinking them from any trace partner.
    /// Refused while any document is unreadable, since its nodes would look
    /// orphaned.
    pub fn collect_garbage(&mut self) -> Result<Vec<u64>> {
        let (_, unreadable) = self.reachable();
        if !unreadable.is_empty() {
            return Err(Error::Refused(format!(
                "cannot collect garbage while document(s) {:?} are unreadable",
                unreadable
            )));
        }
        let orphans = self.orphans()?;
        self.transact(|graph, tx| {
            for id in &orphans {
                if let Some(node) = graph.node_in(tx, *id)? {
                    for partner in &node.trace.ids {
                        if let Some(mut other) = graph.node_in(tx, *partner)? {
                            if other.trace.unlink(*id) {
                                tx.put_node(other);
                            }
                        }
                    }
                }
                tx.remove_node(*id);
            }
            Ok(orphans)
        })
    }
}

fn replace(slot: &mut String, value: String) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Level, ReqKind};
    use crate::trace::Relation;
    use tempfile::TempDir;

    const UFR: Category = Category::Requirement(Level::User, ReqKind::Functional);
    const SFR: Category = Category::Requirement(Level::Software, ReqKind::Functional);

    fn new_graph() -> (TempDir, Graph) {
        let temp_dir = TempDir::new().unwrap();
        let graph = Graph::create_project(temp_dir.path(), Repository::default()).unwrap();
        (temp_dir, graph)
    }

    fn child_ids(graph: &Graph, parent: Parent) -> Vec<u64> {
        match parent {
            Parent::Document(id) => graph.load_document(id).unwrap().children,
            Parent::Node(id) => graph.load_node(id).unwrap().children,
        }
    }

    #[test]
    fn test_node_field_parses() {
        assert_eq!("expected-results".parse::<NodeField>(), Ok(NodeField::ExpectedResults));
        assert_eq!("Caption".parse::<NodeField>(), Ok(NodeField::Caption));
        assert!("colour".parse::<NodeField>().is_err());
    }

    #[test]
    fn test_create_project_refuses_existing() {
        let (temp_dir, _graph) = new_graph();
        assert!(Graph::create_project(temp_dir.path(), Repository::default()).is_err());
        assert!(Graph::open(temp_dir.path(), ParseMode::Strict).is_ok());
    }

    #[test]
    fn test_new_child_links_both_ways() {
        let (_dir, mut graph) = new_graph();
        let doc = graph.create_document(DocumentType::Urs, "User Requirements").unwrap();
        let heading = graph
            .new_child(Parent::Document(doc.id), Category::Heading, "Login")
            .unwrap();
        let req = graph
            .new_child(Parent::Node(heading.id), UFR, "Users shall log in")
            .unwrap();

        assert_eq!(heading.parent, None);
        assert_eq!(child_ids(&graph, Parent::Document(doc.id)), vec![heading.id]);

        let heading = graph.load_node(heading.id).unwrap();
        assert!(heading.children.contains(&req.id));
        assert_eq!(graph.parent(&req).map(|p| p.id), Some(heading.id));
        assert_eq!(graph.document_of(&req).unwrap().map(|d| d.id), Some(doc.id));
        assert_eq!(graph.children(&heading).len(), 1);
    }

    #[test]
    fn test_ids_unique_and_persisted() {
        let (dir, mut graph) = new_graph();
        let doc = graph.create_document(DocumentType::Srs, "SRS").unwrap();
        let mut ids = vec![doc.id];
        for i in 0..10 {
            let node = graph
                .new_child(Parent::Document(doc.id), SFR, &format!("req {}", i))
                .unwrap();
            ids.push(node.id);
        }
        let distinct: BTreeSet<u64> = ids.iter().copied().collect();
        assert_eq!(distinct.len(), ids.len());
        let base = graph.project().ids.base;
        assert!(ids.iter().all(|id| *id >= base));

        // A reopened project keeps allocating past what was issued
        let mut reopened = Graph::open(dir.path(), ParseMode::Strict).unwrap();
        let next = reopened
            .new_child(Parent::Document(doc.id), SFR, "one more")
            .unwrap();
        assert!(!distinct.contains(&next.id));
    }

    #[test]
    fn test_delete_cascades_and_cleans_traces() {
        let (_dir, mut graph) = new_graph();
        let urs = graph.create_document(DocumentType::Urs, "URS").unwrap();
        let srs = graph.create_document(DocumentType::Srs, "SRS").unwrap();
        let section = graph
            .new_child(Parent::Document(urs.id), Category::Heading, "Section")
            .unwrap();
        let u1 = graph.new_child(Parent::Node(section.id), UFR, "u1").unwrap();
        let u2 = graph.new_child(Parent::Node(u1.id), UFR, "u2").unwrap();
        let s1 = graph.new_child(Parent::Document(srs.id), SFR, "s1").unwrap();
        graph.add_trace(u2.id, s1.id).unwrap();

        let removed = graph.delete_node(u1.id).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(graph.load_node(u1.id).is_err());
        assert!(graph.load_node(u2.id).is_err());
        assert!(graph.load_node(section.id).unwrap().children.is_empty());
        assert!(graph.load_node(s1.id).unwrap().trace.ids.is_empty());
        assert!(graph.orphans().unwrap().is_empty());
    }

    #[test]
    fn test_delete_document_removes_everything() {
        let (_dir, mut graph) = new_graph();
        let urs = graph.create_document(DocumentType::Urs, "URS").unwrap();
        let a = graph.new_child(Parent::Document(urs.id), UFR, "a").unwrap();
        let b = graph.new_child(Parent::Node(a.id), UFR, "b").unwrap();

        let removed = graph.delete_document(urs.id).unwrap();
        assert_eq!(removed, vec![b.id, a.id]);
        assert!(graph.documents().is_empty());
        assert!(graph.load_document(urs.id).is_err());
        assert!(!graph.project().has_document_type(DocumentType::Urs));
    }

    #[test]
    fn test_trace_add_remove_symmetric() {
        let (_dir, mut graph) = new_graph();
        let urs = graph.create_document(DocumentType::Urs, "URS").unwrap();
        let a = graph.new_child(Parent::Document(urs.id), UFR, "a").unwrap();
        let b = graph.new_child(Parent::Document(urs.id), UFR, "b").unwrap();

        assert!(graph.add_trace(a.id, b.id).unwrap());
        assert!(!graph.add_trace(b.id, a.id).unwrap());
        assert_eq!(graph.load_node(a.id).unwrap().trace.ids, vec![b.id]);
        assert_eq!(graph.load_node(b.id).unwrap().trace.ids, vec![a.id]);
        assert!(graph.add_trace(a.id, a.id).is_err());

        assert!(graph.remove_trace(b.id, a.id).unwrap());
        assert!(graph.load_node(a.id).unwrap().trace.ids.is_empty());
        assert!(graph.load_node(b.id).unwrap().trace.ids.is_empty());
    }

    #[test]
    fn test_edit_marks_suspect_on_far_end_and_verify_clears_one_end() {
        let (_dir, mut graph) = new_graph();
        let urs = graph.create_document(DocumentType::Urs, "URS").unwrap();
        let srs = graph.create_document(DocumentType::Srs, "SRS").unwrap();
        let u = graph.new_child(Parent::Document(urs.id), UFR, "u").unwrap();
        let s = graph.new_child(Parent::Document(srs.id), SFR, "s").unwrap();
        graph.add_trace(u.id, s.id).unwrap();

        graph.edit_node_field(u.id, NodeField::Text, "u, revised").unwrap();
        let s_now = graph.load_node(s.id).unwrap();
        assert!(s_now.trace.is_suspect(u.id));
        assert!(!graph.load_node(u.id).unwrap().trace.is_suspect(s.id));

        // Same value again is not a change
        graph.edit_node_field(s.id, NodeField::Text, "s").unwrap();
        assert!(!graph.load_node(u.id).unwrap().trace.is_suspect(s.id));

        assert!(graph.verify_trace(s.id, u.id).unwrap());
        assert!(!graph.load_node(s.id).unwrap().trace.is_suspect(u.id));
        assert!(!graph.verify_trace(s.id, u.id).unwrap());
    }

    #[test]
    fn test_edit_rejects_inapplicable_field() {
        let (_dir, mut graph) = new_graph();
        let urs = graph.create_document(DocumentType::Urs, "URS").unwrap();
        let h = graph
            .new_child(Parent::Document(urs.id), Category::Heading, "h")
            .unwrap();
        assert!(graph.edit_node_field(h.id, NodeField::Rationale, "why").is_err());

        let changed = graph.edit_node_field(h.id, NodeField::Category, "UFR").unwrap();
        assert_eq!(changed.category, UFR);
        assert_eq!(changed.rationale.as_deref(), Some(""));
        graph.edit_node_field(h.id, NodeField::Rationale, "why").unwrap();
        assert_eq!(graph.load_node(h.id).unwrap().rationale.as_deref(), Some("why"));
    }

    #[test]
    fn test_promote_and_demote() {
        let (_dir, mut graph) = new_graph();
        let urs = graph.create_document(DocumentType::Urs, "URS").unwrap();
        let h1 = graph
            .new_child(Parent::Document(urs.id), Category::Heading, "h1")
            .unwrap();
        let h2 = graph
            .new_child(Parent::Document(urs.id), Category::Heading, "h2")
            .unwrap();
        let r = graph.new_child(Parent::Node(h1.id), UFR, "r").unwrap();

        // r sits under a heading, so it may move up next to h1
        assert!(graph.promote(r.id).unwrap());
        assert_eq!(child_ids(&graph, Parent::Document(urs.id)), vec![h1.id, r.id, h2.id]);
        assert_eq!(graph.load_node(r.id).unwrap().parent, None);

        // Roots cannot be promoted
        assert!(!graph.promote(r.id).unwrap());

        // r's preceding sibling h1 is a heading
        assert!(graph.demote(r.id).unwrap());
        assert_eq!(graph.load_node(h1.id).unwrap().children, vec![r.id]);
        assert_eq!(graph.load_node(r.id).unwrap().parent, Some(h1.id));

        // h1 is first: nothing to demote into
        assert!(!graph.demote(h1.id).unwrap());
    }

    #[test]
    fn test_promotion_forbidden_without_heading_ancestor() {
        let (_dir, mut graph) = new_graph();
        let urs = graph.create_document(DocumentType::Urs, "URS").unwrap();
        let root_req = graph.new_child(Parent::Document(urs.id), UFR, "root").unwrap();
        let sub = graph.new_child(Parent::Node(root_req.id), UFR, "sub").unwrap();
        let subsub = graph.new_child(Parent::Node(sub.id), UFR, "subsub").unwrap();

        assert!(!graph.promote(sub.id).unwrap());
        assert!(!graph.promote(subsub.id).unwrap());
        assert_eq!(graph.load_node(sub.id).unwrap().children, vec![subsub.id]);
    }

    #[test]
    fn test_demote_requires_heading_sibling() {
        let (_dir, mut graph) = new_graph();
        let urs = graph.create_document(DocumentType::Urs, "URS").unwrap();
        graph.new_child(Parent::Document(urs.id), UFR, "a").unwrap();
        let b = graph.new_child(Parent::Document(urs.id), UFR, "b").unwrap();
        assert!(!graph.demote(b.id).unwrap());
    }

    #[test]
    fn test_move_up_down_boundaries() {
        let (_dir, mut graph) = new_graph();
        let urs = graph.create_document(DocumentType::Urs, "URS").unwrap();
        let a = graph.new_child(Parent::Document(urs.id), UFR, "a").unwrap();
        let b = graph.new_child(Parent::Document(urs.id), UFR, "b").unwrap();

        assert!(!graph.move_up(a.id).unwrap());
        assert!(!graph.move_down(b.id).unwrap());
        assert!(graph.move_up(b.id).unwrap());
        assert_eq!(child_ids(&graph, Parent::Document(urs.id)), vec![b.id, a.id]);
        assert!(graph.move_down(b.id).unwrap());
        assert_eq!(child_ids(&graph, Parent::Document(urs.id)), vec![a.id, b.id]);
    }

    #[test]
    fn test_move_node_refuses_cycles() {
        let (_dir, mut graph) = new_graph();
        let urs = graph.create_document(DocumentType::Urs, "URS").unwrap();
        let srs = graph.create_document(DocumentType::Srs, "SRS").unwrap();
        let a = graph.new_child(Parent::Document(urs.id), Category::Heading, "a").unwrap();
        let b = graph.new_child(Parent::Node(a.id), Category::Heading, "b").unwrap();

        assert!(!graph.move_node(a.id, Parent::Node(b.id), None).unwrap());
        assert!(!graph.move_node(a.id, Parent::Node(a.id), None).unwrap());

        assert!(graph.move_node(b.id, Parent::Document(srs.id), Some(0)).unwrap());
        assert_eq!(child_ids(&graph, Parent::Document(srs.id)), vec![b.id]);
        assert!(graph.load_node(a.id).unwrap().children.is_empty());
        assert_eq!(graph.document_of(&graph.load_node(b.id).unwrap()).unwrap().map(|d| d.id), Some(srs.id));

        // Within the same parent the index is honoured after removal
        let c = graph.new_child(Parent::Document(srs.id), Category::Heading, "c").unwrap();
        assert!(graph.move_node(c.id, Parent::Document(srs.id), Some(0)).unwrap());
        assert_eq!(child_ids(&graph, Parent::Document(srs.id)), vec![c.id, b.id]);
    }

    #[test]
    fn test_classify_skips_dangling_partners() {
        let (dir, mut graph) = new_graph();
        let urs = graph.create_document(DocumentType::Urs, "URS").unwrap();
        let srs = graph.create_document(DocumentType::Srs, "SRS").unwrap();
        let u = graph.new_child(Parent::Document(urs.id), UFR, "u").unwrap();
        let s = graph.new_child(Parent::Document(srs.id), SFR, "s").unwrap();
        graph.add_trace(u.id, s.id).unwrap();

        // Corrupt the store behind the graph's back
        std::fs::remove_file(dir.path().join(Storage::node_file(u.id))).unwrap();

        let classes = graph.classify_traces(s.id).unwrap();
        assert!(classes.get(Relation::DecomposedFrom).is_empty());
        assert!(graph.try_load_node(u.id).is_none());
    }

    #[test]
    fn test_issue_document_tracks_are_independent() {
        let (_dir, mut graph) = new_graph();
        let urs = graph.create_document(DocumentType::Urs, "URS").unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        graph
            .issue_document_on(urs.id, RevisionTrack::Body, IssueKind::Major, "ann", vec!["first".into()], date)
            .unwrap();
        let report = graph
            .issue_document_on(urs.id, RevisionTrack::TraceReport, IssueKind::Minor, "ann", vec![], date)
            .unwrap();
        assert_eq!(report.version(), (0, 1));

        let doc = graph.load_document(urs.id).unwrap();
        assert_eq!(doc.revisions.len(), 1);
        assert_eq!(doc.revisions[0].details, vec!["first".to_string()]);
        assert_eq!(doc.report_revisions.len(), 1);
    }

    #[test]
    fn test_collect_garbage_removes_orphans() {
        let (dir, mut graph) = new_graph();
        let urs = graph.create_document(DocumentType::Urs, "URS").unwrap();
        let keep = graph.new_child(Parent::Document(urs.id), UFR, "keep").unwrap();

        // An orphan as a crash between record writes could have left behind
        let orphan = ContentNode::new(999, None, UFR, "stray".into());
        graph.save_node(&orphan).unwrap();
        assert_eq!(graph.orphans().unwrap(), vec![999]);

        assert_eq!(graph.collect_garbage().unwrap(), vec![999]);
        assert!(!dir.path().join(Storage::node_file(999)).exists());
        assert!(graph.load_node(keep.id).is_ok());
    }

    #[test]
    fn test_lost_issued_list_never_reissues_ids() {
        let (dir, mut graph) = new_graph();
        let urs = graph.create_document(DocumentType::Urs, "URS").unwrap();
        let keep = graph
            .new_child(Parent::Document(urs.id), UFR, "precious text")
            .unwrap();
        drop(graph);

        let path = dir.path().join(PROJECT_FILE);
        let mut raw: serde_yaml::Value =
            serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        raw["ids"]["issued"] = serde_yaml::Value::String("oops".into());
        std::fs::write(&path, serde_yaml::to_string(&raw).unwrap()).unwrap();

        let mut graph = Graph::open(dir.path(), ParseMode::Fix).unwrap();
        let a = graph.new_child(Parent::Document(urs.id), UFR, "new a").unwrap();
        let b = graph.new_child(Parent::Document(urs.id), UFR, "new b").unwrap();

        for id in [a.id, b.id] {
            assert_ne!(id, urs.id);
            assert_ne!(id, keep.id);
        }
        assert_eq!(graph.load_node(keep.id).unwrap().text, "precious text");
        assert_eq!(child_ids(&graph, Parent::Document(urs.id)), vec![keep.id, a.id, b.id]);
        assert!(graph.project().ids.is_issued(keep.id));
    }

    #[test]
    fn test_missing_document_file_stays_local() {
        let (dir, mut graph) = new_graph();
        let urs = graph.create_document(DocumentType::Urs, "URS").unwrap();
        let srs = graph.create_document(DocumentType::Srs, "SRS").unwrap();
        graph.new_child(Parent::Document(urs.id), UFR, "u1").unwrap();
        let s1 = graph.new_child(Parent::Document(srs.id), SFR, "s1").unwrap();

        std::fs::remove_file(dir.path().join(Storage::document_file(urs.id))).unwrap();

        assert_eq!(graph.document_of(&s1).unwrap().map(|d| d.id), Some(srs.id));
        assert!(graph.try_load_document(urs.id).is_none());
        // The URS node only looks orphaned, so garbage collection holds off
        assert_eq!(graph.orphans().unwrap().len(), 1);
        assert!(matches!(graph.collect_garbage(), Err(Error::Refused(_))));
        assert!(graph.load_node(s1.id).is_ok());
    }

    #[test]
    fn test_failed_mutation_writes_nothing() {
        let (_dir, mut graph) = new_graph();
        let before = graph.project().clone();
        assert!(graph.new_child(Parent::Document(4242), UFR, "x").is_err());
        assert_eq!(graph.project(), &before);
    }
}
