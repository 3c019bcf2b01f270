//! End-to-end use of the core through its public API

use std::collections::BTreeSet;
use std::fs;

use reqtrace_core::audit;
use reqtrace_core::{
    Category, DocumentType, Graph, Level, NodeField, Parent, ParseMode, Relation, ReqKind,
    Repository, Storage,
};
use tempfile::TempDir;

const UFR: Category = Category::Requirement(Level::User, ReqKind::Functional);
const SFR: Category = Category::Requirement(Level::Software, ReqKind::Functional);

#[test]
fn urs_to_srs_decomposition() {
    let dir = TempDir::new().unwrap();
    let mut graph = Graph::create_project(dir.path(), Repository::default()).unwrap();

    let urs = graph.create_document(DocumentType::Urs, "User Requirements").unwrap();
    let srs = graph.create_document(DocumentType::Srs, "Software Requirements").unwrap();
    let u1 = graph
        .new_child(Parent::Document(urs.id), UFR, "Operators shall log in")
        .unwrap();
    let s1 = graph
        .new_child(Parent::Document(srs.id), SFR, "Verify the password hash")
        .unwrap();

    // Before linking: both sides are missing their trace
    assert!(graph.audit_node(s1.id, DocumentType::Srs).unwrap().upstream_missing);
    assert!(graph.audit_node(u1.id, DocumentType::Urs).unwrap().downstream_missing);

    graph.add_trace(u1.id, s1.id).unwrap();

    let from_s = graph.classify_traces(s1.id).unwrap();
    assert_eq!(from_s.get(Relation::DecomposedFrom), &[u1.id]);
    let from_u = graph.classify_traces(u1.id).unwrap();
    assert_eq!(from_u.get(Relation::DecomposesTo), &[s1.id]);

    let s_report = graph.audit_node(s1.id, DocumentType::Srs).unwrap();
    assert!(!s_report.upstream_missing);
    // No ADS/DDS and no STP/ITP in the project
    assert!(!s_report.downstream_missing);
    assert!(!s_report.test_missing);
    assert!(graph.audit_node(u1.id, DocumentType::Urs).unwrap().is_clean());

    // Editing U1 leaves the link suspect on S1's side only
    graph
        .edit_node_field(u1.id, NodeField::Text, "Operators shall log in with a badge")
        .unwrap();
    let s_now = graph.load_node(s1.id).unwrap();
    assert!(audit::is_suspect(&s_now, u1.id));
    assert_eq!(
        graph.audit_node(s1.id, DocumentType::Srs).unwrap().suspect,
        vec![u1.id]
    );
    assert!(graph.verify_trace(s1.id, u1.id).unwrap());
    assert!(graph.audit_node(s1.id, DocumentType::Srs).unwrap().is_clean());

    // Unlinking leaves U1 without its decomposition again
    assert!(graph.remove_trace(u1.id, s1.id).unwrap());
    assert!(graph.audit_node(u1.id, DocumentType::Urs).unwrap().downstream_missing);
    assert!(graph.audit_node(s1.id, DocumentType::Srs).unwrap().upstream_missing);
    assert!(graph.classify_traces(u1.id).unwrap().get(Relation::DecomposesTo).is_empty());
}

#[test]
fn ids_are_unique_across_documents_and_reopen() {
    let dir = TempDir::new().unwrap();
    let mut issued = BTreeSet::new();
    {
        let mut graph = Graph::create_project(dir.path(), Repository::default()).unwrap();
        for doc_type in DocumentType::all() {
            let doc = graph.create_document(*doc_type, doc_type.label()).unwrap();
            assert!(issued.insert(doc.id));
            let h = graph
                .new_child(Parent::Document(doc.id), Category::Heading, "Scope")
                .unwrap();
            assert!(issued.insert(h.id));
        }
        // Deleted IDs are never reissued
        let first = graph.documents()[0].id;
        graph.delete_document(first).unwrap();
    }

    let mut graph = Graph::open(dir.path(), ParseMode::Strict).unwrap();
    let doc = graph.documents()[0].id;
    for _ in 0..5 {
        let n = graph.new_child(Parent::Document(doc), SFR, "more").unwrap();
        assert!(issued.insert(n.id), "id {} reissued", n.id);
    }
    let base = graph.project().ids.base;
    assert!(issued.iter().all(|id| *id >= base));
}

#[test]
fn tree_stays_consistent_through_reorders() {
    let dir = TempDir::new().unwrap();
    let mut graph = Graph::create_project(dir.path(), Repository::default()).unwrap();
    let urs = graph.create_document(DocumentType::Urs, "URS").unwrap();

    let h1 = graph.new_child(Parent::Document(urs.id), Category::Heading, "One").unwrap();
    let h2 = graph.new_child(Parent::Document(urs.id), Category::Heading, "Two").unwrap();
    let a = graph.new_child(Parent::Node(h1.id), UFR, "a").unwrap();
    let b = graph.new_child(Parent::Node(h1.id), UFR, "b").unwrap();

    graph.promote(a.id).unwrap();
    graph.move_down(h1.id).unwrap();
    graph.demote(b.id).unwrap();
    graph.move_node(h2.id, Parent::Node(a.id), None).unwrap();
    graph.demote(h1.id).unwrap();

    // Every child points back at its container and every node is reachable once
    let mut seen = BTreeSet::new();
    for (_, node) in graph.walk_document(urs.id).unwrap() {
        assert!(seen.insert(node.id));
        for child in graph.children(&node) {
            assert_eq!(child.parent, Some(node.id));
        }
        assert_eq!(graph.document_of(&node).unwrap().map(|d| d.id), Some(urs.id));
    }
    for root in graph.load_document(urs.id).unwrap().children {
        assert_eq!(graph.load_node(root).unwrap().parent, None);
    }
    assert_eq!(seen.len(), 4);
    assert!(graph.orphans().unwrap().is_empty());
}

#[test]
fn deletion_removes_every_reference() {
    let dir = TempDir::new().unwrap();
    let mut graph = Graph::create_project(dir.path(), Repository::default()).unwrap();
    let urs = graph.create_document(DocumentType::Urs, "URS").unwrap();
    let srs = graph.create_document(DocumentType::Srs, "SRS").unwrap();

    let section = graph.new_child(Parent::Document(urs.id), Category::Heading, "S").unwrap();
    let u1 = graph.new_child(Parent::Node(section.id), UFR, "u1").unwrap();
    let s1 = graph.new_child(Parent::Document(srs.id), SFR, "s1").unwrap();
    let s2 = graph.new_child(Parent::Document(srs.id), SFR, "s2").unwrap();
    graph.add_trace(u1.id, s1.id).unwrap();
    graph.add_trace(u1.id, s2.id).unwrap();

    graph.delete_node(section.id).unwrap();

    for node_id in [s1.id, s2.id] {
        let node = graph.load_node(node_id).unwrap();
        assert!(!node.trace.contains(u1.id));
    }
    assert!(graph.load_document(urs.id).unwrap().children.is_empty());
    assert!(!dir.path().join(Storage::node_file(u1.id)).exists());
}

#[test]
fn fix_mode_opens_a_damaged_project() {
    let dir = TempDir::new().unwrap();
    let mut graph = Graph::create_project(dir.path(), Repository::default()).unwrap();
    let urs = graph.create_document(DocumentType::Urs, "URS").unwrap();
    let u1 = graph.new_child(Parent::Document(urs.id), UFR, "u1").unwrap();
    let u2 = graph.new_child(Parent::Document(urs.id), UFR, "u2").unwrap();
    drop(graph);

    // Hand-edit damage: wrong types, a singleton list, a dangling child
    fs::write(
        dir.path().join(Storage::node_file(u1.id)),
        format!("id: {}\ncategory: UFR\ntext: 42\nchildren: 9999\ntrace: {{ids: [], suspect: []}}\n", u1.id),
    )
    .unwrap();

    assert!(Graph::open(dir.path(), ParseMode::Strict)
        .and_then(|g| g.load_node(u1.id))
        .is_err());

    let graph = Graph::open(dir.path(), ParseMode::Fix).unwrap();
    let node = graph.load_node(u1.id).unwrap();
    assert_eq!(node.text, "42");
    assert_eq!(node.children, vec![9999]);
    assert!(graph.children(&node).is_empty());

    let walked: Vec<u64> = graph
        .walk_document(urs.id)
        .unwrap()
        .into_iter()
        .map(|(_, n)| n.id)
        .collect();
    assert_eq!(walked, vec![u1.id, u2.id]);
}
