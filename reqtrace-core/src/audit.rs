//! Missing-trace and suspect-trace audit
//!
//! A node in a document of a given type may be required to trace upstream,
//! downstream or to a test. Each requirement is a family of partner codes,
//! and it only applies when a document that could hold such a partner
//! exists in the project.

use std::collections::BTreeSet;

use crate::models::{Category, ContentNode, DocumentType, Level, Track};
use crate::trace::{requirement_levels_for, test_levels_for, CategoryCode};

/// Which kind of required trace is being checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upstream,
    Downstream,
    Test,
}

/// A set of partner codes that satisfies a required trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Family {
    /// Any requirement or constraint at one of these levels
    Requirements(Vec<Level>),
    /// Any test at one of these levels
    Tests(Vec<Level>),
}

impl Family {
    pub fn matches(&self, code: CategoryCode) -> bool {
        match (self, code) {
            (Family::Requirements(levels), CategoryCode::Req(level, _)) => levels.contains(&level),
            (Family::Tests(levels), CategoryCode::Test(level)) => levels.contains(&level),
            _ => false,
        }
    }

    /// Document types that could hold a member of this family
    pub fn target_documents(&self) -> Vec<DocumentType> {
        match self {
            Family::Requirements(levels) => {
                levels.iter().map(|l| DocumentType::specification(*l)).collect()
            }
            Family::Tests(levels) => levels.iter().map(|l| DocumentType::protocol(*l)).collect(),
        }
    }
}

/// The partner family required for a node of `category` in a document of
/// `doc_type`, or `None` when no such trace is required.
pub fn required_family(
    direction: Direction,
    doc_type: DocumentType,
    category: Category,
) -> Option<Family> {
    use Level::{Architecture, Design, Software, User};

    let level = category.level()?;
    if level != doc_type.level() {
        return None;
    }
    match (direction, doc_type.track(), category) {
        (Direction::Upstream, Track::Specification, Category::Requirement(..)) => match level {
            User => None,
            Software => Some(Family::Requirements(vec![User])),
            Architecture => Some(Family::Requirements(vec![Software])),
            Design => Some(Family::Requirements(vec![Software, Architecture])),
        },
        (Direction::Upstream, Track::TestProtocol, Category::Test(_)) => {
            Some(Family::Requirements(requirement_levels_for(level)))
        }
        (Direction::Downstream, Track::Specification, Category::Requirement(..)) => match level {
            User => Some(Family::Requirements(vec![Software])),
            Software => Some(Family::Requirements(vec![Architecture, Design])),
            Architecture => Some(Family::Requirements(vec![Design])),
            Design => None,
        },
        (Direction::Test, Track::Specification, Category::Requirement(..)) => {
            Some(Family::Tests(test_levels_for(level).to_vec()))
        }
        _ => None,
    }
}

/// Core check shared by the three public predicates
pub fn is_missing(
    direction: Direction,
    doc_type: DocumentType,
    category: Category,
    partners: &[CategoryCode],
    inventory: &BTreeSet<DocumentType>,
) -> bool {
    let Some(family) = required_family(direction, doc_type, category) else {
        return false;
    };
    let target_exists = family
        .target_documents()
        .iter()
        .any(|t| inventory.contains(t));
    if !target_exists {
        return false;
    }
    !partners.iter().any(|code| family.matches(*code))
}

pub fn is_upstream_missing(
    doc_type: DocumentType,
    category: Category,
    partners: &[CategoryCode],
    inventory: &BTreeSet<DocumentType>,
) -> bool {
    is_missing(Direction::Upstream, doc_type, category, partners, inventory)
}

pub fn is_downstream_missing(
    doc_type: DocumentType,
    category: Category,
    partners: &[CategoryCode],
    inventory: &BTreeSet<DocumentType>,
) -> bool {
    is_missing(Direction::Downstream, doc_type, category, partners, inventory)
}

pub fn is_test_missing(
    doc_type: DocumentType,
    category: Category,
    partners: &[CategoryCode],
    inventory: &BTreeSet<DocumentType>,
) -> bool {
    is_missing(Direction::Test, doc_type, category, partners, inventory)
}

/// Whether the link from `node` to `partner` awaits re-verification
pub fn is_suspect(node: &ContentNode, partner: u64) -> bool {
    node.trace.is_suspect(partner)
}

/// Audit outcome for one node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub upstream_missing: bool,
    pub downstream_missing: bool,
    pub test_missing: bool,
    /// Partners whose link is flagged suspect on this node's end
    pub suspect: Vec<u64>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        !self.upstream_missing && !self.downstream_missing && !self.test_missing && self.suspect.is_empty()
    }
}

/// Audits a node given its resolved partner codes and the project's document inventory
pub fn audit(
    doc_type: DocumentType,
    node: &ContentNode,
    partners: &[CategoryCode],
    inventory: &BTreeSet<DocumentType>,
) -> AuditReport {
    AuditReport {
        upstream_missing: is_upstream_missing(doc_type, node.category, partners, inventory),
        downstream_missing: is_downstream_missing(doc_type, node.category, partners, inventory),
        test_missing: is_test_missing(doc_type, node.category, partners, inventory),
        suspect: node.trace.suspect.clone(),
    }
}
