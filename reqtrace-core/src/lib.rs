pub mod audit;
pub mod error;
pub mod export;
pub mod graph;
pub mod journal;
pub mod models;
pub mod project;
pub mod registry;
pub mod storage;
pub mod store;
pub mod trace;

// Re-export commonly used types
pub use audit::{AuditReport, Direction};
pub use error::{Error, Result};
pub use graph::{Graph, NodeField, Parent};
pub use models::{
    Category, ContentNode, Contributor, Document, DocumentRef, DocumentType, IssueKind, Level,
    Project, ReqKind, Repository, RevisionEntry, RevisionTrack, TraceData, Track,
};
pub use project::{determine_author, determine_project_root, list_available_projects};
pub use registry::{get_registry_path, Registry};
pub use storage::{Storage, PROJECT_FILE};
pub use store::{MigrationReport, ParseMode};
pub use trace::{CategoryCode, Classification, Relation};
