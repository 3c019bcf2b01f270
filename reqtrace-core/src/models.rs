use chrono::{Datelike, NaiveDate};
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Error, Result};

/// Current persisted schema version. Version 1 is the legacy flat layout.
pub const SCHEMA_VERSION: u32 = 2;

/// First identifier handed out in a fresh project
pub const DEFAULT_ID_BASE: u64 = 1;

/// Default cap on the contributor roster
pub const DEFAULT_MAX_CONTRIBUTORS: u32 = 16;

/// Abstraction level of the V-model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Level {
    User,
    Software,
    Architecture,
    Design,
}

impl Level {
    pub fn all() -> &'static [Level] {
        &[Level::User, Level::Software, Level::Architecture, Level::Design]
    }

    /// Single-letter prefix used in category codes
    pub fn letter(&self) -> char {
        match self {
            Level::User => 'U',
            Level::Software => 'S',
            Level::Architecture => 'A',
            Level::Design => 'D',
        }
    }

    fn from_letter(c: char) -> Option<Level> {
        match c {
            'U' => Some(Level::User),
            'S' => Some(Level::Software),
            'A' => Some(Level::Architecture),
            'D' => Some(Level::Design),
            _ => None,
        }
    }

    /// Display name of the level
    pub fn label(&self) -> &'static str {
        match self {
            Level::User => "User",
            Level::Software => "Software",
            Level::Architecture => "Architecture",
            Level::Design => "Design",
        }
    }

    /// Display name of the test flavour run against this level
    pub fn test_label(&self) -> &'static str {
        match self {
            Level::User => "User Acceptance",
            Level::Software => "Software System",
            Level::Architecture => "Integration",
            Level::Design => "Unit",
        }
    }
}

/// Flavour of a requirement-like node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReqKind {
    Functional,
    NonFunctional,
    Constraint,
}

impl ReqKind {
    pub fn all() -> &'static [ReqKind] {
        &[ReqKind::Functional, ReqKind::NonFunctional, ReqKind::Constraint]
    }

    fn suffix(&self) -> &'static str {
        match self {
            ReqKind::Functional => "FR",
            ReqKind::NonFunctional => "NFR",
            ReqKind::Constraint => "DC",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ReqKind::Functional => "Functional Requirement",
            ReqKind::NonFunctional => "Non-Functional Requirement",
            ReqKind::Constraint => "Design Constraint",
        }
    }
}

/// The type tag of a content node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Heading,
    Comment,
    Image,
    Diagram,
    Requirement(Level, ReqKind),
    Test(Level),
}

impl Category {
    /// Every category, in menu order
    pub fn all() -> Vec<Category> {
        let mut all = vec![
            Category::Heading,
            Category::Comment,
            Category::Image,
            Category::Diagram,
        ];
        for level in Level::all() {
            for kind in ReqKind::all() {
                all.push(Category::Requirement(*level, *kind));
            }
            all.push(Category::Test(*level));
        }
        all
    }

    /// Persisted form: lowercase words for structural categories, short codes otherwise
    pub fn code(&self) -> String {
        match self {
            Category::Heading => "heading".to_string(),
            Category::Comment => "comment".to_string(),
            Category::Image => "image".to_string(),
            Category::Diagram => "diagram".to_string(),
            Category::Requirement(level, kind) => format!("{}{}", level.letter(), kind.suffix()),
            Category::Test(level) => format!("{}T", level.letter()),
        }
    }

    /// Parses the persisted form produced by [`Category::code`]
    pub fn from_code(s: &str) -> Option<Category> {
        match s.trim() {
            "heading" => return Some(Category::Heading),
            "comment" => return Some(Category::Comment),
            "image" => return Some(Category::Image),
            "diagram" => return Some(Category::Diagram),
            _ => {}
        }
        let code = s.trim().to_ascii_uppercase();
        let mut chars = code.chars();
        let level = Level::from_letter(chars.next()?)?;
        match chars.as_str() {
            "FR" => Some(Category::Requirement(level, ReqKind::Functional)),
            "NFR" => Some(Category::Requirement(level, ReqKind::NonFunctional)),
            "DC" => Some(Category::Requirement(level, ReqKind::Constraint)),
            "T" => Some(Category::Test(level)),
            _ => None,
        }
    }

    /// Long display string, also the legacy persisted form
    pub fn label(&self) -> String {
        match self {
            Category::Heading => "Heading".to_string(),
            Category::Comment => "Comment".to_string(),
            Category::Image => "Image".to_string(),
            Category::Diagram => "Diagram".to_string(),
            Category::Requirement(level, kind) => format!("{} {}", level.label(), kind.label()),
            Category::Test(level) => format!("{} Test", level.test_label()),
        }
    }

    /// Parses a long display string, case-insensitively
    pub fn from_label(s: &str) -> Option<Category> {
        let wanted = s.trim().to_lowercase();
        Category::all()
            .into_iter()
            .find(|c| c.label().to_lowercase() == wanted)
    }

    pub fn level(&self) -> Option<Level> {
        match self {
            Category::Requirement(level, _) | Category::Test(level) => Some(*level),
            _ => None,
        }
    }

    pub fn is_requirement(&self) -> bool {
        matches!(self, Category::Requirement(..))
    }

    pub fn is_test(&self) -> bool {
        matches!(self, Category::Test(_))
    }

    /// Requirements and constraints carry a translation rationale
    pub fn has_rationale(&self) -> bool {
        self.is_requirement()
    }

    /// Tests carry an expected-results string
    pub fn has_expected_results(&self) -> bool {
        self.is_test()
    }

    pub fn has_image(&self) -> bool {
        matches!(self, Category::Image)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.code())
    }
}

/// Which half of the V a document belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Track {
    Specification,
    TestProtocol,
}

/// The eight fixed document kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocumentType {
    /// User Requirements Specification
    Urs,
    /// Software Requirements Specification
    Srs,
    /// Architecture Design Specification
    Ads,
    /// Detailed Design Specification
    Dds,
    /// User Acceptance Test Protocol
    Atp,
    /// Software System Test Protocol
    Stp,
    /// Integration Test Protocol
    Itp,
    /// Unit Test Protocol
    Utp,
}

impl DocumentType {
    pub fn all() -> &'static [DocumentType] {
        &[
            DocumentType::Urs,
            DocumentType::Srs,
            DocumentType::Ads,
            DocumentType::Dds,
            DocumentType::Atp,
            DocumentType::Stp,
            DocumentType::Itp,
            DocumentType::Utp,
        ]
    }

    pub fn code(&self) -> &'static str {
        match self {
            DocumentType::Urs => "URS",
            DocumentType::Srs => "SRS",
            DocumentType::Ads => "ADS",
            DocumentType::Dds => "DDS",
            DocumentType::Atp => "ATP",
            DocumentType::Stp => "STP",
            DocumentType::Itp => "ITP",
            DocumentType::Utp => "UTP",
        }
    }

    pub fn from_code(s: &str) -> Option<DocumentType> {
        let wanted = s.trim().to_ascii_uppercase();
        DocumentType::all()
            .iter()
            .copied()
            .find(|t| t.code() == wanted)
    }

    /// Long display string, also the legacy persisted form
    pub fn label(&self) -> &'static str {
        match self {
            DocumentType::Urs => "User Requirements Specification",
            DocumentType::Srs => "Software Requirements Specification",
            DocumentType::Ads => "Architecture Design Specification",
            DocumentType::Dds => "Detailed Design Specification",
            DocumentType::Atp => "User Acceptance Test Protocol",
            DocumentType::Stp => "Software System Test Protocol",
            DocumentType::Itp => "Integration Test Protocol",
            DocumentType::Utp => "Unit Test Protocol",
        }
    }

    pub fn from_label(s: &str) -> Option<DocumentType> {
        let wanted = s.trim().to_lowercase();
        DocumentType::all()
            .iter()
            .copied()
            .find(|t| t.label().to_lowercase() == wanted)
    }

    pub fn level(&self) -> Level {
        match self {
            DocumentType::Urs | DocumentType::Atp => Level::User,
            DocumentType::Srs | DocumentType::Stp => Level::Software,
            DocumentType::Ads | DocumentType::Itp => Level::Architecture,
            DocumentType::Dds | DocumentType::Utp => Level::Design,
        }
    }

    pub fn track(&self) -> Track {
        match self {
            DocumentType::Urs | DocumentType::Srs | DocumentType::Ads | DocumentType::Dds => {
                Track::Specification
            }
            _ => Track::TestProtocol,
        }
    }

    /// The specification document holding requirements of `level`
    pub fn specification(level: Level) -> DocumentType {
        match level {
            Level::User => DocumentType::Urs,
            Level::Software => DocumentType::Srs,
            Level::Architecture => DocumentType::Ads,
            Level::Design => DocumentType::Dds,
        }
    }

    /// The test protocol holding tests of `level`
    pub fn protocol(level: Level) -> DocumentType {
        match level {
            Level::User => DocumentType::Atp,
            Level::Software => DocumentType::Stp,
            Level::Architecture => DocumentType::Itp,
            Level::Design => DocumentType::Utp,
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl Serialize for DocumentType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

/// Advisory repository linkage; never enforced by the core
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Repository {
    pub root: String,
    pub remote: String,
    pub pathspec: String,
}

/// A member of the project's contributor roster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Contributor {
    pub name: String,
    pub email: String,
}

/// Project-wide identifier allocation state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdAllocation {
    pub base: u64,
    pub issued: BTreeSet<u64>,
}

impl Default for IdAllocation {
    fn default() -> Self {
        Self {
            base: DEFAULT_ID_BASE,
            issued: BTreeSet::new(),
        }
    }
}

impl IdAllocation {
    /// Issues a fresh identifier. Identifiers are never reused, even after deletion.
    pub fn allocate(&mut self) -> Result<u64> {
        let next = match self.issued.last() {
            Some(&max) if max >= self.base => max.checked_add(1).ok_or(Error::ExhaustedIdSpace)?,
            _ => self.base,
        };
        self.issued.insert(next);
        Ok(next)
    }

    /// Marks identifiers already in use as issued, so allocation never
    /// lands on them after the issued list was repaired or lost
    pub fn reserve<I: IntoIterator<Item = u64>>(&mut self, in_use: I) -> usize {
        let before = self.issued.len();
        self.issued.extend(in_use);
        self.issued.len() - before
    }

    pub fn is_issued(&self, id: u64) -> bool {
        self.issued.contains(&id)
    }
}

/// Reference from the project to one of its documents
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentRef {
    pub id: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    /// Storage path relative to the project root
    pub path: String,
}

/// Root record of a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Project {
    pub version: u32,
    pub repository: Repository,
    pub contributors: Vec<Contributor>,
    pub max_contributors: u32,
    pub ids: IdAllocation,
    pub documents: Vec<DocumentRef>,
}

impl Default for Project {
    fn default() -> Self {
        Self::new()
    }
}

impl Project {
    pub fn new() -> Self {
        Self {
            version: SCHEMA_VERSION,
            repository: Repository::default(),
            contributors: Vec::new(),
            max_contributors: DEFAULT_MAX_CONTRIBUTORS,
            ids: IdAllocation::default(),
            documents: Vec::new(),
        }
    }

    pub fn document_ref(&self, id: u64) -> Option<&DocumentRef> {
        self.documents.iter().find(|d| d.id == id)
    }

    /// Whether a document of `doc_type` exists in the project
    pub fn has_document_type(&self, doc_type: DocumentType) -> bool {
        self.documents.iter().any(|d| d.doc_type == doc_type)
    }

    /// The set of document types present, used to gate the trace audit
    pub fn document_types(&self) -> BTreeSet<DocumentType> {
        self.documents.iter().map(|d| d.doc_type).collect()
    }

    /// Adds a contributor unless the roster is full or the name is taken
    pub fn add_contributor(&mut self, contributor: Contributor) -> Result<()> {
        if self.contributors.iter().any(|c| c.name == contributor.name) {
            return Err(Error::Refused(format!(
                "Contributor '{}' already exists",
                contributor.name
            )));
        }
        if self.contributors.len() as u32 >= self.max_contributors {
            return Err(Error::Refused(format!(
                "Contributor cap of {} reached",
                self.max_contributors
            )));
        }
        self.contributors.push(contributor);
        Ok(())
    }

    pub fn remove_contributor(&mut self, name: &str) -> bool {
        let before = self.contributors.len();
        self.contributors.retain(|c| c.name != name);
        self.contributors.len() != before
    }
}

/// Whether a release bumped the major or the minor number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    Major,
    Minor,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::Major => "major",
            IssueKind::Minor => "minor",
        }
    }
}

impl std::str::FromStr for IssueKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "major" => Ok(IssueKind::Major),
            "minor" => Ok(IssueKind::Minor),
            _ => Err(format!("Unknown issue kind: {}", s)),
        }
    }
}

impl Serialize for IssueKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One entry of a document revision history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevisionEntry {
    pub day: u32,
    pub month: u32,
    pub year: i32,
    pub major: u32,
    pub minor: u32,
    pub details: Vec<String>,
    pub author: String,
    pub issue: IssueKind,
}

impl RevisionEntry {
    pub fn version(&self) -> (u32, u32) {
        (self.major, self.minor)
    }

    pub fn version_string(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }

    pub fn date_string(&self) -> String {
        format!("{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Which revision history of a document an issue applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionTrack {
    Body,
    TraceReport,
}

/// A typed container of content nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub id: u64,
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    pub name: String,
    pub revisions: Vec<RevisionEntry>,
    pub report_revisions: Vec<RevisionEntry>,
    pub children: Vec<u64>,
}

impl Document {
    pub fn new(id: u64, doc_type: DocumentType, name: String) -> Self {
        Self {
            id,
            doc_type,
            name,
            revisions: Vec::new(),
            report_revisions: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn history(&self, track: RevisionTrack) -> &[RevisionEntry] {
        match track {
            RevisionTrack::Body => &self.revisions,
            RevisionTrack::TraceReport => &self.report_revisions,
        }
    }

    /// Appends a new revision entry to `track`, bumping the last version
    pub fn issue(
        &mut self,
        track: RevisionTrack,
        kind: IssueKind,
        author: String,
        details: Vec<String>,
        date: NaiveDate,
    ) -> RevisionEntry {
        let history = match track {
            RevisionTrack::Body => &mut self.revisions,
            RevisionTrack::TraceReport => &mut self.report_revisions,
        };
        let (major, minor) = history.last().map(|r| r.version()).unwrap_or((0, 0));
        let (major, minor) = match kind {
            IssueKind::Major => (major + 1, 0),
            IssueKind::Minor => (major, minor + 1),
        };
        let entry = RevisionEntry {
            day: date.day(),
            month: date.month(),
            year: date.year(),
            major,
            minor,
            details,
            author,
            issue: kind,
        };
        history.push(entry.clone());
        entry
    }
}

/// True when every entry's (major, minor) is at least its predecessor's
pub fn is_monotonic(history: &[RevisionEntry]) -> bool {
    history.windows(2).all(|w| w[0].version() <= w[1].version())
}

/// Trace partners of a node and the subset flagged suspect
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TraceData {
    pub ids: Vec<u64>,
    pub suspect: Vec<u64>,
}

impl TraceData {
    pub fn contains(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }

    /// Adds a partner; returns false if it was already linked
    pub fn link(&mut self, id: u64) -> bool {
        if self.contains(id) {
            return false;
        }
        self.ids.push(id);
        true
    }

    /// Drops a partner together with its suspect flag
    pub fn unlink(&mut self, id: u64) -> bool {
        let before = self.ids.len();
        self.ids.retain(|t| *t != id);
        self.suspect.retain(|t| *t != id);
        self.ids.len() != before
    }

    pub fn is_suspect(&self, id: u64) -> bool {
        self.suspect.contains(&id)
    }

    /// Flags a linked partner as suspect; unlinked IDs are ignored
    pub fn mark_suspect(&mut self, id: u64) -> bool {
        if !self.contains(id) || self.is_suspect(id) {
            return false;
        }
        self.suspect.push(id);
        true
    }

    pub fn clear_suspect(&mut self, id: u64) -> bool {
        let before = self.suspect.len();
        self.suspect.retain(|t| *t != id);
        self.suspect.len() != before
    }
}

/// Relative path and caption of an image node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImageRef {
    pub path: String,
    pub caption: String,
}

/// The atomic unit of document content
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentNode {
    pub id: u64,
    pub parent: Option<u64>,
    pub category: Category,
    pub text: String,
    pub children: Vec<u64>,
    pub trace: TraceData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_results: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
}

impl ContentNode {
    pub fn new(id: u64, parent: Option<u64>, category: Category, text: String) -> Self {
        let mut node = Self {
            id,
            parent,
            category,
            text,
            children: Vec::new(),
            trace: TraceData::default(),
            rationale: None,
            expected_results: None,
            image: None,
        };
        node.conform_payload();
        node
    }

    /// Makes the payload fields match the category, keeping existing values
    pub fn conform_payload(&mut self) {
        if self.category.has_rationale() {
            self.rationale.get_or_insert_with(String::new);
        } else {
            self.rationale = None;
        }
        if self.category.has_expected_results() {
            self.expected_results.get_or_insert_with(String::new);
        } else {
            self.expected_results = None;
        }
        if self.category.has_image() {
            self.image.get_or_insert_with(ImageRef::default);
        } else {
            self.image = None;
        }
    }

    /// Payload fields present exactly when the category calls for them
    pub fn payload_matches_category(&self) -> bool {
        self.rationale.is_some() == self.category.has_rationale()
            && self.expected_results.is_some() == self.category.has_expected_results()
            && self.image.is_some() == self.category.has_image()
    }

    /// First line of the body, for listings
    pub fn summary(&self) -> &str {
        self.text.lines().next().unwrap_or("")
    }
}
