use fs2::FileExt;
use serde_yaml::Value;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::journal::{JournalEntry, JournalOp, Transaction};
use crate::models::{ContentNode, Document, Project};
use crate::store::{parse_text, ParseMode, Record};

/// Project record file name, relative to the project root
pub const PROJECT_FILE: &str = "reqtrace.yaml";
/// Directory holding one record per content node
pub const NODES_DIR: &str = "nodes";
/// Directory holding one record per document
pub const DOCUMENTS_DIR: &str = "documents";

const JOURNAL_FILE: &str = ".reqtrace.journal";
const LOCK_FILE: &str = ".reqtrace.lock";
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Exclusive hold on the project; released on drop
pub struct ProjectLock {
    _file: File,
}

/// Record-level file storage for one project directory
///
/// Every record lives in its own YAML file. Multi-record writes go through
/// [`Storage::commit`], which journals them before applying.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
    mode: ParseMode,
}

impl Storage {
    /// Creates a new Storage for the given project root
    pub fn new<P: AsRef<Path>>(root: P, mode: ParseMode) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            mode,
        }
    }

    /// Opens a project directory, rolling forward any interrupted commit
    pub fn open<P: AsRef<Path>>(root: P, mode: ParseMode) -> Result<Self> {
        let storage = Self::new(root, mode);
        storage.replay_journal()?;
        Ok(storage)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mode(&self) -> ParseMode {
        self.mode
    }

    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn project_path(&self) -> PathBuf {
        self.resolve(PROJECT_FILE)
    }

    pub fn project_exists(&self) -> bool {
        self.project_path().exists()
    }

    /// Relative storage path of a node record
    pub fn node_file(id: u64) -> String {
        format!("{}/{}.yaml", NODES_DIR, id)
    }

    /// Default relative storage path of a document record
    pub fn document_file(id: u64) -> String {
        format!("{}/{}.yaml", DOCUMENTS_DIR, id)
    }

    pub fn node_exists(&self, id: u64) -> bool {
        self.resolve(&Self::node_file(id)).exists()
    }

    /// Reads a file as a raw YAML value, `None` if it does not exist
    pub fn read_raw(&self, relative: &str) -> Result<Option<Value>> {
        let path = self.resolve(relative);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        match serde_yaml::from_str(&text) {
            Ok(value) => Ok(Some(value)),
            Err(e) if self.mode == ParseMode::Strict => Err(Error::Yaml(e)),
            Err(e) => {
                log::warn!("{}: unparseable YAML ({}), repairing", path.display(), e);
                Ok(Some(Value::Null))
            }
        }
    }

    fn load_record<R: Record>(&self, relative: &str) -> Result<Option<R>> {
        let path = self.resolve(relative);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        parse_text(&text, self.mode)
            .map(Some)
            .map_err(|source| Error::MalformedRecord { path, source })
    }

    /// Loads the project record
    pub fn load_project(&self) -> Result<Project> {
        self.load_record(PROJECT_FILE)?
            .ok_or_else(|| Error::NotFound(format!("project at {}", self.root.display())))
    }

    /// Loads one node record in isolation, `None` if it does not exist
    pub fn load_node(&self, id: u64) -> Result<Option<ContentNode>> {
        let node: Option<ContentNode> = self.load_record(&Self::node_file(id))?;
        match node {
            Some(mut node) if node.id != id => {
                if self.mode == ParseMode::Strict {
                    return Err(Error::MalformedRecord {
                        path: self.resolve(&Self::node_file(id)),
                        source: crate::store::Invalid::new(
                            "id",
                            format!("record id {} stored under {}", node.id, id),
                        ),
                    });
                }
                log::warn!("Node file {} carries id {}, using {}", id, node.id, id);
                node.id = id;
                Ok(Some(node))
            }
            other => Ok(other),
        }
    }

    /// Loads a document record from its storage path
    pub fn load_document(&self, relative: &str) -> Result<Option<Document>> {
        self.load_record(relative)
    }

    /// Identifiers of every node record on disk
    pub fn list_node_ids(&self) -> Result<Vec<u64>> {
        let dir = self.resolve(NODES_DIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Acquire an exclusive lock on the project for writing
    pub fn lock(&self) -> Result<ProjectLock> {
        fs::create_dir_all(&self.root)?;
        let lock_path = self.resolve(LOCK_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lock_path)?;

        let start = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if start.elapsed() > LOCK_TIMEOUT {
                        return Err(Error::Locked(lock_path));
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }

        // Lock holder info, for debugging stale locks
        let _ = writeln!(file, "Locked by PID {}", std::process::id());
        Ok(ProjectLock { _file: file })
    }

    /// Commits a transaction; the caller must hold the project lock
    pub fn commit_locked(&self, _lock: &ProjectLock, tx: Transaction) -> Result<()> {
        if tx.is_empty() {
            return Ok(());
        }
        let entry = tx.into_entry(Self::node_file)?;
        let journal = self.resolve(JOURNAL_FILE);
        write_atomically(&journal, serde_yaml::to_string(&entry)?.as_bytes())?;
        self.apply(&entry)?;
        remove_journal(&journal)?;
        log::debug!("Committed {} record operation(s)", entry.ops.len());
        Ok(())
    }

    /// Locks, commits and unlocks
    pub fn commit(&self, tx: Transaction) -> Result<()> {
        let lock = self.lock()?;
        self.commit_locked(&lock, tx)
    }

    fn apply(&self, entry: &JournalEntry) -> Result<()> {
        for op in &entry.ops {
            let path = self.resolve(op.path());
            match op {
                JournalOp::Put { record, .. } => {
                    let text = serde_yaml::to_string(record)?;
                    write_atomically(&path, text.as_bytes())?;
                }
                JournalOp::Remove { .. } => match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(Error::Io(e)),
                },
            }
        }
        Ok(())
    }

    /// Re-applies a journal left behind by an interrupted commit. Holds the
    /// project lock so a live writer's journal is never applied twice.
    fn replay_journal(&self) -> Result<bool> {
        let journal = self.resolve(JOURNAL_FILE);
        if !journal.exists() {
            return Ok(false);
        }
        let _lock = self.lock()?;
        // The writer may have finished while we waited
        let text = match fs::read_to_string(&journal) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(Error::Io(e)),
        };
        match serde_yaml::from_str::<JournalEntry>(&text) {
            Ok(entry) => {
                log::warn!(
                    "Replaying interrupted commit ({} operations) in {}",
                    entry.ops.len(),
                    self.root.display()
                );
                self.apply(&entry)?;
            }
            Err(e) => {
                // The journal is renamed into place whole, so this is not a torn write
                log::warn!("Discarding unreadable journal {}: {}", journal.display(), e);
            }
        }
        remove_journal(&journal)?;
        Ok(true)
    }
}

fn remove_journal(journal: &Path) -> Result<()> {
    match fs::remove_file(journal) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Writes via a temporary sibling file and rename
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;
    use tempfile::TempDir;

    #[test]
    fn test_commit_and_load_node() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path(), ParseMode::Strict);

        let mut tx = Transaction::new();
        tx.put_node(ContentNode::new(3, None, Category::Heading, "Scope".into()));
        tx.put_project(Project::new());
        storage.commit(tx).unwrap();

        let node = storage.load_node(3).unwrap().unwrap();
        assert_eq!(node.text, "Scope");
        assert!(storage.load_node(4).unwrap().is_none());
        assert_eq!(storage.list_node_ids().unwrap(), vec![3]);
        assert!(storage.project_exists());
        assert!(!temp_dir.path().join(JOURNAL_FILE).exists());
    }

    #[test]
    fn test_open_replays_interrupted_commit() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path(), ParseMode::Strict);

        let mut tx = Transaction::new();
        tx.put_node(ContentNode::new(8, None, Category::Comment, "note".into()));
        let entry = tx.into_entry(Storage::node_file).unwrap();
        fs::write(
            temp_dir.path().join(JOURNAL_FILE),
            serde_yaml::to_string(&entry).unwrap(),
        )
        .unwrap();

        let reopened = Storage::open(temp_dir.path(), ParseMode::Strict).unwrap();
        assert_eq!(reopened.load_node(8).unwrap().unwrap().text, "note");
        assert!(!temp_dir.path().join(JOURNAL_FILE).exists());
        drop(storage);
    }

    #[test]
    fn test_replay_waits_for_the_writer_lock() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::new(temp_dir.path(), ParseMode::Strict);

        let mut tx = Transaction::new();
        tx.put_node(ContentNode::new(9, None, Category::Comment, "pending".into()));
        let entry = tx.into_entry(Storage::node_file).unwrap();
        let journal = temp_dir.path().join(JOURNAL_FILE);

        // A writer holds the lock with its journal on disk
        let lock = storage.lock().unwrap();
        fs::write(&journal, serde_yaml::to_string(&entry).unwrap()).unwrap();

        let root = temp_dir.path().to_path_buf();
        let opener = std::thread::spawn(move || Storage::open(root, ParseMode::Strict));
        std::thread::sleep(Duration::from_millis(300));
        assert!(storage.load_node(9).unwrap().is_none());

        // The writer finishes its own commit and releases the lock
        storage.apply(&entry).unwrap();
        remove_journal(&journal).unwrap();
        drop(lock);

        let reopened = opener.join().unwrap().unwrap();
        assert_eq!(reopened.load_node(9).unwrap().unwrap().text, "pending");
        assert!(!journal.exists());
    }

    #[test]
    fn test_missing_journal_is_not_an_error() {
        let temp_dir = TempDir::new().unwrap();
        remove_journal(&temp_dir.path().join(JOURNAL_FILE)).unwrap();
    }

    #[test]
    fn test_strict_surfaces_malformed_record() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join(NODES_DIR)).unwrap();
        fs::write(temp_dir.path().join("nodes/5.yaml"), "id: 5\ncategory: bogus\n").unwrap();

        let strict = Storage::new(temp_dir.path(), ParseMode::Strict);
        assert!(matches!(
            strict.load_node(5),
            Err(Error::MalformedRecord { .. })
        ));

        let fix = Storage::new(temp_dir.path(), ParseMode::Fix);
        let node = fix.load_node(5).unwrap().unwrap();
        assert_eq!(node.category, Category::Comment);
    }

    #[test]
    fn test_fix_mode_trusts_file_name_for_id() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join(NODES_DIR)).unwrap();
        fs::write(temp_dir.path().join("nodes/6.yaml"), "category: heading\n").unwrap();

        let fix = Storage::new(temp_dir.path(), ParseMode::Fix);
        assert_eq!(fix.load_node(6).unwrap().unwrap().id, 6);
    }
}
