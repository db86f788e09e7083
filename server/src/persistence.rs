//! Persistence adapter for the world documents
//!
//! The world is stored as independent JSON object documents that are read
//! once at startup and rewritten in full after every successful mutation.
//! The `Persistence` trait is the seam; `JsonFilePersistence` is the
//! on-disk adapter and `MemoryPersistence` keeps everything in process.

use crate::error::PersistenceError;
use log::debug;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A whole persisted document: a JSON object keyed by username or clan name
pub type Document = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Accounts,
    Characters,
    Clans,
    CharacterDefaults,
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DocumentKind::Accounts => "accounts",
            DocumentKind::Characters => "characters",
            DocumentKind::Clans => "clans",
            DocumentKind::CharacterDefaults => "character defaults",
        };
        f.write_str(name)
    }
}

pub trait Persistence: Send + Sync {
    /// Loads a document; an absent or empty document is an empty map
    fn load(&self, kind: DocumentKind) -> Result<Document, PersistenceError>;

    fn save(&self, kind: DocumentKind, document: &Document) -> Result<(), PersistenceError>;
}

/// File locations of every persisted document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub accounts: PathBuf,
    pub characters: PathBuf,
    pub clans: PathBuf,
    pub character_defaults: PathBuf,
}

impl Default for DataPaths {
    fn default() -> Self {
        Self {
            accounts: PathBuf::from("user_data.json"),
            characters: PathBuf::from("player_data.json"),
            clans: PathBuf::from("clan_data.json"),
            character_defaults: PathBuf::from("character_defaults.json"),
        }
    }
}

impl DataPaths {
    /// All documents under one directory, using the default file names
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let defaults = Self::default();
        Self {
            accounts: dir.join(defaults.accounts),
            characters: dir.join(defaults.characters),
            clans: dir.join(defaults.clans),
            character_defaults: dir.join(defaults.character_defaults),
        }
    }

    pub fn path(&self, kind: DocumentKind) -> &Path {
        match kind {
            DocumentKind::Accounts => &self.accounts,
            DocumentKind::Characters => &self.characters,
            DocumentKind::Clans => &self.clans,
            DocumentKind::CharacterDefaults => &self.character_defaults,
        }
    }
}

/// Stores each document as a pretty-printed JSON file
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    paths: DataPaths,
}

impl JsonFilePersistence {
    pub fn new(paths: DataPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &DataPaths {
        &self.paths
    }
}

impl Persistence for JsonFilePersistence {
    fn load(&self, kind: DocumentKind) -> Result<Document, PersistenceError> {
        let path = self.paths.path(kind);
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No {} document at {}, starting empty", kind, path.display());
                return Ok(Document::new());
            }
            Err(source) => return Err(PersistenceError::Io { kind, source }),
        };

        if content.trim().is_empty() {
            return Ok(Document::new());
        }

        serde_json::from_str(&content).map_err(|source| PersistenceError::Format { kind, source })
    }

    fn save(&self, kind: DocumentKind, document: &Document) -> Result<(), PersistenceError> {
        let path = self.paths.path(kind);
        let bytes = to_pretty_json(document).map_err(|source| PersistenceError::Format { kind, source })?;

        // Write beside the target and rename so readers never see a torn file
        let tmp_path = path.with_extension("json.tmp");
        let write = || -> io::Result<()> {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp_path, path)
        };

        write().map_err(|source| PersistenceError::Io { kind, source })
    }
}

/// JSON with four-space indentation, matching the existing data files
fn to_pretty_json(document: &Document) -> Result<Vec<u8>, serde_json::Error> {
    use serde::Serialize;

    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    document.serialize(&mut serializer)?;
    Ok(out)
}

/// Keeps documents in memory; saves can be made to fail per document kind
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    documents: Mutex<HashMap<DocumentKind, Document>>,
    failing: Mutex<HashSet<DocumentKind>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(self, kind: DocumentKind, document: Document) -> Self {
        if let Ok(mut documents) = self.documents.lock() {
            documents.insert(kind, document);
        }
        self
    }

    /// Makes every subsequent save of `kind` fail until cleared
    pub fn fail_saves(&self, kind: DocumentKind, fail: bool) {
        if let Ok(mut failing) = self.failing.lock() {
            if fail {
                failing.insert(kind);
            } else {
                failing.remove(&kind);
            }
        }
    }

    pub fn document(&self, kind: DocumentKind) -> Option<Document> {
        self.documents
            .lock()
            .ok()
            .and_then(|documents| documents.get(&kind).cloned())
    }
}

impl Persistence for MemoryPersistence {
    fn load(&self, kind: DocumentKind) -> Result<Document, PersistenceError> {
        Ok(self.document(kind).unwrap_or_default())
    }

    fn save(&self, kind: DocumentKind, document: &Document) -> Result<(), PersistenceError> {
        let rejected = self
            .failing
            .lock()
            .map(|failing| failing.contains(&kind))
            .unwrap_or(true);
        if rejected {
            return Err(PersistenceError::Rejected(kind));
        }

        let mut documents = self
            .documents
            .lock()
            .map_err(|_| PersistenceError::Rejected(kind))?;
        documents.insert(kind, document.clone());
        Ok(())
    }
}
