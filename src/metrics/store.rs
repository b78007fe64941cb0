//! Collaborators consumed by the metric resolver: a document store holding
//! metric records and an artifact store holding binary summary logs.
//!
//! `MemoryRecordStore` and `DirectoryArtifactStore` are simple local
//! implementations for tooling and tests.

use crate::core::{DataError, Result};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

pub type Document = Map<String, Value>;

/// Equality conditions on top-level document fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordQuery {
    conditions: Vec<(String, Value)>,
}

impl RecordQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions.push((field.to_string(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    /// Keys compare by string form: `{"$oid": "..."}` matches its hex string
    /// and numeric ids match their decimal text.
    pub fn matches(&self, document: &Document) -> bool {
        self.conditions.iter().all(|(field, expected)| {
            let Some(actual) = document.get(field) else {
                return false;
            };
            match (key_form(actual), key_form(expected)) {
                (Some(a), Some(b)) => a == b,
                _ => actual == expected,
            }
        })
    }
}

/// String form of a document key, if the value can act as one.
pub fn key_form(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s)),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Object(map) => match map.get("$oid") {
            Some(Value::String(s)) if map.len() == 1 => Some(Cow::Borrowed(s)),
            _ => None,
        },
        _ => None,
    }
}

/// Generic document lookup.
pub trait RecordStore: Send + Sync {
    /// First document in `collection` that matches `query`, if any.
    fn find_record(&self, collection: &str, query: &RecordQuery) -> Result<Option<Document>>;
}

/// Retrieval of binary artifacts by id.
pub trait ArtifactStore: Send + Sync {
    /// Open the artifact's byte stream. Unknown ids fail with `NotFound`.
    fn get_artifact(&self, artifact_id: &str) -> Result<Box<dyn Read + '_>>;
}

impl<T: RecordStore + ?Sized> RecordStore for &T {
    fn find_record(&self, collection: &str, query: &RecordQuery) -> Result<Option<Document>> {
        (**self).find_record(collection, query)
    }
}

impl<T: ArtifactStore + ?Sized> ArtifactStore for &T {
    fn get_artifact(&self, artifact_id: &str) -> Result<Box<dyn Read + '_>> {
        (**self).get_artifact(artifact_id)
    }
}

// ============================================================================
// In-memory record store
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    collections: HashMap<String, Vec<Document>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `{"<collection>": [document, ...], ...}`.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(collections) = value else {
            return Err(DataError::Store("expected an object of collections".to_string()));
        };
        let mut store = Self::new();
        for (name, documents) in collections {
            let Value::Array(documents) = documents else {
                return Err(DataError::Store(format!("collection '{}' is not an array", name)));
            };
            for document in documents {
                store.insert(&name, document)?;
            }
        }
        Ok(store)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| DataError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let value = serde_json::from_slice(&bytes)
            .map_err(|e| DataError::Store(format!("'{}' is not valid JSON: {}", path.display(), e)))?;
        Self::from_value(value)
    }

    pub fn insert(&mut self, collection: &str, document: Value) -> Result<()> {
        let Value::Object(document) = document else {
            return Err(DataError::Store(format!("document in '{}' is not an object", collection)));
        };
        self.collections.entry(collection.to_string()).or_default().push(document);
        Ok(())
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, Vec::len)
    }
}

impl RecordStore for MemoryRecordStore {
    fn find_record(&self, collection: &str, query: &RecordQuery) -> Result<Option<Document>> {
        Ok(self
            .collections
            .get(collection)
            .and_then(|documents| documents.iter().find(|doc| query.matches(doc)))
            .cloned())
    }
}

// ============================================================================
// Directory artifact store
// ============================================================================

/// Artifacts stored as files named by their id under one directory.
#[derive(Debug, Clone)]
pub struct DirectoryArtifactStore {
    dir: PathBuf,
}

impl DirectoryArtifactStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ArtifactStore for DirectoryArtifactStore {
    fn get_artifact(&self, artifact_id: &str) -> Result<Box<dyn Read + '_>> {
        let not_found = || DataError::NotFound(format!("Artifact '{}'", artifact_id));
        if artifact_id.is_empty()
            || artifact_id == "."
            || artifact_id == ".."
            || artifact_id.contains(['/', '\\'])
        {
            return Err(not_found());
        }

        let path = self.dir.join(artifact_id);
        match File::open(&path) {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(not_found()),
            Err(source) => Err(DataError::Io { path, source }),
        }
    }
}
