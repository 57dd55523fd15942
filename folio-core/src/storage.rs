use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

use crate::types::{Document, DocumentId};

/// Persistence sink for completed documents. A document is handed over as
/// one complete graph (chapters and images included) and written whole.
pub trait DocumentStorage: Send + Sync {
    fn store_document(&self, document: &Document) -> Result<()>;
    fn get_document(&self, id: &str) -> Result<Option<Document>>;
    fn list_documents(&self) -> Result<Vec<DocumentId>>;
    /// Removes the document and the images it owns. Returns whether it existed.
    fn delete_document(&self, id: &str) -> Result<bool>;
    fn clear(&self) -> Result<()>;
}

/// In-process storage, mostly for tests and one-shot CLI runs.
#[derive(Default)]
pub struct InMemoryStorage {
    documents: RwLock<BTreeMap<DocumentId, Document>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStorage for InMemoryStorage {
    fn store_document(&self, document: &Document) -> Result<()> {
        self.documents
            .write()
            .map_err(|_| anyhow!("document store lock poisoned"))?
            .insert(document.id.clone(), document.clone());
        Ok(())
    }

    fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self
            .documents
            .read()
            .map_err(|_| anyhow!("document store lock poisoned"))?
            .get(id)
            .cloned())
    }

    fn list_documents(&self) -> Result<Vec<DocumentId>> {
        Ok(self
            .documents
            .read()
            .map_err(|_| anyhow!("document store lock poisoned"))?
            .keys()
            .cloned()
            .collect())
    }

    fn delete_document(&self, id: &str) -> Result<bool> {
        Ok(self
            .documents
            .write()
            .map_err(|_| anyhow!("document store lock poisoned"))?
            .remove(id)
            .is_some())
    }

    fn clear(&self) -> Result<()> {
        self.documents
            .write()
            .map_err(|_| anyhow!("document store lock poisoned"))?
            .clear();
        Ok(())
    }
}

/// File-based storage: one JSON file per document under `<dir>/documents`.
pub struct FileStorage {
    storage_dir: PathBuf,
}

impl FileStorage {
    pub fn new(storage_dir: &str) -> Result<Self> {
        let storage_dir = PathBuf::from(storage_dir);
        fs::create_dir_all(storage_dir.join("documents"))?;
        Ok(Self { storage_dir })
    }

    fn document_path(&self, id: &str) -> PathBuf {
        self.storage_dir.join("documents").join(format!("{id}.json"))
    }

    fn valid_id(id: &str) -> Result<()> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(anyhow!("Invalid document id: {:?}", id));
        }
        Ok(())
    }
}

impl DocumentStorage for FileStorage {
    /// Writes to a temporary sibling and renames it into place, so readers
    /// see either the previous file or the complete new one.
    fn store_document(&self, document: &Document) -> Result<()> {
        Self::valid_id(&document.id)?;
        let path = self.document_path(&document.id);
        let tmp = path.with_extension("json.tmp");

        let json_str = serde_json::to_string_pretty(document)
            .map_err(|e| anyhow!("Failed to serialize document {}: {}", document.id, e))?;
        fs::write(&tmp, json_str)?;
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            anyhow!("Failed to move document {} into place: {}", document.id, e)
        })?;
        debug!("Stored document {} at {}", document.id, path.display());
        Ok(())
    }

    fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Self::valid_id(id)?;
        let path = self.document_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let json_str = fs::read_to_string(&path)?;
        let document: Document = serde_json::from_str(&json_str)
            .map_err(|e| anyhow!("Failed to deserialize stored document {}: {}", id, e))?;
        Ok(Some(document))
    }

    fn list_documents(&self) -> Result<Vec<DocumentId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.storage_dir.join("documents"))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn delete_document(&self, id: &str) -> Result<bool> {
        Self::valid_id(id)?;
        let path = self.document_path(id);
        if !Path::new(&path).exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }

    fn clear(&self) -> Result<()> {
        for id in self.list_documents()? {
            self.delete_document(&id)?;
        }
        Ok(())
    }
}

/// Storage that drops everything; processing results stay in the registry.
pub struct NoOpStorage;

impl DocumentStorage for NoOpStorage {
    fn store_document(&self, _document: &Document) -> Result<()> {
        Ok(())
    }

    fn get_document(&self, _id: &str) -> Result<Option<Document>> {
        Ok(None)
    }

    fn list_documents(&self) -> Result<Vec<DocumentId>> {
        Ok(Vec::new())
    }

    fn delete_document(&self, _id: &str) -> Result<bool> {
        Ok(false)
    }

    fn clear(&self) -> Result<()> {
        Ok(())
    }
}

/// Hex SHA-256 of the whole source file.
pub fn calculate_source_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hash of any serializable configuration, for tracing results back to it.
pub fn calculate_config_hash<T: serde::Serialize>(config: &T) -> Result<String> {
    let config_json = serde_json::to_string(config)
        .map_err(|e| anyhow!("Failed to serialize config for hashing: {}", e))?;

    let mut hasher = Sha256::new();
    hasher.update(config_json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::test_support::sample_document;

    #[test]
    fn test_file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().to_str().unwrap()).unwrap();
        let doc = sample_document();

        storage.store_document(&doc).unwrap();
        assert_eq!(storage.list_documents().unwrap(), vec![doc.id.clone()]);

        let loaded = storage.get_document(&doc.id).unwrap().unwrap();
        assert_eq!(loaded.chapters, doc.chapters);
        assert_eq!(loaded.title, doc.title);

        // no temp file left behind
        let leftovers = fs::read_dir(dir.path().join("documents"))
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .path()
                    .to_string_lossy()
                    .ends_with(".tmp")
            })
            .count();
        assert_eq!(leftovers, 0);

        assert!(storage.delete_document(&doc.id).unwrap());
        assert!(!storage.delete_document(&doc.id).unwrap());
        assert!(storage.get_document(&doc.id).unwrap().is_none());
    }

    #[test]
    fn test_file_storage_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().to_str().unwrap()).unwrap();
        assert!(storage.get_document("../etc/passwd").is_err());
    }

    #[test]
    fn test_in_memory_storage() {
        let storage = InMemoryStorage::new();
        let doc = sample_document();
        storage.store_document(&doc).unwrap();
        assert!(storage.get_document(&doc.id).unwrap().is_some());
        storage.clear().unwrap();
        assert!(storage.list_documents().unwrap().is_empty());
    }

    #[test]
    fn test_hashes_are_stable() {
        assert_eq!(
            calculate_source_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        let a = calculate_config_hash(&crate::config::IngestConfig::default()).unwrap();
        let b = calculate_config_hash(&crate::config::IngestConfig::default()).unwrap();
        assert_eq!(a, b);
    }
}
