use std::path::{Path, PathBuf};
use std::sync::Mutex;

use campuschat_core::api::{DocumentInfo, UploadProgress, UploadSession};
use serde::{Deserialize, Serialize};

use crate::fsutil::{read_json, write_json_atomic};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct DocumentCache {
    #[serde(default)]
    documents: Vec<DocumentInfo>,
    #[serde(default)]
    uploads: Vec<UploadSession>,
}

/// Cached document list and upload sessions. Only successful server calls
/// modify it, so a failed delete leaves the cache as it was.
#[derive(Debug)]
pub struct DocumentStore {
    path: PathBuf,
    cache: Mutex<DocumentCache>,
}

impl DocumentStore {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let cache = read_json(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            cache: Mutex::new(cache),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn documents(&self) -> Vec<DocumentInfo> {
        self.read(|c| c.documents.clone())
    }

    pub fn upload_sessions(&self) -> Vec<UploadSession> {
        self.read(|c| c.uploads.clone())
    }

    pub fn replace_documents(&self, documents: Vec<DocumentInfo>) -> anyhow::Result<()> {
        self.update(|c| c.documents = documents)
    }

    pub fn upsert_document(&self, doc: DocumentInfo) -> anyhow::Result<()> {
        self.update(|c| match c.documents.iter_mut().find(|d| d.id == doc.id) {
            Some(slot) => *slot = doc,
            None => c.documents.push(doc),
        })
    }

    pub fn remove_document(&self, id: &str) -> anyhow::Result<()> {
        self.update(|c| c.documents.retain(|d| d.id != id))
    }

    pub fn replace_upload_sessions(&self, uploads: Vec<UploadSession>) -> anyhow::Result<()> {
        self.update(|c| c.uploads = uploads)
    }

    /// Records the latest progress for an upload, adding it if unseen.
    pub fn record_progress(
        &self,
        upload_id: &str,
        filename: Option<&str>,
        progress: &UploadProgress,
    ) -> anyhow::Result<()> {
        self.update(|c| {
            let idx = match c.uploads.iter().position(|u| u.upload_id == upload_id) {
                Some(i) => i,
                None => {
                    c.uploads.push(UploadSession {
                        upload_id: upload_id.to_string(),
                        filename: filename.map(str::to_string),
                        status: None,
                        progress: None,
                        chunk_count: None,
                        error: None,
                    });
                    c.uploads.len() - 1
                }
            };
            let slot = &mut c.uploads[idx];
            slot.status = Some(progress.status.clone());
            slot.progress = Some(progress.progress);
            slot.chunk_count = progress.chunk_count.or(slot.chunk_count);
            slot.error = progress.error.clone();
        })
    }

    fn read<T>(&self, f: impl FnOnce(&DocumentCache) -> T) -> T {
        match self.cache.lock() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn update(&self, f: impl FnOnce(&mut DocumentCache)) -> anyhow::Result<()> {
        let snapshot = {
            let mut guard = self
                .cache
                .lock()
                .map_err(|_| anyhow::anyhow!("document cache poisoned"))?;
            f(&mut guard);
            guard.clone()
        };
        write_json_atomic(&self.path, &snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, name: &str) -> DocumentInfo {
        serde_json::from_value(serde_json::json!({"id": id, "filename": name})).unwrap()
    }

    #[test]
    fn upsert_replaces_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::open(dir.path().join("documents.json")).unwrap();
        store.replace_documents(vec![doc("1", "a.pdf")]).unwrap();
        store.upsert_document(doc("1", "a-v2.pdf")).unwrap();
        store.upsert_document(doc("2", "b.pdf")).unwrap();

        let docs = store.documents();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].filename, "a-v2.pdf");
    }

    #[test]
    fn progress_creates_then_updates_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("documents.json");
        let store = DocumentStore::open(&path).unwrap();

        let p: UploadProgress =
            serde_json::from_value(serde_json::json!({"status": "processing", "progress": 40.0}))
                .unwrap();
        store.record_progress("u1", Some("notes.pdf"), &p).unwrap();
        let p: UploadProgress = serde_json::from_value(
            serde_json::json!({"status": "completed", "progress": 100.0, "chunk_count": 12}),
        )
        .unwrap();
        store.record_progress("u1", None, &p).unwrap();

        let reopened = DocumentStore::open(&path).unwrap();
        let uploads = reopened.upload_sessions();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].filename.as_deref(), Some("notes.pdf"));
        assert_eq!(uploads[0].status.as_deref(), Some("completed"));
        assert_eq!(uploads[0].chunk_count, Some(12));
    }
}
