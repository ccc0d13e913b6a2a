use std::path::{Path, PathBuf};
use std::sync::Mutex;

use campuschat_core::api::ConversationSummary;
use campuschat_core::types::SessionId;
use serde::{Deserialize, Serialize};

use crate::fsutil::{read_json, write_json_atomic};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ConversationCache {
    #[serde(default)]
    summaries: Vec<ConversationSummary>,
    #[serde(default)]
    active: Option<SessionId>,
}

/// Local copy of the conversation list and the one the user has open.
/// May be stale until the next fetch; every change is written through.
#[derive(Debug)]
pub struct ConversationStore {
    path: PathBuf,
    cache: Mutex<ConversationCache>,
}

impl ConversationStore {
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

    pub fn summaries(&self) -> Vec<ConversationSummary> {
        self.read(|c| c.summaries.clone())
    }

    pub fn active(&self) -> Option<SessionId> {
        self.read(|c| c.active.clone())
    }

    pub fn replace_summaries(&self, summaries: Vec<ConversationSummary>) -> anyhow::Result<()> {
        self.update(|c| c.summaries = summaries)
    }

    pub fn set_active(&self, id: Option<SessionId>) -> anyhow::Result<()> {
        self.update(|c| c.active = id)
    }

    /// Drops one conversation; clears the active id if it pointed there.
    pub fn remove(&self, id: &SessionId) -> anyhow::Result<()> {
        self.update(|c| {
            c.summaries.retain(|s| &s.session_id != id);
            if c.active.as_ref() == Some(id) {
                c.active = None;
            }
        })
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        self.update(|c| *c = ConversationCache::default())
    }

    fn read<T>(&self, f: impl FnOnce(&ConversationCache) -> T) -> T {
        match self.cache.lock() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn update(&self, f: impl FnOnce(&mut ConversationCache)) -> anyhow::Result<()> {
        let snapshot = {
            let mut guard = self
                .cache
                .lock()
                .map_err(|_| anyhow::anyhow!("conversation cache poisoned"))?;
            f(&mut guard);
            guard.clone()
        };
        write_json_atomic(&self.path, &snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: &str) -> ConversationSummary {
        serde_json::from_value(serde_json::json!({"session_id": id, "message_count": 2})).unwrap()
    }

    #[test]
    fn persists_and_rehydrates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversations.json");
        let store = ConversationStore::open(&path).unwrap();
        store.replace_summaries(vec![summary("a"), summary("b")]).unwrap();
        store.set_active(Some(SessionId::new("b"))).unwrap();

        let reopened = ConversationStore::open(&path).unwrap();
        assert_eq!(reopened.summaries().len(), 2);
        assert_eq!(reopened.active(), Some(SessionId::new("b")));
    }

    #[test]
    fn removing_active_conversation_clears_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::open(dir.path().join("c.json")).unwrap();
        store.replace_summaries(vec![summary("a"), summary("b")]).unwrap();
        store.set_active(Some(SessionId::new("a"))).unwrap();

        store.remove(&SessionId::new("a")).unwrap();
        assert_eq!(store.active(), None);
        assert_eq!(store.summaries().len(), 1);
        assert_eq!(store.summaries()[0].session_id.as_str(), "b");
    }
}
