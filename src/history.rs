//!
//! src/history.rs
//!
//! Deduplicated, insertion-ordered record of tracks the user asked to play.
//! Every mutation writes the whole snapshot back under one key before the
//! call returns. A failed write is logged and memory stays authoritative.
//!

use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::DeckError;
use crate::storage::KeyValueStore;
use crate::types::{Track, TrackId, TrackSort};

pub struct PlayHistory {
    store: Arc<dyn KeyValueStore>,
    key: String,
    tracks: Vec<Track>
}

impl PlayHistory {
    /// Absent key, unreadable store or a corrupt snapshot all load as empty
    pub async fn load(store: Arc<dyn KeyValueStore>, key: &str) -> Self {
        let tracks = match store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<Track>>(&raw) {
                Ok(tracks) => dedup(tracks),
                Err(e) => {
                    warn!(key, error = %e, "history.load.corrupt");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(key, error = %e, "history.load.failed");
                Vec::new()
            }
        };
        debug!(key, count = tracks.len(), "history.loaded");
        Self { store, key: key.to_string(), tracks }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn sorted(&self, sort: TrackSort) -> Vec<&Track> {
        sort.apply(self.tracks.iter().collect())
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn contains(&self, id: &TrackId) -> bool {
        self.tracks.iter().any(|t| &t.id == id)
    }

    /// Returns false when the id was already present
    pub async fn add(&mut self, track: &Track) -> bool {
        if self.contains(&track.id) {
            return false;
        }
        self.tracks.push(track.clone());
        self.persist().await;
        true
    }

    /// Returns false when nothing matched
    pub async fn remove(&mut self, id: &TrackId) -> bool {
        let before = self.tracks.len();
        self.tracks.retain(|t| &t.id != id);
        if self.tracks.len() == before {
            return false;
        }
        self.persist().await;
        true
    }

    pub async fn clear(&mut self) {
        self.tracks.clear();
        if let Err(e) = self.store.delete(&self.key).await {
            warn!(key = %self.key, error = %e, "history.clear.storage");
        }
    }

    async fn persist(&self) {
        if let Err(e) = self.write_snapshot().await {
            warn!(key = %self.key, error = %e, "history.persist.storage");
        }
    }

    async fn write_snapshot(&self) -> Result<(), DeckError> {
        let raw = serde_json::to_string(&self.tracks)?;
        self.store.set(&self.key, &raw).await
    }
}

fn dedup(tracks: Vec<Track>) -> Vec<Track> {
    let mut out: Vec<Track> = Vec::with_capacity(tracks.len());
    for t in tracks {
        if !out.iter().any(|o| o.id == t.id) {
            out.push(t);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::storage::MemoryStore;

    fn track(id: &str) -> Track {
        Track {
            id: TrackId(id.to_string()),
            name: format!("track {id}"),
            duration_ms: 1000,
            preview_url: None,
            popularity: None,
            album: None,
            artists: vec!["IU".to_string()],
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl KeyValueStore for BrokenStore {
        async fn get(&self, _: &str) -> Result<Option<String>, DeckError> {
            Err(DeckError::Storage("offline".into()))
        }
        async fn set(&self, _: &str, _: &str) -> Result<(), DeckError> {
            Err(DeckError::Storage("offline".into()))
        }
        async fn delete(&self, _: &str) -> Result<(), DeckError> {
            Err(DeckError::Storage("offline".into()))
        }
    }

    #[tokio::test]
    async fn add_is_idempotent_and_persisted() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::default());
        let mut history = PlayHistory::load(store.clone(), "playedTracks").await;
        assert!(history.is_empty());

        assert!(history.add(&track("a")).await);
        assert!(!history.add(&track("a")).await);
        assert!(history.add(&track("b")).await);

        let reloaded = PlayHistory::load(store, "playedTracks").await;
        let ids: Vec<_> = reloaded.tracks().iter().map(|t| t.id.0.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[tokio::test]
    async fn remove_and_clear_reach_storage() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::default());
        let mut history = PlayHistory::load(store.clone(), "playedTracks").await;
        history.add(&track("a")).await;
        history.add(&track("b")).await;

        assert!(history.remove(&TrackId("a".into())).await);
        assert!(!history.remove(&TrackId("zzz".into())).await);
        assert_eq!(PlayHistory::load(store.clone(), "playedTracks").await.len(), 1);

        history.clear().await;
        assert!(history.is_empty());
        assert_eq!(store.get("playedTracks").await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_snapshot_loads_empty() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::default());
        store.set("playedTracks", "{not json").await.unwrap();
        assert!(PlayHistory::load(store, "playedTracks").await.is_empty());
    }

    #[tokio::test]
    async fn storage_failure_keeps_memory_authoritative() {
        let mut history = PlayHistory::load(Arc::new(BrokenStore), "playedTracks").await;
        assert!(history.add(&track("a")).await);
        assert!(history.contains(&TrackId("a".into())));
        history.clear().await;
        assert!(history.is_empty());
    }
}
