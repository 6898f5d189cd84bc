use std::sync::Arc;
use std::time::Duration;

use preview_deck::DeckError;
use preview_deck::audio::ClockBackend;
use preview_deck::config::PlaybackConfig;
use preview_deck::history::PlayHistory;
use preview_deck::session::{PlaybackState, SessionManager};
use preview_deck::storage::{DiskStore, KeyValueStore, MemoryStore};
use preview_deck::testing::{silent_track, track};

const KEY: &str = "playedTracks";

async fn session_over(store: Arc<dyn KeyValueStore>, media: Duration) -> SessionManager<ClockBackend> {
    let history = PlayHistory::load(store, KEY).await;
    let backend = ClockBackend::new(media, Duration::from_millis(250));
    SessionManager::new(backend, PlaybackConfig::default(), history)
}

#[tokio::test(start_paused = true)]
async fn same_track_twice_is_one_history_entry() {
    let mut session = session_over(Arc::new(MemoryStore::default()), Duration::from_secs(30)).await;
    let t = track("a");

    session.request_play(&t).await.unwrap();
    session.request_play(&t).await.unwrap();

    assert_eq!(session.history().len(), 1);
    assert_eq!(session.backend().live_handles(), 1);
}

#[tokio::test(start_paused = true)]
async fn only_the_latest_request_holds_a_handle() {
    let mut session = session_over(Arc::new(MemoryStore::default()), Duration::from_secs(30)).await;

    session.request_play(&track("a")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    session.request_play(&track("b")).await.unwrap();

    assert_eq!(session.backend().live_handles(), 1);
    let snap = session.snapshot();
    assert!(snap.playing);
    assert_eq!(snap.current.unwrap().id.0, "b");
    assert_eq!(session.history().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn cap_forces_loaded_paused_on_long_media() {
    let mut session = session_over(Arc::new(MemoryStore::default()), Duration::from_secs(120)).await;
    let progress = session.progress();

    session.request_play(&track("a")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(29)).await;
    assert!(session.snapshot().playing);
    assert!(*progress.borrow() > 0.9);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let snap = session.snapshot();
    assert_eq!(snap.state, PlaybackState::LoadedPaused);
    assert!(!snap.playing);
    assert_eq!(*progress.borrow(), 0.0);
    assert_eq!(snap.current.unwrap().id.0, "a");
}

#[tokio::test(start_paused = true)]
async fn missing_preview_is_signalled_but_recorded() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::default());
    let mut session = session_over(store.clone(), Duration::from_secs(30)).await;
    let silent = silent_track("quiet");

    let result = session.request_play(&silent).await;
    assert!(matches!(result, Err(DeckError::NoPreview(_))));

    let snap = session.snapshot();
    assert_eq!(snap.current, Some(silent.clone()));
    assert!(!snap.playing);
    assert!(session.history().contains(&silent.id));
    assert!(PlayHistory::load(store, KEY).await.contains(&silent.id));
}

#[tokio::test]
async fn history_survives_reload_through_disk_store() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn KeyValueStore> = Arc::new(DiskStore::new(dir.path(), 3));
    let mut session = session_over(store.clone(), Duration::from_secs(30)).await;

    let a = track("a");
    let b = track("b");
    session.request_play(&a).await.unwrap();
    session.request_play(&b).await.unwrap();

    let reloaded = PlayHistory::load(store.clone(), KEY).await;
    let ids: Vec<_> = reloaded.tracks().iter().map(|t| t.id.0.as_str()).collect();
    assert_eq!(ids, ["a", "b"]);

    assert!(session.remove_from_history(&a.id).await);
    let reloaded = PlayHistory::load(store.clone(), KEY).await;
    assert!(!reloaded.contains(&a.id));
    assert!(reloaded.contains(&b.id));

    session.clear_history().await;
    assert!(PlayHistory::load(store, KEY).await.is_empty());
    session.shutdown();
}
