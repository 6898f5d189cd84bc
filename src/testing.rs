//!
//! src/testing.rs
//!
//! In-memory catalog service and track fixtures. Compiled for unit tests
//! and, behind the test-support feature, for the integration suite.
//!

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::DeckError;
use crate::fetch::CatalogService;
use crate::types::{Album, ArtistIdentity, Image, Track, TrackId};

pub fn track(id: &str) -> Track {
    Track {
        id: TrackId(id.to_string()),
        name: format!("track {id}"),
        duration_ms: 180_000,
        preview_url: Some(format!("https://p.scdn.co/mp3-preview/{id}")),
        popularity: Some(50),
        album: None,
        artists: vec!["IU".to_string()],
    }
}

pub fn silent_track(id: &str) -> Track {
    Track { preview_url: None, ..track(id) }
}

pub fn album(id: &str, tracks: Vec<Track>) -> Album {
    Album {
        id: id.to_string(),
        name: format!("album {id}"),
        release_date: Some("2020-02-21".to_string()),
        images: vec![],
        tracks,
    }
}

pub fn album_with_art(id: &str, tracks: Vec<Track>) -> Album {
    Album {
        images: vec![Image {
            url: format!("https://i.scdn.co/image/{id}"),
            width: Some(300),
            height: Some(300),
        }],
        ..album(id, tracks)
    }
}

struct StubArtist {
    identity: ArtistIdentity,
    albums: Vec<Album>,
    top_tracks: Vec<Track>
}

#[derive(Default)]
pub struct StubCatalog {
    artists: Vec<StubArtist>,
    aliases: HashMap<String, String>,
    failing_album_tracks: HashSet<String>,
    failing_top_tracks: HashSet<String>,
    latency: Duration,
    requests: AtomicUsize,
    searches: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    album_tracks_in_flight: AtomicUsize,
    peak_album_tracks: AtomicUsize
}

impl StubCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn artist(mut self, name: &str, albums: Vec<Album>, top_tracks: Vec<Track>) -> Self {
        self.artists.push(StubArtist {
            identity: ArtistIdentity {
                id: format!("id-{}", name.to_lowercase()),
                name: name.to_string(),
            },
            albums,
            top_tracks,
        });
        self
    }

    /// A query that resolves to another artist's canonical name
    pub fn alias(mut self, query: &str, canonical: &str) -> Self {
        self.aliases.insert(query.to_lowercase(), canonical.to_string());
        self
    }

    pub fn fail_album_tracks(mut self, album_id: &str) -> Self {
        self.failing_album_tracks.insert(album_id.to_string());
        self
    }

    pub fn fail_top_tracks(mut self, artist: &str) -> Self {
        self.failing_top_tracks.insert(format!("id-{}", artist.to_lowercase()));
        self
    }

    /// Every listing call sleeps this long on the tokio clock
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    /// Most calls of any kind outstanding at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Most album-track listings outstanding at once
    pub fn peak_album_tracks(&self) -> usize {
        self.peak_album_tracks.load(Ordering::SeqCst)
    }

    async fn call(&self, counter: Option<(&AtomicUsize, &AtomicUsize)>) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some((current, peak)) = counter {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some((current, _)) = counter {
            current.fetch_sub(1, Ordering::SeqCst);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn by_id(&self, artist_id: &str) -> Result<&StubArtist, DeckError> {
        self.artists
            .iter()
            .find(|a| a.identity.id == artist_id)
            .ok_or_else(|| DeckError::Http("status 404 Not Found".into()))
    }
}

#[async_trait]
impl CatalogService for StubCatalog {
    async fn authenticate(&self, _: &str, _: &str) -> Result<(), DeckError> {
        Ok(())
    }

    async fn search_artist(&self, query: &str) -> Result<Option<ArtistIdentity>, DeckError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.call(None).await;
        let wanted = self.aliases
            .get(&query.to_lowercase())
            .cloned()
            .unwrap_or_else(|| query.to_string());
        Ok(self.artists
            .iter()
            .find(|a| a.identity.name.eq_ignore_ascii_case(&wanted))
            .map(|a| a.identity.clone()))
    }

    async fn list_albums(&self, artist_id: &str, page_size: u32, _: &str) ->
        Result<Vec<Album>, DeckError> {
        self.call(None).await;
        Ok(self.by_id(artist_id)?
            .albums
            .iter()
            .take(page_size as usize)
            .map(|a| Album { tracks: vec![], ..a.clone() })
            .collect())
    }

    async fn list_album_tracks(&self, album_id: &str, page_size: u32) ->
        Result<Vec<Track>, DeckError> {
        self.call(Some((&self.album_tracks_in_flight, &self.peak_album_tracks))).await;
        if self.failing_album_tracks.contains(album_id) {
            return Err(DeckError::Http("status 502 Bad Gateway".into()));
        }
        Ok(self.artists
            .iter()
            .flat_map(|a| a.albums.iter())
            .find(|a| a.id == album_id)
            .map(|a| a.tracks.iter().take(page_size as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn list_top_tracks(&self, artist_id: &str, _: &str) ->
        Result<Vec<Track>, DeckError> {
        self.call(None).await;
        if self.failing_top_tracks.contains(artist_id) {
            return Err(DeckError::Http("status 500 Internal Server Error".into()));
        }
        Ok(self.by_id(artist_id)?.top_tracks.clone())
    }
}
