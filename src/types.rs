//!
//! src/types.rs
//!
//! Track, album and artist records ingested from the catalog service.
//! Optional upstream fields are defaulted here, once, so nothing
//! downstream has to guard against missing images or dates.
//!

use std::cmp::Ordering;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackId(pub String);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>
}

impl Image {
    fn from_json(v: &Value) -> Option<Self> {
        Some(Self {
            url: v.get("url").and_then(Value::as_str)?.to_string(),
            width: v.get("width").and_then(Value::as_u64).map(|w| w as u32),
            height: v.get("height").and_then(Value::as_u64).map(|h| h as u32),
        })
    }
}

fn images_from_json(v: Option<&Value>) -> Vec<Image> {
    v.and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Image::from_json).collect())
        .unwrap_or_default()
}

/// The owning album as carried on a track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumRef {
    pub id: String,
    pub name: String,
    pub images: Vec<Image>
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    pub duration_ms: u64,
    pub preview_url: Option<String>,
    pub popularity: Option<u8>,
    pub album: Option<AlbumRef>,
    pub artists: Vec<String>
}

impl Track {
    /// Ingests a track object, or None when it has no id
    pub fn from_json(track: &Value) -> Option<Self> {
        let id = track.get("id").and_then(Value::as_str)?;
        Some(Self {
            id: TrackId(id.to_string()),
            name: track.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
            duration_ms: track.get("duration_ms").and_then(Value::as_u64).unwrap_or(0),
            preview_url: track.get("preview_url")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            popularity: track.get("popularity")
                .and_then(Value::as_u64)
                .map(|p| p.min(100) as u8),
            album: track.get("album").and_then(|a| {
                Some(AlbumRef {
                    id: a.get("id").and_then(Value::as_str)?.to_string(),
                    name: a.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
                    images: images_from_json(a.get("images")),
                })
            }),
            artists: track.get("artists")
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(|a| a.get("name").and_then(Value::as_str))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    pub fn has_preview(&self) -> bool {
        self.preview_url.is_some()
    }

    pub fn primary_artist(&self) -> &str {
        self.artists
            .first()
            .map(String::as_str)
            .unwrap_or("Unknown Artist")
    }

    /// Third image when present (the small one), else the first
    pub fn thumbnail(&self) -> Option<&Image> {
        let images = &self.album.as_ref()?.images;
        images.get(2).or_else(|| images.first())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub release_date: Option<String>,
    pub images: Vec<Image>,
    pub tracks: Vec<Track>
}

impl Album {
    /// Ingests an album stub; tracks are joined on later
    pub fn from_json(album: &Value) -> Option<Self> {
        let id = album.get("id").and_then(Value::as_str)?;
        Some(Self {
            id: id.to_string(),
            name: album.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
            release_date: album.get("release_date")
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string),
            images: images_from_json(album.get("images")),
            tracks: Vec::new(),
        })
    }

    pub fn album_ref(&self) -> AlbumRef {
        AlbumRef {
            id: self.id.clone(),
            name: self.name.clone(),
            images: self.images.clone(),
        }
    }

    /// Attaches a track listing. Album-track listings carry no album object,
    /// so each track gets this album's reference.
    pub fn with_tracks(mut self, tracks: Vec<Track>) -> Self {
        let owner = self.album_ref();
        self.tracks = tracks
            .into_iter()
            .map(|mut t| {
                if t.album.is_none() {
                    t.album = Some(owner.clone());
                }
                t
            })
            .collect();
        self
    }

    pub fn release_year(&self) -> Option<i32> {
        release_year(self.release_date.as_deref()?)
    }

    pub fn has_artwork(&self) -> bool {
        !self.images.is_empty()
    }
}

/// Leading year of a YYYY, YYYY-MM or YYYY-MM-DD date
pub fn release_year(date: &str) -> Option<i32> {
    let date = date.trim();
    if let Ok(d) = NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        return Some(d.year());
    }
    if let Ok(d) = NaiveDate::parse_from_str(&format!("{date}-01"), "%Y-%m-%d") {
        return Some(d.year());
    }
    NaiveDate::parse_from_str(&format!("{date}-01-01"), "%Y-%m-%d")
        .ok()
        .map(|d| d.year())
}

/// Service-assigned identity of a resolved artist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistIdentity {
    pub id: String,
    pub name: String
}

impl ArtistIdentity {
    pub fn from_json(artist: &Value) -> Option<Self> {
        Some(Self {
            id: artist.get("id").and_then(Value::as_str)?.to_string(),
            name: artist.get("name").and_then(Value::as_str)?.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtistEntry {
    pub artist: String,
    pub albums: Vec<Album>,
    pub top_tracks: Vec<Track>
}

impl ArtistEntry {
    pub fn matches(&self, name: &str) -> bool {
        same_artist(&self.artist, name)
    }

    pub fn albums_with_artwork(&self) -> impl Iterator<Item = &Album> {
        self.albums.iter().filter(|a| a.has_artwork())
    }

    pub fn top_tracks_for_display(&self, sort: TrackSort, limit: usize) -> Vec<&Track> {
        let mut tracks = sort.apply(self.top_tracks.iter().collect());
        tracks.truncate(limit);
        tracks
    }
}

/// Artist names compare case-insensitively
pub fn same_artist(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackSort {
    #[default]
    Default,
    Name,
    Popularity,
    Duration
}

impl std::str::FromStr for TrackSort {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default"    => Ok(TrackSort::Default),
            "name"       => Ok(TrackSort::Name),
            "popularity" => Ok(TrackSort::Popularity),
            "duration"   => Ok(TrackSort::Duration),
            other => Err(format!("unknown sort {other}"))
        }
    }
}

impl TrackSort {
    /// Stable sort; Default keeps the given order
    pub fn apply<'a>(self, mut tracks: Vec<&'a Track>) -> Vec<&'a Track> {
        let cmp: fn(&&Track, &&Track) -> Ordering = match self {
            TrackSort::Default => return tracks,
            TrackSort::Name => |a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()),
            TrackSort::Popularity => |a, b| {
                b.popularity.unwrap_or(0).cmp(&a.popularity.unwrap_or(0))
            },
            TrackSort::Duration => |a, b| a.duration_ms.cmp(&b.duration_ms),
        };
        tracks.sort_by(cmp);
        tracks
    }
}

/// ms to m:ss
pub fn format_duration(ms: u64) -> String {
    let total = ms / 1000;
    format!("{}:{:02}", total / 60, total % 60)
}
