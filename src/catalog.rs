//!
//! src/catalog.rs
//!
//! Grows the catalog one artist at a time: resolve the name, fetch the
//! albums, top tracks and every album's track listing, then insert the
//! whole entry or nothing. Artists are processed sequentially; only the
//! per-album track fetches of one artist overlap.
//!

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info, warn};

use crate::config::CatalogConfig;
use crate::errors::DeckError;
use crate::fetch::CatalogService;
use crate::types::{ArtistEntry, ArtistIdentity, Track};

/// Where a newly aggregated artist lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    Append,
    Prepend
}

/// Insertion-ordered artists, unique by case-insensitive name
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<ArtistEntry>
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ArtistEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, artist: &str) -> bool {
        self.entries.iter().any(|e| e.matches(artist))
    }

    pub fn get(&self, artist: &str) -> Option<&ArtistEntry> {
        self.entries.iter().find(|e| e.matches(artist))
    }

    /// Refuses an entry whose name is already present
    pub fn insert(&mut self, entry: ArtistEntry, mode: InsertMode) -> bool {
        if self.contains(&entry.artist) {
            return false;
        }
        match mode {
            InsertMode::Append  => self.entries.push(entry),
            InsertMode::Prepend => self.entries.insert(0, entry),
        }
        true
    }

    /// Looks a track up by id across albums and top tracks
    pub fn find_track(&self, id: &str) -> Option<&Track> {
        self.entries.iter().find_map(|e| {
            e.top_tracks
                .iter()
                .chain(e.albums.iter().flat_map(|a| a.tracks.iter()))
                .find(|t| t.id.0 == id)
        })
    }

    /// Top tracks in catalog order; the pool for preview substitution
    pub fn top_tracks(&self) -> Vec<Track> {
        self.entries
            .iter()
            .flat_map(|e| e.top_tracks.iter().cloned())
            .collect()
    }
}

/// Why a name did not produce a new entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    PartialFetch(String),
    Upstream(String),
}

#[derive(Debug, Clone, Default)]
pub struct AggregateReport {
    pub added: Vec<String>,
    pub present: Vec<String>,
    pub skipped: Vec<(String, SkipReason)>
}

pub struct Aggregator<S: CatalogService> {
    service: Arc<S>,
    cfg: CatalogConfig
}

impl<S: CatalogService> Aggregator<S> {
    pub fn new(service: Arc<S>, cfg: CatalogConfig) -> Self {
        Self { service, cfg }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Top search match, or NotFound
    pub async fn resolve_artist(&self, name: &str) -> Result<ArtistIdentity, DeckError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DeckError::NotFound("empty artist name".to_string()));
        }
        self.service
            .search_artist(name)
            .await?
            .ok_or_else(|| DeckError::NotFound(name.to_string()))
    }

    /// All sub-fetches must succeed; any failure fails the whole bundle
    pub async fn fetch_artist_bundle(&self, artist: &ArtistIdentity) ->
        Result<ArtistEntry, DeckError> {
        let partial = |stage: &str, e: DeckError| DeckError::PartialFetch {
            artist: artist.name.clone(),
            stage: format!("{stage}: {e}"),
        };

        let albums = self.service
            .list_albums(&artist.id, self.cfg.album_page_size, &self.cfg.release_groups)
            .await
            .map_err(|e| partial("albums", e))?;

        let top_tracks = self.service
            .list_top_tracks(&artist.id, &self.cfg.market)
            .await
            .map_err(|e| partial("top-tracks", e))?;

        // listings overlap; try_join_all keeps album order
        let listings = try_join_all(albums.iter().map(|album| async move {
            self.service
                .list_album_tracks(&album.id, self.cfg.album_track_page_size)
                .await
                .map_err(|e| partial(&format!("album {} tracks", album.id), e))
        }))
        .await?;

        let albums = albums
            .into_iter()
            .zip(listings)
            .map(|(album, tracks)| album.with_tracks(tracks))
            .collect::<Vec<_>>();

        debug!(
            artist = %artist.name,
            albums = albums.len(),
            top_tracks = top_tracks.len(),
            "aggregate.bundle"
        );
        Ok(ArtistEntry { artist: artist.name.clone(), albums, top_tracks })
    }

    /// Adds every name not already present. Failures skip that name only.
    pub async fn aggregate<N: AsRef<str>>(
        &self,
        catalog: &mut Catalog,
        names: &[N],
        mode: InsertMode
    ) -> AggregateReport {
        let mut report = AggregateReport::default();

        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            if catalog.contains(name) {
                debug!(artist = name, "aggregate.artist.present");
                report.present.push(name.to_string());
                continue;
            }

            let artist = match self.resolve_artist(name).await {
                Ok(a) => a,
                Err(DeckError::NotFound(_)) => {
                    warn!(artist = name, "aggregate.artist.not_found");
                    report.skipped.push((name.to_string(), SkipReason::NotFound));
                    continue;
                }
                Err(e) => {
                    warn!(artist = name, error = %e, "aggregate.artist.resolve_failed");
                    report.skipped.push((name.to_string(), SkipReason::Upstream(e.to_string())));
                    continue;
                }
            };

            // the canonical name can differ from what was typed
            if catalog.contains(&artist.name) {
                debug!(artist = name, canonical = %artist.name, "aggregate.artist.present");
                report.present.push(artist.name);
                continue;
            }

            match self.fetch_artist_bundle(&artist).await {
                Ok(entry) => {
                    let canonical = entry.artist.clone();
                    if catalog.insert(entry, mode) {
                        info!(artist = %canonical, mode = ?mode, "aggregate.artist.done");
                        report.added.push(canonical);
                    } else {
                        report.present.push(canonical);
                    }
                }
                Err(e) => {
                    warn!(artist = name, error = %e, "aggregate.artist.skipped");
                    let reason = match e {
                        DeckError::PartialFetch { stage, .. } => SkipReason::PartialFetch(stage),
                        other => SkipReason::Upstream(other.to_string()),
                    };
                    report.skipped.push((name.to_string(), reason));
                }
            }
        }

        info!(
            added = report.added.len(),
            present = report.present.len(),
            skipped = report.skipped.len(),
            total = catalog.len(),
            "aggregate.done"
        );
        report
    }

    /// Initial bulk load of the configured artists
    pub async fn load_seed(&self, catalog: &mut Catalog) -> AggregateReport {
        let seeds = self.cfg.seed_artists.clone();
        self.aggregate(catalog, &seeds, InsertMode::Append).await
    }

    /// Search-driven addition; the new artist goes to the front
    pub async fn search(&self, catalog: &mut Catalog, query: &str) -> AggregateReport {
        let query = query.trim();
        if query.is_empty() {
            return AggregateReport::default();
        }
        self.aggregate(catalog, &[query], InsertMode::Prepend).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{album, track, StubCatalog};

    fn aggregator(stub: StubCatalog) -> Aggregator<StubCatalog> {
        Aggregator::new(Arc::new(stub), CatalogConfig::default())
    }

    #[tokio::test]
    async fn bundle_joins_tracks_onto_albums_in_order() {
        let stub = StubCatalog::new().artist(
            "BTS",
            vec![album("a1", vec![track("t1")]), album("a2", vec![track("t2")])],
            vec![track("top1"), track("top2"), track("top3")],
        );
        let agg = aggregator(stub);

        let mut catalog = Catalog::new();
        let report = agg.aggregate(&mut catalog, &["BTS"], InsertMode::Append).await;
        assert_eq!(report.added, ["BTS"]);

        let entry = catalog.get("bts").unwrap();
        assert_eq!(entry.albums.len(), 2);
        assert_eq!(entry.albums[0].id, "a1");
        assert_eq!(entry.albums[1].tracks[0].id.0, "t2");
        assert_eq!(entry.albums[1].tracks[0].album.as_ref().unwrap().id, "a2");
        let top: Vec<_> = entry.top_tracks.iter().map(|t| t.id.0.as_str()).collect();
        assert_eq!(top, ["top1", "top2", "top3"]);
    }

    #[tokio::test]
    async fn case_variants_and_repeats_are_deduplicated() {
        let stub = StubCatalog::new()
            .artist("IU", vec![], vec![track("iu1")])
            .alias("아이유", "IU");
        let agg = aggregator(stub);

        let mut catalog = Catalog::new();
        agg.aggregate(&mut catalog, &["IU", "iu", " Iu ", "아이유"], InsertMode::Append).await;
        assert_eq!(catalog.len(), 1);

        // pre-check on the typed name avoids any request at all
        let before = agg.service().request_count();
        let report = agg.aggregate(&mut catalog, &["iu"], InsertMode::Append).await;
        assert_eq!(report.present, ["iu"]);
        assert_eq!(agg.service().request_count(), before);
    }

    #[tokio::test]
    async fn failed_album_listing_skips_only_that_artist() {
        let stub = StubCatalog::new()
            .artist("IU", vec![album("i1", vec![track("x")])], vec![track("iu1")])
            .artist("BTS", vec![album("b1", vec![]), album("b2", vec![])], vec![])
            .artist("10cm", vec![], vec![track("c1")])
            .fail_album_tracks("b2");
        let agg = aggregator(stub);

        let mut catalog = Catalog::new();
        agg.aggregate(&mut catalog, &["IU"], InsertMode::Append).await;
        let iu_before = catalog.get("IU").cloned();

        let report = agg.aggregate(&mut catalog, &["BTS", "10cm"], InsertMode::Append).await;
        assert!(catalog.get("BTS").is_none());
        assert_eq!(catalog.get("IU").cloned(), iu_before);
        assert!(catalog.contains("10cm"));
        assert!(matches!(report.skipped[0].1, SkipReason::PartialFetch(_)));
    }

    #[tokio::test]
    async fn unknown_artist_is_not_found_and_skipped() {
        let agg = aggregator(StubCatalog::new().artist("IU", vec![], vec![]));

        let err = agg.resolve_artist("nobody").await.unwrap_err();
        assert!(matches!(err, DeckError::NotFound(_)));

        let mut catalog = Catalog::new();
        let report = agg.aggregate(&mut catalog, &["nobody", "IU"], InsertMode::Append).await;
        assert_eq!(report.skipped, [("nobody".to_string(), SkipReason::NotFound)]);
        assert_eq!(report.added, ["IU"]);
    }

    #[tokio::test]
    async fn search_prepends_and_seed_appends() {
        let stub = StubCatalog::new()
            .artist("BTS", vec![], vec![])
            .artist("IU", vec![], vec![])
            .artist("10cm", vec![], vec![]);
        let agg = Aggregator::new(Arc::new(stub), CatalogConfig {
            seed_artists: vec!["BTS".into(), "IU".into()],
            ..CatalogConfig::default()
        });

        let mut catalog = Catalog::new();
        agg.load_seed(&mut catalog).await;
        agg.search(&mut catalog, "  10cm ").await;
        agg.search(&mut catalog, "   ").await;

        let names: Vec<_> = catalog.entries().iter().map(|e| e.artist.as_str()).collect();
        assert_eq!(names, ["10cm", "BTS", "IU"]);
    }

    #[tokio::test]
    async fn top_track_failure_is_partial_fetch() {
        let stub = StubCatalog::new()
            .artist("IU", vec![album("i1", vec![])], vec![])
            .fail_top_tracks("IU");
        let agg = aggregator(stub);

        let artist = agg.resolve_artist("IU").await.unwrap();
        match agg.fetch_artist_bundle(&artist).await {
            Err(DeckError::PartialFetch { artist, .. }) => assert_eq!(artist, "IU"),
            other => panic!("expected partial fetch, got {other:?}"),
        }
    }

    #[test]
    fn catalog_insert_refuses_duplicates() {
        let mut catalog = Catalog::new();
        let entry = |n: &str| ArtistEntry { artist: n.into(), albums: vec![], top_tracks: vec![] };
        assert!(catalog.insert(entry("IU"), InsertMode::Append));
        assert!(!catalog.insert(entry("iu"), InsertMode::Prepend));
        assert_eq!(catalog.len(), 1);
        assert!(catalog.contains("IU "));
    }
}
