use std::sync::Arc;
use std::time::Duration;

use preview_deck::catalog::{Aggregator, Catalog, InsertMode, SkipReason};
use preview_deck::config::CatalogConfig;
use preview_deck::testing::{album_with_art, silent_track, track, StubCatalog};
use preview_deck::types::TrackSort;

fn bts() -> StubCatalog {
    StubCatalog::new().artist(
        "BTS",
        vec![album_with_art("a1", vec![track("t1")]), album_with_art("a2", vec![track("t2")])],
        vec![track("top1"), track("top2"), silent_track("top3")],
    )
}

fn with_iu(stub: StubCatalog) -> StubCatalog {
    stub.artist("IU", vec![album_with_art("p1", vec![track("u1")])], vec![track("u2")])
}

#[tokio::test]
async fn single_artist_bundle_keeps_stub_order() {
    let aggregator = Aggregator::new(Arc::new(bts()), CatalogConfig::default());
    let mut catalog = Catalog::new();

    let report = aggregator.aggregate(&mut catalog, &["BTS"], InsertMode::Append).await;
    assert_eq!(report.added, vec!["BTS".to_string()]);

    assert_eq!(catalog.len(), 1);
    let entry = &catalog.entries()[0];
    assert_eq!(entry.artist, "BTS");
    let albums: Vec<_> = entry.albums.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(albums, ["a1", "a2"]);
    assert!(entry.albums.iter().all(|a| a.tracks.len() == 1));
    let top: Vec<_> = entry.top_tracks.iter().map(|t| t.id.0.as_str()).collect();
    assert_eq!(top, ["top1", "top2", "top3"]);

    // joined tracks point back at their album
    assert_eq!(entry.albums[1].tracks[0].album.as_ref().unwrap().id, "a2");
    assert_eq!(entry.albums_with_artwork().count(), 2);
}

#[tokio::test]
async fn repeats_and_case_variants_never_duplicate() {
    let service = Arc::new(with_iu(bts()));
    let aggregator = Aggregator::new(service.clone(), CatalogConfig::default());
    let mut catalog = Catalog::new();

    aggregator
        .aggregate(&mut catalog, &["BTS", "iu", "bts", " BTS ", "IU"], InsertMode::Append)
        .await;
    let searches_after_load = service.search_count();

    let report = aggregator.search(&mut catalog, "Iu").await;
    assert!(report.added.is_empty());
    assert_eq!(report.present.len(), 1);

    let names: Vec<_> = catalog.entries().iter().map(|e| e.artist.to_lowercase()).collect();
    assert_eq!(names, ["bts", "iu"]);
    // a name already present is skipped before any upstream call
    assert_eq!(service.search_count(), searches_after_load);
}

#[tokio::test]
async fn failed_bundle_leaves_other_entries_untouched() {
    let service = Arc::new(with_iu(bts()).fail_top_tracks("IU"));
    let aggregator = Aggregator::new(service, CatalogConfig::default());
    let mut catalog = Catalog::new();

    aggregator.aggregate(&mut catalog, &["BTS"], InsertMode::Append).await;
    let before = catalog.entries().to_vec();

    let report = aggregator
        .aggregate(&mut catalog, &["IU", "Nobody"], InsertMode::Append)
        .await;

    assert!(!catalog.contains("IU"));
    assert_eq!(catalog.entries(), before.as_slice());
    assert!(matches!(report.skipped[0], (ref n, SkipReason::PartialFetch(_)) if n == "IU"));
    assert_eq!(report.skipped[1], ("Nobody".to_string(), SkipReason::NotFound));
}

#[tokio::test]
async fn search_puts_new_artists_first() {
    let service = Arc::new(with_iu(bts()));
    let cfg = CatalogConfig { seed_artists: vec!["BTS".into()], ..CatalogConfig::default() };
    let aggregator = Aggregator::new(service, cfg);
    let mut catalog = Catalog::new();

    aggregator.load_seed(&mut catalog).await;
    aggregator.search(&mut catalog, "  IU ").await;

    let names: Vec<_> = catalog.entries().iter().map(|e| e.artist.as_str()).collect();
    assert_eq!(names, ["IU", "BTS"]);

    let shown = catalog.get("bts").unwrap().top_tracks_for_display(TrackSort::Name, 2);
    assert_eq!(shown.len(), 2);
    assert!(catalog.find_track("t2").is_some());
}

#[tokio::test(start_paused = true)]
async fn album_listings_overlap_but_artists_do_not() {
    let service = Arc::new(
        StubCatalog::new()
            .artist(
                "BTS",
                vec![
                    album_with_art("a1", vec![track("t1")]),
                    album_with_art("a2", vec![track("t2")]),
                    album_with_art("a3", vec![track("t3")]),
                ],
                vec![track("top1")],
            )
            .artist("IU", vec![album_with_art("p1", vec![track("u1")])], vec![track("u2")])
            .latency(Duration::from_secs(1))
    );
    let aggregator = Aggregator::new(service.clone(), CatalogConfig::default());
    let mut catalog = Catalog::new();

    let started = tokio::time::Instant::now();
    let report = aggregator.aggregate(&mut catalog, &["BTS", "IU"], InsertMode::Append).await;
    let elapsed = started.elapsed();

    assert_eq!(report.added.len(), 2);
    assert_eq!(service.peak_album_tracks(), 3);
    // only album listings of one artist are ever outstanding together
    assert_eq!(service.peak_in_flight(), 3);

    // per artist: search, albums, top tracks, then one overlapped round of
    // album listings; artists strictly one after the other
    assert!(elapsed >= Duration::from_secs(8) && elapsed < Duration::from_secs(9), "{elapsed:?}");
}
