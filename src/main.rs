//!
//! src/main.rs
//!
//! Loads the seed artists into the catalog, restores play history and then
//! drives the playback session from stdin, one command per line.
//!

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use preview_deck::audio::ClockBackend;
use preview_deck::catalog::{AggregateReport, Aggregator, Catalog};
use preview_deck::fetch::{CatalogService, SpotifyCatalog, SpotifyClient};
use preview_deck::history::PlayHistory;
use preview_deck::session::{PlayOutcome, SessionEvent, SessionManager};
use preview_deck::types::{format_duration, Track, TrackId, TrackSort};
use preview_deck::{config, logging, storage, DeckError};

#[derive(Debug, PartialEq)]
enum Command {
    Search(String),
    List,
    Top(String, TrackSort),
    Play(String),
    Pause,
    Resume,
    History(TrackSort),
    Remove(String),
    Clear,
    Quit
}

fn parse_sort(arg: Option<&str>) -> Result<TrackSort, String> {
    arg.map(str::parse::<TrackSort>).unwrap_or(Ok(TrackSort::Default))
}

fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let arg = || {
        if rest.is_empty() { Err(format!("{verb} needs an argument")) } else { Ok(rest.to_string()) }
    };

    match verb.to_ascii_lowercase().as_str() {
        "search" => Ok(Command::Search(arg()?)),
        "list"   => Ok(Command::List),
        "top"    => {
            // optional trailing ":<sort>" so artist names can hold spaces
            let (artist, sort) = match rest.rsplit_once(':') {
                Some((a, s)) => (a.trim(), parse_sort(Some(s.trim()))?),
                None => (rest, TrackSort::Default),
            };
            if artist.is_empty() {
                return Err("top needs an artist".to_string());
            }
            Ok(Command::Top(artist.to_string(), sort))
        }
        "play"    => Ok(Command::Play(arg()?)),
        "pause"   => Ok(Command::Pause),
        "resume"  => Ok(Command::Resume),
        "history" => Ok(Command::History(parse_sort((!rest.is_empty()).then_some(rest))?)),
        "remove"  => Ok(Command::Remove(arg()?)),
        "clear"   => Ok(Command::Clear),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(format!("unknown command {other}")),
    }
}

fn print_track(t: &Track) {
    println!(
        "  {}  {} - {} [{}]{}",
        t.id,
        t.name,
        t.primary_artist(),
        format_duration(t.duration_ms),
        if t.has_preview() { "" } else { " (no preview)" }
    );
}

fn print_report(report: &AggregateReport) {
    for name in &report.added {
        println!("added {name}");
    }
    for name in &report.present {
        println!("{name} is already in the catalog");
    }
    for (name, reason) in &report.skipped {
        println!("skipped {name}: {reason:?}");
    }
}

fn print_catalog(catalog: &Catalog) {
    for entry in catalog.entries() {
        println!("{} ({} top tracks)", entry.artist, entry.top_tracks.len());
        for album in entry.albums_with_artwork() {
            let year = album.release_year().map_or("N/A".to_string(), |y| y.to_string());
            println!("  [{year}] {} ({} tracks)", album.name, album.tracks.len());
        }
    }
}

/// Logs session events and progress until the session goes away
async fn observe(mut events: broadcast::Receiver<SessionEvent>, mut progress: watch::Receiver<f64>) {
    loop {
        tokio::select! {
            ev = events.recv() => match ev {
                Ok(ev) => info!(event = ?ev, "session.event"),
                Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "session.event.lagged"),
                Err(broadcast::error::RecvError::Closed) => return,
            },
            changed = progress.changed() => {
                if changed.is_err() {
                    return;
                }
                let fraction = *progress.borrow_and_update();
                tracing::trace!(fraction, "session.progress");
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), DeckError> {
    let cfgs = config::load_config()?;
    let _guard = logging::init_logging(&cfgs.logging)?;

    info!(
        service = "preview-deck",
        version = %env!("CARGO_PKG_VERSION"),
        "starting"
    );

    let client = SpotifyClient::new(&cfgs.http, &cfgs.spotify)?;
    let service = Arc::new(SpotifyCatalog::new(client));
    let aggregator = Aggregator::new(service.clone(), cfgs.catalog.clone());
    let mut catalog = Catalog::new();

    // without a credential every call fails the same way; report it once
    let authenticated = match service
        .authenticate(&cfgs.spotify.client_id, &cfgs.spotify.client_secret)
        .await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "catalog unavailable, continuing with an empty catalog");
            false
        }
    };

    let store = storage::open_store(&cfgs.persistence).await?;
    let history = PlayHistory::load(store, &cfgs.persistence.history_key).await;
    info!(count = history.len(), "history restored");

    if authenticated {
        let report = aggregator.load_seed(&mut catalog).await;
        print_report(&report);
    }

    let backend = ClockBackend::from_config(&cfgs.playback);
    let mut session = SessionManager::new(backend, cfgs.playback.clone(), history);
    session.set_fallback_pool(catalog.top_tracks());
    tokio::spawn(observe(session.subscribe(), session.progress()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let cmd = match parse_command(&line) {
            Ok(cmd) => cmd,
            Err(msg) => {
                println!("{msg}");
                continue;
            }
        };

        match cmd {
            Command::Search(query) => {
                let report = aggregator.search(&mut catalog, &query).await;
                print_report(&report);
                session.set_fallback_pool(catalog.top_tracks());
            }
            Command::List => print_catalog(&catalog),
            Command::Top(artist, sort) => match catalog.get(&artist) {
                Some(entry) => entry
                    .top_tracks_for_display(sort, cfgs.catalog.top_track_limit)
                    .into_iter()
                    .for_each(print_track),
                None => println!("{artist} is not in the catalog"),
            },
            Command::Play(id) => {
                let track = catalog
                    .find_track(&id)
                    .or_else(|| session.history().tracks().iter().find(|t| t.id.0 == id))
                    .cloned();
                let Some(track) = track else {
                    println!("no track {id}");
                    continue;
                };
                match session.request_play(&track).await {
                    Ok(PlayOutcome::Playing(id)) => println!("playing {id}"),
                    Ok(PlayOutcome::Substituted { requested, playing }) => {
                        println!("{requested} has no preview, playing {playing}")
                    }
                    Err(e) => println!("{e}"),
                }
            }
            Command::Pause => session.pause(),
            Command::Resume => {
                if let Err(e) = session.resume().await {
                    println!("{e}");
                }
            }
            Command::History(sort) => session.sorted_history(sort).into_iter().for_each(print_track),
            Command::Remove(id) => {
                if !session.remove_from_history(&TrackId(id.clone())).await {
                    println!("{id} is not in the history");
                }
            }
            Command::Clear => session.clear_history().await,
            Command::Quit => break,
        }
    }

    session.shutdown();
    info!("stopping");
    Ok(())
}
