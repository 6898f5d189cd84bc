//!
//! src/config.rs
//!
//! Collects the environment into an AppConfig at program start. Only the
//! Spotify credentials are required, everything else has a default that
//! can be overridden with a DECK_* variable.
//!

use std::time;
use url::Url;

use crate::errors::DeckError;

/// Constants for HTTP Config
pub const HTTP_TIMEOUT: u64 = 8000;
pub const HTTP_CONNECT_TIMEOUT: u64 = 2000;
pub const HTTP_POOL_MAX_IDLE: usize = 16;
pub const HTTP_POOL_IDLE_TIMEOUT: u64 = 90000;
pub const HTTP_MAX_REDIRECTS: u8 = 4;

/// Constants for the catalog requests
pub const ALBUM_PAGE_SIZE: u32 = 10;
pub const ALBUM_TRACK_PAGE_SIZE: u32 = 20;
pub const TOP_TRACK_DISPLAY_LIMIT: usize = 5;
pub const RELEASE_GROUPS: &str = "album,single";
pub const MARKET: &str = "KR";

/// Constants for playback
pub const PREVIEW_CAP_MS: u64 = 30_000;
pub const DEFAULT_VOLUME: f32 = 0.5;
pub const TIME_UPDATE_MS: u64 = 250;

pub const HISTORY_KEY: &str = "playedTracks";

/// Wrapper over env::var to return an invalid enviroment var error
fn env_check(s: &str) -> Result<String, DeckError> {
    match std::env::var(s) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(DeckError::Config(format!("{s} was not set"))),
    }
}

/// Parses an optional override, falling back to the default on absence or junk
fn env_or<T: std::str::FromStr>(s: &str, default: T) -> T {
    std::env::var(s)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Ensures that url is https
fn ensure_https(url: &Url) -> Result<(), String> {
    if url.scheme() == "https" {
        Ok(())
    } else {
        Err(format!("URL must be https: {url}"))
    }
}

fn ensure_host(url: &Url, expected_host: &str) -> Result<(), String> {
    match url.host_str() {
        Some(h) if h.eq_ignore_ascii_case(expected_host) => Ok(()),
        Some(h) => Err(
            format!("Unexpected host for {url} (got {h}, expected {expected_host})")
        ),
        None => Err(format!("URL missing host: {url}"))
    }
}

fn ensure_trailing_slash(url: &mut Url) {
    if !url.path().ends_with('/') {
        let mut path = url.path().to_string();
        path.push('/');
        url.set_path(&path);
    }
}

/// Configuration that Spotify expects when hitting endpoints
#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: Url,
    pub api_base: Url,
}

fn build_spotify() -> Result<SpotifyConfig, DeckError> {
    let client_id     = env_check("SPOTIFY_CLIENT_ID")?;
    let client_secret = env_check("SPOTIFY_CLIENT_SECRET")?;

    let token_url = std::env::var("SPOTIFY_TOKEN_URL")
        .unwrap_or_else(|_| "https://accounts.spotify.com/api/token".to_string());
    let api_base  = std::env::var("SPOTIFY_API_BASE")
        .unwrap_or_else(|_| "https://api.spotify.com/v1/".to_string());

    let token_url = Url::parse(&token_url)
        .map_err(|e| DeckError::Config(format!("SPOTIFY_TOKEN_URL invalid {e}")))?;
    let mut api_base = Url::parse(&api_base)
        .map_err(|e| DeckError::Config(format!("SPOTIFY_API_BASE invalid {e}")))?;

    // ensure valid https and hostname for both urls
    ensure_https(&token_url).map_err(DeckError::Config)?;
    ensure_https(&api_base).map_err(DeckError::Config)?;
    ensure_host(&token_url, "accounts.spotify.com").map_err(DeckError::Config)?;
    ensure_host(&api_base, "api.spotify.com").map_err(DeckError::Config)?;

    ensure_trailing_slash(&mut api_base);

    Ok( SpotifyConfig { client_id, client_secret, token_url, api_base } )
}

///
/// Configuration for Http timeouts, pooling, etc.
///
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: time::Duration,
    pub connect_timeout: time::Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: time::Duration,
    pub max_redirects: u8,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: time::Duration::from_millis(HTTP_TIMEOUT),
            connect_timeout: time::Duration::from_millis(HTTP_CONNECT_TIMEOUT),
            pool_max_idle_per_host: HTTP_POOL_MAX_IDLE,
            pool_idle_timeout: time::Duration::from_millis(HTTP_POOL_IDLE_TIMEOUT),
            max_redirects: HTTP_MAX_REDIRECTS,
        }
    }
}

fn build_http() -> HttpConfig {
    let d = HttpConfig::default();
    HttpConfig {
        timeout: time::Duration::from_millis(env_or("DECK_HTTP_TIMEOUT_MS", HTTP_TIMEOUT)),
        connect_timeout: time::Duration::from_millis(
            env_or("DECK_HTTP_CONNECT_TIMEOUT_MS", HTTP_CONNECT_TIMEOUT)
        ),
        ..d
    }
}

///
/// Configuration for which artists are loaded and how much of each is fetched
///
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub seed_artists: Vec<String>,
    pub album_page_size: u32,
    pub release_groups: String,
    pub album_track_page_size: u32,
    pub market: String,
    pub top_track_limit: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            seed_artists: vec!["BTS".to_string(), "IU".to_string()],
            album_page_size: ALBUM_PAGE_SIZE,
            release_groups: RELEASE_GROUPS.to_string(),
            album_track_page_size: ALBUM_TRACK_PAGE_SIZE,
            market: MARKET.to_string(),
            top_track_limit: TOP_TRACK_DISPLAY_LIMIT,
        }
    }
}

fn build_catalog() -> CatalogConfig {
    let d = CatalogConfig::default();

    // comma separated, blanks dropped
    let seed_artists = std::env::var("DECK_SEED_ARTISTS")
        .ok()
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or(d.seed_artists);

    CatalogConfig {
        seed_artists,
        album_page_size: env_or("DECK_ALBUM_PAGE_SIZE", d.album_page_size),
        release_groups: d.release_groups,
        album_track_page_size: env_or("DECK_ALBUM_TRACK_PAGE_SIZE", d.album_track_page_size),
        market: std::env::var("DECK_MARKET").unwrap_or(d.market),
        top_track_limit: env_or("DECK_TOP_TRACK_LIMIT", d.top_track_limit),
    }
}

///
/// Configuration for the playback session
///

//
// What happens when a requested track has no preview locator
//
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackPolicy {
    Disabled,
    CatalogTopTracks,
}

impl std::str::FromStr for FallbackPolicy {
    type Err = DeckError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disabled" | "none" => Ok(FallbackPolicy::Disabled),
            "catalog" | "top-tracks" => Ok(FallbackPolicy::CatalogTopTracks),
            other => Err(DeckError::Config(format!("unknown fallback policy {other}")))
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    pub preview_cap: time::Duration,
    pub volume: f32,
    pub fallback: FallbackPolicy,
    pub time_update: time::Duration,
    pub simulated_media: time::Duration, // length reported by the clock backend
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            preview_cap: time::Duration::from_millis(PREVIEW_CAP_MS),
            volume: DEFAULT_VOLUME,
            fallback: FallbackPolicy::Disabled,
            time_update: time::Duration::from_millis(TIME_UPDATE_MS),
            simulated_media: time::Duration::from_millis(PREVIEW_CAP_MS),
        }
    }
}

fn build_playback() -> PlaybackConfig {
    let d = PlaybackConfig::default();
    PlaybackConfig {
        preview_cap: d.preview_cap,
        volume: env_or("DECK_VOLUME", d.volume).clamp(0.0, 1.0),
        fallback: env_or("DECK_FALLBACK", d.fallback),
        time_update: d.time_update,
        simulated_media: time::Duration::from_millis(
            env_or("DECK_SIMULATED_MEDIA_MS", PREVIEW_CAP_MS)
        ),
    }
}

///
/// Configuration for durable storage of the play history
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Sqlite,
    Disk,
    Memory
}

impl std::str::FromStr for StorageBackend {
    type Err = DeckError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StorageBackend::Sqlite),
            "disk"   => Ok(StorageBackend::Disk),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(DeckError::Config(format!("unknown storage backend {other}")))
        }
    }
}

#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub backend: StorageBackend,
    pub db_url: String,
    pub disk_root: String,
    pub compression_level: i32,
    pub history_key: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            db_url: "sqlite:./data/deck.db?mode=rwc".to_string(),
            disk_root: "./data/store".to_string(),
            compression_level: 3,
            history_key: HISTORY_KEY.to_string(),
        }
    }
}

fn build_persistence() -> PersistenceConfig {
    let d = PersistenceConfig::default();
    PersistenceConfig {
        backend: env_or("DECK_STORAGE", d.backend),
        db_url: std::env::var("DECK_DB_URL").unwrap_or(d.db_url),
        disk_root: std::env::var("DECK_STORE_ROOT").unwrap_or(d.disk_root),
        compression_level: env_or("DECK_ZSTD_LEVEL", d.compression_level),
        history_key: d.history_key,
    }
}

///
/// Configuration for Logger
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json
}

impl std::str::FromStr for LogFormat {
    type Err = DeckError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json"   => Ok(LogFormat::Json),
            other => Err(DeckError::Config(format!("unknown log format {other}")))
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub filter_directives: String,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub include_file_line: bool,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter_directives: "info,preview_deck=debug,reqwest=warn,sqlx=warn".to_string(),
            format: LogFormat::Json,
            with_ansi: true,
            include_file_line: true,
            include_target: true,
        }
    }
}

fn build_logging() -> LoggingConfig {
    let d = LoggingConfig::default();
    LoggingConfig {
        format: env_or("DECK_LOG_FORMAT", d.format),
        ..d
    }
}

///
/// AppConfig which holds everything the aggregator and session need
///
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub spotify: SpotifyConfig,
    pub http: HttpConfig,
    pub catalog: CatalogConfig,
    pub playback: PlaybackConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig
}

///
/// Return all environment variables to caller at program start.
///
pub fn load_config() -> Result<AppConfig, DeckError> {
    dotenvy::dotenv().ok();

    let spotify     = build_spotify()?;
    let http        = build_http();
    let catalog     = build_catalog();
    let playback    = build_playback();
    let persistence = build_persistence();
    let logging     = build_logging();

    Ok( AppConfig { spotify, http, catalog, playback, persistence, logging } )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_and_host_are_enforced() {
        let ok = Url::parse("https://api.spotify.com/v1/").unwrap();
        assert!(ensure_https(&ok).is_ok());
        assert!(ensure_host(&ok, "API.spotify.com").is_ok());

        let plain = Url::parse("http://api.spotify.com/v1/").unwrap();
        assert!(ensure_https(&plain).is_err());

        let other = Url::parse("https://example.com/v1/").unwrap();
        assert!(ensure_host(&other, "api.spotify.com").is_err());
    }

    #[test]
    fn trailing_slash_is_added_once() {
        let mut url = Url::parse("https://api.spotify.com/v1").unwrap();
        ensure_trailing_slash(&mut url);
        assert_eq!(url.path(), "/v1/");
        ensure_trailing_slash(&mut url);
        assert_eq!(url.path(), "/v1/");
    }

    #[test]
    fn enum_overrides_parse_case_insensitively() {
        assert_eq!("Catalog".parse::<FallbackPolicy>().unwrap(), FallbackPolicy::CatalogTopTracks);
        assert_eq!("DISABLED".parse::<FallbackPolicy>().unwrap(), FallbackPolicy::Disabled);
        assert_eq!("disk".parse::<StorageBackend>().unwrap(), StorageBackend::Disk);
        assert!("tape".parse::<StorageBackend>().is_err());
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
    }

    #[test]
    fn defaults_match_upstream_limits() {
        let catalog = CatalogConfig::default();
        assert_eq!(catalog.album_page_size, 10);
        assert_eq!(catalog.album_track_page_size, 20);
        assert_eq!(catalog.market, "KR");
        assert_eq!(catalog.release_groups, "album,single");

        let playback = PlaybackConfig::default();
        assert_eq!(playback.preview_cap, time::Duration::from_secs(30));
        assert_eq!(playback.fallback, FallbackPolicy::Disabled);
        assert!((playback.volume - 0.5).abs() < f32::EPSILON);
    }
}
