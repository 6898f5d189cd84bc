//!
//! src/fetch.rs
//!
//! Defines the catalog service the aggregator consumes and the Spotify
//! client behind it. Requests are built here, sent once and parsed into
//! the records of src/types.rs. Nothing is retried.
//!

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, header, redirect};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{HttpConfig, SpotifyConfig};
use crate::errors::DeckError;
use crate::types::{Album, ArtistIdentity, Track};

/// Capabilities the aggregator needs from an upstream catalog
#[async_trait]
pub trait CatalogService: Send + Sync {
    /// One-time credential exchange; every later call carries the result
    async fn authenticate(&self, client_id: &str, client_secret: &str) -> Result<(), DeckError>;

    /// Best match only
    async fn search_artist(&self, query: &str) -> Result<Option<ArtistIdentity>, DeckError>;

    async fn list_albums(
        &self,
        artist_id: &str,
        page_size: u32,
        release_groups: &str
    ) -> Result<Vec<Album>, DeckError>;

    async fn list_album_tracks(&self, album_id: &str, page_size: u32) ->
        Result<Vec<Track>, DeckError>;

    async fn list_top_tracks(&self, artist_id: &str, market: &str) ->
        Result<Vec<Track>, DeckError>;
}

/// Client building functionality
fn client_helper(http: &HttpConfig) -> reqwest::ClientBuilder {
    Client::builder()
        .timeout(http.timeout)
        .connect_timeout(http.connect_timeout)
        .pool_max_idle_per_host(http.pool_max_idle_per_host)
        .pool_idle_timeout(Some(http.pool_idle_timeout))
        .redirect(redirect::Policy::limited(http.max_redirects as usize))
}

pub fn base_client(http: &HttpConfig) -> Result<Client, DeckError> {
    let mut h = header::HeaderMap::new();
    h.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
    client_helper(http)
        .default_headers(h)
        .build()
        .map_err(|e| DeckError::Http(format!("build client: {e}")))
}

#[derive(Clone, Debug)]
pub struct SpotifyClient {
    pub http: Client,
    pub cfg: SpotifyConfig
}

impl SpotifyClient {
    pub fn new(http_config: &HttpConfig, cfg: &SpotifyConfig) -> Result<Self, DeckError> {
        let http = base_client(http_config)?;
        Ok( Self { http, cfg: cfg.clone() } )
    }

    fn endpoint(&self, path: &str) -> Result<url::Url, DeckError> {
        self.cfg.api_base
            .join(path)
            .map_err(|e| DeckError::Config(format!("bad endpoint {path}: {e}")))
    }

    /// POST accounts/api/token with client credentials
    pub fn token_request(&self, client_id: &str, client_secret: &str) -> RequestBuilder {
        self.http
            .post(self.cfg.token_url.clone())
            .basic_auth(client_id, Some(client_secret))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
    }

    /// GET /v1/search?type=artist&q=...&limit=1
    pub fn search_artist(&self, query: &str, bearer: &str) -> Result<RequestBuilder, DeckError> {
        let url = self.endpoint("search")?;
        Ok(self.http.get(url).bearer_auth(bearer).query(&[
            ("q", query),
            ("type", "artist"),
            ("limit", "1")
        ]))
    }

    /// GET /v1/artists/{id}/albums?limit=&include_groups=
    pub fn artist_albums(
        &self,
        artist_id: &str,
        limit: u32,
        include_groups: &str,
        bearer: &str
    ) -> Result<RequestBuilder, DeckError> {
        let url = self.endpoint(&format!("artists/{artist_id}/albums"))?;
        Ok(self.http.get(url).bearer_auth(bearer).query(&[
            ("limit", limit.to_string().as_str()),
            ("include_groups", include_groups)
        ]))
    }

    /// GET /v1/artists/{id}/top-tracks?market=
    pub fn artist_top_tracks(&self, artist_id: &str, market: &str, bearer: &str) ->
        Result<RequestBuilder, DeckError> {
        let url = self.endpoint(&format!("artists/{artist_id}/top-tracks"))?;
        Ok(self.http.get(url).bearer_auth(bearer).query(&[("market", market)]))
    }

    /// GET /v1/albums/{id}/tracks?limit=
    pub fn album_tracks(&self, album_id: &str, limit: u32, bearer: &str) ->
        Result<RequestBuilder, DeckError> {
        let url = self.endpoint(&format!("albums/{album_id}/tracks"))?;
        Ok(self.http.get(url).bearer_auth(bearer).query(&[("limit", limit)]))
    }
}

/// Sends once; any non-2xx is an upstream error
async fn send_json(request: RequestBuilder) -> Result<Value, DeckError> {
    let resp = request.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        warn!(status = %status, body = %truncate(&body, 200), "http.status");
        return Err(DeckError::Http(format!("status {status}")));
    }
    Ok(resp.json::<Value>().await?)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

fn items<'a>(v: &'a Value, pointer: &str) -> Result<&'a Vec<Value>, DeckError> {
    v.pointer(pointer)
        .and_then(Value::as_array)
        .ok_or_else(|| DeckError::Parse(format!("response missing {pointer}")))
}

/// Bearer and lifetime in seconds from a token response
fn parse_token(token: &Value) -> Result<(String, u64), DeckError> {
    let bearer = token.get("access_token")
        .and_then(Value::as_str)
        .ok_or_else(|| DeckError::UpstreamAuth("access_token missing".to_string()))?;
    let expires_in = token.get("expires_in").and_then(Value::as_u64).unwrap_or(0);
    Ok((bearer.to_string(), expires_in))
}

/// Spotify Web API as a CatalogService
pub struct SpotifyCatalog {
    client: SpotifyClient,
    bearer: RwLock<Option<String>>
}

impl SpotifyCatalog {
    pub fn new(client: SpotifyClient) -> Self {
        Self { client, bearer: RwLock::new(None) }
    }

    async fn bearer(&self) -> Result<String, DeckError> {
        self.bearer
            .read()
            .await
            .clone()
            .ok_or_else(|| DeckError::UpstreamAuth("no credential exchanged".to_string()))
    }
}

#[async_trait]
impl CatalogService for SpotifyCatalog {
    async fn authenticate(&self, client_id: &str, client_secret: &str) -> Result<(), DeckError> {
        let resp = self.client
            .token_request(client_id, client_secret)
            .send()
            .await
            .map_err(|e| DeckError::UpstreamAuth(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DeckError::UpstreamAuth(format!("token status {status}")));
        }

        let token: Value = resp.json()
            .await
            .map_err(|e| DeckError::UpstreamAuth(format!("token body: {e}")))?;
        let (bearer, expires_in) = parse_token(&token)?;

        *self.bearer.write().await = Some(bearer);
        info!(expires_in, "spotify.auth.ok");
        Ok(())
    }

    async fn search_artist(&self, query: &str) -> Result<Option<ArtistIdentity>, DeckError> {
        let bearer = self.bearer().await?;
        let value = send_json(self.client.search_artist(query, &bearer)?).await?;
        let hit = items(&value, "/artists/items")?
            .first()
            .and_then(ArtistIdentity::from_json);
        debug!(query, found = hit.is_some(), "spotify.search_artist");
        Ok(hit)
    }

    async fn list_albums(
        &self,
        artist_id: &str,
        page_size: u32,
        release_groups: &str
    ) -> Result<Vec<Album>, DeckError> {
        let bearer = self.bearer().await?;
        let request = self.client.artist_albums(artist_id, page_size, release_groups, &bearer)?;
        let value = send_json(request).await?;
        Ok(items(&value, "/items")?.iter().filter_map(Album::from_json).collect())
    }

    async fn list_album_tracks(&self, album_id: &str, page_size: u32) ->
        Result<Vec<Track>, DeckError> {
        let bearer = self.bearer().await?;
        let value = send_json(self.client.album_tracks(album_id, page_size, &bearer)?).await?;
        Ok(items(&value, "/items")?.iter().filter_map(Track::from_json).collect())
    }

    async fn list_top_tracks(&self, artist_id: &str, market: &str) ->
        Result<Vec<Track>, DeckError> {
        let bearer = self.bearer().await?;
        let request = self.client.artist_top_tracks(artist_id, market, &bearer)?;
        let value = send_json(request).await?;
        Ok(items(&value, "/tracks")?.iter().filter_map(Track::from_json).collect())
    }
}
