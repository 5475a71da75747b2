use std::time::{Duration, Instant};

use backon::{ExponentialBuilder, Retryable};
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use crate::ports::source::{
    AuthMode, PlaylistSnapshot, SourceCatalog, SourceKind, SourcePlaylistSummary, SourceRef,
    SourceTrack,
};
use crate::spotify_rs::auth::{SpotifyCredentials, request_access_token};
use crate::spotify_rs::types::{
    Page, SpotifyAlbum, SpotifyPlaylist, SpotifyPlaylistDetails, SpotifyPlaylistItem,
    SpotifySavedAlbum, SpotifySavedTrack, SpotifyTrack,
};

const API_BASE: &str = "https://api.spotify.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Tokens are renewed this long before they expire.
const TOKEN_MARGIN: Duration = Duration::from_secs(60);

struct AccessToken {
    value: String,
    expires_at: Instant,
}

/// Spotify Web API client
pub struct SpotifyApiClient {
    client: reqwest::Client,
    credentials: SpotifyCredentials,
    token: Mutex<Option<AccessToken>>,
}

fn is_transient(error: &reqwest::Error) -> bool {
    error.is_timeout()
        || error.is_connect()
        || error.status().is_some_and(|status| {
            status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        })
}

impl SpotifyApiClient {
    pub fn new(credentials: SpotifyCredentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            credentials,
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        if let Some(current) = token.as_ref() {
            if current.expires_at > Instant::now() + TOKEN_MARGIN {
                return Ok(current.value.clone());
            }
        }

        tracing::debug!("Requesting Spotify access token ({:?})", self.auth_mode());
        let response = request_access_token(&self.client, &self.credentials)
            .await
            .wrap_err("Failed to obtain Spotify access token")?;
        let value = response.access_token.clone();
        *token = Some(AccessToken {
            value: response.access_token,
            expires_at: Instant::now() + Duration::from_secs(response.expires_in),
        });
        Ok(value)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let token = self.access_token().await?;
        let token = token.as_str();
        let fetch = move || async move {
            self.client
                .get(url)
                .bearer_auth(token)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await?
                .error_for_status()?
                .json::<T>()
                .await
        };

        fetch
            .retry(ExponentialBuilder::default().with_max_times(3))
            .when(is_transient)
            .notify(|error, delay| {
                tracing::debug!("Retrying {} in {:?}: {}", url, delay, error);
            })
            .await
            .wrap_err_with(|| format!("GET {url} failed"))
    }

    /// Follow `next` links until the last page.
    async fn collect_pages<T: DeserializeOwned>(&self, first_url: String) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next_url = Some(first_url);

        while let Some(url) = next_url {
            let page: Page<T> = self.get_json(&url).await?;
            items.extend(page.items);
            next_url = page.next;
        }

        Ok(items)
    }

    async fn playlist_snapshot(&self, playlist_id: &str) -> Result<PlaylistSnapshot> {
        let details: SpotifyPlaylistDetails = self
            .get_json(&format!(
                "{API_BASE}/playlists/{playlist_id}?fields=name,description,public"
            ))
            .await?;
        let items: Vec<SpotifyPlaylistItem> = self
            .collect_pages(format!(
                "{API_BASE}/playlists/{playlist_id}/tracks?limit=100"
            ))
            .await?;

        let tracks: Vec<SourceTrack> = items
            .into_iter()
            .filter_map(|item| item.track)
            .filter_map(|track| track.into_source_track(None))
            .collect();
        tracing::debug!("Fetched '{}' with {} tracks", details.name, tracks.len());

        Ok(PlaylistSnapshot {
            name: details.name,
            description: details.description.unwrap_or_default(),
            is_public: details.public.unwrap_or(false),
            tracks,
        })
    }

    async fn album_snapshot(&self, album_id: &str) -> Result<PlaylistSnapshot> {
        let album: SpotifyAlbum = self.get_json(&format!("{API_BASE}/albums/{album_id}")).await?;
        let mut raw_tracks = album.tracks.items;
        if let Some(next) = album.tracks.next {
            raw_tracks.extend(self.collect_pages::<SpotifyTrack>(next).await?);
        }

        let tracks = raw_tracks
            .into_iter()
            .filter_map(|track| track.into_source_track(Some(&album.name)))
            .collect();
        let description = match album.artists.first() {
            Some(artist) => format!("{} by {}", album.name, artist.name),
            None => album.name.clone(),
        };

        Ok(PlaylistSnapshot {
            name: album.name,
            description,
            is_public: false,
            tracks,
        })
    }
}

#[async_trait::async_trait]
impl SourceCatalog for SpotifyApiClient {
    fn auth_mode(&self) -> AuthMode {
        self.credentials.auth_mode()
    }

    async fn playlist(&self, reference: &SourceRef) -> Result<PlaylistSnapshot> {
        match reference.kind {
            SourceKind::Playlist => self.playlist_snapshot(&reference.id).await,
            SourceKind::Album => self.album_snapshot(&reference.id).await,
        }
    }

    async fn user_playlists(&self, user_id: &str) -> Result<Vec<SourcePlaylistSummary>> {
        let playlists: Vec<SpotifyPlaylist> = self
            .collect_pages(format!(
                "{API_BASE}/users/{}/playlists?limit=50",
                urlencoding::encode(user_id)
            ))
            .await?;
        Ok(playlists.into_iter().map(SourcePlaylistSummary::from).collect())
    }

    async fn saved_playlists(&self) -> Result<Vec<SourcePlaylistSummary>> {
        let playlists: Vec<SpotifyPlaylist> = self
            .collect_pages(format!("{API_BASE}/me/playlists?limit=50"))
            .await?;
        Ok(playlists.into_iter().map(SourcePlaylistSummary::from).collect())
    }

    async fn saved_albums(&self) -> Result<Vec<SourcePlaylistSummary>> {
        let albums: Vec<SpotifySavedAlbum> = self
            .collect_pages(format!("{API_BASE}/me/albums?limit=50"))
            .await?;
        Ok(albums
            .iter()
            .map(|saved| SourcePlaylistSummary::from(&saved.album))
            .collect())
    }

    async fn liked_tracks(&self) -> Result<PlaylistSnapshot> {
        let saved: Vec<SpotifySavedTrack> = self
            .collect_pages(format!("{API_BASE}/me/tracks?limit=50"))
            .await?;
        let tracks = saved
            .into_iter()
            .filter_map(|saved| saved.track.into_source_track(None))
            .collect();

        Ok(PlaylistSnapshot {
            name: "Liked Songs".to_string(),
            description: "Liked songs from Spotify".to_string(),
            is_public: false,
            tracks,
        })
    }

    async fn track(&self, track_id: &str) -> Result<SourceTrack> {
        let track: SpotifyTrack = self
            .get_json(&format!("{API_BASE}/tracks/{track_id}"))
            .await?;
        track
            .into_source_track(None)
            .ok_or_else(|| color_eyre::eyre::eyre!("Track {track_id} has no artist"))
    }
}
