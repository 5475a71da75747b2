use std::num::NonZeroU32;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use governor::{
    Quota, RateLimiter, clock::DefaultClock, state::InMemoryState, state::direct::NotKeyed,
};
use serde_json::{Value, json};

use crate::ports::destination::{
    DestinationCatalog, DestinationTrack, LibraryPlaylist, SearchCandidate, Visibility,
};
use crate::ytmusic_rs::parse;

const BASE_URL: &str = "https://music.youtube.com/youtubei/v1";
const ORIGIN: &str = "https://music.youtube.com";
const CLIENT_NAME: &str = "WEB_REMIX";
const CLIENT_VERSION: &str = "1.20241016.01.00";
const LIBRARY_PLAYLISTS: &str = "FEmusic_liked_playlists";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Upper bound on continuation pages for one listing.
const MAX_PAGES: usize = 200;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Clone)]
pub struct YtMusicSettings {
    pub access_token: String,
    pub requests_per_second: u32,
    pub language: String,
}

/// YouTube Music InnerTube client
pub struct YtMusicClient {
    client: reqwest::Client,
    access_token: String,
    language: String,
    rate_limiter: DirectRateLimiter,
}

fn is_transient(error: &reqwest::Error) -> bool {
    error.is_timeout()
        || error.is_connect()
        || error.status().is_some_and(|status| {
            status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        })
}

/// Playlist ids are shown with a `VL` prefix in browse ids but not elsewhere.
fn bare_playlist_id(id: &str) -> &str {
    id.strip_prefix("VL").unwrap_or(id)
}

fn add_actions(track_ids: &[String]) -> Vec<Value> {
    track_ids
        .iter()
        .map(|id| {
            json!({
                "action": "ACTION_ADD_VIDEO",
                "addedVideoId": id,
                "dedupeOption": "DEDUPE_OPTION_SKIP",
            })
        })
        .collect()
}

fn remove_actions(tracks: &[DestinationTrack]) -> Vec<Value> {
    tracks
        .iter()
        .filter_map(|track| match (&track.id, &track.set_video_id) {
            (Some(id), Some(set_video_id)) => Some(json!({
                "action": "ACTION_REMOVE_VIDEO",
                "setVideoId": set_video_id,
                "removedVideoId": id,
            })),
            _ => {
                tracing::debug!("'{}' has no entry handle, leaving it", track.title);
                None
            }
        })
        .collect()
}

impl YtMusicClient {
    pub fn new(settings: YtMusicSettings) -> Result<Self> {
        if settings.access_token.is_empty() {
            return Err(eyre!(
                "Missing YouTube Music access token; set `access_token` under [ytmusic]"
            ));
        }
        let per_second = NonZeroU32::new(settings.requests_per_second)
            .ok_or_else(|| eyre!("requests_per_second must be greater than 0"))?;
        tracing::debug!("YouTube Music rate limiter: {} requests/s", per_second);

        Ok(Self {
            client: reqwest::Client::new(),
            access_token: settings.access_token,
            language: settings.language,
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    fn with_context(&self, mut body: Value) -> Value {
        body["context"] = json!({
            "client": {
                "clientName": CLIENT_NAME,
                "clientVersion": CLIENT_VERSION,
                "hl": self.language,
            },
            "user": {},
        });
        body
    }

    async fn send(&self, endpoint: &str, body: &Value) -> reqwest::Result<Value> {
        self.rate_limiter.until_ready().await;
        self.client
            .post(format!("{BASE_URL}/{endpoint}?alt=json&prettyPrint=false"))
            .bearer_auth(&self.access_token)
            .header("X-Origin", ORIGIN)
            .header("Origin", ORIGIN)
            .json(body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    /// Writes are sent once.
    async fn post(&self, endpoint: &str, body: Value) -> Result<Value> {
        let body = self.with_context(body);
        self.send(endpoint, &body)
            .await
            .wrap_err_with(|| format!("YouTube Music {endpoint} request failed"))
    }

    /// Reads retry transient failures.
    async fn post_idempotent(&self, endpoint: &str, body: Value) -> Result<Value> {
        let body = self.with_context(body);
        let body = &body;
        let fetch = move || async move { self.send(endpoint, body).await };

        fetch
            .retry(ExponentialBuilder::default().with_max_times(3))
            .when(is_transient)
            .notify(|error, delay| {
                tracing::debug!("Retrying {} in {:?}: {}", endpoint, delay, error);
            })
            .await
            .wrap_err_with(|| format!("YouTube Music {endpoint} request failed"))
    }

    /// Browse `first` and follow continuation tokens, parsing each page.
    async fn browse_all<T>(
        &self,
        first: Value,
        parse_page: fn(&Value) -> Vec<T>,
    ) -> Result<Vec<T>> {
        let mut page = self.post_idempotent("browse", first).await?;
        let mut items = parse_page(&page);

        for _ in 0..MAX_PAGES {
            let Some(token) = parse::continuation_token(&page) else {
                break;
            };
            page = self
                .post_idempotent("browse", json!({ "continuation": token }))
                .await?;
            let next = parse_page(&page);
            if next.is_empty() {
                break;
            }
            items.extend(next);
        }
        Ok(items)
    }

    async fn edit_playlist(&self, playlist_id: &str, actions: Vec<Value>) -> Result<()> {
        let response = self
            .post(
                "browse/edit_playlist",
                json!({
                    "playlistId": bare_playlist_id(playlist_id),
                    "actions": actions,
                }),
            )
            .await?;
        match response["status"].as_str() {
            Some("STATUS_SUCCEEDED") | None => Ok(()),
            Some(status) => Err(eyre!("Editing playlist {playlist_id} returned {status}")),
        }
    }
}

#[async_trait::async_trait]
impl DestinationCatalog for YtMusicClient {
    async fn search(&self, query: &str) -> Result<Vec<SearchCandidate>> {
        let response = self.post_idempotent("search", json!({ "query": query })).await?;
        let results = parse::search_results(&response);
        tracing::debug!("'{}': {} results", query, results.len());
        Ok(results)
    }

    async fn create_playlist(
        &self,
        title: &str,
        description: &str,
        visibility: Visibility,
        track_ids: &[String],
    ) -> Result<String> {
        // angle brackets are rejected by the API
        let description: String = description.chars().filter(|c| !matches!(c, '<' | '>')).collect();
        let response = self
            .post(
                "playlist/create",
                json!({
                    "title": title,
                    "description": description,
                    "privacyStatus": visibility.as_str(),
                    "videoIds": track_ids,
                }),
            )
            .await?;
        response["playlistId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| eyre!("Creating '{title}' returned no playlist id"))
    }

    async fn playlist_tracks(&self, playlist_id: &str) -> Result<Vec<DestinationTrack>> {
        let browse_id = format!("VL{}", bare_playlist_id(playlist_id));
        self.browse_all(json!({ "browseId": browse_id }), parse::playlist_items)
            .await
    }

    async fn add_playlist_items(&self, playlist_id: &str, track_ids: &[String]) -> Result<()> {
        if track_ids.is_empty() {
            return Ok(());
        }
        self.edit_playlist(playlist_id, add_actions(track_ids)).await
    }

    async fn remove_playlist_items(
        &self,
        playlist_id: &str,
        tracks: &[DestinationTrack],
    ) -> Result<()> {
        let actions = remove_actions(tracks);
        if actions.is_empty() {
            return Ok(());
        }
        self.edit_playlist(playlist_id, actions).await
    }

    async fn delete_playlist(&self, playlist_id: &str) -> Result<()> {
        self.post(
            "playlist/delete",
            json!({ "playlistId": bare_playlist_id(playlist_id) }),
        )
        .await?;
        Ok(())
    }

    async fn library_playlists(&self) -> Result<Vec<LibraryPlaylist>> {
        self.browse_all(json!({ "browseId": LIBRARY_PLAYLISTS }), parse::library_playlists)
            .await
    }

    async fn like_track(&self, track_id: &str) -> Result<()> {
        self.post("like/like", json!({ "target": { "videoId": track_id } }))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::destination_track;

    fn settings(requests_per_second: u32) -> YtMusicSettings {
        YtMusicSettings {
            access_token: "token".to_string(),
            requests_per_second,
            language: "de".to_string(),
        }
    }

    #[test]
    fn test_zero_rate_is_rejected() {
        assert!(YtMusicClient::new(settings(0)).is_err());
    }

    #[test]
    fn test_missing_token_is_rejected() {
        let mut settings = settings(5);
        settings.access_token.clear();
        assert!(YtMusicClient::new(settings).is_err());
    }

    #[test]
    fn test_context_carries_language() {
        let client = YtMusicClient::new(settings(5)).unwrap();
        let body = client.with_context(json!({ "query": "abc" }));
        assert_eq!(body["query"], "abc");
        assert_eq!(body["context"]["client"]["clientName"], CLIENT_NAME);
        assert_eq!(body["context"]["client"]["hl"], "de");
    }

    #[test]
    fn test_bare_playlist_id() {
        assert_eq!(bare_playlist_id("VLPL123"), "PL123");
        assert_eq!(bare_playlist_id("PL123"), "PL123");
    }

    #[test]
    fn test_remove_actions_need_entry_handle() {
        let mut orphan = destination_track("Orphan", &["X"]);
        orphan.set_video_id = None;
        let actions = remove_actions(&[destination_track("Song", &["A"]), orphan]);

        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0]["setVideoId"], "s-Song");
        assert_eq!(actions[0]["removedVideoId"], "v-Song");
    }

    #[test]
    fn test_add_actions_skip_duplicates() {
        let actions = add_actions(&["a".to_string(), "b".to_string()]);
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[1]["addedVideoId"], "b");
        assert_eq!(actions[1]["dedupeOption"], "DEDUPE_OPTION_SKIP");
    }
}
