use serde::Deserialize;

use crate::ports::source::{SourcePlaylistSummary, SourceRef, SourceTrack};

/// Spotify OAuth token response
#[derive(Debug, Clone, Deserialize)]
pub struct SpotifyTokenResponse {
    pub access_token: String,
    pub expires_in: u64,
}

/// One page of a paginated endpoint.
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

/// Spotify playlist as listed in a library page
#[derive(Debug, Clone, Deserialize)]
pub struct SpotifyPlaylist {
    pub id: String,
    pub name: String,
    pub owner: Option<SpotifyUser>,
    pub tracks: SpotifyPlaylistTracks,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpotifyPlaylistTracks {
    pub total: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpotifyUser {
    pub id: String,
    pub display_name: Option<String>,
}

/// Playlist metadata without its track pages.
#[derive(Debug, Deserialize)]
pub struct SpotifyPlaylistDetails {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub public: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct SpotifyPlaylistItem {
    pub track: Option<SpotifyTrack>,
}

/// Spotify track from API
#[derive(Debug, Clone, Deserialize)]
pub struct SpotifyTrack {
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<SpotifyArtist>,
    pub album: Option<SpotifyAlbumRef>,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpotifyArtist {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpotifyAlbumRef {
    pub name: String,
}

/// Album with its first page of tracks embedded.
#[derive(Debug, Deserialize)]
pub struct SpotifyAlbum {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<SpotifyArtist>,
    pub total_tracks: u32,
    pub tracks: Page<SpotifyTrack>,
}

#[derive(Debug, Deserialize)]
pub struct SpotifySavedAlbum {
    pub album: SpotifyAlbum,
}

#[derive(Debug, Deserialize)]
pub struct SpotifySavedTrack {
    pub track: SpotifyTrack,
}

impl SpotifyTrack {
    /// Local files and podcast episodes carry no id or no artist and cannot be matched.
    pub fn into_source_track(self, album_name: Option<&str>) -> Option<SourceTrack> {
        self.id.as_ref()?;
        let artist = self.artists.into_iter().next()?.name;
        Some(SourceTrack {
            name: self.name,
            artist,
            album: self
                .album
                .map(|a| a.name)
                .or_else(|| album_name.map(str::to_string)),
            duration_seconds: self.duration_ms.map(|ms| (ms / 1000) as u32),
        })
    }
}

impl From<SpotifyPlaylist> for SourcePlaylistSummary {
    fn from(playlist: SpotifyPlaylist) -> Self {
        Self {
            reference: SourceRef::playlist(&playlist.id),
            name: playlist.name,
            owner: playlist.owner.map(|o| o.display_name.unwrap_or(o.id)),
            track_count: playlist.tracks.total,
        }
    }
}

impl From<&SpotifyAlbum> for SourcePlaylistSummary {
    fn from(album: &SpotifyAlbum) -> Self {
        Self {
            reference: SourceRef::album(&album.id),
            name: album.name.clone(),
            owner: album.artists.first().map(|a| a.name.clone()),
            track_count: album.total_tracks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_uses_first_artist_and_seconds() {
        let track: SpotifyTrack = serde_json::from_value(serde_json::json!({
            "id": "4uLU6hMCjMI75M1A2tKUQC",
            "name": "Never Gonna Give You Up",
            "artists": [{"name": "Rick Astley"}, {"name": "Someone Else"}],
            "album": {"name": "Whenever You Need Somebody"},
            "duration_ms": 213573
        }))
        .unwrap();

        let track = track.into_source_track(None).unwrap();
        assert_eq!(track.artist, "Rick Astley");
        assert_eq!(track.album.as_deref(), Some("Whenever You Need Somebody"));
        assert_eq!(track.duration_seconds, Some(213));
    }

    #[test]
    fn test_local_files_are_dropped() {
        let track: SpotifyTrack = serde_json::from_value(serde_json::json!({
            "id": null,
            "name": "my_recording.mp3",
            "artists": [{"name": "Me"}],
            "album": null,
            "duration_ms": 1000
        }))
        .unwrap();
        assert!(track.into_source_track(None).is_none());
    }

    #[test]
    fn test_album_tracks_inherit_album_name() {
        let track: SpotifyTrack = serde_json::from_value(serde_json::json!({
            "id": "t1",
            "name": "Intro",
            "artists": [{"name": "Band"}]
        }))
        .unwrap();
        let track = track.into_source_track(Some("Debut")).unwrap();
        assert_eq!(track.album.as_deref(), Some("Debut"));
        assert_eq!(track.duration_seconds, None);
    }

    #[test]
    fn test_playlist_summary_prefers_display_name() {
        let playlist: SpotifyPlaylist = serde_json::from_value(serde_json::json!({
            "id": "p1",
            "name": "Road Trip",
            "owner": {"id": "user123", "display_name": "Sam"},
            "tracks": {"total": 42}
        }))
        .unwrap();
        let summary = SourcePlaylistSummary::from(playlist);
        assert_eq!(summary.reference, SourceRef::playlist("p1"));
        assert_eq!(summary.owner.as_deref(), Some("Sam"));
        assert_eq!(summary.track_count, 42);
    }
}
