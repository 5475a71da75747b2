use color_eyre::eyre::Result;
use url::Url;

/// Whether a source reference points at a playlist or an album.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Playlist,
    Album,
}

/// A resolvable handle to a track collection in the source catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub kind: SourceKind,
    pub id: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("`{0}` is not a playlist, album or track link")]
    Unrecognised(String),
    #[error("`{link}` points at a {found}, expected a {expected}")]
    WrongKind {
        link: String,
        found: String,
        expected: &'static str,
    },
}

impl SourceRef {
    pub fn playlist(id: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Playlist,
            id: id.into(),
        }
    }

    pub fn album(id: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Album,
            id: id.into(),
        }
    }

    /// Parse a share URL (`https://open.spotify.com/playlist/<id>?si=..`),
    /// a URI (`spotify:album:<id>`) or a bare id, which is taken as a playlist.
    pub fn parse(link: &str) -> Result<Self, LinkError> {
        let (kind, id) = split_link(link)?;
        match kind.as_deref() {
            None | Some("playlist") => Ok(Self::playlist(id)),
            Some("album") => Ok(Self::album(id)),
            Some(other) => Err(LinkError::WrongKind {
                link: link.to_string(),
                found: other.to_string(),
                expected: "playlist or album",
            }),
        }
    }
}

/// Parse a track link or bare track id.
pub fn parse_track_link(link: &str) -> Result<String, LinkError> {
    match split_link(link)? {
        (None, id) => Ok(id),
        (Some(kind), id) if kind == "track" => Ok(id),
        (Some(kind), _) => Err(LinkError::WrongKind {
            link: link.to_string(),
            found: kind,
            expected: "track",
        }),
    }
}

/// Split a link into its kind and id. Bare ids carry no kind.
fn split_link(link: &str) -> Result<(Option<String>, String), LinkError> {
    let link = link.trim();
    let unrecognised = || LinkError::Unrecognised(link.to_string());

    if let Some(rest) = link.strip_prefix("spotify:") {
        let mut parts = rest.split(':');
        let kind = parts.next().ok_or_else(unrecognised)?;
        let id = parts.next().filter(|id| !id.is_empty()).ok_or_else(unrecognised)?;
        return Ok((Some(kind.to_string()), id.to_string()));
    }

    if let Ok(url) = Url::parse(link) {
        let mut segments = url
            .path_segments()
            .ok_or_else(unrecognised)?
            .filter(|segment| !segment.is_empty() && !segment.starts_with("intl-"));
        let kind = segments.next().ok_or_else(unrecognised)?;
        let id = segments.next().ok_or_else(unrecognised)?;
        return Ok((Some(kind.to_string()), id.to_string()));
    }

    if !link.is_empty() && link.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Ok((None, link.to_string()));
    }

    Err(unrecognised())
}

/// Decoupled representation of a source track.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTrack {
    pub name: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_seconds: Option<u32>,
}

/// A fetched playlist or album with its ordered tracks.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistSnapshot {
    pub name: String,
    pub description: String,
    pub is_public: bool,
    pub tracks: Vec<SourceTrack>,
}

/// Listing entry for saved or public collections; tracks are fetched separately.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePlaylistSummary {
    pub reference: SourceRef,
    pub name: String,
    pub owner: Option<String>,
    pub track_count: u32,
}

/// How the source client is authorised. Library access needs a user grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    ClientCredentials,
    User,
}

/// Port trait wrapping the source catalog capabilities used by the sync services.
///
/// Implemented by `spotify_rs::SpotifyApiClient` in production and mocked in tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SourceCatalog: Send + Sync {
    fn auth_mode(&self) -> AuthMode;
    async fn playlist(&self, reference: &SourceRef) -> Result<PlaylistSnapshot>;
    async fn user_playlists(&self, user_id: &str) -> Result<Vec<SourcePlaylistSummary>>;
    async fn saved_playlists(&self) -> Result<Vec<SourcePlaylistSummary>>;
    async fn saved_albums(&self) -> Result<Vec<SourcePlaylistSummary>>;
    async fn liked_tracks(&self) -> Result<PlaylistSnapshot>;
    async fn track(&self, track_id: &str) -> Result<SourceTrack>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_share_url() {
        let parsed =
            SourceRef::parse("https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M?si=abc")
                .unwrap();
        assert_eq!(parsed, SourceRef::playlist("37i9dQZF1DXcBWIGoYBM5M"));
    }

    #[test]
    fn test_parse_localised_album_url() {
        let parsed =
            SourceRef::parse("https://open.spotify.com/intl-de/album/4aawyAB9vmqN3uQ7FjRGTy")
                .unwrap();
        assert_eq!(parsed, SourceRef::album("4aawyAB9vmqN3uQ7FjRGTy"));
    }

    #[test]
    fn test_parse_uri_and_bare_id() {
        assert_eq!(
            SourceRef::parse("spotify:album:abc123").unwrap(),
            SourceRef::album("abc123")
        );
        assert_eq!(SourceRef::parse("abc123").unwrap(), SourceRef::playlist("abc123"));
    }

    #[test]
    fn test_parse_rejects_track_as_playlist() {
        let err = SourceRef::parse("spotify:track:xyz").unwrap_err();
        assert!(matches!(err, LinkError::WrongKind { .. }));
    }

    #[test]
    fn test_parse_track_link() {
        assert_eq!(
            parse_track_link("https://open.spotify.com/track/0VjIjW4GlUZAMYd2vXMi3b").unwrap(),
            "0VjIjW4GlUZAMYd2vXMi3b"
        );
        assert!(parse_track_link("spotify:album:abc").is_err());
        assert!(parse_track_link("not a link!").is_err());
    }

    #[test]
    fn test_parse_track_link_rejects_playlists() {
        assert_eq!(parse_track_link("0VjIjW4GlUZAMYd2vXMi3b").unwrap(), "0VjIjW4GlUZAMYd2vXMi3b");
        assert_eq!(
            parse_track_link("spotify:playlist:37i9dQZF1DX").unwrap_err(),
            LinkError::WrongKind {
                link: "spotify:playlist:37i9dQZF1DX".to_string(),
                found: "playlist".to_string(),
                expected: "track",
            }
        );
        assert!(parse_track_link("https://open.spotify.com/playlist/37i9dQZF1DX").is_err());
    }
}
