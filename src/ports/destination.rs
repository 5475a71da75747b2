use color_eyre::eyre::Result;

/// What kind of item a search candidate is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultKind {
    Song,
    Video,
    /// Albums, artists, playlists and anything else without a playable id.
    Other,
}

/// One ranked entry from a destination search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCandidate {
    pub id: String,
    pub title: String,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub duration_seconds: Option<u32>,
    pub result_kind: ResultKind,
}

/// A track as it currently sits in a destination playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationTrack {
    pub id: Option<String>,
    /// Per-entry handle required to remove this item from its playlist.
    pub set_video_id: Option<String>,
    pub title: String,
    pub artists: Vec<String>,
    pub duration_seconds: Option<u32>,
}

/// A playlist in the destination user's library.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryPlaylist {
    pub id: String,
    pub title: String,
    pub track_count: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Private,
    Public,
}

impl Visibility {
    pub fn from_public(public: bool) -> Self {
        if public {
            Visibility::Public
        } else {
            Visibility::Private
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "PRIVATE",
            Visibility::Public => "PUBLIC",
        }
    }
}

/// Port trait wrapping the destination catalog capabilities used by the sync services.
///
/// Implemented by `ytmusic_rs::YtMusicClient` in production and mocked in tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait DestinationCatalog: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchCandidate>>;
    async fn create_playlist(
        &self,
        title: &str,
        description: &str,
        visibility: Visibility,
        track_ids: &[String],
    ) -> Result<String>;
    async fn playlist_tracks(&self, playlist_id: &str) -> Result<Vec<DestinationTrack>>;
    async fn add_playlist_items(&self, playlist_id: &str, track_ids: &[String]) -> Result<()>;
    async fn remove_playlist_items(
        &self,
        playlist_id: &str,
        tracks: &[DestinationTrack],
    ) -> Result<()>;
    async fn delete_playlist(&self, playlist_id: &str) -> Result<()>;
    async fn library_playlists(&self) -> Result<Vec<LibraryPlaylist>>;
    async fn like_track(&self, track_id: &str) -> Result<()>;
}
