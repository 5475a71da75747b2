use crate::ports::destination::{DestinationTrack, LibraryPlaylist, ResultKind, SearchCandidate};
use crate::ports::source::{PlaylistSnapshot, SourceRef, SourcePlaylistSummary, SourceTrack};

pub fn source_track(name: &str, artist: &str) -> SourceTrack {
    SourceTrack {
        name: name.to_string(),
        artist: artist.to_string(),
        album: None,
        duration_seconds: None,
    }
}

pub fn tracks(pairs: &[(&str, &str)]) -> Vec<SourceTrack> {
    pairs
        .iter()
        .map(|(name, artist)| source_track(name, artist))
        .collect()
}

pub fn snapshot(name: &str, tracks: Vec<SourceTrack>) -> PlaylistSnapshot {
    PlaylistSnapshot {
        name: name.to_string(),
        description: String::new(),
        is_public: false,
        tracks,
    }
}

pub fn summary(id: &str, name: &str, track_count: u32) -> SourcePlaylistSummary {
    SourcePlaylistSummary {
        reference: SourceRef::playlist(id),
        name: name.to_string(),
        owner: None,
        track_count,
    }
}

pub fn destination_track(title: &str, artists: &[&str]) -> DestinationTrack {
    DestinationTrack {
        id: Some(format!("v-{title}")),
        set_video_id: Some(format!("s-{title}")),
        title: title.to_string(),
        artists: artists.iter().map(|a| a.to_string()).collect(),
        duration_seconds: None,
    }
}

pub fn library_playlist(id: &str, title: &str) -> LibraryPlaylist {
    LibraryPlaylist {
        id: id.to_string(),
        title: title.to_string(),
        track_count: None,
    }
}

pub fn candidate(
    id: &str,
    title: &str,
    artists: &[&str],
    duration_seconds: Option<u32>,
    result_kind: ResultKind,
) -> SearchCandidate {
    SearchCandidate {
        id: id.to_string(),
        title: title.to_string(),
        artists: artists.iter().map(|a| a.to_string()).collect(),
        album: None,
        duration_seconds,
        result_kind,
    }
}
