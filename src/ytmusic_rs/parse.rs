//! Extraction of tracks and playlists from InnerTube JSON responses.
//!
//! The response layout differs between endpoints and changes over time, so
//! list items are located by renderer name anywhere in the document instead
//! of by fixed paths.

use serde_json::Value;

use crate::ports::destination::{DestinationTrack, LibraryPlaylist, ResultKind, SearchCandidate};

const LIST_ITEM: &str = "musicResponsiveListItemRenderer";
const TWO_ROW_ITEM: &str = "musicTwoRowItemRenderer";
const PAGE_TYPE_ARTIST: &str = "MUSIC_PAGE_TYPE_ARTIST";
const PAGE_TYPE_ALBUM: &str = "MUSIC_PAGE_TYPE_ALBUM";
const VIDEO_TYPE_SONG: &str = "MUSIC_VIDEO_TYPE_ATV";
const SEPARATOR: &str = " • ";

/// Item type labels shown in the second column of unfiltered search results.
const KIND_LABELS: &[&str] = &[
    "Song", "Video", "Album", "Single", "EP", "Artist", "Playlist", "Episode", "Podcast",
    "Profile",
];

/// Fields common to search results and playlist entries.
#[derive(Debug, Default)]
struct ListItem {
    video_id: Option<String>,
    set_video_id: Option<String>,
    title: String,
    artists: Vec<String>,
    album: Option<String>,
    duration_seconds: Option<u32>,
    music_video_type: Option<String>,
}

fn collect_renderers<'a>(value: &'a Value, key: &str, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            for (name, child) in map {
                if name == key {
                    out.push(child);
                } else {
                    collect_renderers(child, key, out);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_renderers(item, key, out);
            }
        }
        _ => {}
    }
}

fn renderers<'a>(value: &'a Value, key: &str) -> Vec<&'a Value> {
    let mut out = Vec::new();
    collect_renderers(value, key, &mut out);
    out
}

fn text(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| !s.is_empty())
}

fn runs(value: &Value) -> &[Value] {
    value["runs"].as_array().map(Vec::as_slice).unwrap_or_default()
}

fn flex_column(renderer: &Value, index: usize) -> &[Value] {
    runs(&renderer["flexColumns"][index]["musicResponsiveListItemFlexColumnRenderer"]["text"])
}

fn page_type(run: &Value) -> Option<&str> {
    run["navigationEndpoint"]["browseEndpoint"]["browseEndpointContextSupportedConfigs"]
        ["browseEndpointContextMusicConfig"]["pageType"]
        .as_str()
}

fn watch_endpoint(renderer: &Value) -> &Value {
    &renderer["overlay"]["musicItemThumbnailOverlayRenderer"]["content"]["musicPlayButtonRenderer"]
        ["playNavigationEndpoint"]["watchEndpoint"]
}

/// Parse `m:ss` or `h:mm:ss`.
pub fn parse_duration(text: &str) -> Option<u32> {
    let parts: Vec<&str> = text.trim().split(':').collect();
    if !(2..=3).contains(&parts.len()) {
        return None;
    }
    parts.iter().try_fold(0u32, |total, part| {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        total.checked_mul(60)?.checked_add(part.parse().ok()?)
    })
}

fn is_metadata(text: &str) -> bool {
    text.trim().is_empty()
        || text == SEPARATOR
        || text.trim() == "•"
        || KIND_LABELS.contains(&text)
        || parse_duration(text).is_some()
        || text.ends_with(" views")
        || text.ends_with(" plays")
}

fn parse_list_item(renderer: &Value) -> Option<ListItem> {
    let title = flex_column(renderer, 0)
        .iter()
        .filter_map(|run| text(&run["text"]))
        .collect::<String>();
    if title.is_empty() {
        return None;
    }

    let mut item = ListItem {
        title,
        ..ListItem::default()
    };

    let details: Vec<&Value> = (1..4).flat_map(|i| flex_column(renderer, i)).collect();
    for run in &details {
        let Some(run_text) = text(&run["text"]) else {
            continue;
        };
        match page_type(run) {
            Some(PAGE_TYPE_ARTIST) => item.artists.push(run_text.to_string()),
            Some(PAGE_TYPE_ALBUM) => item.album = Some(run_text.to_string()),
            _ => {
                if item.duration_seconds.is_none() {
                    item.duration_seconds = parse_duration(run_text);
                }
            }
        }
    }
    if item.artists.is_empty() {
        // artists without a channel page are plain text runs
        item.artists = flex_column(renderer, 1)
            .iter()
            .filter_map(|run| text(&run["text"]))
            .filter(|t| !is_metadata(t))
            .take(1)
            .map(str::to_string)
            .collect();
    }
    if item.duration_seconds.is_none() {
        let fixed =
            &renderer["fixedColumns"][0]["musicResponsiveListItemFixedColumnRenderer"]["text"];
        item.duration_seconds = runs(fixed)
            .iter()
            .filter_map(|run| text(&run["text"]))
            .chain(text(&fixed["simpleText"]))
            .find_map(parse_duration);
    }

    let data = &renderer["playlistItemData"];
    let watch = watch_endpoint(renderer);
    item.video_id = text(&data["videoId"])
        .or_else(|| text(&watch["videoId"]))
        .map(str::to_string);
    item.set_video_id = text(&data["playlistSetVideoId"]).map(str::to_string);
    item.music_video_type = text(
        &watch["watchEndpointMusicSupportedConfigs"]["watchEndpointMusicConfig"]["musicVideoType"],
    )
    .map(str::to_string);

    Some(item)
}

fn result_kind(item: &ListItem) -> ResultKind {
    match (&item.video_id, item.music_video_type.as_deref()) {
        (None, _) => ResultKind::Other,
        (Some(_), Some(VIDEO_TYPE_SONG)) => ResultKind::Song,
        (Some(_), _) => ResultKind::Video,
    }
}

/// Search results in response order. Items without a video id (albums,
/// artists, playlists) are kept as [`ResultKind::Other`] with an empty id.
pub fn search_results(response: &Value) -> Vec<SearchCandidate> {
    renderers(response, LIST_ITEM)
        .into_iter()
        .filter_map(parse_list_item)
        .map(|item| {
            let result_kind = result_kind(&item);
            SearchCandidate {
                id: item.video_id.unwrap_or_default(),
                title: item.title,
                artists: item.artists,
                album: item.album,
                duration_seconds: item.duration_seconds,
                result_kind,
            }
        })
        .collect()
}

/// Entries of a playlist page or continuation. Unavailable entries have no id.
pub fn playlist_items(response: &Value) -> Vec<DestinationTrack> {
    renderers(response, LIST_ITEM)
        .into_iter()
        .filter_map(parse_list_item)
        .map(|item| DestinationTrack {
            id: item.video_id,
            set_video_id: item.set_video_id,
            title: item.title,
            artists: item.artists,
            duration_seconds: item.duration_seconds,
        })
        .collect()
}

/// Playlists from the library grid, without the "New playlist" tile.
pub fn library_playlists(response: &Value) -> Vec<LibraryPlaylist> {
    renderers(response, TWO_ROW_ITEM)
        .into_iter()
        .filter_map(|renderer| {
            let browse_id = text(&renderer["navigationEndpoint"]["browseEndpoint"]["browseId"])?;
            let id = browse_id.strip_prefix("VL")?;
            let title = runs(&renderer["title"])
                .iter()
                .filter_map(|run| text(&run["text"]))
                .collect::<String>();
            let track_count = runs(&renderer["subtitle"])
                .iter()
                .filter_map(|run| text(&run["text"]))
                .find_map(leading_count);
            Some(LibraryPlaylist {
                id: id.to_string(),
                title,
                track_count,
            })
        })
        .collect()
}

/// `"1,234 songs"` -> 1234
fn leading_count(text: &str) -> Option<u32> {
    let (number, rest) = text.split_once(' ')?;
    if !(rest.starts_with("song") || rest.starts_with("track")) {
        return None;
    }
    number.replace(',', "").parse().ok()
}

/// Token for the next page, in either continuation format.
pub fn continuation_token(response: &Value) -> Option<String> {
    let command = renderers(response, "continuationItemRenderer")
        .into_iter()
        .find_map(|r| {
            text(&r["continuationEndpoint"]["continuationCommand"]["token"]).map(str::to_string)
        });
    command.or_else(|| {
        renderers(response, "nextContinuationData")
            .into_iter()
            .find_map(|data| text(&data["continuation"]).map(str::to_string))
    })
}
