//! Append-only journal of sync operations with a per-playlist state view.
//!
//! The on-disk document has two keys: `operations`, the ordered records, and
//! `playlist_states`, the latest successful record per destination playlist
//! name. The state map is always equal to [`rebuild_states`] over the records.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime, TimeDelta, Timelike};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ports::source::SourceTrack;
use crate::services::store::{self, StoreError};

/// Relative drift in track counts that is tolerated before hashing.
const COUNT_DRIFT_TOLERANCE: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Create,
    Liked,
    All,
    AllSaved,
    Update,
    UpdateAll,
    InitialSetup,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Liked => "liked",
            OperationKind::All => "all",
            OperationKind::AllSaved => "all-saved",
            OperationKind::Update => "update",
            OperationKind::UpdateAll => "update-all",
            OperationKind::InitialSetup => "initial-setup",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub timestamp: NaiveDateTime,
    #[serde(rename = "operation")]
    pub kind: OperationKind,
    #[serde(rename = "spotify_name")]
    pub source_playlist_name: String,
    #[serde(rename = "youtube_name")]
    pub destination_playlist_name: String,
    #[serde(rename = "youtube_id")]
    pub destination_playlist_id: Option<String>,
    #[serde(rename = "track_hash")]
    pub track_content_hash: String,
    pub tracks_total: usize,
    pub tracks_found: usize,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistState {
    pub last_updated: NaiveDateTime,
    #[serde(rename = "track_hash")]
    pub track_content_hash: String,
    pub tracks_total: usize,
    pub tracks_found: usize,
    #[serde(rename = "youtube_id")]
    pub destination_playlist_id: Option<String>,
    #[serde(rename = "operation")]
    pub kind: OperationKind,
    #[serde(
        rename = "spotify_name",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_playlist_name: Option<String>,
}

impl From<&OperationRecord> for PlaylistState {
    fn from(record: &OperationRecord) -> Self {
        Self {
            last_updated: record.timestamp,
            track_content_hash: record.track_content_hash.clone(),
            tracks_total: record.tracks_total,
            tracks_found: record.tracks_found,
            destination_playlist_id: record.destination_playlist_id.clone(),
            kind: record.kind,
            source_playlist_name: Some(record.source_playlist_name.clone()),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LogDocument {
    #[serde(default)]
    operations: Vec<OperationRecord>,
    #[serde(default)]
    playlist_states: BTreeMap<String, PlaylistState>,
}

/// Input for [`OperationLog::append`].
#[derive(Debug, Clone, Copy)]
pub struct OperationEntry<'a> {
    pub kind: OperationKind,
    pub source_name: &'a str,
    pub destination_name: &'a str,
    pub tracks: &'a [SourceTrack],
    pub destination_id: Option<&'a str>,
    pub success: bool,
    /// Defaults to the number of tracks when absent.
    pub tracks_found: Option<usize>,
    pub tracks_total: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeReason {
    SourceCountDrift { logged: usize, current: usize },
    DestinationCountDrift { logged: usize, current: usize },
    ContentChanged,
}

impl fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeReason::SourceCountDrift { logged, current } => {
                write!(f, "source tracks changed: {logged} -> {current}")
            }
            ChangeReason::DestinationCountDrift { logged, current } => {
                write!(f, "destination tracks changed: {logged} -> {current}")
            }
            ChangeReason::ContentChanged => f.write_str("track content/order changed"),
        }
    }
}

/// Verdict of the cheap up-to-date check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// No state recorded; a full comparison is needed.
    Unknown,
    UpToDate {
        last_updated: NaiveDateTime,
    },
    Changed {
        reason: ChangeReason,
        last_updated: NaiveDateTime,
    },
}

/// A tracked destination playlist with the source playlist it mirrors.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedPlaylist {
    pub destination_name: String,
    pub source_name: String,
    pub state: PlaylistState,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LogStats {
    pub total_operations: usize,
    pub tracked_playlists: usize,
    pub successful: usize,
    pub failed: usize,
    pub last_operation: Option<NaiveDateTime>,
    pub by_kind: BTreeMap<OperationKind, usize>,
}

// =============================================================================
// Hashing
// =============================================================================

fn track_signature(track: &SourceTrack) -> String {
    format!(
        "{}|{}",
        track.artist.trim().to_lowercase(),
        track.name.trim().to_lowercase()
    )
}

/// Order-sensitive 128-bit digest over the track signatures, as 32 hex chars.
pub fn content_hash(tracks: &[SourceTrack]) -> String {
    let joined = tracks
        .iter()
        .map(track_signature)
        .collect::<Vec<_>>()
        .join("|");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    let digest = hasher.finalize();
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}

fn count_drifted(logged: usize, current: usize) -> bool {
    let allowed = (logged as f64 * COUNT_DRIFT_TOLERANCE).max(1.0);
    (current as f64 - logged as f64).abs() > allowed
}

/// Fold records into the state map: the last successful record per destination wins.
pub fn rebuild_states(records: &[OperationRecord]) -> BTreeMap<String, PlaylistState> {
    let mut states = BTreeMap::new();
    for record in records.iter().filter(|r| r.success) {
        states.insert(
            record.destination_playlist_name.clone(),
            PlaylistState::from(record),
        );
    }
    states
}

fn now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    // microsecond precision keeps timestamps compatible with existing logs
    now.with_nanosecond(now.nanosecond() / 1_000 * 1_000)
        .unwrap_or(now)
}

// =============================================================================
// Log
// =============================================================================

#[derive(Debug)]
pub struct OperationLog {
    path: PathBuf,
    document: LogDocument,
}

impl OperationLog {
    /// Load the log at `path`; a missing file is an empty log.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let document: LogDocument = store::read_json(path)?;
        tracing::debug!(
            "Loaded {} operations and {} playlist states from {}",
            document.operations.len(),
            document.playlist_states.len(),
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            document,
        })
    }

    /// Like [`OperationLog::open`], but an unreadable log disables history
    /// instead of failing the run.
    pub fn open_or_disabled(path: &Path) -> Option<Self> {
        match Self::open(path) {
            Ok(log) => Some(log),
            Err(error) => {
                tracing::warn!("Operation log unavailable, history disabled: {:#}", error);
                None
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub fn operations(&self) -> &[OperationRecord] {
        &self.document.operations
    }

    #[cfg(test)]
    pub fn states(&self) -> &BTreeMap<String, PlaylistState> {
        &self.document.playlist_states
    }

    pub fn state(&self, destination_name: &str) -> Option<&PlaylistState> {
        self.document.playlist_states.get(destination_name)
    }

    pub fn is_tracked(&self, destination_name: &str) -> bool {
        self.document.playlist_states.contains_key(destination_name)
    }

    /// Append a record, refresh the state on success and persist the whole log.
    pub fn append(&mut self, entry: OperationEntry<'_>) -> Result<(), StoreError> {
        self.append_at(entry, now())
    }

    fn append_at(
        &mut self,
        entry: OperationEntry<'_>,
        timestamp: NaiveDateTime,
    ) -> Result<(), StoreError> {
        let record = OperationRecord {
            timestamp,
            kind: entry.kind,
            source_playlist_name: entry.source_name.to_string(),
            destination_playlist_name: entry.destination_name.to_string(),
            destination_playlist_id: entry.destination_id.map(str::to_string),
            track_content_hash: content_hash(entry.tracks),
            tracks_total: entry.tracks_total.unwrap_or(entry.tracks.len()),
            tracks_found: entry.tracks_found.unwrap_or(entry.tracks.len()),
            success: entry.success,
        };

        if record.success {
            self.document
                .playlist_states
                .insert(record.destination_playlist_name.clone(), PlaylistState::from(&record));
        }
        self.document.operations.push(record);
        self.persist()
    }

    fn persist(&self) -> Result<(), StoreError> {
        store::write_json(&self.path, &self.document)
    }

    /// Decide whether `destination_name` still mirrors `source_tracks` without
    /// comparing track by track. Counts are checked before the hash.
    pub fn check_freshness(
        &self,
        source_name: &str,
        source_tracks: &[SourceTrack],
        destination_name: &str,
        destination_track_count: usize,
    ) -> Freshness {
        let Some(state) = self.state(destination_name) else {
            return Freshness::Unknown;
        };
        let last_updated = state.last_updated;

        let reason = if count_drifted(state.tracks_total, source_tracks.len()) {
            Some(ChangeReason::SourceCountDrift {
                logged: state.tracks_total,
                current: source_tracks.len(),
            })
        } else if count_drifted(state.tracks_found, destination_track_count) {
            Some(ChangeReason::DestinationCountDrift {
                logged: state.tracks_found,
                current: destination_track_count,
            })
        } else if content_hash(source_tracks) != state.track_content_hash {
            Some(ChangeReason::ContentChanged)
        } else {
            None
        };

        match reason {
            Some(reason) => {
                tracing::debug!("'{}' ({}) changed: {}", destination_name, source_name, reason);
                Freshness::Changed {
                    reason,
                    last_updated,
                }
            }
            None => Freshness::UpToDate { last_updated },
        }
    }

    /// Every tracked destination playlist, with the source name it was synced from.
    pub fn tracked_playlists(&self) -> Vec<TrackedPlaylist> {
        let mut last_source: HashMap<&str, &str> = HashMap::new();
        for record in &self.document.operations {
            last_source.insert(
                &record.destination_playlist_name,
                &record.source_playlist_name,
            );
        }

        self.document
            .playlist_states
            .iter()
            .map(|(destination_name, state)| {
                let source_name = state
                    .source_playlist_name
                    .clone()
                    .or_else(|| {
                        last_source
                            .get(destination_name.as_str())
                            .map(|s| s.to_string())
                    })
                    .unwrap_or_else(|| destination_name.clone());
                TrackedPlaylist {
                    destination_name: destination_name.clone(),
                    source_name,
                    state: state.clone(),
                }
            })
            .collect()
    }

    /// Seed state for a destination playlist that predates the log.
    /// Returns `false` without writing when it is already tracked.
    pub fn populate_initial_state(
        &mut self,
        source_name: &str,
        destination_name: &str,
        destination_id: &str,
        tracks: &[SourceTrack],
        destination_track_count: usize,
    ) -> Result<bool, StoreError> {
        if self.is_tracked(destination_name) {
            return Ok(false);
        }
        self.append(OperationEntry {
            kind: OperationKind::InitialSetup,
            source_name,
            destination_name,
            tracks,
            destination_id: Some(destination_id),
            success: true,
            tracks_found: Some(destination_track_count),
            tracks_total: Some(tracks.len()),
        })?;
        Ok(true)
    }

    pub fn history(&self, destination_name: &str) -> Vec<&OperationRecord> {
        self.document
            .operations
            .iter()
            .filter(|r| r.destination_playlist_name == destination_name)
            .collect()
    }

    pub fn stats(&self) -> LogStats {
        let operations = &self.document.operations;
        let mut by_kind = BTreeMap::new();
        for record in operations {
            *by_kind.entry(record.kind).or_insert(0) += 1;
        }
        let successful = operations.iter().filter(|r| r.success).count();
        LogStats {
            total_operations: operations.len(),
            tracked_playlists: self.document.playlist_states.len(),
            successful,
            failed: operations.len() - successful,
            last_operation: operations.last().map(|r| r.timestamp),
            by_kind,
        }
    }

    /// Drop records older than `days`, keeping the latest successful record of
    /// every destination so the state view can still be rebuilt.
    /// A window reaching past the representable calendar prunes nothing.
    pub fn prune_older_than(&mut self, days: u32) -> Result<usize, StoreError> {
        let cutoff = TimeDelta::try_days(i64::from(days))
            .and_then(|window| now().checked_sub_signed(window));
        match cutoff {
            Some(cutoff) => self.prune_before(cutoff),
            None => Ok(0),
        }
    }

    fn prune_before(&mut self, cutoff: NaiveDateTime) -> Result<usize, StoreError> {
        let mut latest_success: HashMap<String, usize> = HashMap::new();
        for (index, record) in self.document.operations.iter().enumerate() {
            if record.success {
                latest_success.insert(record.destination_playlist_name.clone(), index);
            }
        }
        let keep: Vec<bool> = self
            .document
            .operations
            .iter()
            .enumerate()
            .map(|(index, record)| {
                record.timestamp >= cutoff
                    || latest_success.get(&record.destination_playlist_name) == Some(&index)
            })
            .collect();

        let before = self.document.operations.len();
        let mut flags = keep.into_iter();
        self.document
            .operations
            .retain(|_| flags.next().unwrap_or(true));
        let removed = before - self.document.operations.len();

        if rebuild_states(&self.document.operations) != self.document.playlist_states {
            tracing::warn!(
                "Playlist states in {} are not backed by the remaining records",
                self.path.display()
            );
        }
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }
}
