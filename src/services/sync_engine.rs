//! Per-playlist reconciliation between a source playlist and its destination copy.
//!
//! `reconcile` walks: find the destination playlist by name, check the log for
//! a cheap up-to-date verdict, resolve source tracks, compare availability and
//! order, then skip, rewrite or append. Every decided outcome is journaled.

use std::collections::HashSet;
use std::time::Duration;

use color_eyre::eyre::{Result, WrapErr, eyre};

use crate::matching::similarity::{names_match, tracks_similar};
use crate::ports::destination::{
    DestinationCatalog, DestinationTrack, LibraryPlaylist, Visibility,
};
use crate::ports::source::{PlaylistSnapshot, SourceTrack};
use crate::services::operation_log::{Freshness, OperationEntry, OperationKind, OperationLog};
use crate::services::track_matcher::TrackMatcher;

const AVAILABILITY_LOWER: f64 = 0.95;
const AVAILABILITY_UPPER: f64 = 1.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonWindow {
    First(usize),
    Full,
}

impl ComparisonWindow {
    /// `0` means compare everything.
    pub fn from_limit(limit: usize) -> Self {
        if limit == 0 {
            ComparisonWindow::Full
        } else {
            ComparisonWindow::First(limit)
        }
    }

    fn apply(&self, len: usize) -> usize {
        match self {
            ComparisonWindow::First(limit) => len.min(*limit),
            ComparisonWindow::Full => len,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    pub use_cache: bool,
    pub append: bool,
    pub tolerance: f64,
    pub window: ComparisonWindow,
    pub visibility: Visibility,
    pub like: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            use_cache: false,
            append: false,
            tolerance: 0.9,
            window: ComparisonWindow::First(10),
            visibility: Visibility::Private,
            like: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnMissing {
    Create,
    Report,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnExisting {
    Skip,
    Compare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePolicy {
    pub on_missing: OnMissing,
    pub on_existing: OnExisting,
}

impl ReconcilePolicy {
    /// Create what is missing, leave existing playlists alone.
    pub const TRANSFER: Self = Self {
        on_missing: OnMissing::Create,
        on_existing: OnExisting::Skip,
    };
    /// Only bring existing playlists up to date.
    pub const UPDATE: Self = Self {
        on_missing: OnMissing::Report,
        on_existing: OnExisting::Compare,
    };
    #[cfg(test)]
    pub const FULL: Self = Self {
        on_missing: OnMissing::Create,
        on_existing: OnExisting::Compare,
    };
}

/// One playlist worth of work.
#[derive(Debug, Clone, Copy)]
pub struct SyncJob<'a> {
    pub kind: OperationKind,
    pub source_name: &'a str,
    pub destination_name: &'a str,
    pub description: &'a str,
    pub tracks: &'a [SourceTrack],
}

impl<'a> SyncJob<'a> {
    pub fn new(
        kind: OperationKind,
        snapshot: &'a PlaylistSnapshot,
        destination_name: &'a str,
    ) -> Self {
        Self {
            kind,
            source_name: &snapshot.name,
            destination_name,
            description: &snapshot.description,
            tracks: &snapshot.tracks,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    UpToDate,
    InOrder { match_ratio: f64 },
    AlreadyExists { existing_name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Created {
        playlist_id: String,
        title: String,
        tracks_found: usize,
    },
    Skipped(SkipReason),
    Updated { playlist_id: String, tracks_added: usize },
    Appended { playlist_id: String, tracks_added: usize },
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Availability {
    pub ratio: f64,
    pub significant_difference: bool,
}

/// Destination count over matchable source count; 0 when nothing is matchable.
pub fn availability(destination_count: usize, available_count: usize) -> Availability {
    let ratio = if available_count == 0 {
        0.0
    } else {
        destination_count as f64 / available_count as f64
    };
    Availability {
        ratio,
        significant_difference: !(AVAILABILITY_LOWER..=AVAILABILITY_UPPER).contains(&ratio),
    }
}

/// Fraction of pairwise-similar tracks within the comparison window.
pub fn order_match_ratio(
    available: &[&SourceTrack],
    destination: &[DestinationTrack],
    window: ComparisonWindow,
) -> f64 {
    let compared = window.apply(available.len().min(destination.len()));
    if compared == 0 {
        return 0.0;
    }
    let matches = available
        .iter()
        .zip(destination)
        .take(compared)
        .filter(|(source, dest)| tracks_similar(source, dest))
        .count();
    matches as f64 / compared as f64
}

fn dedup_ids<'a>(ids: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert((*id).clone()))
        .cloned()
        .collect()
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Pause after clearing a playlist before writing to it again.
    pub settle_delay: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(2),
        }
    }
}

pub struct SyncEngine<D: DestinationCatalog> {
    destination: D,
    matcher: TrackMatcher,
    log: Option<OperationLog>,
    settings: EngineSettings,
}

impl<D: DestinationCatalog> SyncEngine<D> {
    pub fn new(
        destination: D,
        matcher: TrackMatcher,
        log: Option<OperationLog>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            destination,
            matcher,
            log,
            settings,
        }
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    pub fn log(&self) -> Option<&OperationLog> {
        self.log.as_ref()
    }

    pub fn log_mut(&mut self) -> Option<&mut OperationLog> {
        self.log.as_mut()
    }

    pub async fn resolve_track(
        &mut self,
        track: &SourceTrack,
        use_cache: bool,
    ) -> Result<Option<String>> {
        self.matcher
            .resolve_track(&self.destination, track, use_cache)
            .await
    }

    /// First library playlist whose title matches `name`.
    pub async fn find_destination(&self, name: &str) -> Result<Option<LibraryPlaylist>> {
        let playlists = self
            .destination
            .library_playlists()
            .await
            .wrap_err("Failed to list destination playlists")?;
        Ok(playlists.into_iter().find(|p| names_match(&p.title, name)))
    }

    /// Create a new destination playlist unconditionally.
    pub async fn create(
        &mut self,
        job: SyncJob<'_>,
        options: &SyncOptions,
    ) -> Result<SyncOutcome> {
        let result = self.create_playlist(job, options).await;
        self.record_if_failed(job, result)
    }

    /// Run the reconciliation state machine for one playlist.
    pub async fn reconcile(
        &mut self,
        job: SyncJob<'_>,
        options: &SyncOptions,
        policy: ReconcilePolicy,
    ) -> Result<SyncOutcome> {
        let result = self.reconcile_playlist(job, options, policy).await;
        self.record_if_failed(job, result)
    }

    /// Rewrite (or append to) a named destination playlist without the
    /// up-to-date shortcut.
    pub async fn update(&mut self, job: SyncJob<'_>, options: &SyncOptions) -> Result<SyncOutcome> {
        let result = self.update_playlist(job, options).await;
        self.record_if_failed(job, result)
    }

    async fn create_playlist(
        &mut self,
        job: SyncJob<'_>,
        options: &SyncOptions,
    ) -> Result<SyncOutcome> {
        let resolved = self
            .matcher
            .resolve_tracks(&self.destination, job.tracks, options.use_cache)
            .await?;
        let ids = dedup_ids(resolved.iter().flatten());

        let playlist_id = self
            .destination
            .create_playlist(job.destination_name, job.description, options.visibility, &ids)
            .await
            .wrap_err_with(|| format!("Failed to create playlist '{}'", job.destination_name))?;

        if options.like {
            for id in &ids {
                self.destination
                    .like_track(id)
                    .await
                    .wrap_err_with(|| format!("Failed to like track {id}"))?;
            }
        }

        tracing::info!(
            "Created '{}' with {}/{} tracks",
            job.destination_name,
            ids.len(),
            job.tracks.len()
        );
        self.record(job, Some(&playlist_id), true, ids.len());
        Ok(SyncOutcome::Created {
            playlist_id,
            title: job.destination_name.to_string(),
            tracks_found: ids.len(),
        })
    }

    async fn reconcile_playlist(
        &mut self,
        job: SyncJob<'_>,
        options: &SyncOptions,
        policy: ReconcilePolicy,
    ) -> Result<SyncOutcome> {
        // NOT_STARTED -> FOUND_ON_DESTINATION | NOT_FOUND
        let Some(existing) = self.find_destination(job.destination_name).await? else {
            return match policy.on_missing {
                OnMissing::Report => {
                    tracing::info!("'{}' not found on the destination", job.destination_name);
                    Ok(SyncOutcome::NotFound)
                }
                OnMissing::Create => self.create_playlist(job, options).await,
            };
        };
        if policy.on_existing == OnExisting::Skip {
            tracing::info!(
                "'{}' already exists as '{}', skipping",
                job.destination_name,
                existing.title
            );
            return Ok(SyncOutcome::Skipped(SkipReason::AlreadyExists {
                existing_name: existing.title,
            }));
        }

        // FOUND_ON_DESTINATION -> SIZE_CHECKED
        let destination_tracks = self
            .destination
            .playlist_tracks(&existing.id)
            .await
            .wrap_err_with(|| format!("Failed to list tracks of '{}'", existing.title))?;

        if let Some(log) = &self.log {
            match log.check_freshness(
                job.source_name,
                job.tracks,
                job.destination_name,
                destination_tracks.len(),
            ) {
                Freshness::UpToDate { last_updated } => {
                    tracing::info!(
                        "'{}' is up to date (last synced {})",
                        job.destination_name,
                        last_updated.format("%Y-%m-%d")
                    );
                    return Ok(SyncOutcome::Skipped(SkipReason::UpToDate));
                }
                Freshness::Changed { reason, .. } => {
                    tracing::info!("'{}' needs a check: {}", job.destination_name, reason)
                }
                Freshness::Unknown => {
                    tracing::debug!("No history for '{}'", job.destination_name)
                }
            }
        }

        // SIZE_CHECKED -> AVAILABILITY_CHECKED
        let resolved = self
            .matcher
            .resolve_tracks(&self.destination, job.tracks, options.use_cache)
            .await?;
        let available: Vec<(&SourceTrack, &String)> = job
            .tracks
            .iter()
            .zip(resolved.iter())
            .filter_map(|(track, id)| id.as_ref().map(|id| (track, id)))
            .collect();
        let check = availability(destination_tracks.len(), available.len());
        tracing::debug!(
            "'{}': {} destination tracks, {} available, ratio {:.2}",
            job.destination_name,
            destination_tracks.len(),
            available.len(),
            check.ratio
        );

        // AVAILABILITY_CHECKED -> DECIDED
        if !check.significant_difference {
            let available_tracks: Vec<&SourceTrack> = available.iter().map(|(t, _)| *t).collect();
            let match_ratio =
                order_match_ratio(&available_tracks, &destination_tracks, options.window);
            if match_ratio >= options.tolerance {
                tracing::info!(
                    "'{}' matches in order ({:.0}%), skipping",
                    job.destination_name,
                    match_ratio * 100.0
                );
                self.record(job, Some(&existing.id), true, destination_tracks.len());
                return Ok(SyncOutcome::Skipped(SkipReason::InOrder { match_ratio }));
            }
            tracing::debug!(
                "'{}' order match {:.2} below tolerance {:.2}",
                job.destination_name,
                match_ratio,
                options.tolerance
            );
        }

        let ids = dedup_ids(available.iter().map(|(_, id)| *id));
        self.write_tracks(job, &existing.id, &destination_tracks, ids, options.append)
            .await
    }

    async fn update_playlist(
        &mut self,
        job: SyncJob<'_>,
        options: &SyncOptions,
    ) -> Result<SyncOutcome> {
        let existing = self
            .find_destination(job.destination_name)
            .await?
            .ok_or_else(|| eyre!("No destination playlist matches '{}'", job.destination_name))?;
        let destination_tracks = self
            .destination
            .playlist_tracks(&existing.id)
            .await
            .wrap_err_with(|| format!("Failed to list tracks of '{}'", existing.title))?;
        let resolved = self
            .matcher
            .resolve_tracks(&self.destination, job.tracks, options.use_cache)
            .await?;
        let ids = dedup_ids(resolved.iter().flatten());
        self.write_tracks(job, &existing.id, &destination_tracks, ids, options.append)
            .await
    }

    async fn write_tracks(
        &mut self,
        job: SyncJob<'_>,
        playlist_id: &str,
        existing: &[DestinationTrack],
        ids: Vec<String>,
        append: bool,
    ) -> Result<SyncOutcome> {
        if !append {
            if !existing.is_empty() {
                self.destination
                    .remove_playlist_items(playlist_id, existing)
                    .await
                    .wrap_err_with(|| format!("Failed to clear '{}'", job.destination_name))?;
            }
            tokio::time::sleep(self.settings.settle_delay).await;
        }

        if !ids.is_empty() {
            self.destination
                .add_playlist_items(playlist_id, &ids)
                .await
                .wrap_err_with(|| format!("Failed to add tracks to '{}'", job.destination_name))?;
        }

        let tracks_added = ids.len();
        if append {
            tracing::info!("Appended {} tracks to '{}'", tracks_added, job.destination_name);
            self.record(job, Some(playlist_id), true, existing.len() + tracks_added);
            Ok(SyncOutcome::Appended {
                playlist_id: playlist_id.to_string(),
                tracks_added,
            })
        } else {
            tracing::info!("Rewrote '{}' with {} tracks", job.destination_name, tracks_added);
            self.record(job, Some(playlist_id), true, tracks_added);
            Ok(SyncOutcome::Updated {
                playlist_id: playlist_id.to_string(),
                tracks_added,
            })
        }
    }

    fn record(
        &mut self,
        job: SyncJob<'_>,
        destination_id: Option<&str>,
        success: bool,
        tracks_found: usize,
    ) {
        let Some(log) = self.log.as_mut() else {
            return;
        };
        let entry = OperationEntry {
            kind: job.kind,
            source_name: job.source_name,
            destination_name: job.destination_name,
            tracks: job.tracks,
            destination_id,
            success,
            tracks_found: Some(tracks_found),
            tracks_total: Some(job.tracks.len()),
        };
        if let Err(error) = log.append(entry) {
            tracing::warn!("Could not write operation log: {:#}", error);
        }
    }

    /// Log a failed attempt for work that never reached the engine.
    pub fn record_failure(&mut self, job: SyncJob<'_>) {
        self.record(job, None, false, 0);
    }

    fn record_if_failed(
        &mut self,
        job: SyncJob<'_>,
        result: Result<SyncOutcome>,
    ) -> Result<SyncOutcome> {
        if let Err(error) = &result {
            tracing::warn!("'{}' failed: {:#}", job.destination_name, error);
            self.record(job, None, false, 0);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::destination::{MockDestinationCatalog, ResultKind};
    use crate::services::lookup_cache::LookupCache;
    use crate::test_utils::{candidate, destination_track, library_playlist, source_track, tracks};

    fn engine(
        destination: MockDestinationCatalog,
        dir: &std::path::Path,
    ) -> SyncEngine<MockDestinationCatalog> {
        settling_engine(destination, dir, Duration::ZERO)
    }

    fn settling_engine(
        destination: MockDestinationCatalog,
        dir: &std::path::Path,
        settle_delay: Duration,
    ) -> SyncEngine<MockDestinationCatalog> {
        let matcher = TrackMatcher::new(LookupCache::in_memory(), None).unwrap();
        let log = OperationLog::open(&dir.join("playlist_operations.json")).unwrap();
        SyncEngine::new(destination, matcher, Some(log), EngineSettings { settle_delay })
    }

    fn three_tracks() -> Vec<SourceTrack> {
        tracks(&[
            ("Blinding Lights", "The Weeknd"),
            ("Save Your Tears", "The Weeknd"),
            ("Starboy Remastered", "The Weeknd"),
        ])
    }

    /// Search answers with a song whose id is the track title.
    fn expect_search(destination: &mut MockDestinationCatalog) {
        destination.expect_search().returning(|query| {
            let title = query.trim_start_matches("The Weeknd ").to_string();
            Ok(vec![candidate(&title, &title, &["The Weeknd"], None, ResultKind::Song)])
        });
    }

    fn as_destination(tracks: &[SourceTrack]) -> Vec<DestinationTrack> {
        tracks
            .iter()
            .map(|t| destination_track(&t.name, &[t.artist.as_str()]))
            .collect()
    }

    fn job<'a>(kind: OperationKind, name: &'a str, tracks: &'a [SourceTrack]) -> SyncJob<'a> {
        SyncJob {
            kind,
            source_name: name,
            destination_name: name,
            description: "",
            tracks,
        }
    }

    #[test]
    fn test_availability_ratio_bounds() {
        assert!(!availability(100, 100).significant_difference);
        assert!(!availability(95, 100).significant_difference);
        assert!(availability(94, 100).significant_difference);
        assert!(availability(106, 100).significant_difference);
        let none = availability(3, 0);
        assert_eq!(none.ratio, 0.0);
        assert!(none.significant_difference);
    }

    #[test]
    fn test_order_match_ratio_respects_window() {
        let source = three_tracks();
        let refs: Vec<&SourceTrack> = source.iter().collect();
        let mut destination = as_destination(&source);
        destination[2] = destination_track("Something Else Entirely", &["Nobody"]);

        assert_eq!(order_match_ratio(&refs, &destination, ComparisonWindow::First(2)), 1.0);
        let full = order_match_ratio(&refs, &destination, ComparisonWindow::Full);
        assert!((full - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_dedup_ids_preserves_first_occurrence() {
        let ids = ["b", "a", "b", "c", "a"].map(String::from);
        assert_eq!(dedup_ids(ids.iter()), vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_first_run_creates_then_second_run_skips_without_writes() {
        let dir = tempfile::tempdir().unwrap();
        let source = three_tracks();

        let mut destination = MockDestinationCatalog::new();
        destination.expect_library_playlists().returning(|| Ok(vec![]));
        expect_search(&mut destination);
        destination
            .expect_create_playlist()
            .withf(|title, _, visibility, ids| {
                title == "Weeknd Mix" && *visibility == Visibility::Private && ids.len() == 3
            })
            .times(1)
            .returning(|_, _, _, _| Ok("PL1".to_string()));

        let mut first = engine(destination, dir.path());
        let outcome = first
            .reconcile(
                job(OperationKind::AllSaved, "Weeknd Mix", &source),
                &SyncOptions::default(),
                ReconcilePolicy::FULL,
            )
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Created {
                playlist_id: "PL1".to_string(),
                title: "Weeknd Mix".to_string(),
                tracks_found: 3
            }
        );
        let log = first.log().unwrap();
        assert_eq!(log.operations().len(), 1);
        assert_eq!(log.operations()[0].tracks_total, 3);
        assert_eq!(log.operations()[0].tracks_found, 3);
        assert!(log.operations()[0].success);

        // second process: only reads are expected
        let existing = as_destination(&source);
        let mut destination = MockDestinationCatalog::new();
        destination
            .expect_library_playlists()
            .returning(|| Ok(vec![library_playlist("PL1", "Weeknd Mix")]));
        destination
            .expect_playlist_tracks()
            .returning(move |_| Ok(existing.clone()));

        let mut second = engine(destination, dir.path());
        let outcome = second
            .reconcile(
                job(OperationKind::UpdateAll, "Weeknd Mix", &source),
                &SyncOptions::default(),
                ReconcilePolicy::FULL,
            )
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::Skipped(SkipReason::UpToDate));
        assert_eq!(second.log().unwrap().operations().len(), 1);
    }

    #[tokio::test]
    async fn test_significant_difference_rewrites_playlist() {
        let dir = tempfile::tempdir().unwrap();
        let source = three_tracks();
        let existing = vec![destination_track("Blinding Lights", &["The Weeknd"])];

        let mut destination = MockDestinationCatalog::new();
        destination
            .expect_library_playlists()
            .returning(|| Ok(vec![library_playlist("PL1", "weeknd mix")]));
        destination
            .expect_playlist_tracks()
            .returning(move |_| Ok(existing.clone()));
        expect_search(&mut destination);
        destination
            .expect_remove_playlist_items()
            .withf(|id, tracks| id == "PL1" && tracks.len() == 1)
            .times(1)
            .returning(|_, _| Ok(()));
        destination
            .expect_add_playlist_items()
            .withf(|id, ids| id == "PL1" && ids.len() == 3)
            .times(1)
            .returning(|_, _| Ok(()));

        let mut engine = engine(destination, dir.path());
        let outcome = engine
            .reconcile(
                job(OperationKind::UpdateAll, "Weeknd Mix", &source),
                &SyncOptions::default(),
                ReconcilePolicy::UPDATE,
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            SyncOutcome::Updated {
                playlist_id: "PL1".to_string(),
                tracks_added: 3
            }
        );
        let state = engine.log().unwrap().state("Weeknd Mix").unwrap();
        assert_eq!(state.tracks_found, 3);
        assert_eq!(state.kind, OperationKind::UpdateAll);
    }

    #[tokio::test]
    async fn test_matching_order_skips_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let source = three_tracks();
        let existing = as_destination(&source);

        let mut destination = MockDestinationCatalog::new();
        destination
            .expect_library_playlists()
            .returning(|| Ok(vec![library_playlist("PL1", "Weeknd Mix")]));
        destination
            .expect_playlist_tracks()
            .returning(move |_| Ok(existing.clone()));
        expect_search(&mut destination);

        let mut engine = engine(destination, dir.path());
        let outcome = engine
            .reconcile(
                job(OperationKind::UpdateAll, "Weeknd Mix", &source),
                &SyncOptions::default(),
                ReconcilePolicy::UPDATE,
            )
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::Skipped(SkipReason::InOrder { match_ratio: 1.0 }));
        let records = engine.log().unwrap().operations();
        assert_eq!(records.len(), 1);
        assert!(records[0].success);
        assert_eq!(records[0].tracks_found, 3);
    }

    #[tokio::test]
    async fn test_reordered_playlist_is_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let source = three_tracks();
        let mut existing = as_destination(&source);
        existing.rotate_left(1);

        let mut destination = MockDestinationCatalog::new();
        destination
            .expect_library_playlists()
            .returning(|| Ok(vec![library_playlist("PL1", "Weeknd Mix")]));
        destination
            .expect_playlist_tracks()
            .returning(move |_| Ok(existing.clone()));
        expect_search(&mut destination);
        destination.expect_remove_playlist_items().times(1).returning(|_, _| Ok(()));
        destination
            .expect_add_playlist_items()
            .withf(|_, ids| ids == ["Blinding Lights", "Save Your Tears", "Starboy Remastered"])
            .times(1)
            .returning(|_, _| Ok(()));

        let mut engine = engine(destination, dir.path());
        let outcome = engine
            .reconcile(
                job(OperationKind::UpdateAll, "Weeknd Mix", &source),
                &SyncOptions::default(),
                ReconcilePolicy::UPDATE,
            )
            .await
            .unwrap();
        assert!(matches!(outcome, SyncOutcome::Updated { .. }));
    }

    #[tokio::test]
    async fn test_append_mode_does_not_clear() {
        let dir = tempfile::tempdir().unwrap();
        let source = three_tracks();
        let existing = vec![destination_track("Other Song Here", &["Someone"])];

        let mut destination = MockDestinationCatalog::new();
        destination
            .expect_library_playlists()
            .returning(|| Ok(vec![library_playlist("PL1", "Weeknd Mix")]));
        destination
            .expect_playlist_tracks()
            .returning(move |_| Ok(existing.clone()));
        expect_search(&mut destination);
        destination.expect_remove_playlist_items().never();
        destination
            .expect_add_playlist_items()
            .times(1)
            .returning(|_, _| Ok(()));

        let options = SyncOptions {
            append: true,
            ..SyncOptions::default()
        };
        let mut engine = engine(destination, dir.path());
        let outcome = engine
            .reconcile(
                job(OperationKind::UpdateAll, "Weeknd Mix", &source),
                &options,
                ReconcilePolicy::UPDATE,
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            SyncOutcome::Appended {
                playlist_id: "PL1".to_string(),
                tracks_added: 3
            }
        );
        assert_eq!(engine.log().unwrap().state("Weeknd Mix").unwrap().tracks_found, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rewrite_waits_for_settle_delay_and_append_does_not() {
        let dir = tempfile::tempdir().unwrap();
        let source = three_tracks();

        let mut destination = MockDestinationCatalog::new();
        destination
            .expect_library_playlists()
            .returning(|| Ok(vec![library_playlist("PL1", "Weeknd Mix")]));
        destination
            .expect_playlist_tracks()
            .returning(|_| Ok(vec![destination_track("Other Song Here", &["Someone"])]));
        expect_search(&mut destination);
        destination
            .expect_remove_playlist_items()
            .times(1)
            .returning(|_, _| Ok(()));
        destination
            .expect_add_playlist_items()
            .times(2)
            .returning(|_, _| Ok(()));

        let settle = Duration::from_secs(2);
        let mut engine = settling_engine(destination, dir.path(), settle);

        let started = tokio::time::Instant::now();
        engine
            .update(job(OperationKind::Update, "Weeknd Mix", &source), &SyncOptions::default())
            .await
            .unwrap();
        assert_eq!(started.elapsed(), settle);

        let started = tokio::time::Instant::now();
        let append = SyncOptions {
            append: true,
            ..SyncOptions::default()
        };
        engine
            .update(job(OperationKind::Update, "Weeknd Mix", &source), &append)
            .await
            .unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_missing_playlist_is_reported_without_record() {
        let dir = tempfile::tempdir().unwrap();
        let source = three_tracks();
        let mut destination = MockDestinationCatalog::new();
        destination
            .expect_library_playlists()
            .returning(|| Ok(vec![library_playlist("PL9", "Workout")]));

        let mut engine = engine(destination, dir.path());
        let outcome = engine
            .reconcile(
                job(OperationKind::UpdateAll, "Chill", &source),
                &SyncOptions::default(),
                ReconcilePolicy::UPDATE,
            )
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::NotFound);
        assert!(engine.log().unwrap().operations().is_empty());
    }

    #[tokio::test]
    async fn test_transfer_policy_skips_similar_existing_playlist() {
        let dir = tempfile::tempdir().unwrap();
        let source = three_tracks();
        let mut destination = MockDestinationCatalog::new();
        destination
            .expect_library_playlists()
            .returning(|| Ok(vec![library_playlist("PL1", "My Road Trip Mix 2")]));

        let mut engine = engine(destination, dir.path());
        let outcome = engine
            .reconcile(
                job(OperationKind::AllSaved, "Road Trip Mix", &source),
                &SyncOptions::default(),
                ReconcilePolicy::TRANSFER,
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            SyncOutcome::Skipped(SkipReason::AlreadyExists {
                existing_name: "My Road Trip Mix 2".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_failure_is_recorded_and_returned() {
        let dir = tempfile::tempdir().unwrap();
        let source = three_tracks();
        let mut destination = MockDestinationCatalog::new();
        destination.expect_library_playlists().returning(|| Ok(vec![]));
        expect_search(&mut destination);
        destination
            .expect_create_playlist()
            .returning(|_, _, _, _| Err(eyre!("HTTP 500")));

        let mut engine = engine(destination, dir.path());
        let result = engine
            .create(job(OperationKind::Create, "Weeknd Mix", &source), &SyncOptions::default())
            .await;

        assert!(result.is_err());
        let log = engine.log().unwrap();
        assert_eq!(log.operations().len(), 1);
        assert!(!log.operations()[0].success);
        assert_eq!(log.operations()[0].tracks_found, 0);
        assert!(log.state("Weeknd Mix").is_none());
    }

    #[tokio::test]
    async fn test_create_likes_each_resolved_track_once() {
        let source = vec![
            source_track("Blinding Lights", "The Weeknd"),
            source_track("Blinding Lights", "The Weeknd"),
            source_track("Unfindable", "Nobody"),
        ];
        let mut destination = MockDestinationCatalog::new();
        destination.expect_search().returning(|query| {
            if query.starts_with("The Weeknd") {
                Ok(vec![candidate(
                    "bl",
                    "Blinding Lights",
                    &["The Weeknd"],
                    None,
                    ResultKind::Song,
                )])
            } else {
                Ok(vec![])
            }
        });
        destination
            .expect_create_playlist()
            .withf(|_, description, visibility, ids| {
                description == "desc" && *visibility == Visibility::Public && ids == ["bl"]
            })
            .returning(|_, _, _, _| Ok("PL2".to_string()));
        destination
            .expect_like_track()
            .withf(|id| id == "bl")
            .times(1)
            .returning(|_| Ok(()));

        let matcher = TrackMatcher::new(LookupCache::in_memory(), None).unwrap();
        let mut engine = SyncEngine::new(destination, matcher, None, EngineSettings::default());
        let options = SyncOptions {
            like: true,
            visibility: Visibility::Public,
            ..SyncOptions::default()
        };
        let outcome = engine
            .create(
                SyncJob {
                    description: "desc",
                    ..job(OperationKind::Create, "Singles", &source)
                },
                &options,
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            SyncOutcome::Created {
                playlist_id: "PL2".to_string(),
                title: "Singles".to_string(),
                tracks_found: 1
            }
        );
    }

    #[tokio::test]
    async fn test_update_requires_existing_playlist() {
        let dir = tempfile::tempdir().unwrap();
        let source = three_tracks();
        let mut destination = MockDestinationCatalog::new();
        destination.expect_library_playlists().returning(|| Ok(vec![]));

        let mut engine = engine(destination, dir.path());
        let result = engine
            .update(job(OperationKind::Update, "Weeknd Mix", &source), &SyncOptions::default())
            .await;

        assert!(result.is_err());
        assert!(!engine.log().unwrap().operations()[0].success);
    }
}
