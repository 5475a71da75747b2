use std::fmt;
use std::time::Duration;

use color_eyre::eyre::{Result, WrapErr};
use regex::Regex;

use crate::matching::similarity::names_match;
use crate::ports::destination::{DestinationCatalog, LibraryPlaylist};
use crate::ports::source::{
    AuthMode, SourceCatalog, SourcePlaylistSummary, SourceRef, SourceTrack, parse_track_link,
};
use crate::services::cancel::Cancellation;
use crate::services::operation_log::OperationKind;
use crate::services::sync_engine::{ReconcilePolicy, SyncEngine, SyncJob, SyncOptions, SyncOutcome};

/// Conditions that stop a command before it touches either catalog.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("this command needs user authorisation; set `refresh_token` in the [spotify] config")]
    UserAuthRequired,
    #[error("the operation log is unavailable; fix the cache directory and run `initial-setup`")]
    LogUnavailable,
    #[error("no playlists are tracked yet; run `initial-setup` or `all-saved` first")]
    NothingTracked,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub max_playlist_tracks: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_delay: Duration::from_secs(2),
            max_playlist_tracks: 5000,
        }
    }
}

/// Counters for one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub transferred: usize,
    pub skipped: usize,
    pub not_found: usize,
    pub failed: usize,
    pub cancelled: bool,
}

impl SyncReport {
    fn record(&mut self, outcome: &SyncOutcome) {
        match outcome {
            SyncOutcome::Created { .. }
            | SyncOutcome::Updated { .. }
            | SyncOutcome::Appended { .. } => self.transferred += 1,
            SyncOutcome::Skipped(_) => self.skipped += 1,
            SyncOutcome::NotFound => self.not_found += 1,
        }
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} transferred, {} skipped, {} not found, {} failed",
            self.transferred, self.skipped, self.not_found, self.failed
        )?;
        if self.cancelled {
            f.write_str(" (cancelled)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupReport {
    pub tracked: usize,
    pub already_tracked: usize,
    pub unmatched: usize,
    pub failed: usize,
}

/// Overrides for single-playlist creation.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub name: Option<String>,
    pub description: Option<String>,
    pub date_suffix: bool,
}

impl CreateOptions {
    fn destination_name(&self, source_name: &str) -> String {
        let mut name = self.name.clone().unwrap_or_else(|| source_name.to_string());
        if self.date_suffix {
            name.push_str(&chrono::Local::now().format(" %m/%d/%Y").to_string());
        }
        name
    }
}

/// A playlist queued for a batch run.
#[derive(Debug, Clone)]
struct WorkItem {
    reference: SourceRef,
    source_name: String,
    destination_name: String,
    track_count: u32,
}

impl From<SourcePlaylistSummary> for WorkItem {
    fn from(summary: SourcePlaylistSummary) -> Self {
        Self {
            reference: summary.reference,
            destination_name: summary.name.clone(),
            source_name: summary.name,
            track_count: summary.track_count,
        }
    }
}

pub struct CatalogSyncOrchestrator<S: SourceCatalog, D: DestinationCatalog> {
    source: S,
    engine: SyncEngine<D>,
    settings: OrchestratorSettings,
}

impl<S: SourceCatalog, D: DestinationCatalog> CatalogSyncOrchestrator<S, D> {
    pub fn new(source: S, engine: SyncEngine<D>, settings: OrchestratorSettings) -> Self {
        Self {
            source,
            engine,
            settings,
        }
    }

    #[cfg(test)]
    pub fn engine(&self) -> &SyncEngine<D> {
        &self.engine
    }

    fn require_user_auth(&self) -> Result<(), PreconditionError> {
        match self.source.auth_mode() {
            AuthMode::User => Ok(()),
            AuthMode::ClientCredentials => Err(PreconditionError::UserAuthRequired),
        }
    }

    /// Saved playlists, saved albums and optionally another user's public playlists.
    async fn library_candidates(
        &self,
        target_user: Option<&str>,
    ) -> Result<Vec<SourcePlaylistSummary>> {
        let mut candidates = self
            .source
            .saved_playlists()
            .await
            .wrap_err("Failed to list saved playlists")?;
        tracing::info!("{} saved playlists", candidates.len());

        match self.source.saved_albums().await {
            Ok(albums) => {
                tracing::info!("{} saved albums", albums.len());
                candidates.extend(albums);
            }
            Err(error) => tracing::warn!("Could not list saved albums: {:#}", error),
        }

        if let Some(user) = target_user {
            match self.source.user_playlists(user).await {
                Ok(playlists) => {
                    tracing::info!("{} public playlists from '{}'", playlists.len(), user);
                    candidates.extend(playlists);
                }
                Err(error) => tracing::warn!("Could not list playlists of '{}': {:#}", user, error),
            }
        }
        Ok(candidates)
    }

    async fn run_batch(
        &mut self,
        items: Vec<WorkItem>,
        kind: OperationKind,
        policy: ReconcilePolicy,
        options: &SyncOptions,
        cancel: &mut Cancellation,
    ) -> SyncReport {
        let mut report = SyncReport::default();
        let total = items.len();
        let batch_size = self.settings.batch_size.max(1);

        for (index, item) in items.into_iter().enumerate() {
            if index > 0 && index % batch_size == 0 {
                tracing::info!(
                    "Processed {} playlists, waiting {}",
                    index,
                    humantime::format_duration(self.settings.batch_delay)
                );
                if cancel.sleep(self.settings.batch_delay).await {
                    report.cancelled = true;
                    break;
                }
            } else if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            if item.track_count > self.settings.max_playlist_tracks {
                tracing::info!(
                    "[{}/{}] '{}' has {} tracks, skipping (too large)",
                    index + 1,
                    total,
                    item.source_name,
                    item.track_count
                );
                report.skipped += 1;
                continue;
            }

            tracing::info!(
                "[{}/{}] '{}' ({} tracks)",
                index + 1,
                total,
                item.source_name,
                item.track_count
            );
            match self.process(&item, kind, policy, options).await {
                Ok(outcome) => report.record(&outcome),
                Err(error) => {
                    tracing::warn!("Could not sync '{}': {:#}", item.source_name, error);
                    report.failed += 1;
                }
            }
        }

        tracing::info!("Finished: {}", report);
        report
    }

    async fn process(
        &mut self,
        item: &WorkItem,
        kind: OperationKind,
        policy: ReconcilePolicy,
        options: &SyncOptions,
    ) -> Result<SyncOutcome> {
        let snapshot = match self.source.playlist(&item.reference).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                let job = SyncJob {
                    kind,
                    source_name: &item.source_name,
                    destination_name: &item.destination_name,
                    description: "",
                    tracks: &[],
                };
                self.engine.record_failure(job);
                return Err(error.wrap_err("Failed to fetch source playlist"));
            }
        };
        let job = SyncJob {
            kind,
            source_name: &item.source_name,
            destination_name: &item.destination_name,
            description: &snapshot.description,
            tracks: &snapshot.tracks,
        };
        self.engine.reconcile(job, options, policy).await
    }

    /// Create destination copies of every saved playlist and album that does
    /// not exist there yet.
    pub async fn transfer_saved(
        &mut self,
        options: &SyncOptions,
        target_user: Option<&str>,
        cancel: &mut Cancellation,
    ) -> Result<SyncReport> {
        self.require_user_auth()?;
        let candidates = self.library_candidates(target_user).await?;
        tracing::info!("{} playlists to process", candidates.len());

        let items = candidates.into_iter().map(WorkItem::from).collect();
        Ok(self
            .run_batch(items, OperationKind::AllSaved, ReconcilePolicy::TRANSFER, options, cancel)
            .await)
    }

    /// Transfer all public playlists of `user`.
    pub async fn transfer_user(
        &mut self,
        user: &str,
        options: &SyncOptions,
        cancel: &mut Cancellation,
    ) -> Result<SyncReport> {
        let playlists = self
            .source
            .user_playlists(user)
            .await
            .wrap_err_with(|| format!("Failed to list playlists of '{user}'"))?;
        tracing::info!("{} public playlists from '{}'", playlists.len(), user);

        let items = playlists.into_iter().map(WorkItem::from).collect();
        Ok(self
            .run_batch(items, OperationKind::All, ReconcilePolicy::TRANSFER, options, cancel)
            .await)
    }

    /// Bring every playlist tracked in the log up to date with its source.
    pub async fn update_tracked(
        &mut self,
        options: &SyncOptions,
        cancel: &mut Cancellation,
    ) -> Result<SyncReport> {
        self.require_user_auth()?;
        let tracked = self
            .engine
            .log()
            .ok_or(PreconditionError::LogUnavailable)?
            .tracked_playlists();
        if tracked.is_empty() {
            return Err(PreconditionError::NothingTracked.into());
        }

        let candidates = self.library_candidates(None).await?;
        let mut not_found = 0;
        let mut items = Vec::with_capacity(tracked.len());
        for playlist in tracked {
            match candidates
                .iter()
                .find(|c| names_match(&c.name, &playlist.source_name))
            {
                Some(candidate) => items.push(WorkItem {
                    reference: candidate.reference.clone(),
                    source_name: candidate.name.clone(),
                    destination_name: playlist.destination_name,
                    track_count: candidate.track_count,
                }),
                None => {
                    tracing::info!(
                        "'{}' is no longer in the source library",
                        playlist.source_name
                    );
                    not_found += 1;
                }
            }
        }

        let mut report = self
            .run_batch(items, OperationKind::UpdateAll, ReconcilePolicy::UPDATE, options, cancel)
            .await;
        report.not_found += not_found;
        Ok(report)
    }

    /// Start tracking destination playlists that already mirror a source
    /// playlist of the same name.
    pub async fn initial_setup(&mut self, target_user: Option<&str>) -> Result<SetupReport> {
        self.require_user_auth()?;
        if self.engine.log().is_none() {
            return Err(PreconditionError::LogUnavailable.into());
        }

        let library = self
            .engine
            .destination()
            .library_playlists()
            .await
            .wrap_err("Failed to list destination playlists")?;
        let candidates = self.library_candidates(target_user).await?;

        let mut report = SetupReport::default();
        for playlist in library {
            if self
                .engine
                .log()
                .is_some_and(|log| log.is_tracked(&playlist.title))
            {
                report.already_tracked += 1;
                continue;
            }
            let Some(candidate) = candidates.iter().find(|c| names_match(&c.name, &playlist.title))
            else {
                report.unmatched += 1;
                continue;
            };

            match self.seed_state(candidate, &playlist).await {
                Ok(()) => {
                    tracing::info!("Tracking '{}' <- '{}'", playlist.title, candidate.name);
                    report.tracked += 1;
                }
                Err(error) => {
                    tracing::warn!("Could not set up '{}': {:#}", playlist.title, error);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn seed_state(
        &mut self,
        candidate: &SourcePlaylistSummary,
        playlist: &LibraryPlaylist,
    ) -> Result<()> {
        let snapshot = self.source.playlist(&candidate.reference).await?;
        let destination_tracks = self
            .engine
            .destination()
            .playlist_tracks(&playlist.id)
            .await?;
        if let Some(log) = self.engine.log_mut() {
            log.populate_initial_state(
                &snapshot.name,
                &playlist.title,
                &playlist.id,
                &snapshot.tracks,
                destination_tracks.len(),
            )?;
        }
        Ok(())
    }

    /// Alternate `transfer_saved` and `update_tracked` until cancelled.
    /// Returns the number of completed cycles.
    pub async fn sync_forever(
        &mut self,
        options: &SyncOptions,
        target_user: Option<&str>,
        interval: Duration,
        cancel: &mut Cancellation,
    ) -> Result<usize> {
        self.require_user_auth()?;
        let mut cycles = 0;

        loop {
            tracing::info!("Sync cycle {} starting", cycles + 1);
            match self.transfer_saved(options, target_user, cancel).await {
                Ok(report) => tracing::info!("Transfer: {}", report),
                Err(error) => tracing::warn!("Transfer failed: {:#}", error),
            }
            if !cancel.is_cancelled() {
                match self.update_tracked(options, cancel).await {
                    Ok(report) => tracing::info!("Update: {}", report),
                    Err(error) => tracing::warn!("Update failed: {:#}", error),
                }
            }
            if cancel.is_cancelled() {
                break;
            }
            cycles += 1;

            tracing::info!(
                "Next cycle in {}",
                humantime::format_duration(interval)
            );
            if cancel.sleep(interval).await {
                break;
            }
        }

        tracing::info!("Sync loop stopped after {} cycles", cycles);
        Ok(cycles)
    }

    pub async fn create_one(
        &mut self,
        link: &str,
        create: &CreateOptions,
        options: &SyncOptions,
    ) -> Result<SyncOutcome> {
        let reference = SourceRef::parse(link)?;
        let snapshot = self.source.playlist(&reference).await?;
        let destination_name = create.destination_name(&snapshot.name);
        let description = create
            .description
            .clone()
            .unwrap_or_else(|| snapshot.description.clone());
        let job = SyncJob {
            kind: OperationKind::Create,
            source_name: &snapshot.name,
            destination_name: &destination_name,
            description: &description,
            tracks: &snapshot.tracks,
        };
        self.engine.create(job, options).await
    }

    /// Transfer the source account's liked songs as a new playlist.
    pub async fn liked(
        &mut self,
        create: &CreateOptions,
        options: &SyncOptions,
    ) -> Result<SyncOutcome> {
        self.require_user_auth()?;
        let snapshot = self.source.liked_tracks().await?;
        let destination_name = create.destination_name(&snapshot.name);
        let description = create
            .description
            .clone()
            .unwrap_or_else(|| snapshot.description.clone());
        let job = SyncJob {
            kind: OperationKind::Liked,
            source_name: &snapshot.name,
            destination_name: &destination_name,
            description: &description,
            tracks: &snapshot.tracks,
        };
        self.engine.create(job, options).await
    }

    pub async fn update_one(
        &mut self,
        link: &str,
        destination_name: &str,
        options: &SyncOptions,
    ) -> Result<SyncOutcome> {
        let reference = SourceRef::parse(link)?;
        let snapshot = self.source.playlist(&reference).await?;
        let job = SyncJob::new(OperationKind::Update, &snapshot, destination_name);
        self.engine.update(job, options).await
    }

    pub async fn search_one(
        &mut self,
        link: &str,
        use_cache: bool,
    ) -> Result<(SourceTrack, Option<String>)> {
        let track_id = parse_track_link(link)?;
        let track = self.source.track(&track_id).await?;
        let id = self.engine.resolve_track(&track, use_cache).await?;
        Ok((track, id))
    }

    /// Delete destination playlists whose title matches `pattern` from the
    /// start, after `confirm` approves the list. Returns how many were deleted.
    pub async fn remove_playlists<F>(&self, pattern: &str, confirm: F) -> Result<usize>
    where
        F: FnOnce(&[LibraryPlaylist]) -> Result<bool>,
    {
        let regex = Regex::new(&format!("^(?:{pattern})"))
            .wrap_err_with(|| format!("Invalid pattern '{pattern}'"))?;
        let destination = self.engine.destination();
        let matching: Vec<LibraryPlaylist> = destination
            .library_playlists()
            .await
            .wrap_err("Failed to list destination playlists")?
            .into_iter()
            .filter(|p| regex.is_match(&p.title))
            .collect();

        if matching.is_empty() || !confirm(&matching)? {
            return Ok(0);
        }

        let mut deleted = 0;
        for playlist in &matching {
            match destination.delete_playlist(&playlist.id).await {
                Ok(()) => {
                    tracing::info!("Deleted '{}'", playlist.title);
                    deleted += 1;
                }
                Err(error) => tracing::warn!("Could not delete '{}': {:#}", playlist.title, error),
            }
        }
        Ok(deleted)
    }
}
