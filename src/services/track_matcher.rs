use std::path::PathBuf;

use color_eyre::eyre::{Result, WrapErr};
use regex::Regex;

use crate::matching::best_fit;
use crate::ports::destination::DestinationCatalog;
use crate::ports::source::SourceTrack;
use crate::services::lookup_cache::LookupCache;
use crate::services::store;

/// Resolves source tracks to destination ids through search, with an
/// optional persistent lookup cache.
pub struct TrackMatcher {
    cache: LookupCache,
    not_found_path: Option<PathBuf>,
    feat_suffix: Regex,
}

impl TrackMatcher {
    pub fn new(cache: LookupCache, not_found_path: Option<PathBuf>) -> Result<Self> {
        let feat_suffix =
            Regex::new(r"(?i) \(feat.*\..+\)").wrap_err("Failed to compile featuring regex")?;
        Ok(Self {
            cache,
            not_found_path,
            feat_suffix,
        })
    }

    /// Search query for a track; also the lookup cache key.
    pub fn build_query(&self, track: &SourceTrack) -> String {
        let name = self.feat_suffix.replace(&track.name, "");
        format!("{} {}", track.artist, name)
            .replace(" &", "")
            .replace('&', "")
    }

    /// Resolve one track. Searches unless `use_cache` and the query is cached.
    pub async fn resolve_track<D: DestinationCatalog + ?Sized>(
        &mut self,
        destination: &D,
        track: &SourceTrack,
        use_cache: bool,
    ) -> Result<Option<String>> {
        let query = self.build_query(track);
        let (_, id) = self.resolve_query(destination, track, query, use_cache).await?;
        if use_cache {
            self.save_cache();
        }
        Ok(id)
    }

    fn save_cache(&mut self) {
        if let Err(error) = self.cache.save() {
            tracing::warn!("Could not save lookup cache: {:#}", error);
        }
    }

    async fn resolve_query<D: DestinationCatalog + ?Sized>(
        &mut self,
        destination: &D,
        track: &SourceTrack,
        query: String,
        use_cache: bool,
    ) -> Result<(String, Option<String>)> {
        if use_cache {
            if let Some(id) = self.cache.get(&query) {
                tracing::debug!("Lookup cache hit for '{}'", query);
                let id = id.to_string();
                return Ok((query, Some(id)));
            }
        }

        let candidates = destination
            .search(&query)
            .await
            .wrap_err_with(|| format!("Failed to search for '{query}'"))?;

        let id = best_fit::best_fit(track, &candidates).map(|c| c.id.clone());
        match &id {
            Some(id) if use_cache => self.cache.insert(query.clone(), id.clone()),
            Some(_) => {}
            None => tracing::debug!(
                "No acceptable match for '{}' among {} candidates",
                query,
                candidates.len()
            ),
        }
        Ok((query, id))
    }

    /// Resolve every track, one id slot per input track in the same order.
    ///
    /// Queries without a match are written to the not-found file, replacing
    /// its previous contents. Ids cached before a failed search are still saved.
    pub async fn resolve_tracks<D: DestinationCatalog + ?Sized>(
        &mut self,
        destination: &D,
        tracks: &[SourceTrack],
        use_cache: bool,
    ) -> Result<Vec<Option<String>>> {
        let mut ids = Vec::with_capacity(tracks.len());
        let mut not_found = Vec::new();

        let mut failure = None;
        for (index, track) in tracks.iter().enumerate() {
            let query = self.build_query(track);
            let (query, id) = match self.resolve_query(destination, track, query, use_cache).await
            {
                Ok(resolved) => resolved,
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            };
            if id.is_none() {
                not_found.push(query);
            }
            ids.push(id);
            if (index + 1) % 25 == 0 {
                tracing::info!("Matched {}/{} tracks", index + 1, tracks.len());
            }
        }

        if use_cache {
            self.save_cache();
        }
        if let Some(error) = failure {
            return Err(error);
        }
        self.write_not_found(&not_found);

        tracing::info!(
            "Found {}/{} tracks on the destination",
            tracks.len() - not_found.len(),
            tracks.len()
        );
        Ok(ids)
    }

    fn write_not_found(&self, queries: &[String]) {
        let Some(path) = &self.not_found_path else {
            return;
        };
        let mut contents = queries.join("\n");
        contents.push('\n');
        if let Err(error) = store::write_atomic(path, contents.as_bytes()) {
            tracing::warn!("Could not write not-found list: {:#}", error);
        }
    }
}
