//! Ranking of destination search candidates against a source track.
//!
//! Candidates are ordered by, in turn:
//! 1. match tier (exact title and artist, near-exact, fuzzy),
//! 2. result kind (songs ahead of videos),
//! 3. absolute duration difference (unknown durations last),
//! 4. combined title/artist similarity,
//! 5. search rank.
//!
//! Anything below the acceptance thresholds is discarded before ranking.

use std::cmp::Ordering;

use unaccent::unaccent;

use crate::ports::destination::{ResultKind, SearchCandidate};
use crate::ports::source::SourceTrack;

pub const MIN_TITLE_SIMILARITY: f64 = 0.80;
pub const MIN_ARTIST_SIMILARITY: f64 = 0.60;
const NEAR_EXACT_SIMILARITY: f64 = 0.92;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchTier {
    Fuzzy,
    NearExact,
    Exact,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateScore {
    pub tier: MatchTier,
    pub title_similarity: f64,
    pub artist_similarity: f64,
    pub duration_delta: Option<u32>,
    pub result_kind: ResultKind,
}

impl CandidateScore {
    pub fn accepted(&self) -> bool {
        self.title_similarity >= MIN_TITLE_SIMILARITY
            && self.artist_similarity >= MIN_ARTIST_SIMILARITY
    }

    fn combined(&self) -> f64 {
        (self.title_similarity + self.artist_similarity) / 2.0
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Accent-fold, lower-case, replace punctuation with spaces and collapse runs.
pub fn normalize(s: &str) -> String {
    unaccent(s)
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    jaro_winkler::jaro_winkler(a, b)
}

/// Videos are usually titled "Artist - Title"; compare only the title half.
fn comparable_title(candidate: &SearchCandidate) -> &str {
    if candidate.result_kind == ResultKind::Video {
        let parts: Vec<&str> = candidate.title.split(" - ").collect();
        if parts.len() == 2 {
            return parts[1];
        }
    }
    &candidate.title
}

// =============================================================================
// Scoring
// =============================================================================

/// Score one candidate. Returns `None` for results that are not playable tracks.
pub fn score(track: &SourceTrack, candidate: &SearchCandidate) -> Option<CandidateScore> {
    if candidate.result_kind == ResultKind::Other || candidate.id.is_empty() {
        return None;
    }

    let source_title = normalize(&track.name);
    let candidate_title = normalize(comparable_title(candidate));
    let title_similarity = similarity(&source_title, &candidate_title);

    let source_artist = normalize(&track.artist);
    let candidate_artists: Vec<String> = candidate.artists.iter().map(|a| normalize(a)).collect();
    let exact_artist = candidate_artists.iter().any(|a| *a == source_artist);
    let artist_similarity = if exact_artist {
        1.0
    } else {
        let joined = candidate_artists.join(" ");
        candidate_artists
            .iter()
            .map(|a| similarity(&source_artist, a))
            .fold(similarity(&source_artist, &joined), f64::max)
    };

    let tier = if source_title == candidate_title && exact_artist {
        MatchTier::Exact
    } else if title_similarity >= NEAR_EXACT_SIMILARITY
        && artist_similarity >= NEAR_EXACT_SIMILARITY
    {
        MatchTier::NearExact
    } else {
        MatchTier::Fuzzy
    };

    let duration_delta = match (track.duration_seconds, candidate.duration_seconds) {
        (Some(a), Some(b)) => Some(a.abs_diff(b)),
        _ => None,
    };

    Some(CandidateScore {
        tier,
        title_similarity,
        artist_similarity,
        duration_delta,
        result_kind: candidate.result_kind,
    })
}

fn kind_rank(kind: ResultKind) -> u8 {
    match kind {
        ResultKind::Song => 0,
        ResultKind::Video => 1,
        ResultKind::Other => 2,
    }
}

fn compare(a: &(usize, CandidateScore), b: &(usize, CandidateScore)) -> Ordering {
    let (a_rank, a) = a;
    let (b_rank, b) = b;
    b.tier
        .cmp(&a.tier)
        .then_with(|| kind_rank(a.result_kind).cmp(&kind_rank(b.result_kind)))
        .then_with(|| {
            a.duration_delta
                .unwrap_or(u32::MAX)
                .cmp(&b.duration_delta.unwrap_or(u32::MAX))
        })
        .then_with(|| b.combined().total_cmp(&a.combined()))
        .then_with(|| a_rank.cmp(b_rank))
}

/// Accepted candidates as `(search rank, score)`, best first.
pub fn rank(track: &SourceTrack, candidates: &[SearchCandidate]) -> Vec<(usize, CandidateScore)> {
    let mut scored: Vec<(usize, CandidateScore)> = candidates
        .iter()
        .enumerate()
        .filter_map(|(index, candidate)| score(track, candidate).map(|s| (index, s)))
        .filter(|(_, s)| s.accepted())
        .collect();
    scored.sort_by(compare);
    scored
}

pub fn best_fit<'a>(
    track: &SourceTrack,
    candidates: &'a [SearchCandidate],
) -> Option<&'a SearchCandidate> {
    rank(track, candidates)
        .first()
        .map(|(index, _)| &candidates[*index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{candidate, source_track};
    use proptest::prelude::*;

    fn timed(name: &str, artist: &str, seconds: u32) -> SourceTrack {
        SourceTrack {
            duration_seconds: Some(seconds),
            ..source_track(name, artist)
        }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Beyoncé - Halo (Live)! "), "beyonce halo live");
    }

    #[test]
    fn test_exact_match_beats_fuzzy_match() {
        let track = timed("Halo", "Beyoncé", 261);
        let candidates = vec![
            candidate("a", "Halo Halo", &["Beyonce"], Some(261), ResultKind::Song),
            candidate("b", "Halo", &["Beyoncé"], Some(300), ResultKind::Song),
        ];
        assert_eq!(best_fit(&track, &candidates).unwrap().id, "b");
    }

    #[test]
    fn test_video_title_prefix_is_ignored() {
        let track = timed("Halo", "Beyoncé", 261);
        let candidates = vec![candidate(
            "v",
            "Beyoncé - Halo",
            &["Beyoncé"],
            Some(261),
            ResultKind::Video,
        )];
        let (_, s) = rank(&track, &candidates)[0];
        assert_eq!(s.tier, MatchTier::Exact);
    }

    #[test]
    fn test_non_playable_results_are_ignored() {
        let track = timed("Halo", "Beyoncé", 261);
        let candidates = vec![candidate("x", "Halo", &["Beyoncé"], None, ResultKind::Other)];
        assert!(best_fit(&track, &candidates).is_none());
    }

    #[test]
    fn test_below_threshold_is_no_match() {
        let track = timed("Bohemian Rhapsody", "Queen", 355);
        let candidates = vec![
            candidate("a", "Under Pressure", &["Queen"], Some(355), ResultKind::Song),
            candidate("b", "Bohemian Rhapsody", &["Panic Brass"], Some(355), ResultKind::Song),
        ];
        assert!(best_fit(&track, &candidates).is_none());
    }

    #[test]
    fn test_unknown_duration_sorts_after_known() {
        let track = timed("Halo", "Beyoncé", 261);
        let candidates = vec![
            candidate("a", "Halo", &["Beyoncé"], None, ResultKind::Song),
            candidate("b", "Halo", &["Beyoncé"], Some(250), ResultKind::Song),
        ];
        assert_eq!(best_fit(&track, &candidates).unwrap().id, "b");
    }

    fn word() -> impl Strategy<Value = String> {
        "[a-z]{4,9}"
    }

    proptest! {
        #[test]
        fn prop_exact_title_and_artist_always_wins(
            title in word(),
            other_title in word(),
            artist in word(),
            exact_first in any::<bool>(),
            seconds in 60u32..600,
            offset in 0u32..120,
        ) {
            prop_assume!(other_title != title);
            let track = timed(&title, &artist, seconds);
            let exact = candidate("exact", &title, &[artist.as_str()], Some(seconds + offset), ResultKind::Song);
            let fuzzy = candidate("fuzzy", &format!("{title} {other_title}"), &[artist.as_str()], Some(seconds), ResultKind::Song);
            let candidates = if exact_first { vec![exact, fuzzy] } else { vec![fuzzy, exact] };
            prop_assert_eq!(&best_fit(&track, &candidates).unwrap().id, "exact");
        }

        #[test]
        fn prop_closer_duration_wins_between_equal_matches(
            title in word(),
            artist in word(),
            seconds in 60u32..600,
            near in 0u32..10,
            far in 10u32..100,
            near_first in any::<bool>(),
        ) {
            let track = timed(&title, &artist, seconds);
            let close = candidate("close", &title, &[artist.as_str()], Some(seconds + near), ResultKind::Song);
            let distant = candidate("distant", &title, &[artist.as_str()], Some(seconds + far), ResultKind::Song);
            let candidates = if near_first { vec![close, distant] } else { vec![distant, close] };
            prop_assert_eq!(&best_fit(&track, &candidates).unwrap().id, "close");
        }

        #[test]
        fn prop_song_beats_equivalent_video(
            title in word(),
            artist in word(),
            seconds in 60u32..600,
            video_first in any::<bool>(),
        ) {
            let track = timed(&title, &artist, seconds);
            let song = candidate("song", &title, &[artist.as_str()], Some(seconds), ResultKind::Song);
            let video = candidate("video", &title, &[artist.as_str()], Some(seconds), ResultKind::Video);
            let candidates = if video_first { vec![video, song] } else { vec![song, video] };
            prop_assert_eq!(&best_fit(&track, &candidates).unwrap().id, "song");
        }

        #[test]
        fn prop_winner_always_clears_thresholds(
            title in word(),
            artist in word(),
            titles in prop::collection::vec(word(), 1..6),
            artists in prop::collection::vec(word(), 1..6),
        ) {
            let track = source_track(&title, &artist);
            let candidates: Vec<SearchCandidate> = titles
                .iter()
                .zip(artists.iter())
                .enumerate()
                .map(|(i, (t, a))| candidate(&i.to_string(), t, &[a.as_str()], None, ResultKind::Song))
                .collect();
            if let Some(winner) = best_fit(&track, &candidates) {
                let s = score(&track, winner).unwrap();
                prop_assert!(s.accepted());
            }
        }
    }
}
