//! Binary equivalence predicates over names and tracks.
//!
//! Both predicates work on word sets: lower-cased text with everything except
//! letters, digits, underscores and whitespace removed. A "meaningful" word is
//! longer than two characters.

use std::collections::HashSet;

use crate::ports::destination::DestinationTrack;
use crate::ports::source::SourceTrack;

const MEANINGFUL_WORD_LEN: usize = 2;

// =============================================================================
// Normalization
// =============================================================================

/// Lower-case and drop punctuation, keeping word characters and whitespace.
pub fn strip_punctuation(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect()
}

pub fn word_set(s: &str) -> HashSet<String> {
    strip_punctuation(s)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn meaningful_common(a: &HashSet<String>, b: &HashSet<String>) -> usize {
    a.intersection(b)
        .filter(|word| word.chars().count() > MEANINGFUL_WORD_LEN)
        .count()
}

// =============================================================================
// Predicates
// =============================================================================

/// Whether two playlist or album names refer to the same collection.
///
/// Used everywhere identity is inferred from a name alone, so it must stay
/// symmetric.
pub fn names_match(a: &str, b: &str) -> bool {
    if a.to_lowercase() == b.to_lowercase() {
        return true;
    }

    let words_a = word_set(a);
    let words_b = word_set(b);

    if meaningful_common(&words_a, &words_b) >= 2 {
        return true;
    }

    let shorter = words_a.len().min(words_b.len());
    if shorter == 0 || shorter > 3 {
        return false;
    }
    let common = words_a.intersection(&words_b).count();
    let required = 2f64.max(shorter as f64 * 0.7);
    common as f64 >= required
}

/// Whether a destination playlist entry is the same song as a source track.
pub fn tracks_similar(source: &SourceTrack, destination: &DestinationTrack) -> bool {
    let source_title = word_set(&source.name);
    let destination_title = word_set(&destination.title);
    if meaningful_common(&source_title, &destination_title) < 2 {
        return false;
    }

    let source_artist = word_set(&source.artist);
    let destination_artists = word_set(&destination.artists.join(" "));
    meaningful_common(&source_artist, &destination_artists) >= 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{destination_track, source_track};
    use proptest::prelude::*;

    #[test]
    fn test_strip_punctuation() {
        assert_eq!(strip_punctuation("Don't Stop (Remix)!"), "dont stop remix");
        assert_eq!(strip_punctuation("Café_Mix"), "café_mix");
    }

    #[test]
    fn test_names_match_exact_case_insensitive() {
        assert!(names_match("Summer Hits 2024", "summer hits 2024"));
    }

    #[test]
    fn test_names_match_meaningful_words() {
        assert!(names_match("Road Trip Mix", "My Road Trip Mix 2"));
    }

    #[test]
    fn test_names_match_unrelated() {
        assert!(!names_match("Chill", "Workout"));
    }

    #[test]
    fn test_names_match_short_name_branch_counts_short_words() {
        // "hip" and "hop" are meaningful, "r" and "b" are not
        assert!(names_match("R B", "r & b"));
        assert!(names_match("Hip Hop", "hip-hop hop hip"));
        assert!(!names_match("Rock", "Rock Anthems Forever Volume Two"));
    }

    #[test]
    fn test_names_match_single_shared_word_is_not_enough() {
        assert!(!names_match("Jazz Classics", "Jazz Vibes"));
    }

    #[test]
    fn test_tracks_similar_remix_with_extra_artist() {
        let source = source_track("Blinding Lights", "The Weeknd");
        let destination = destination_track("Blinding Lights (Remix)", &["The Weeknd", "Rosalía"]);
        assert!(tracks_similar(&source, &destination));
    }

    #[test]
    fn test_tracks_similar_unrelated() {
        let source = source_track("Yesterday", "Beatles");
        let destination = destination_track("Tomorrow", &["Queen"]);
        assert!(!tracks_similar(&source, &destination));
    }

    #[test]
    fn test_tracks_similar_requires_artist_overlap() {
        let source = source_track("Blinding Lights", "The Weeknd");
        let destination = destination_track("Blinding Lights", &["Cover Band"]);
        assert!(!tracks_similar(&source, &destination));
    }

    proptest! {
        #[test]
        fn prop_names_match_is_symmetric(a in "[A-Za-z0-9 &-]{0,30}", b in "[A-Za-z0-9 &-]{0,30}") {
            prop_assert_eq!(names_match(&a, &b), names_match(&b, &a));
        }

        #[test]
        fn prop_names_match_is_reflexive(a in "[A-Za-z0-9 ]{1,30}") {
            prop_assert!(names_match(&a, &a.to_uppercase()));
        }
    }
}
