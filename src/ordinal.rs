//! Chapter ordinal parsing and ordering.
//!
//! Ordinals are a sort key only. They are parsed from display titles, so they are not
//! unique and not necessarily monotonic with the source's ids.
//!
//! Known limitation: when no explicit `Chapter N` / `Episode N` marker exists the first
//! numeric token is used, which misreads titles such as `Vol. 2 - Side Story` or titles
//! containing dates.

use regex::Regex;
use std::cmp::Ordering;
use std::sync::LazyLock;

use crate::types::{ChapterId, ChapterRef};

#[allow(clippy::expect_used)]
static EXPLICIT_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:chapter|chap|ch|episode|ep)\.?\s*#?\s*(\d+(?:\.\d+)?)")
        .expect("explicit marker pattern is valid")
});

#[allow(clippy::expect_used)]
static FIRST_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("number pattern is valid"));

/// Parse the ordinal out of a chapter title.
///
/// ```
/// use chapterflow::ordinal::parse_ordinal;
///
/// assert_eq!(parse_ordinal("Chapter 12.5: Interlude"), Some(12.5));
/// assert_eq!(parse_ordinal("Ep. 7"), Some(7.0));
/// assert_eq!(parse_ordinal("Season 2 Episode 30"), Some(30.0));
/// assert_eq!(parse_ordinal("Prologue"), None);
/// ```
pub fn parse_ordinal(title: &str) -> Option<f64> {
    if let Some(caps) = EXPLICIT_MARKER.captures(title)
        && let Some(value) = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok())
    {
        return Some(value);
    }

    FIRST_NUMBER
        .find(title)
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Compare two raw ids: numerically when both are integers, otherwise lexicographically.
pub fn compare_ids(a: &ChapterId, b: &ChapterId) -> Ordering {
    match (a.as_str().parse::<u64>(), b.as_str().parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.as_str().cmp(b.as_str()),
    }
}

/// Reading order: ordinal ascending, ties broken by raw id.
pub fn compare_chapters(a: &ChapterRef, b: &ChapterRef) -> Ordering {
    a.ordinal
        .total_cmp(&b.ordinal)
        .then_with(|| compare_ids(&a.id, &b.id))
}

/// Sort chapters into reading order in place.
pub fn sort_reading_order(chapters: &mut [ChapterRef]) {
    chapters.sort_by(compare_chapters);
}

/// Whether two ordinals denote the same chapter number.
pub fn same_ordinal(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

/// Pick the chapter carrying `ordinal`, preferring the lowest raw id on ties.
pub fn find_by_ordinal<'a, I>(chapters: I, ordinal: f64) -> Option<&'a ChapterRef>
where
    I: IntoIterator<Item = &'a ChapterRef>,
{
    chapters
        .into_iter()
        .filter(|c| same_ordinal(c.ordinal, ordinal))
        .min_by(|a, b| compare_ids(&a.id, &b.id))
}
