//! Ordering policy for newly placed folders, albums and songs.
//!
//! Placement always puts new children above a parent's pre-existing
//! children, in processing order. The policy is
//! therefore entirely expressed by the order in which [`arrange`] hands
//! placements to the creator:
//!
//! - **Bootstrap**: folders by title (Finder-style), albums newest first,
//!   songs by disc and track.
//! - **Incremental**: newest `date_added` first, so recent additions surface
//!   at the top of every parent they touch.

use super::context::{PassContext, Placement};
use super::report::OrderingMode;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Compares titles the way the Finder does: case and diacritics are ignored
/// and runs of digits compare by numeric value ("Track 2" < "Track 10").
/// Titles that fold to the same text fall back to plain code point order so
/// the result is total.
pub fn finder_cmp(a: &str, b: &str) -> Ordering {
    let folded_a = fold(a);
    let folded_b = fold(b);
    natural_cmp(&folded_a, &folded_b).then_with(|| a.cmp(b))
}

fn fold(s: &str) -> Vec<char> {
    s.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

fn natural_cmp(a: &[char], b: &[char]) -> Ordering {
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i].is_ascii_digit() && b[j].is_ascii_digit() {
            let start_a = i;
            while i < a.len() && a[i].is_ascii_digit() {
                i += 1;
            }
            let start_b = j;
            while j < b.len() && b[j].is_ascii_digit() {
                j += 1;
            }
            let num_a = strip_leading_zeros(&a[start_a..i]);
            let num_b = strip_leading_zeros(&b[start_b..j]);
            let ord = num_a.len().cmp(&num_b.len()).then_with(|| num_a.cmp(num_b));
            if ord != Ordering::Equal {
                return ord;
            }
        } else {
            let ord = a[i].cmp(&b[j]);
            if ord != Ordering::Equal {
                return ord;
            }
            i += 1;
            j += 1;
        }
    }
    (a.len() - i).cmp(&(b.len() - j))
}

fn strip_leading_zeros(digits: &[char]) -> &[char] {
    let first = digits.iter().position(|c| *c != '0').unwrap_or(digits.len());
    &digits[first..]
}

/// Unknown (zero) disc and track numbers sort after every known one.
fn known_last(n: u32) -> (bool, u32) {
    (n == 0, n)
}

fn newest_first(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn title_cmp(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => finder_cmp(a, b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Sorts placements into the order the creator must process them.
pub(crate) fn arrange(ctx: &PassContext, mut placements: Vec<Placement>) -> Vec<Placement> {
    // Catalog order is the base for every stable tie-break below.
    placements.sort_by_key(|p| p.record);
    match ctx.mode {
        OrderingMode::Incremental => {
            placements.sort_by(|a, b| {
                ctx.record(b.record)
                    .date_added
                    .cmp(&ctx.record(a.record).date_added)
            });
            placements
        }
        OrderingMode::Bootstrap => arrange_bootstrap(ctx, placements),
    }
}

struct AlbumGroup {
    songs: Vec<Placement>,
    release: Option<DateTime<Utc>>,
    first_seen: usize,
}

fn arrange_bootstrap(ctx: &PassContext, placements: Vec<Placement>) -> Vec<Placement> {
    let mut groups: Vec<AlbumGroup> = Vec::new();
    let mut by_key: HashMap<i64, usize> = HashMap::new();
    for placement in placements {
        let record = ctx.record(placement.record);
        let slot = *by_key.entry(record.external_album_key).or_insert_with(|| {
            groups.push(AlbumGroup {
                songs: Vec::new(),
                release: None,
                first_seen: placement.record,
            });
            groups.len() - 1
        });
        let group = &mut groups[slot];
        group.release = group.release.max(record.release_date);
        group.songs.push(placement);
    }

    for group in &mut groups {
        group.songs.sort_by(|a, b| {
            let ra = ctx.record(a.record);
            let rb = ctx.record(b.record);
            known_last(ra.disc_number)
                .cmp(&known_last(rb.disc_number))
                .then_with(|| known_last(ra.track_number).cmp(&known_last(rb.track_number)))
                .then_with(|| title_cmp(ra.title.as_deref(), rb.title.as_deref()))
        });
    }

    // An album files under the folder its first song would create, so the
    // creator's container resolution lands exactly where this order expects.
    let mut folders: Vec<(String, Vec<AlbumGroup>)> = Vec::new();
    let mut folder_slots: HashMap<String, usize> = HashMap::new();
    for group in groups {
        let title = match group.songs.first() {
            Some(first) => ctx.target_folder_title(first.record),
            None => continue,
        };
        let slot = *folder_slots.entry(title.clone()).or_insert_with(|| {
            folders.push((title, Vec::new()));
            folders.len() - 1
        });
        folders[slot].1.push(group);
    }

    folders.sort_by(|a, b| finder_cmp(&a.0, &b.0));
    let mut ordered = Vec::new();
    for (_, mut albums) in folders {
        albums.sort_by(|a, b| newest_first(a.release, b.release).then(a.first_seen.cmp(&b.first_seen)));
        for album in albums {
            ordered.extend(album.songs);
        }
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut titles: Vec<&str>) -> Vec<&str> {
        titles.sort_by(|a, b| finder_cmp(a, b));
        titles
    }

    #[test]
    fn case_interleaves_instead_of_ascii_order() {
        assert_eq!(
            sorted(vec!["beta", "Alpha", "alpha two", "Beta Band"]),
            vec!["Alpha", "alpha two", "beta", "Beta Band"]
        );
    }

    #[test]
    fn digits_compare_numerically() {
        assert_eq!(
            sorted(vec!["Track 10", "Track 2", "Track 1", "Track 02b"]),
            vec!["Track 1", "Track 2", "Track 02b", "Track 10"]
        );
    }

    #[test]
    fn diacritics_fold_to_base_letter() {
        assert_eq!(finder_cmp("Émilie", "emilie z"), Ordering::Less);
        assert_eq!(sorted(vec!["Zoë", "Björk", "Bjarne"]), vec!["Bjarne", "Björk", "Zoë"]);
    }

    #[test]
    fn equal_folds_still_order_totally() {
        assert_ne!(finder_cmp("abc", "ABC"), Ordering::Equal);
        assert_eq!(finder_cmp("abc", "abc"), Ordering::Equal);
    }

    #[test]
    fn unknown_numbers_sort_last() {
        let mut numbers = vec![0, 3, 1, 0, 2];
        numbers.sort_by_key(|n| known_last(*n));
        assert_eq!(numbers, vec![1, 2, 3, 0, 0]);
    }
}
