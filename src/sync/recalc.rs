use super::context::PassContext;
use chrono::{DateTime, Utc};

/// Sets every album's release estimate to the latest release date among its
/// songs, or `None` when no song reports one.
///
/// Estimates are kept at whole seconds, which is what the store holds; a
/// sub-second catalog date would otherwise look changed on every pass.
pub(crate) fn recalculate(ctx: &mut PassContext) {
    for album in ctx.live_albums() {
        let estimate = ctx.albums[album.0]
            .songs
            .iter()
            .filter_map(|&song| ctx.record_for_song(song))
            .filter_map(|record| record.release_date)
            .max()
            .and_then(truncate_to_seconds);
        ctx.albums[album.0].release_date_estimate = estimate;
    }
}

fn truncate_to_seconds(date: DateTime<Utc>) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(date.timestamp(), 0)
}

/// Rewrites positions from the current child order, closing any gaps left by
/// deletions. Order itself is never changed here.
pub(crate) fn reindex(ctx: &mut PassContext) {
    for (i, folder) in ctx.root.iter().enumerate() {
        ctx.folders[folder.0].position = i as i64;
    }
    for folder in &ctx.folders {
        if folder.deleted {
            continue;
        }
        for (i, album) in folder.albums.iter().enumerate() {
            ctx.albums[album.0].position = i as i64;
        }
    }
    for album in &ctx.albums {
        if album.deleted {
            continue;
        }
        for (i, song) in album.songs.iter().enumerate() {
            ctx.songs[song.0].position = i as i64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::classify::ingest;
    use crate::sync::context::tests::{record, stored};
    use chrono::TimeZone;

    #[test]
    fn estimate_is_latest_known_release() {
        let mut ctx = PassContext::load(
            stored(
                &[(1, "A", 0)],
                &[(10, 1, 100, 0), (11, 1, 101, 1)],
                &[(20, 10, 1, 0), (21, 10, 2, 1), (22, 11, 3, 0)],
            ),
            "Unknown Artist",
        );
        let mut early = record(1, 100, "A");
        early.release_date = Some(Utc.with_ymd_and_hms(2001, 3, 1, 0, 0, 0).unwrap());
        let mut late = record(2, 100, "A");
        late.release_date = Some(Utc.with_ymd_and_hms(2003, 3, 1, 12, 0, 0).unwrap());
        ingest(&mut ctx, vec![early, late, record(3, 101, "A")]);
        recalculate(&mut ctx);

        assert_eq!(
            ctx.albums[ctx.albums_by_key[&100].0].release_date_estimate,
            Some(Utc.with_ymd_and_hms(2003, 3, 1, 12, 0, 0).unwrap())
        );
        assert_eq!(ctx.albums[ctx.albums_by_key[&101].0].release_date_estimate, None);
    }

    #[test]
    fn sub_second_dates_are_truncated() {
        let date = Utc.with_ymd_and_hms(2010, 5, 5, 5, 5, 5).unwrap() + chrono::Duration::milliseconds(750);
        assert_eq!(
            truncate_to_seconds(date),
            Some(Utc.with_ymd_and_hms(2010, 5, 5, 5, 5, 5).unwrap())
        );
    }

    #[test]
    fn reindex_closes_gaps_in_order() {
        let mut ctx = PassContext::load(
            stored(
                &[(1, "A", 3), (2, "B", 9)],
                &[(10, 1, 100, 4)],
                &[(20, 10, 1, 2), (21, 10, 2, 2), (22, 10, 3, 8)],
            ),
            "Unknown Artist",
        );
        reindex(&mut ctx);

        let folders: Vec<(String, i64)> = ctx
            .root
            .iter()
            .map(|f| (ctx.folders[f.0].title.clone(), ctx.folders[f.0].position))
            .collect();
        assert_eq!(folders, vec![("A".to_string(), 0), ("B".to_string(), 1)]);
        let songs: Vec<(i64, i64)> = ctx.albums[0]
            .songs
            .iter()
            .map(|s| (ctx.songs[s.0].external_song_key, ctx.songs[s.0].position))
            .collect();
        assert_eq!(songs, vec![(1, 0), (2, 1), (3, 2)]);
        assert_eq!(ctx.albums[0].position, 0);
    }
}
