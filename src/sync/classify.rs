use super::context::{PassContext, SongIdx};
use crate::models::ExternalSongRecord;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Persisted songs and catalog records partitioned by song key.
#[derive(Debug, Default)]
pub(crate) struct Classification {
    /// Song present in both, with the index of its catalog record.
    pub matched: Vec<(SongIdx, usize)>,
    /// Catalog records no persisted song carries, in catalog order.
    pub new_records: Vec<usize>,
    pub stale: Vec<SongIdx>,
}

/// Loads the snapshot into the context. When the catalog reports the same
/// song key twice, the later record replaces the earlier one but keeps its
/// slot, so catalog order stays deterministic.
pub(crate) fn ingest(ctx: &mut PassContext, snapshot: Vec<ExternalSongRecord>) {
    ctx.records.reserve(snapshot.len());
    for record in snapshot {
        match ctx.record_index.get(&record.external_song_key) {
            Some(&slot) => {
                warn!(
                    song_key = record.external_song_key,
                    "Catalog reports the same song twice; keeping the later record"
                );
                ctx.report.identity_collisions += 1;
                ctx.records[slot] = record;
            }
            None => {
                ctx.record_index.insert(record.external_song_key, ctx.records.len());
                ctx.records.push(record);
            }
        }
    }
    ctx.report.catalog_songs = ctx.records.len();
}

pub(crate) fn classify(ctx: &PassContext) -> Classification {
    let mut unclaimed: HashMap<i64, usize> = ctx.record_index.clone();
    let mut out = Classification::default();

    for song in ctx.live_songs() {
        let key = ctx.songs[song.0].external_song_key;
        match unclaimed.remove(&key) {
            Some(record) => out.matched.push((song, record)),
            None => out.stale.push(song),
        }
    }

    out.new_records = unclaimed.into_values().collect();
    out.new_records.sort_unstable();

    debug!(
        matched = out.matched.len(),
        new = out.new_records.len(),
        stale = out.stale.len(),
        "Classified catalog against store"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::context::tests::{record, stored};
    use crate::models::StoredLibrary;

    #[test]
    fn partitions_by_song_key() {
        let mut ctx = PassContext::load(
            stored(&[(1, "A", 0)], &[(10, 1, 100, 0)], &[(20, 10, 1, 0), (21, 10, 2, 1)]),
            "Unknown Artist",
        );
        ingest(&mut ctx, vec![record(3, 100, "A"), record(1, 100, "A"), record(4, 100, "A")]);
        let result = classify(&ctx);

        assert_eq!(result.matched.len(), 1);
        assert_eq!(ctx.songs[result.matched[0].0 .0].external_song_key, 1);
        assert_eq!(result.new_records, vec![0, 2]);
        assert_eq!(result.stale.len(), 1);
        assert_eq!(ctx.songs[result.stale[0].0].external_song_key, 2);
    }

    #[test]
    fn later_duplicate_wins_in_first_slot() {
        let mut ctx = PassContext::load(StoredLibrary::default(), "Unknown Artist");
        ingest(&mut ctx, vec![record(1, 100, "A"), record(2, 100, "A"), record(1, 200, "B")]);

        assert_eq!(ctx.records.len(), 2);
        assert_eq!(ctx.report.identity_collisions, 1);
        assert_eq!(ctx.records[0].external_album_key, 200);
        assert_eq!(ctx.record_index[&1], 0);
    }

    #[test]
    fn empty_catalog_marks_everything_stale() {
        let mut ctx = PassContext::load(
            stored(&[(1, "A", 0)], &[(10, 1, 100, 0)], &[(20, 10, 1, 0)]),
            "Unknown Artist",
        );
        ingest(&mut ctx, Vec::new());
        let result = classify(&ctx);
        assert!(result.matched.is_empty());
        assert!(result.new_records.is_empty());
        assert_eq!(result.stale.len(), 1);
    }
}
