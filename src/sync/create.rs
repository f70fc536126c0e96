//! Places new catalog records and relinked songs into the hierarchy, creating
//! albums and folders on demand.

use super::context::{AlbumIdx, FolderIdx, PassContext, Placement};
use super::ordering::arrange;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FolderResolution {
    Existing(FolderIdx),
    NeedsCreate(String),
}

/// Where a record's song goes: an album that already exists, or a new album
/// under a folder that may itself need creating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ContainerResolution {
    Existing(AlbumIdx),
    NeedsCreateUnder(FolderResolution),
}

/// Resolves against the context as it stands now, so containers created for
/// earlier records are found by later ones.
pub(crate) fn resolve(ctx: &PassContext, record: usize) -> ContainerResolution {
    let record = ctx.record(record);
    if let Some(&album) = ctx.albums_by_key.get(&record.external_album_key) {
        return ContainerResolution::Existing(album);
    }
    let title = record.folder_title(&ctx.placeholder);
    match ctx.folders_by_title.get(title) {
        Some(&folder) => ContainerResolution::NeedsCreateUnder(FolderResolution::Existing(folder)),
        None => ContainerResolution::NeedsCreateUnder(FolderResolution::NeedsCreate(title.to_string())),
    }
}

fn materialize_folder(ctx: &mut PassContext, folder: FolderResolution) -> FolderIdx {
    match folder {
        FolderResolution::Existing(folder) => folder,
        FolderResolution::NeedsCreate(title) => {
            debug!(folder = %title, "Creating folder");
            ctx.create_folder(title)
        }
    }
}

fn materialize(ctx: &mut PassContext, record: usize, resolution: ContainerResolution) -> AlbumIdx {
    match resolution {
        ContainerResolution::Existing(album) => album,
        ContainerResolution::NeedsCreateUnder(folder) => {
            let folder = materialize_folder(ctx, folder);
            let key = ctx.record(record).external_album_key;
            ctx.create_album(folder, key)
        }
    }
}

/// Places every pending record in policy order. New children land above a
/// parent's existing children, in the order they are processed here.
pub(crate) fn create(ctx: &mut PassContext, new_records: &[usize], relinked: Vec<Placement>) {
    let mut pending: Vec<Placement> = new_records
        .iter()
        .map(|&record| Placement { record, song: None })
        .collect();
    pending.extend(relinked);
    let pending = arrange(ctx, pending);

    for placement in pending {
        let resolution = resolve(ctx, placement.record);
        let album = materialize(ctx, placement.record, resolution);
        match placement.song {
            Some(song) => ctx.attach_song(song, album),
            None => {
                let key = ctx.record(placement.record).external_song_key;
                ctx.create_song(album, key);
            }
        }
    }
    ctx.merge_staged();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StoredLibrary;
    use crate::sync::classify::{classify, ingest};
    use crate::sync::context::tests::{record, stored};
    use crate::models::ExternalSongRecord;
    use chrono::{Duration, TimeZone, Utc};

    fn titles(ctx: &PassContext) -> Vec<&str> {
        ctx.root.iter().map(|f| ctx.folders[f.0].title.as_str()).collect()
    }

    fn song_keys(ctx: &PassContext, album_key: i64) -> Vec<i64> {
        let album = ctx.albums_by_key[&album_key];
        ctx.albums[album.0]
            .songs
            .iter()
            .map(|s| ctx.songs[s.0].external_song_key)
            .collect()
    }

    fn run(ctx: &mut PassContext, snapshot: Vec<ExternalSongRecord>) {
        ingest(ctx, snapshot);
        let classes = classify(ctx);
        create(ctx, &classes.new_records, Vec::new());
    }

    #[test]
    fn resolution_falls_back_through_album_then_folder() {
        let mut ctx = PassContext::load(
            stored(&[(1, "A", 0)], &[(10, 1, 100, 0)], &[(20, 10, 1, 0)]),
            "Unknown Artist",
        );
        ingest(&mut ctx, vec![record(2, 100, "A"), record(3, 101, "A"), record(4, 102, "B")]);

        assert_eq!(resolve(&ctx, 0), ContainerResolution::Existing(AlbumIdx(0)));
        assert_eq!(
            resolve(&ctx, 1),
            ContainerResolution::NeedsCreateUnder(FolderResolution::Existing(FolderIdx(0)))
        );
        assert_eq!(
            resolve(&ctx, 2),
            ContainerResolution::NeedsCreateUnder(FolderResolution::NeedsCreate("B".to_string()))
        );
    }

    #[test]
    fn containers_are_shared_within_a_pass() {
        let mut ctx = PassContext::load(StoredLibrary::default(), "Unknown Artist");
        let mut second = record(2, 100, "Solo");
        second.track_number = 2;
        run(&mut ctx, vec![record(1, 100, "Solo"), second, record(3, 200, "Solo")]);

        assert_eq!(ctx.report.folders_created, 1);
        assert_eq!(ctx.report.albums_created, 2);
        assert_eq!(song_keys(&ctx, 100), vec![1, 2]);
    }

    #[test]
    fn missing_artist_files_under_placeholder() {
        let mut ctx = PassContext::load(StoredLibrary::default(), "Various");
        let mut anonymous = record(1, 100, "");
        anonymous.album_artist = None;
        run(&mut ctx, vec![anonymous]);
        assert_eq!(titles(&ctx), vec!["Various"]);
    }

    #[test]
    fn incremental_puts_newest_additions_on_top() {
        let mut ctx = PassContext::load(
            stored(
                &[(1, "M", 0)],
                &[(10, 1, 100, 0)],
                &[(20, 10, 1, 0), (21, 10, 2, 1)],
            ),
            "Unknown Artist",
        );
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let mut older = record(3, 100, "M");
        older.date_added = base;
        let mut newer = record(4, 100, "M");
        newer.date_added = base + Duration::days(1);
        let mut elsewhere = record(5, 300, "Z");
        elsewhere.date_added = base;
        run(&mut ctx, vec![older, newer, elsewhere]);

        assert_eq!(song_keys(&ctx, 100), vec![4, 3, 1, 2]);
        assert_eq!(titles(&ctx), vec!["Z", "M"]);
    }

    #[test]
    fn bootstrap_sorts_folders_albums_and_tracks() {
        let mut ctx = PassContext::load(StoredLibrary::default(), "Unknown Artist");
        let date = |y| Some(Utc.with_ymd_and_hms(y, 1, 1, 0, 0, 0).unwrap());

        let mut b1 = record(1, 2, "Z");
        b1.release_date = date(2020);
        b1.track_number = 2;
        let mut b2 = record(2, 2, "Z");
        b2.release_date = date(2020);
        b2.track_number = 1;
        let mut a1 = record(3, 1, "Z");
        a1.release_date = date(2021);
        let mut c1 = record(4, 3, "a");
        c1.track_number = 0;
        let mut c2 = record(5, 3, "a");
        c2.track_number = 7;
        run(&mut ctx, vec![b1, b2, a1, c1, c2]);

        assert_eq!(titles(&ctx), vec!["a", "Z"]);
        let z = ctx.folders_by_title["Z"];
        let albums: Vec<i64> = ctx.folders[z.0]
            .albums
            .iter()
            .map(|a| ctx.albums[a.0].external_album_key)
            .collect();
        assert_eq!(albums, vec![1, 2]);
        assert_eq!(song_keys(&ctx, 2), vec![2, 1]);
        assert_eq!(song_keys(&ctx, 3), vec![5, 4]);
    }
}
