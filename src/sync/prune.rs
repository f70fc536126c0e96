use super::context::{PassContext, SongIdx};
use tracing::debug;

/// Deletes stale songs, then every album left without songs, then every
/// folder left without albums. Each step sees the result of the previous one,
/// so a whole chain can disappear in one pass.
pub(crate) fn prune(ctx: &mut PassContext, stale: &[SongIdx]) {
    for &song in stale {
        ctx.delete_song(song);
    }
    ctx.compact();

    for album in ctx.live_albums() {
        if ctx.albums[album.0].songs.is_empty() {
            debug!(album_key = ctx.albums[album.0].external_album_key, "Removing empty album");
            ctx.delete_album(album);
        }
    }
    ctx.compact();

    for folder in ctx.live_folders() {
        if ctx.folders[folder.0].albums.is_empty() {
            debug!(folder = %ctx.folders[folder.0].title, "Removing empty folder");
            ctx.delete_folder(folder);
        }
    }
    ctx.compact();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::context::tests::stored;

    #[test]
    fn last_song_takes_album_and_folder_with_it() {
        let mut ctx = PassContext::load(
            stored(
                &[(1, "A", 0), (2, "B", 1), (3, "C", 2)],
                &[(10, 1, 100, 0), (11, 2, 101, 0), (12, 3, 102, 0)],
                &[(20, 10, 1, 0), (21, 11, 2, 0), (22, 12, 3, 0)],
            ),
            "Unknown Artist",
        );
        let doomed = ctx
            .live_songs()
            .into_iter()
            .find(|s| ctx.songs[s.0].external_song_key == 2)
            .unwrap();
        prune(&mut ctx, &[doomed]);

        assert_eq!(ctx.report.songs_deleted, 1);
        assert_eq!(ctx.report.albums_deleted, 1);
        assert_eq!(ctx.report.folders_deleted, 1);
        let titles: Vec<&str> = ctx.root.iter().map(|f| ctx.folders[f.0].title.as_str()).collect();
        assert_eq!(titles, vec!["A", "C"]);
        assert!(!ctx.folders_by_title.contains_key("B"));
    }

    #[test]
    fn album_with_remaining_songs_survives() {
        let mut ctx = PassContext::load(
            stored(&[(1, "A", 0)], &[(10, 1, 100, 0)], &[(20, 10, 1, 0), (21, 10, 2, 1)]),
            "Unknown Artist",
        );
        prune(&mut ctx, &[SongIdx(0)]);
        assert_eq!(ctx.report.albums_deleted, 0);
        assert_eq!(ctx.albums[0].songs, vec![SongIdx(1)]);
    }
}
