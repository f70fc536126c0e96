use super::context::{PassContext, Placement, SongIdx};
use tracing::debug;

/// Detaches every matched song whose catalog record now names a different
/// album and queues it for placement alongside the new records. The old album
/// is left as is, even if empty; pruning happens once, after placement.
pub(crate) fn relink(ctx: &mut PassContext, matched: &[(SongIdx, usize)]) -> Vec<Placement> {
    let mut moved = Vec::new();
    for &(song, record) in matched {
        let current = ctx.songs[song.0].album;
        let wanted = ctx.record(record).external_album_key;
        if ctx.albums[current.0].external_album_key == wanted {
            continue;
        }
        debug!(
            song_key = ctx.songs[song.0].external_song_key,
            from = ctx.albums[current.0].external_album_key,
            to = wanted,
            "Song changed album"
        );
        ctx.report.songs_relinked += 1;
        moved.push(Placement {
            record,
            song: Some(song),
        });
    }
    let songs: Vec<SongIdx> = moved.iter().filter_map(|p| p.song).collect();
    ctx.detach_songs(&songs);
    moved
}
