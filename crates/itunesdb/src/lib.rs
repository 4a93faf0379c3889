use std::collections::BTreeMap;

use common::{CancelToken, Diagnostic, Diagnostics, PartialRun, Playlist, Track, TrackId};
use rayon::ThreadPool;
use tracing::info;

pub mod chunk;
pub mod field;
pub mod playlist;
pub mod track;

pub use chunk::{decode_database, Chunk, ChunkBody, DataSetKind, DecodeError, Tag};
pub use field::{decode_field, Field, FieldContext, FieldError, FieldKind, FieldValue, RawField};
pub use playlist::reconstruct_playlists;
pub use track::{assemble_tracks, AssembledTracks, ItemProgress, TrackHeader};

#[cfg(test)]
#[path = "../tests/support/mod.rs"]
mod support;

#[derive(Debug, Clone, Default)]
pub struct DatabaseContents {
    pub version: Option<u32>,
    pub tracks: BTreeMap<TrackId, Track>,
    pub playlists: Vec<Playlist>,
    /// Set when a cancellation stopped track assembly early.
    pub partial: Option<PartialRun>,
}

pub fn read_database(
    bytes: &[u8],
    diagnostics: &mut Diagnostics,
    cancel: &CancelToken,
    pool: Option<&ThreadPool>,
    on_item: ItemProgress<'_>,
) -> Result<DatabaseContents, DecodeError> {
    let root = decode_database(bytes, diagnostics, cancel)?;
    let version = match root.body {
        ChunkBody::Database { version } => version,
        _ => None,
    };

    let items: Vec<&Chunk<'_>> = root
        .children
        .iter()
        .filter(|set| matches!(set.body, ChunkBody::DataSet(DataSetKind::Tracks)))
        .flat_map(|set| set.children.iter())
        .filter(|list| list.tag == Tag::TRACK_LIST)
        .flat_map(|list| list.children.iter())
        .filter(|item| item.tag == Tag::TRACK)
        .collect();

    let assembled = assemble_tracks(&items, diagnostics, cancel, pool, on_item);

    let mut contents = DatabaseContents {
        version,
        ..DatabaseContents::default()
    };

    if cancel.is_cancelled() {
        let partial = PartialRun {
            processed: assembled.processed,
            total: assembled.items,
        };
        diagnostics.push(Diagnostic::Cancelled {
            processed: partial.processed,
            total: partial.total,
        });
        contents.partial = Some(partial);
        contents.tracks = assembled.tracks;
        return Ok(contents);
    }

    contents.playlists = reconstruct_playlists(&root, &assembled.by_ref, diagnostics);
    contents.tracks = assembled.tracks;

    info!(
        "Database version {:?}: {} tracks, {} playlists",
        contents.version,
        contents.tracks.len(),
        contents.playlists.len()
    );
    Ok(contents)
}
