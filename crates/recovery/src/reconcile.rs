use std::collections::HashSet;

use common::{Diagnostic, Diagnostics, Library, LibrarySource, PlaylistOrdering, TrackId};
use itunesdb::DatabaseContents;
use tracing::{debug, info};

use crate::index::FileIndex;

/// Joins database tracks with the files on disk. Database metadata always
/// wins; the file system only supplies paths and, when missing, sizes.
pub fn reconcile(
    contents: DatabaseContents,
    index: Option<&FileIndex>,
    mut diagnostics: Diagnostics,
) -> Library {
    let DatabaseContents {
        mut tracks,
        mut playlists,
        partial,
        ..
    } = contents;

    let mut order: Vec<(usize, TrackId)> = tracks.values().map(|t| (t.ordinal, t.id)).collect();
    order.sort();

    let mut claimed: HashSet<String> = HashSet::new();
    let mut resolved = 0usize;
    for (_, id) in order {
        let track = match tracks.get_mut(&id) {
            Some(track) => track,
            None => continue,
        };
        let found = match (&track.location, index) {
            (Some(location), Some(index)) => index.resolve(location),
            _ => None,
        };
        match found {
            Some(file) => {
                claimed.insert(file.location.lookup_key());
                track.file = Some(file.path.clone());
                track.file_missing = false;
                if track.file_size.is_none() {
                    track.file_size = Some(file.size);
                }
                resolved += 1;
            }
            None => {
                track.file = None;
                track.file_missing = true;
                diagnostics.push(Diagnostic::MissingFile {
                    track: id,
                    location: track.location.clone(),
                });
            }
        }
    }

    match index {
        Some(index) if partial.is_none() => {
            for file in index.files() {
                if !claimed.contains(&file.location.lookup_key()) {
                    diagnostics.push(Diagnostic::OrphanFile {
                        location: file.location.clone(),
                    });
                }
            }
        }
        Some(_) => debug!("Skipping orphan detection for a partial run"),
        None => {}
    }

    for playlist in &mut playlists {
        let id = playlist.id;
        playlist.tracks.retain(|track| {
            let known = tracks.contains_key(track);
            if !known {
                diagnostics.push(Diagnostic::DanglingReference {
                    playlist: id,
                    reference: track.0,
                });
            }
            known
        });
    }

    info!(
        "Reconciled {} tracks: {} with files, {} missing",
        tracks.len(),
        resolved,
        tracks.len() - resolved
    );

    let ordering = if partial.is_some() {
        PlaylistOrdering::Unavailable
    } else {
        PlaylistOrdering::Preserved
    };
    Library {
        tracks,
        playlists,
        source: LibrarySource::Database,
        ordering,
        partial,
        diagnostics,
    }
}
