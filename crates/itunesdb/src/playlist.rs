use std::collections::HashMap;

use common::{Diagnostic, Diagnostics, Playlist, PlaylistId, TrackId};
use tracing::debug;

use crate::chunk::{Chunk, ChunkBody, DataSetKind, DecodeError, Tag};
use crate::field::{decode_field, read_u32, read_u64, read_u8, FieldContext, FieldKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistHeader {
    pub is_master: bool,
    pub persistent_id: u64,
}

impl PlaylistHeader {
    pub(crate) fn decode(offset: usize, header: &[u8]) -> Result<Self, DecodeError> {
        let short = DecodeError::ShortRecord {
            offset,
            tag: Tag::PLAYLIST,
            needed: 36,
            available: header.len(),
        };
        let flag = read_u8(header, 20).ok_or_else(|| short.clone())?;
        let persistent_id = read_u64(header, 28).ok_or(short)?;
        Ok(Self {
            is_master: flag != 0,
            persistent_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberHeader {
    pub track_ref: u32,
}

impl MemberHeader {
    pub(crate) fn decode(offset: usize, header: &[u8]) -> Result<Self, DecodeError> {
        let track_ref = read_u32(header, 24).ok_or(DecodeError::ShortRecord {
            offset,
            tag: Tag::PLAYLIST_MEMBER,
            needed: 28,
            available: header.len(),
        })?;
        Ok(Self { track_ref })
    }
}

/// Rebuilds every playlist of the database in on-disk order.
pub fn reconstruct_playlists(
    root: &Chunk<'_>,
    by_ref: &HashMap<u32, TrackId>,
    diagnostics: &mut Diagnostics,
) -> Vec<Playlist> {
    let sets = data_sets(root, DataSetKind::Playlists);
    let sets = if sets.is_empty() {
        data_sets(root, DataSetKind::Podcasts)
    } else {
        sets
    };

    let mut playlists = Vec::new();
    for set in sets {
        for list in set.children.iter().filter(|c| c.tag == Tag::PLAYLIST_LIST) {
            for chunk in &list.children {
                if let ChunkBody::Playlist(header) = &chunk.body {
                    playlists.push(reconstruct_playlist(chunk, header, by_ref, diagnostics));
                }
            }
        }
    }

    let mut master_seen = false;
    for playlist in playlists.iter_mut().filter(|p| p.is_master) {
        if master_seen {
            playlist.is_master = false;
            diagnostics.push(Diagnostic::ExtraMasterPlaylist {
                playlist: playlist.id,
            });
        }
        master_seen = true;
    }
    if !master_seen {
        diagnostics.missing_master();
    }
    playlists
}

pub fn reconstruct_playlist(
    chunk: &Chunk<'_>,
    header: &PlaylistHeader,
    by_ref: &HashMap<u32, TrackId>,
    diagnostics: &mut Diagnostics,
) -> Playlist {
    let id = PlaylistId(header.persistent_id);
    let mut playlist = Playlist {
        id,
        name: None,
        is_master: header.is_master,
        is_smart: false,
        tracks: Vec::new(),
    };

    for child in &chunk.children {
        match &child.body {
            ChunkBody::Field(raw) => match decode_field(raw, FieldContext::Playlist) {
                Ok(Some(field)) => match field.kind {
                    FieldKind::PlaylistName if playlist.name.is_none() => {
                        playlist.name = field.into_text();
                    }
                    FieldKind::SmartRules => playlist.is_smart = true,
                    _ => {}
                },
                Ok(None) => {}
                Err(err) => diagnostics.push(Diagnostic::SkippedField {
                    track: None,
                    field_type: raw.field_type,
                    reason: format!("playlist {}: {}", id, err),
                }),
            },
            ChunkBody::PlaylistMember(member) => match by_ref.get(&member.track_ref) {
                Some(track) => playlist.tracks.push(*track),
                None => diagnostics.push(Diagnostic::DanglingReference {
                    playlist: id,
                    reference: u64::from(member.track_ref),
                }),
            },
            _ => {}
        }
    }

    debug!(
        "Playlist {} ({:?}): {} entries",
        id,
        playlist.name,
        playlist.tracks.len()
    );
    playlist
}

fn data_sets<'c, 'a>(root: &'c Chunk<'a>, kind: DataSetKind) -> Vec<&'c Chunk<'a>> {
    root.children
        .iter()
        .filter(|c| matches!(c.body, ChunkBody::DataSet(k) if k == kind))
        .collect()
}
