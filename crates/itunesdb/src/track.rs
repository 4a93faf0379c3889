use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{CancelToken, Diagnostic, Diagnostics, LogicalPath, Track, TrackId};
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::debug;

use crate::chunk::{Chunk, ChunkBody, DecodeError, Tag};
use crate::field::{decode_field, read_i32, read_u32, read_u64, read_u8, FieldContext, FieldKind};

// 1904-01-01 to 1970-01-01
const MAC_EPOCH_OFFSET: i64 = 2_082_844_800;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackHeader {
    pub unique_ref: u32,
    pub file_type: Option<u32>,
    pub compilation: Option<u8>,
    pub rating: Option<u8>,
    pub file_size: Option<u32>,
    pub duration_ms: Option<u32>,
    pub track_number: Option<u32>,
    pub track_count: Option<u32>,
    pub year: Option<u32>,
    pub bitrate: Option<u32>,
    pub sample_rate: Option<u32>,
    pub volume: Option<i32>,
    pub play_count: Option<u32>,
    pub last_played: Option<u32>,
    pub disc_number: Option<u32>,
    pub disc_count: Option<u32>,
    pub date_added: Option<u32>,
    pub persistent_id: Option<u64>,
}

impl TrackHeader {
    pub(crate) fn decode(offset: usize, header: &[u8]) -> Result<Self, DecodeError> {
        let unique_ref = read_u32(header, 16).ok_or(DecodeError::ShortRecord {
            offset,
            tag: Tag::TRACK,
            needed: 20,
            available: header.len(),
        })?;
        Ok(Self {
            unique_ref,
            file_type: read_u32(header, 24),
            compilation: read_u8(header, 30),
            rating: read_u8(header, 31),
            file_size: read_u32(header, 36),
            duration_ms: read_u32(header, 40),
            track_number: read_u32(header, 44),
            track_count: read_u32(header, 48),
            year: read_u32(header, 52),
            bitrate: read_u32(header, 56),
            sample_rate: read_u32(header, 60),
            volume: read_i32(header, 64),
            play_count: read_u32(header, 80),
            last_played: read_u32(header, 88),
            disc_number: read_u32(header, 92),
            disc_count: read_u32(header, 96),
            date_added: read_u32(header, 104),
            persistent_id: read_u64(header, 112),
        })
    }

    /// The persistent id, or the unique ref for layouts that predate it.
    pub fn identity(&self) -> Option<TrackId> {
        match self.persistent_id.and_then(nonzero_u64) {
            Some(id) => Some(TrackId(id)),
            None if self.unique_ref != 0 => Some(TrackId(u64::from(self.unique_ref))),
            None => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct AssembledTracks {
    pub tracks: BTreeMap<TrackId, Track>,
    /// In-database unique ref to persistent id.
    pub by_ref: HashMap<u32, TrackId>,
    /// Track items looked at before a cancellation, out of `items`.
    pub processed: usize,
    pub items: usize,
}

/// Called with (items done, items total) after each track item.
pub type ItemProgress<'p> = &'p (dyn Fn(usize, usize) + Sync);

/// Folds every track item into a [`Track`]. With a pool, items are assembled
/// in parallel and their diagnostics merged back in source order.
pub fn assemble_tracks(
    items: &[&Chunk<'_>],
    diagnostics: &mut Diagnostics,
    cancel: &CancelToken,
    pool: Option<&ThreadPool>,
    on_item: ItemProgress<'_>,
) -> AssembledTracks {
    let total = items.len();
    let done = AtomicUsize::new(0);
    let work = |(ordinal, chunk): (usize, &&Chunk<'_>)| {
        if cancel.is_cancelled() {
            return None;
        }
        let mut local = Diagnostics::new();
        let track = assemble_track(chunk, ordinal, &mut local);
        on_item(done.fetch_add(1, Ordering::SeqCst) + 1, total);
        Some((track, local))
    };

    let outcomes: Vec<Option<(Option<(u32, Track)>, Diagnostics)>> = match pool {
        Some(pool) => pool.install(|| items.par_iter().enumerate().map(work).collect()),
        None => items.iter().enumerate().map(work).collect(),
    };

    let mut assembled = AssembledTracks {
        items: items.len(),
        ..AssembledTracks::default()
    };
    for outcome in outcomes {
        let (track, local) = match outcome {
            Some(outcome) => outcome,
            None => continue,
        };
        assembled.processed += 1;
        diagnostics.merge(local);
        let (unique_ref, track) = match track {
            Some(track) => track,
            None => continue,
        };
        // a repeated record still answers to its own unique ref
        if unique_ref != 0 {
            assembled.by_ref.entry(unique_ref).or_insert(track.id);
        }
        if assembled.tracks.contains_key(&track.id) {
            diagnostics.push(Diagnostic::DuplicateTrackId { id: track.id });
            continue;
        }
        assembled.tracks.insert(track.id, track);
    }
    assembled
}

pub fn assemble_track(
    chunk: &Chunk<'_>,
    ordinal: usize,
    diagnostics: &mut Diagnostics,
) -> Option<(u32, Track)> {
    let header = match &chunk.body {
        ChunkBody::Track(header) => header,
        _ => return None,
    };
    let id = match header.identity() {
        Some(id) => id,
        None => {
            diagnostics.push(Diagnostic::DroppedTrack {
                offset: chunk.offset,
                reason: "record has no identifier".to_string(),
            });
            return None;
        }
    };

    let mut track = Track::new(id, ordinal);
    track.file_type = header.file_type.and_then(four_cc);
    track.compilation = header.compilation.map(|flag| flag != 0);
    track.rating = header.rating;
    track.file_size = header.file_size.and_then(nonzero).map(u64::from);
    track.duration_ms = header.duration_ms.and_then(nonzero);
    track.track_number = header.track_number.and_then(nonzero);
    track.track_count = header.track_count.and_then(nonzero);
    track.year = header.year.and_then(nonzero);
    track.bitrate = header.bitrate.and_then(nonzero);
    // 16.16 fixed point
    track.sample_rate = header.sample_rate.map(|raw| raw >> 16).and_then(nonzero);
    track.volume = header.volume;
    track.play_count = header.play_count;
    track.last_played = header.last_played.and_then(mac_to_unix);
    track.disc_number = header.disc_number.and_then(nonzero);
    track.disc_count = header.disc_count.and_then(nonzero);
    track.date_added = header.date_added.and_then(mac_to_unix);

    for child in &chunk.children {
        let raw = match &child.body {
            ChunkBody::Field(raw) => raw,
            _ => continue,
        };
        let skip = |reason: String| Diagnostic::SkippedField {
            track: Some(id),
            field_type: raw.field_type,
            reason,
        };
        let field = match decode_field(raw, FieldContext::Track) {
            Ok(Some(field)) => field,
            Ok(None) => {
                debug!(
                    "Ignoring field type {} on track {:?} at offset {}",
                    raw.field_type, id, child.offset
                );
                continue;
            }
            Err(err) => {
                diagnostics.push(skip(err.to_string()));
                continue;
            }
        };
        let kind = field.kind;
        let text = match field.into_text() {
            Some(text) => text,
            None => continue,
        };
        match kind {
            FieldKind::Title => track.title = Some(text),
            FieldKind::Album => track.album = Some(text),
            FieldKind::Artist => track.artist = Some(text),
            FieldKind::Genre => track.genre = Some(text),
            FieldKind::FileKind => track.file_kind = Some(text),
            FieldKind::Comment => track.comment = Some(text),
            FieldKind::Composer => track.composer = Some(text),
            FieldKind::AlbumArtist => track.album_artist = Some(text),
            FieldKind::Location => match LogicalPath::parse(&text) {
                Some(location) => track.location = Some(location),
                None => diagnostics.push(skip(format!("unusable location {:?}", text))),
            },
            FieldKind::PlaylistName | FieldKind::SmartRules => {}
        }
    }

    Some((header.unique_ref, track))
}

fn nonzero(value: u32) -> Option<u32> {
    if value == 0 {
        None
    } else {
        Some(value)
    }
}

fn nonzero_u64(value: u64) -> Option<u64> {
    if value == 0 {
        None
    } else {
        Some(value)
    }
}

fn mac_to_unix(seconds: u32) -> Option<i64> {
    if seconds == 0 {
        None
    } else {
        Some(i64::from(seconds) - MAC_EPOCH_OFFSET)
    }
}

/// `0x4D503320` is stored for "MP3 ".
fn four_cc(code: u32) -> Option<String> {
    if code == 0 {
        return None;
    }
    let bytes = code.to_be_bytes();
    if !bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b' ') {
        return None;
    }
    let text: String = bytes.iter().map(|b| *b as char).collect();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
