use std::fmt;

use common::{CancelToken, Diagnostic, Diagnostics, StructuralFault};
use tracing::debug;

use crate::field::{read_u32, RawField};
use crate::playlist::{MemberHeader, PlaylistHeader};
use crate::track::TrackHeader;

pub const PREFIX_LEN: usize = 12;
// A well-formed database nests five deep (mhbd > mhsd > mhlt > mhit > mhod).
pub const MAX_NESTING: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(pub [u8; 4]);

impl Tag {
    pub const DATABASE: Tag = Tag(*b"mhbd");
    pub const DATA_SET: Tag = Tag(*b"mhsd");
    pub const TRACK_LIST: Tag = Tag(*b"mhlt");
    pub const PLAYLIST_LIST: Tag = Tag(*b"mhlp");
    pub const ALBUM_LIST: Tag = Tag(*b"mhla");
    pub const TRACK: Tag = Tag(*b"mhit");
    pub const PLAYLIST: Tag = Tag(*b"mhyp");
    pub const PLAYLIST_MEMBER: Tag = Tag(*b"mhip");
    pub const FIELD: Tag = Tag(*b"mhod");

    fn is_list(self) -> bool {
        matches!(self, Tag::TRACK_LIST | Tag::PLAYLIST_LIST | Tag::ALBUM_LIST)
    }

    fn has_children(self) -> bool {
        matches!(
            self,
            Tag::DATABASE
                | Tag::DATA_SET
                | Tag::TRACK_LIST
                | Tag::PLAYLIST_LIST
                | Tag::ALBUM_LIST
                | Tag::TRACK
                | Tag::PLAYLIST
                | Tag::PLAYLIST_MEMBER
        )
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            if byte.is_ascii_graphic() {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "\\x{:02x}", byte)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({})", self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    MalformedLength {
        offset: usize,
        tag: Tag,
        header_len: usize,
        total_len: usize,
    },
    ShortRecord {
        offset: usize,
        tag: Tag,
        needed: usize,
        available: usize,
    },
    UnexpectedTag {
        offset: usize,
        expected: Tag,
        found: Tag,
    },
}

impl DecodeError {
    pub fn offset(&self) -> usize {
        match self {
            DecodeError::Truncated { offset, .. }
            | DecodeError::MalformedLength { offset, .. }
            | DecodeError::ShortRecord { offset, .. }
            | DecodeError::UnexpectedTag { offset, .. } => *offset,
        }
    }

    pub fn fault(&self) -> StructuralFault {
        match self {
            DecodeError::Truncated { .. } => StructuralFault::Truncated,
            DecodeError::MalformedLength { .. } => StructuralFault::MalformedLength,
            DecodeError::ShortRecord { .. } => StructuralFault::ShortRecord,
            DecodeError::UnexpectedTag { .. } => StructuralFault::UnexpectedTag,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::Decode {
            offset: self.offset(),
            fault: self.fault(),
            detail: self.to_string(),
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated {
                offset,
                needed,
                available,
            } => write!(
                f,
                "stream ends at offset {}: needed {} bytes, {} available",
                offset, needed, available
            ),
            DecodeError::MalformedLength {
                offset,
                tag,
                header_len,
                total_len,
            } => write!(
                f,
                "{} at offset {} declares header {} and total {}",
                tag, offset, header_len, total_len
            ),
            DecodeError::ShortRecord {
                offset,
                tag,
                needed,
                available,
            } => write!(
                f,
                "{} at offset {} needs {} header bytes, has {}",
                tag, offset, needed, available
            ),
            DecodeError::UnexpectedTag {
                offset,
                expected,
                found,
            } => write!(f, "expected {} at offset {}, found {}", expected, offset, found),
        }
    }
}

impl std::error::Error for DecodeError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSetKind {
    Tracks,
    Playlists,
    Podcasts,
    Albums,
    SmartPlaylists,
    Other(u32),
}

impl DataSetKind {
    fn from_code(code: u32) -> Self {
        match code {
            1 => DataSetKind::Tracks,
            2 => DataSetKind::Playlists,
            3 => DataSetKind::Podcasts,
            4 => DataSetKind::Albums,
            5 => DataSetKind::SmartPlaylists,
            other => DataSetKind::Other(other),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ChunkBody<'a> {
    Database { version: Option<u32> },
    DataSet(DataSetKind),
    TrackList { count: u32 },
    PlaylistList { count: u32 },
    AlbumList { count: u32 },
    Track(TrackHeader),
    Playlist(PlaylistHeader),
    PlaylistMember(MemberHeader),
    Field(RawField<'a>),
    Opaque(&'a [u8]),
}

#[derive(Debug, Clone)]
pub struct Chunk<'a> {
    pub tag: Tag,
    pub offset: usize,
    pub header_len: usize,
    /// Bytes this chunk actually spans; smaller than declared when clamped.
    pub total_len: usize,
    pub truncated: bool,
    pub body: ChunkBody<'a>,
    pub children: Vec<Chunk<'a>>,
}

impl<'a> Chunk<'a> {
    pub fn descendants(&self) -> impl Iterator<Item = &Chunk<'a>> {
        let mut stack: Vec<&Chunk<'a>> = self.children.iter().rev().collect();
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(next.children.iter().rev());
            Some(next)
        })
    }
}

pub fn decode_database<'a>(
    bytes: &'a [u8],
    diagnostics: &mut Diagnostics,
    cancel: &CancelToken,
) -> Result<Chunk<'a>, DecodeError> {
    let (tag, header_len, third) = read_prefix(bytes, 0, bytes.len())?;
    if tag != Tag::DATABASE {
        return Err(DecodeError::UnexpectedTag {
            offset: 0,
            expected: Tag::DATABASE,
            found: tag,
        });
    }
    let mut decoder = Decoder {
        bytes,
        diagnostics,
        cancel,
        depth: 0,
    };
    decoder.decode_at(0, bytes.len(), tag, header_len, third)
}

struct Decoder<'a, 'd> {
    bytes: &'a [u8],
    diagnostics: &'d mut Diagnostics,
    cancel: &'d CancelToken,
    depth: usize,
}

impl<'a, 'd> Decoder<'a, 'd> {
    fn decode_children(&mut self, start: usize, end: usize) -> Vec<Chunk<'a>> {
        let mut children = Vec::new();
        let mut pos = start;
        while pos < end {
            if self.cancel.is_cancelled() {
                break;
            }
            let prefix = match read_prefix(self.bytes, pos, end) {
                Ok(prefix) => prefix,
                Err(err) => {
                    self.diagnostics.push(err.to_diagnostic());
                    break;
                }
            };
            let (tag, header_len, third) = prefix;
            match self.decode_at(pos, end, tag, header_len, third) {
                Ok(chunk) => {
                    pos = pos.saturating_add(chunk.total_len);
                    children.push(chunk);
                }
                Err(err) => {
                    let resume = match &err {
                        DecodeError::ShortRecord { .. } => Some(pos.saturating_add(third)),
                        _ => None,
                    };
                    self.diagnostics.push(err.to_diagnostic());
                    match resume {
                        Some(next) if next > pos => pos = next,
                        _ => break,
                    }
                }
            }
        }
        children
    }

    fn decode_at(
        &mut self,
        pos: usize,
        end: usize,
        tag: Tag,
        header_len: usize,
        third: usize,
    ) -> Result<Chunk<'a>, DecodeError> {
        let available = end.saturating_sub(pos);
        let at_stream_end = end == self.bytes.len();

        let (extent, truncated) = if tag.is_list() {
            if header_len < PREFIX_LEN {
                return Err(malformed(pos, tag, header_len, available));
            }
            (available, false)
        } else {
            if header_len < PREFIX_LEN || header_len > third {
                return Err(malformed(pos, tag, header_len, third));
            }
            if third <= available {
                (third, false)
            } else if at_stream_end {
                self.diagnostics.push(
                    DecodeError::Truncated {
                        offset: pos,
                        needed: third,
                        available,
                    }
                    .to_diagnostic(),
                );
                (available, true)
            } else {
                return Err(malformed(pos, tag, header_len, third));
            }
        };

        if header_len > extent {
            return Err(if at_stream_end {
                DecodeError::Truncated {
                    offset: pos,
                    needed: header_len,
                    available: extent,
                }
            } else {
                malformed(pos, tag, header_len, extent)
            });
        }

        let chunk_bytes = self
            .bytes
            .get(pos..pos.saturating_add(extent))
            .ok_or(DecodeError::Truncated {
                offset: pos,
                needed: extent,
                available,
            })?;
        let header = chunk_bytes.get(..header_len).unwrap_or(chunk_bytes);
        let body = decode_body(tag, pos, header, chunk_bytes, third)?;

        let children = if tag.has_children() && self.depth >= MAX_NESTING {
            self.diagnostics
                .push(malformed(pos, tag, header_len, extent).to_diagnostic());
            Vec::new()
        } else if tag.has_children() {
            self.depth += 1;
            let children = self.decode_children(pos + header_len, pos + extent);
            self.depth -= 1;
            children
        } else {
            Vec::new()
        };

        if let ChunkBody::TrackList { count } | ChunkBody::PlaylistList { count } = &body {
            if *count as usize != children.len() {
                debug!(
                    "{} at offset {} declares {} entries, decoded {}",
                    tag,
                    pos,
                    count,
                    children.len()
                );
            }
        }

        Ok(Chunk {
            tag,
            offset: pos,
            header_len,
            total_len: extent,
            truncated,
            body,
            children,
        })
    }
}

fn read_prefix(bytes: &[u8], pos: usize, end: usize) -> Result<(Tag, usize, usize), DecodeError> {
    let available = end.saturating_sub(pos);
    let prefix = bytes
        .get(pos..pos.saturating_add(PREFIX_LEN))
        .filter(|_| available >= PREFIX_LEN)
        .ok_or(DecodeError::Truncated {
            offset: pos,
            needed: PREFIX_LEN,
            available,
        })?;
    let mut tag = [0u8; 4];
    tag.copy_from_slice(&prefix[..4]);
    let header_len = read_u32(prefix, 4).unwrap_or(0) as usize;
    let third = read_u32(prefix, 8).unwrap_or(0) as usize;
    Ok((Tag(tag), header_len, third))
}

fn decode_body<'a>(
    tag: Tag,
    offset: usize,
    header: &'a [u8],
    bytes: &'a [u8],
    third: usize,
) -> Result<ChunkBody<'a>, DecodeError> {
    let count = third.min(u32::MAX as usize) as u32;
    match tag {
        Tag::DATABASE => Ok(ChunkBody::Database {
            version: read_u32(header, 16),
        }),
        Tag::DATA_SET => {
            let code = require_u32(tag, offset, header, 12)?;
            Ok(ChunkBody::DataSet(DataSetKind::from_code(code)))
        }
        Tag::TRACK_LIST => Ok(ChunkBody::TrackList { count }),
        Tag::PLAYLIST_LIST => Ok(ChunkBody::PlaylistList { count }),
        Tag::ALBUM_LIST => Ok(ChunkBody::AlbumList { count }),
        Tag::TRACK => TrackHeader::decode(offset, header).map(ChunkBody::Track),
        Tag::PLAYLIST => PlaylistHeader::decode(offset, header).map(ChunkBody::Playlist),
        Tag::PLAYLIST_MEMBER => MemberHeader::decode(offset, header).map(ChunkBody::PlaylistMember),
        Tag::FIELD => {
            let field_type = require_u32(tag, offset, header, 12)?;
            Ok(ChunkBody::Field(RawField { field_type, bytes }))
        }
        _ => Ok(ChunkBody::Opaque(bytes)),
    }
}

pub(crate) fn require_u32(
    tag: Tag,
    offset: usize,
    header: &[u8],
    at: usize,
) -> Result<u32, DecodeError> {
    read_u32(header, at).ok_or(DecodeError::ShortRecord {
        offset,
        tag,
        needed: at + 4,
        available: header.len(),
    })
}

fn malformed(offset: usize, tag: Tag, header_len: usize, total_len: usize) -> DecodeError {
    DecodeError::MalformedLength {
        offset,
        tag,
        header_len,
        total_len,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::support::*;

    fn decode(bytes: &[u8]) -> (Result<Chunk<'_>, DecodeError>, Diagnostics) {
        let mut diagnostics = Diagnostics::new();
        let result = decode_database(bytes, &mut diagnostics, &CancelToken::new());
        (result, diagnostics)
    }

    fn faults(diagnostics: &Diagnostics) -> Vec<StructuralFault> {
        diagnostics
            .iter()
            .filter_map(|d| match d {
                Diagnostic::Decode { fault, .. } => Some(*fault),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn decodes_nested_tree() {
        let bytes = sample_database();
        let (root, diagnostics) = decode(&bytes);
        let root = root.unwrap();
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert_eq!(root.tag, Tag::DATABASE);
        assert_eq!(root.total_len, bytes.len());
        assert!(matches!(root.body, ChunkBody::Database { version: Some(0x19) }));

        let kinds: Vec<DataSetKind> = root
            .children
            .iter()
            .filter_map(|c| match c.body {
                ChunkBody::DataSet(kind) => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![DataSetKind::Tracks, DataSetKind::Playlists]);

        let tracks = root.descendants().filter(|c| c.tag == Tag::TRACK).count();
        assert_eq!(tracks, 3);
    }

    #[test]
    fn unknown_tags_are_kept_opaque_and_skipped() {
        let mystery = record(b"mhzz", header(16), &[]);
        let track = track_item(100, 0xAA, &[string_field(1, "Kept")]);
        let bytes = database(&[data_set(1, &track_list(&[mystery, track]))]);

        let (root, diagnostics) = decode(&bytes);
        let root = root.unwrap();
        assert!(diagnostics.is_empty());
        let opaque: Vec<&Chunk> = root
            .descendants()
            .filter(|c| matches!(c.body, ChunkBody::Opaque(_)))
            .collect();
        assert_eq!(opaque.len(), 1);
        assert_eq!(opaque[0].tag, Tag(*b"mhzz"));
        assert_eq!(root.descendants().filter(|c| c.tag == Tag::TRACK).count(), 1);
    }

    #[test]
    fn short_record_is_skipped_and_siblings_survive() {
        let broken = record(b"mhit", header(16), &[]);
        let good = track_item(101, 0xBB, &[]);
        let bytes = database(&[data_set(1, &track_list(&[broken, good]))]);

        let (root, diagnostics) = decode(&bytes);
        let root = root.unwrap();
        assert_eq!(faults(&diagnostics), vec![StructuralFault::ShortRecord]);
        let tracks: Vec<&Chunk> = root.descendants().filter(|c| c.tag == Tag::TRACK).collect();
        assert_eq!(tracks.len(), 1);
        assert!(matches!(&tracks[0].body, ChunkBody::Track(h) if h.unique_ref == 101));
    }

    #[test]
    fn untrusted_length_aborts_remaining_siblings() {
        let mut broken = track_item(100, 0xAA, &[]);
        // header length larger than total length
        broken[4..8].copy_from_slice(&0x1000u32.to_le_bytes());
        let good = track_item(101, 0xBB, &[]);
        let bytes = database(&[
            data_set(1, &track_list(&[broken, good])),
            data_set(2, &playlist_list(&[playlist(1, true, "Library", &[])])),
        ]);

        let (root, diagnostics) = decode(&bytes);
        let root = root.unwrap();
        assert_eq!(faults(&diagnostics), vec![StructuralFault::MalformedLength]);
        assert_eq!(root.descendants().filter(|c| c.tag == Tag::TRACK).count(), 0);
        // the next data set is still reached through the parent's own length
        assert_eq!(root.descendants().filter(|c| c.tag == Tag::PLAYLIST).count(), 1);
    }

    #[test]
    fn child_overrunning_parent_is_malformed() {
        let mut track = track_item(100, 0xAA, &[]);
        let inflated = (track.len() as u32) + 64;
        track[8..12].copy_from_slice(&inflated.to_le_bytes());
        let bytes = database(&[
            data_set(1, &track_list(&[track])),
            data_set(2, &playlist_list(&[])),
        ]);
        let (root, diagnostics) = decode(&bytes);
        assert!(root.is_ok());
        assert_eq!(faults(&diagnostics), vec![StructuralFault::MalformedLength]);
    }

    #[test]
    fn truncated_stream_is_clamped_and_decoded() {
        let tracks: Vec<Vec<u8>> = (0..3)
            .map(|i| track_item(100 + i, 0x10 + u64::from(i), &[string_field(1, "Song")]))
            .collect();
        let bytes = database(&[data_set(1, &track_list(&tracks))]);
        let cut = bytes.len() - 10;

        let (root, diagnostics) = decode(&bytes[..cut]);
        let root = root.unwrap();
        assert!(root.truncated);
        assert!(faults(&diagnostics).contains(&StructuralFault::Truncated));
        let decoded = root.descendants().filter(|c| c.tag == Tag::TRACK).count();
        assert_eq!(decoded, 3);
    }

    #[test]
    fn root_failures_are_fatal() {
        let (result, _) = decode(b"mhbd\x68\x00");
        assert!(matches!(result, Err(DecodeError::Truncated { offset: 0, .. })));

        let mut bytes = sample_database();
        bytes[..4].copy_from_slice(b"XXXX");
        let (result, _) = decode(&bytes);
        assert!(matches!(result, Err(DecodeError::UnexpectedTag { .. })));
    }

    #[test]
    fn cancellation_stops_between_chunks() {
        let bytes = sample_database();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut diagnostics = Diagnostics::new();
        let root = decode_database(&bytes, &mut diagnostics, &cancel).unwrap();
        assert!(root.children.is_empty());
    }

    #[test]
    fn nesting_past_the_limit_is_cut_off() {
        let mut bytes = database(&[]);
        for _ in 0..MAX_NESTING * 4 {
            bytes.extend_from_slice(&list(b"mhlt", &[]));
        }
        let total = bytes.len() as u32;
        put_u32(&mut bytes, 8, total);
        let (root, diagnostics) = decode(&bytes);
        let root = root.unwrap();
        assert_eq!(faults(&diagnostics), vec![StructuralFault::MalformedLength]);
        assert_eq!(root.descendants().count(), MAX_NESTING);
    }

    #[test]
    fn tag_display_escapes_binary() {
        assert_eq!(Tag(*b"mhit").to_string(), "mhit");
        assert_eq!(Tag([0x6d, 0, 0xff, 0x41]).to_string(), "m\\x00\\xffA");
    }
}
