use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::{LogicalPath, PlaylistId, TrackId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuralFault {
    Truncated,
    MalformedLength,
    ShortRecord,
    UnexpectedTag,
}

impl fmt::Display for StructuralFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StructuralFault::Truncated => "truncated",
            StructuralFault::MalformedLength => "malformed length",
            StructuralFault::ShortRecord => "short record",
            StructuralFault::UnexpectedTag => "unexpected tag",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    Decode {
        offset: usize,
        fault: StructuralFault,
        detail: String,
    },
    SkippedField {
        track: Option<TrackId>,
        field_type: u32,
        reason: String,
    },
    DroppedTrack {
        offset: usize,
        reason: String,
    },
    DuplicateTrackId {
        id: TrackId,
    },
    DanglingReference {
        playlist: PlaylistId,
        reference: u64,
    },
    MissingMasterPlaylist,
    ExtraMasterPlaylist {
        playlist: PlaylistId,
    },
    MissingFile {
        track: TrackId,
        location: Option<LogicalPath>,
    },
    OrphanFile {
        location: LogicalPath,
    },
    TagReadFailure {
        location: LogicalPath,
        error: String,
    },
    DatabaseUnusable {
        reason: String,
    },
    MusicDirectoryUnavailable {
        reason: String,
    },
    Cancelled {
        processed: usize,
        total: usize,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::Decode {
                offset,
                fault,
                detail,
            } => write!(f, "{} at offset {}: {}", fault, offset, detail),
            Diagnostic::SkippedField {
                track,
                field_type,
                reason,
            } => match track {
                Some(track) => write!(
                    f,
                    "skipped field type {} of track {}: {}",
                    field_type, track, reason
                ),
                None => write!(f, "skipped field type {}: {}", field_type, reason),
            },
            Diagnostic::DroppedTrack { offset, reason } => {
                write!(f, "dropped track at offset {}: {}", offset, reason)
            }
            Diagnostic::DuplicateTrackId { id } => write!(f, "duplicate track id {}", id),
            Diagnostic::DanglingReference {
                playlist,
                reference,
            } => write!(
                f,
                "playlist {} references unknown track {}",
                playlist, reference
            ),
            Diagnostic::MissingMasterPlaylist => write!(f, "no master playlist found"),
            Diagnostic::ExtraMasterPlaylist { playlist } => {
                write!(f, "playlist {} also claims to be the master", playlist)
            }
            Diagnostic::MissingFile { track, location } => match location {
                Some(location) => write!(f, "track {} file missing: {}", track, location),
                None => write!(f, "track {} has no file location", track),
            },
            Diagnostic::OrphanFile { location } => {
                write!(f, "file not referenced by any track: {}", location)
            }
            Diagnostic::TagReadFailure { location, error } => {
                write!(f, "could not read tags of {}: {}", location, error)
            }
            Diagnostic::DatabaseUnusable { reason } => write!(f, "database unusable: {}", reason),
            Diagnostic::MusicDirectoryUnavailable { reason } => {
                write!(f, "music directory unavailable: {}", reason)
            }
            Diagnostic::Cancelled { processed, total } => {
                write!(f, "cancelled after {} of {} entries", processed, total)
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticSummary {
    pub decode_errors: usize,
    pub skipped_fields: usize,
    pub dropped_tracks: usize,
    pub duplicate_ids: usize,
    pub dangling_references: usize,
    pub missing_files: usize,
    pub orphaned_files: usize,
    pub tag_read_failures: usize,
    pub missing_master_playlist: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::SkippedField { .. } | Diagnostic::OrphanFile { .. } => {
                debug!("{}", diagnostic)
            }
            _ => warn!("{}", diagnostic),
        }
        self.entries.push(diagnostic);
    }

    /// Records the missing master playlist at most once per accumulator.
    pub fn missing_master(&mut self) {
        if !self.entries.contains(&Diagnostic::MissingMasterPlaylist) {
            self.push(Diagnostic::MissingMasterPlaylist);
        }
    }

    pub fn merge(&mut self, other: Diagnostics) {
        for entry in other.entries {
            if entry == Diagnostic::MissingMasterPlaylist
                && self.entries.contains(&Diagnostic::MissingMasterPlaylist)
            {
                continue;
            }
            self.entries.push(entry);
        }
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn summary(&self) -> DiagnosticSummary {
        let mut summary = DiagnosticSummary::default();
        for entry in &self.entries {
            match entry {
                Diagnostic::Decode { .. } => summary.decode_errors += 1,
                Diagnostic::SkippedField { .. } => summary.skipped_fields += 1,
                Diagnostic::DroppedTrack { .. } => summary.dropped_tracks += 1,
                Diagnostic::DuplicateTrackId { .. } => summary.duplicate_ids += 1,
                Diagnostic::DanglingReference { .. } => summary.dangling_references += 1,
                Diagnostic::MissingFile { .. } => summary.missing_files += 1,
                Diagnostic::OrphanFile { .. } => summary.orphaned_files += 1,
                Diagnostic::TagReadFailure { .. } => summary.tag_read_failures += 1,
                Diagnostic::MissingMasterPlaylist => summary.missing_master_playlist = true,
                Diagnostic::ExtraMasterPlaylist { .. }
                | Diagnostic::DatabaseUnusable { .. }
                | Diagnostic::MusicDirectoryUnavailable { .. }
                | Diagnostic::Cancelled { .. } => {}
            }
        }
        summary
    }
}
