use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod diagnostics;

pub use diagnostics::{Diagnostic, DiagnosticSummary, Diagnostics, StructuralFault};

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlaylistId(pub u64);

impl fmt::Display for PlaylistId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogicalPath {
    segments: Vec<String>,
}

impl LogicalPath {
    pub fn parse(input: &str) -> Option<Self> {
        let segments: Vec<String> = input
            .split(|c| c == ':' || c == '/' || c == '\\')
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect();
        if segments.is_empty() || segments.iter().any(|s| s == "." || s == "..") {
            return None;
        }
        Some(Self { segments })
    }

    pub fn from_relative(path: &Path) -> Option<Self> {
        let mut segments = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => segments.push(part.to_string_lossy().to_string()),
                Component::CurDir => continue,
                _ => return None,
            }
        }
        if segments.is_empty() {
            None
        } else {
            Some(Self { segments })
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn extension(&self) -> Option<String> {
        let name = self.file_name()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    /// Case-folded key used for lookups on case-insensitive volumes.
    pub fn lookup_key(&self) -> String {
        self.to_string().to_ascii_lowercase()
    }

    pub fn to_relative(&self) -> PathBuf {
        self.segments.iter().collect()
    }
}

impl fmt::Display for LogicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, ":{}", segment)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub ordinal: usize,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub genre: Option<String>,
    pub composer: Option<String>,
    pub comment: Option<String>,
    pub file_kind: Option<String>,
    pub file_type: Option<String>,
    pub duration_ms: Option<u32>,
    pub bitrate: Option<u32>,
    pub sample_rate: Option<u32>,
    pub file_size: Option<u64>,
    pub track_number: Option<u32>,
    pub track_count: Option<u32>,
    pub disc_number: Option<u32>,
    pub disc_count: Option<u32>,
    pub year: Option<u32>,
    pub play_count: Option<u32>,
    pub rating: Option<u8>,
    pub volume: Option<i32>,
    pub compilation: Option<bool>,
    pub date_added: Option<i64>,
    pub last_played: Option<i64>,
    pub location: Option<LogicalPath>,
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub file_missing: bool,
}

impl Track {
    pub fn new(id: TrackId, ordinal: usize) -> Self {
        Self {
            id,
            ordinal,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: PlaylistId,
    pub name: Option<String>,
    pub is_master: bool,
    #[serde(default)]
    pub is_smart: bool,
    pub tracks: Vec<TrackId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LibrarySource {
    Database,
    DirectScan,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaylistOrdering {
    Preserved,
    /// Recovered without playlist ordering.
    Unavailable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialRun {
    pub processed: usize,
    pub total: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Library {
    pub tracks: BTreeMap<TrackId, Track>,
    pub playlists: Vec<Playlist>,
    pub source: LibrarySource,
    pub ordering: PlaylistOrdering,
    pub partial: Option<PartialRun>,
    pub diagnostics: Diagnostics,
}

impl Library {
    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn master_playlist(&self) -> Option<&Playlist> {
        self.playlists.iter().find(|playlist| playlist.is_master)
    }

    pub fn tracks_in_order(&self) -> Vec<&Track> {
        let mut tracks: Vec<&Track> = self.tracks.values().collect();
        tracks.sort_by_key(|track| (track.ordinal, track.id));
        tracks
    }

    pub fn summary(&self) -> DiagnosticSummary {
        self.diagnostics.summary()
    }

    pub fn is_partial(&self) -> bool {
        self.partial.is_some()
    }
}

#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Deterministic id for a file found without a database entry.
pub fn stable_track_id(location: &LogicalPath) -> TrackId {
    let hash = blake3::hash(location.lookup_key().as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.as_bytes()[..8]);
    TrackId(u64::from_le_bytes(head))
}

pub fn relpath_from(root: &Path, path: &Path) -> Option<LogicalPath> {
    let rel = path.strip_prefix(root).ok()?;
    LogicalPath::from_relative(rel)
}

pub fn join_relpath(root: &Path, location: &LogicalPath) -> PathBuf {
    let mut out = PathBuf::from(root);
    for part in location.segments() {
        out.push(part);
    }
    out
}
