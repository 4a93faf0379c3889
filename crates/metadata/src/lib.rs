use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use lofty::error::{ErrorKind, LoftyError};
use lofty::prelude::{AudioFile, ItemKey, TaggedFileExt};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TagInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub composer: Option<String>,
    pub track_no: Option<u32>,
    pub disc_no: Option<u32>,
    pub year: Option<u32>,
    pub duration_ms: Option<u32>,
    pub sample_rate: Option<u32>,
    pub bitrate: Option<u32>,
}

#[derive(Debug)]
pub enum MetadataError {
    Io(io::Error),
    Lofty(LoftyError),
}

impl MetadataError {
    /// True for I/O hiccups worth one more attempt (busy or flaky device).
    pub fn is_transient(&self) -> bool {
        match self {
            MetadataError::Io(err) => is_transient_io(err),
            MetadataError::Lofty(err) => match err.kind() {
                ErrorKind::Io(err) => is_transient_io(err),
                _ => false,
            },
        }
    }
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<io::Error> for MetadataError {
    fn from(err: io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

pub fn read_tags(path: &Path) -> Result<TagInfo, MetadataError> {
    if !fs::metadata(path)?.is_file() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a regular file").into());
    }
    let tagged_file = lofty::read_from_path(path)?;
    let properties = tagged_file.properties();

    let mut info = TagInfo::default();

    let duration_ms = properties.duration().as_millis();
    if duration_ms > 0 {
        let clamped = duration_ms.min(u128::from(u32::MAX)) as u32;
        info.duration_ms = Some(clamped);
    }

    info.sample_rate = properties.sample_rate();
    info.bitrate = properties.audio_bitrate().or(properties.overall_bitrate());

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        info.title = text_item(tag.get_string(&ItemKey::TrackTitle));
        info.album = text_item(tag.get_string(&ItemKey::AlbumTitle));
        info.album_artist = text_item(tag.get_string(&ItemKey::AlbumArtist));
        info.artist = text_item(tag.get_string(&ItemKey::TrackArtist));
        info.genre = text_item(tag.get_string(&ItemKey::Genre));
        info.composer = text_item(tag.get_string(&ItemKey::Composer));
        info.track_no = tag.get_string(&ItemKey::TrackNumber).and_then(parse_number);
        info.disc_no = tag.get_string(&ItemKey::DiscNumber).and_then(parse_number);
        info.year = tag.get_string(&ItemKey::Year).and_then(parse_year);
    }

    Ok(info)
}

fn is_transient_io(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

fn text_item(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim_end_matches('\0').trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_number(text: &str) -> Option<u32> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse().ok()
}

fn parse_year(text: &str) -> Option<u32> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}
