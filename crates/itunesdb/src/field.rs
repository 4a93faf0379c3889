use std::fmt;

const TEXT_ENCODING_AT: usize = 24;
const TEXT_LENGTH_AT: usize = 28;
const TEXT_DATA_AT: usize = 40;

pub fn read_u8(bytes: &[u8], at: usize) -> Option<u8> {
    bytes.get(at).copied()
}

pub fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let raw = bytes.get(at..at.checked_add(4)?)?;
    Some(u32::from_le_bytes(raw.try_into().ok()?))
}

pub fn read_i32(bytes: &[u8], at: usize) -> Option<i32> {
    let raw = bytes.get(at..at.checked_add(4)?)?;
    Some(i32::from_le_bytes(raw.try_into().ok()?))
}

pub fn read_u64(bytes: &[u8], at: usize) -> Option<u64> {
    let raw = bytes.get(at..at.checked_add(8)?)?;
    Some(u64::from_le_bytes(raw.try_into().ok()?))
}

#[derive(Debug, Clone, Copy)]
pub struct RawField<'a> {
    pub field_type: u32,
    pub bytes: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldContext {
    Track,
    Playlist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Title,
    Location,
    Album,
    Artist,
    Genre,
    FileKind,
    Comment,
    Composer,
    AlbumArtist,
    PlaylistName,
    SmartRules,
}

impl FieldKind {
    pub fn from_code(context: FieldContext, code: u32) -> Option<Self> {
        match (context, code) {
            (FieldContext::Track, 1) => Some(FieldKind::Title),
            (FieldContext::Track, 2) => Some(FieldKind::Location),
            (FieldContext::Track, 3) => Some(FieldKind::Album),
            (FieldContext::Track, 4) => Some(FieldKind::Artist),
            (FieldContext::Track, 5) => Some(FieldKind::Genre),
            (FieldContext::Track, 6) => Some(FieldKind::FileKind),
            (FieldContext::Track, 8) => Some(FieldKind::Comment),
            (FieldContext::Track, 12) => Some(FieldKind::Composer),
            (FieldContext::Track, 22) => Some(FieldKind::AlbumArtist),
            (FieldContext::Playlist, 1) => Some(FieldKind::PlaylistName),
            (FieldContext::Playlist, 50 | 51) => Some(FieldKind::SmartRules),
            _ => None,
        }
    }

    fn carries_text(self) -> bool {
        !matches!(self, FieldKind::SmartRules)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Present,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub kind: FieldKind,
    pub value: FieldValue,
}

impl Field {
    pub fn into_text(self) -> Option<String> {
        match self.value {
            FieldValue::Text(text) => Some(text),
            FieldValue::Present => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    Short { needed: usize, available: usize },
    Encoding(u32),
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldError::Short { needed, available } => {
                write!(f, "record needs {} bytes, has {}", needed, available)
            }
            FieldError::Encoding(code) => write!(f, "unknown text encoding {}", code),
        }
    }
}

impl std::error::Error for FieldError {}

pub fn decode_field(raw: &RawField<'_>, context: FieldContext) -> Result<Option<Field>, FieldError> {
    let kind = match FieldKind::from_code(context, raw.field_type) {
        Some(kind) => kind,
        None => return Ok(None),
    };
    let value = if kind.carries_text() {
        FieldValue::Text(decode_text(raw.bytes)?)
    } else {
        FieldValue::Present
    };
    Ok(Some(Field { kind, value }))
}

fn decode_text(bytes: &[u8]) -> Result<String, FieldError> {
    let short = |needed: usize| FieldError::Short {
        needed,
        available: bytes.len(),
    };
    let encoding = read_u32(bytes, TEXT_ENCODING_AT).ok_or_else(|| short(TEXT_DATA_AT))?;
    let length = read_u32(bytes, TEXT_LENGTH_AT).ok_or_else(|| short(TEXT_DATA_AT))? as usize;
    let end = TEXT_DATA_AT.saturating_add(length);
    let data = bytes.get(TEXT_DATA_AT..end).ok_or_else(|| short(end))?;

    let text = match encoding {
        0 | 1 => {
            let units: Vec<u16> = data
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        2 => String::from_utf8_lossy(data).into_owned(),
        other => return Err(FieldError::Encoding(other)),
    };
    Ok(text.trim_end_matches('\0').to_string())
}
