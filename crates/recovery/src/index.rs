use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use common::{join_relpath, relpath_from, LogicalPath};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::RecoveryConfig;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexedFile {
    pub location: LogicalPath,
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug)]
pub enum IndexError {
    MissingMusicDirectory(PathBuf),
    Io(io::Error),
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexError::MissingMusicDirectory(path) => {
                write!(f, "music directory not found: {}", path.display())
            }
            IndexError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for IndexError {}

impl From<io::Error> for IndexError {
    fn from(err: io::Error) -> Self {
        IndexError::Io(err)
    }
}

impl From<walkdir::Error> for IndexError {
    fn from(err: walkdir::Error) -> Self {
        IndexError::Io(err.into())
    }
}

#[derive(Clone, Debug)]
pub struct FileIndex {
    device_root: PathBuf,
    music_root: PathBuf,
    files: Vec<IndexedFile>,
    by_key: HashMap<String, usize>,
}

impl FileIndex {
    pub fn build(device_root: &Path, config: &RecoveryConfig) -> Result<Self, IndexError> {
        let music_root = device_root.join(&config.music_relpath);
        if !music_root.is_dir() {
            return Err(IndexError::MissingMusicDirectory(music_root));
        }

        let mut folders = Vec::new();
        for entry in WalkDir::new(&music_root)
            .follow_links(false)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry?;
            let is_folder = entry.file_type().is_dir()
                && entry
                    .file_name()
                    .to_str()
                    .map(is_music_folder_name)
                    .unwrap_or(false);
            if is_folder {
                folders.push(entry.into_path());
            } else {
                debug!("Ignoring {:?} in music directory", entry.path());
            }
        }

        let mut files = Vec::new();
        for folder in &folders {
            files.extend(audio_files_in_folder(device_root, folder, config));
        }
        files.sort_by(|a, b| a.location.cmp(&b.location));

        let mut by_key = HashMap::with_capacity(files.len());
        let mut unique = Vec::with_capacity(files.len());
        for file in files {
            let key = file.location.lookup_key();
            if by_key.contains_key(&key) {
                debug!("{} differs from an indexed file only by case", file.location);
                continue;
            }
            by_key.insert(key, unique.len());
            unique.push(file);
        }

        info!(
            "Indexed {} audio files in {} folders under {:?}",
            unique.len(),
            folders.len(),
            music_root
        );
        Ok(Self {
            device_root: device_root.to_path_buf(),
            music_root,
            files: unique,
            by_key,
        })
    }

    pub fn music_root(&self) -> &Path {
        &self.music_root
    }

    pub fn files(&self) -> &[IndexedFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn resolve(&self, location: &LogicalPath) -> Option<&IndexedFile> {
        self.by_key
            .get(&location.lookup_key())
            .and_then(|idx| self.files.get(*idx))
    }

    pub fn to_physical(&self, location: &LogicalPath) -> PathBuf {
        join_relpath(&self.device_root, location)
    }

    pub fn to_logical(&self, path: &Path) -> Option<LogicalPath> {
        relpath_from(&self.device_root, path)
    }
}

fn audio_files_in_folder(
    device_root: &Path,
    folder: &Path,
    config: &RecoveryConfig,
) -> Vec<IndexedFile> {
    let mut files = Vec::new();
    for entry in WalkDir::new(folder)
        .follow_links(false)
        .min_depth(1)
        .max_depth(1)
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Failed to read entry in {:?}: {}", folder, err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with("._") {
            continue;
        }
        let is_audio = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| config.is_audio_extension(ext))
            .unwrap_or(false);
        if !is_audio {
            continue;
        }
        let location = match relpath_from(device_root, entry.path()) {
            Some(location) => location,
            None => continue,
        };
        let size = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(err) => {
                warn!("Failed to stat {:?}: {}", entry.path(), err);
                continue;
            }
        };
        files.push(IndexedFile {
            location,
            path: entry.into_path(),
            size,
        });
    }
    files
}

/// `F` followed by digits, in any case.
fn is_music_folder_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some('F' | 'f'))
        && name.len() > 1
        && chars.all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str, bytes: usize) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![0u8; bytes]).unwrap();
    }

    #[test]
    fn folder_names() {
        assert!(is_music_folder_name("F00"));
        assert!(is_music_folder_name("f49"));
        assert!(!is_music_folder_name("F"));
        assert!(!is_music_folder_name("Fxx"));
        assert!(!is_music_folder_name("Podcasts"));
    }

    #[test]
    fn indexes_audio_in_numbered_folders_only() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "iPod_Control/Music/F00/AAAA.mp3", 10);
        touch(root, "iPod_Control/Music/f01/BBBB.M4A", 20);
        touch(root, "iPod_Control/Music/F01/._BBBB.m4a", 5);
        touch(root, "iPod_Control/Music/F01/notes.txt", 5);
        touch(root, "iPod_Control/Music/Other/CCCC.mp3", 5);
        touch(root, "iPod_Control/Music/F02/deep/DDDD.mp3", 5);

        let index = FileIndex::build(root, &RecoveryConfig::default()).unwrap();
        let locations: Vec<String> = index.files().iter().map(|f| f.location.to_string()).collect();
        assert_eq!(
            locations,
            vec![
                ":iPod_Control:Music:F00:AAAA.mp3",
                ":iPod_Control:Music:f01:BBBB.M4A",
            ]
        );
        assert_eq!(index.files()[1].size, 20);
    }

    #[test]
    fn lookup_ignores_case() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "iPod_Control/Music/F03/KOBL.mp3", 1);
        let index = FileIndex::build(dir.path(), &RecoveryConfig::default()).unwrap();

        let spelled = LogicalPath::parse(":IPOD_CONTROL:music:f03:kobl.MP3").unwrap();
        let found = index.resolve(&spelled).unwrap();
        assert_eq!(found.path, dir.path().join("iPod_Control/Music/F03/KOBL.mp3"));
        assert!(index
            .resolve(&LogicalPath::parse(":iPod_Control:Music:F03:NOPE.mp3").unwrap())
            .is_none());
    }

    #[test]
    fn physical_and_logical_paths_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "iPod_Control/Music/F10/WXYZ.m4a", 1);
        let index = FileIndex::build(dir.path(), &RecoveryConfig::default()).unwrap();
        for file in index.files() {
            let physical = index.to_physical(&file.location);
            assert_eq!(physical, file.path);
            assert_eq!(index.to_logical(&physical).as_ref(), Some(&file.location));
        }
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn missing_music_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileIndex::build(dir.path(), &RecoveryConfig::default()).unwrap_err();
        assert!(matches!(err, IndexError::MissingMusicDirectory(_)));
    }

    #[test]
    fn empty_music_directory_is_an_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("iPod_Control/Music")).unwrap();
        let index = FileIndex::build(dir.path(), &RecoveryConfig::default()).unwrap();
        assert!(index.is_empty());
    }
}
