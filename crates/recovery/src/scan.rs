use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{
    stable_track_id, CancelToken, Diagnostic, Diagnostics, Library, LibrarySource, PartialRun,
    PlaylistOrdering, Track,
};
use metadata::{read_tags, MetadataError, TagInfo};
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, info};

use crate::index::{FileIndex, IndexedFile};
use crate::progress::Progress;

pub trait TagReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<TagInfo, MetadataError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LoftyTagReader;

impl TagReader for LoftyTagReader {
    fn read(&self, path: &Path) -> Result<TagInfo, MetadataError> {
        read_tags(path)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ScanOptions {
    pub retry_transient_reads: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            retry_transient_reads: true,
        }
    }
}

/// Reads every indexed file into a library of its own. Results are merged in
/// index order, so the outcome does not depend on worker scheduling.
pub fn scan_library(
    index: &FileIndex,
    reader: &dyn TagReader,
    options: ScanOptions,
    pool: Option<&ThreadPool>,
    progress: &Progress,
    cancel: &CancelToken,
    mut diagnostics: Diagnostics,
) -> Library {
    let files = index.files();
    let total = files.len();
    let processed = AtomicUsize::new(0);
    info!("Scanning {} files for tags", total);

    let work = |file: &IndexedFile| {
        if cancel.is_cancelled() {
            return None;
        }
        let mut local = Diagnostics::new();
        let track = scan_file(file, reader, options, &mut local);
        let done = processed.fetch_add(1, Ordering::SeqCst) + 1;
        progress.report(done, total, &file.location.to_string());
        Some((track, local))
    };

    let outcomes: Vec<Option<(Track, Diagnostics)>> = match pool {
        Some(pool) => pool.install(|| files.par_iter().map(work).collect()),
        None => files.iter().map(work).collect(),
    };

    let mut tracks = BTreeMap::new();
    for (ordinal, outcome) in outcomes.into_iter().enumerate() {
        let (mut track, local) = match outcome {
            Some(outcome) => outcome,
            None => continue,
        };
        diagnostics.merge(local);
        track.ordinal = ordinal;
        if tracks.contains_key(&track.id) {
            diagnostics.push(Diagnostic::DuplicateTrackId { id: track.id });
            continue;
        }
        tracks.insert(track.id, track);
    }

    let done = processed.load(Ordering::SeqCst);
    let partial = if cancel.is_cancelled() && done < total {
        diagnostics.push(Diagnostic::Cancelled {
            processed: done,
            total,
        });
        Some(PartialRun {
            processed: done,
            total,
        })
    } else {
        None
    };

    info!("Direct scan recovered {} tracks", tracks.len());
    Library {
        tracks,
        playlists: Vec::new(),
        source: LibrarySource::DirectScan,
        ordering: PlaylistOrdering::Unavailable,
        partial,
        diagnostics,
    }
}

fn scan_file(
    file: &IndexedFile,
    reader: &dyn TagReader,
    options: ScanOptions,
    diagnostics: &mut Diagnostics,
) -> Track {
    let mut track = Track::new(stable_track_id(&file.location), 0);
    track.location = Some(file.location.clone());
    track.file = Some(file.path.clone());
    track.file_size = Some(file.size);
    track.file_type = file.location.extension().map(|ext| ext.to_ascii_uppercase());

    match read_with_retry(reader, &file.path, options.retry_transient_reads) {
        Ok(tags) => apply_tags(&mut track, tags),
        Err(err) => {
            diagnostics.push(Diagnostic::TagReadFailure {
                location: file.location.clone(),
                error: err.to_string(),
            });
        }
    }
    if track.title.is_none() {
        track.title = file_stem(&file.location);
    }
    track
}

fn read_with_retry(
    reader: &dyn TagReader,
    path: &Path,
    retry: bool,
) -> Result<TagInfo, MetadataError> {
    match reader.read(path) {
        Err(err) if retry && err.is_transient() => {
            debug!("Retrying tag read for {:?} after {}", path, err);
            reader.read(path)
        }
        result => result,
    }
}

fn apply_tags(track: &mut Track, tags: TagInfo) {
    track.title = tags.title;
    track.artist = tags.artist;
    track.album_artist = tags.album_artist;
    track.album = tags.album;
    track.genre = tags.genre;
    track.composer = tags.composer;
    track.track_number = tags.track_no;
    track.disc_number = tags.disc_no;
    track.year = tags.year;
    track.duration_ms = tags.duration_ms;
    track.sample_rate = tags.sample_rate;
    track.bitrate = tags.bitrate;
}

fn file_stem(location: &common::LogicalPath) -> Option<String> {
    let name = location.file_name()?;
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    };
    Some(stem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecoveryConfig;
    use common::LogicalPath;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::fs;
    use std::io;

    struct FakeReader {
        tags: HashMap<String, TagInfo>,
        calls: Mutex<HashMap<String, usize>>,
        flaky: Vec<String>,
    }

    impl FakeReader {
        fn new() -> Self {
            Self {
                tags: HashMap::new(),
                calls: Mutex::new(HashMap::new()),
                flaky: Vec::new(),
            }
        }

        fn with(mut self, name: &str, title: &str) -> Self {
            self.tags.insert(
                name.to_string(),
                TagInfo {
                    title: Some(title.to_string()),
                    artist: Some("Tagged Artist".to_string()),
                    ..TagInfo::default()
                },
            );
            self
        }

        fn calls(&self, name: &str) -> usize {
            self.calls.lock().get(name).copied().unwrap_or(0)
        }
    }

    impl TagReader for FakeReader {
        fn read(&self, path: &Path) -> Result<TagInfo, MetadataError> {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            let attempt = {
                let mut calls = self.calls.lock();
                let count = calls.entry(name.clone()).or_insert(0);
                *count += 1;
                *count
            };
            if self.flaky.contains(&name) && attempt == 1 {
                return Err(MetadataError::Io(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "device busy",
                )));
            }
            self.tags
                .get(&name)
                .cloned()
                .ok_or_else(|| MetadataError::Io(io::Error::new(io::ErrorKind::InvalidData, "no tags")))
        }
    }

    fn device(files: &[&str]) -> (tempfile::TempDir, FileIndex) {
        let dir = tempfile::tempdir().unwrap();
        for rel in files {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, b"audio").unwrap();
        }
        let index = FileIndex::build(dir.path(), &RecoveryConfig::default()).unwrap();
        (dir, index)
    }

    fn scan(index: &FileIndex, reader: &FakeReader, cancel: &CancelToken) -> Library {
        scan_library(
            index,
            reader,
            ScanOptions::default(),
            None,
            &Progress::disabled(),
            cancel,
            Diagnostics::new(),
        )
    }

    #[test]
    fn unreadable_tags_fall_back_to_minimal_records() {
        let (_dir, index) = device(&[
            "iPod_Control/Music/F00/A.mp3",
            "iPod_Control/Music/F00/B.mp3",
            "iPod_Control/Music/F01/C.m4a",
        ]);
        let reader = FakeReader::new().with("A.mp3", "Song A").with("C.m4a", "Song C");
        let library = scan(&index, &reader, &CancelToken::new());

        assert_eq!(library.tracks.len(), 3);
        assert_eq!(library.source, LibrarySource::DirectScan);
        assert_eq!(library.ordering, PlaylistOrdering::Unavailable);
        assert!(library.playlists.is_empty());

        let b = LogicalPath::parse(":iPod_Control:Music:F00:B.mp3").unwrap();
        let minimal = library.track(stable_track_id(&b)).unwrap();
        assert_eq!(minimal.title.as_deref(), Some("B"));
        assert_eq!(minimal.artist, None);
        assert_eq!(minimal.file_size, Some(5));
        assert_eq!(minimal.file_type.as_deref(), Some("MP3"));

        let failures: Vec<&Diagnostic> = library
            .diagnostics
            .iter()
            .filter(|d| matches!(d, Diagnostic::TagReadFailure { .. }))
            .collect();
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            failures[0],
            Diagnostic::TagReadFailure { location, .. } if *location == b
        ));
    }

    #[test]
    fn transient_errors_are_retried_once() {
        let (_dir, index) = device(&["iPod_Control/Music/F00/A.mp3"]);
        let mut reader = FakeReader::new().with("A.mp3", "Song A");
        reader.flaky.push("A.mp3".to_string());
        let library = scan(&index, &reader, &CancelToken::new());

        assert_eq!(reader.calls("A.mp3"), 2);
        assert!(library.diagnostics.is_empty());
        let track = library.tracks.values().next().unwrap();
        assert_eq!(track.title.as_deref(), Some("Song A"));
    }

    #[test]
    fn retry_can_be_disabled() {
        let (_dir, index) = device(&["iPod_Control/Music/F00/A.mp3"]);
        let mut reader = FakeReader::new().with("A.mp3", "Song A");
        reader.flaky.push("A.mp3".to_string());
        let library = scan_library(
            &index,
            &reader,
            ScanOptions {
                retry_transient_reads: false,
            },
            None,
            &Progress::disabled(),
            &CancelToken::new(),
            Diagnostics::new(),
        );
        assert_eq!(reader.calls("A.mp3"), 1);
        assert_eq!(library.summary().tag_read_failures, 1);
    }

    #[test]
    fn ids_are_stable_across_runs_and_pools() {
        let names: Vec<String> = (0..12)
            .map(|i| format!("iPod_Control/Music/F{:02}/T{}.mp3", i % 3, i))
            .collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let (_dir, index) = device(&refs);
        let reader = FakeReader::new();
        let pool = rayon::ThreadPoolBuilder::new().num_threads(3).build().unwrap();

        let first = scan(&index, &reader, &CancelToken::new());
        let second = scan_library(
            &index,
            &reader,
            ScanOptions::default(),
            Some(&pool),
            &Progress::disabled(),
            &CancelToken::new(),
            Diagnostics::new(),
        );
        let first_ids: Vec<_> = first.tracks_in_order().iter().map(|t| t.id).collect();
        let second_ids: Vec<_> = second.tracks_in_order().iter().map(|t| t.id).collect();
        assert_eq!(first_ids.len(), 12);
        assert_eq!(first_ids, second_ids);
        assert_eq!(first.diagnostics, second.diagnostics);
    }

    #[test]
    fn cancelled_scan_is_partial() {
        let (_dir, index) = device(&[
            "iPod_Control/Music/F00/A.mp3",
            "iPod_Control/Music/F00/B.mp3",
        ]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let library = scan(&index, &FakeReader::new(), &cancel);
        assert!(library.tracks.is_empty());
        assert_eq!(
            library.partial,
            Some(PartialRun {
                processed: 0,
                total: 2
            })
        );
        assert!(library
            .diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::Cancelled { processed: 0, total: 2 })));
    }

    #[test]
    fn progress_reaches_the_total() {
        let (_dir, index) = device(&[
            "iPod_Control/Music/F00/A.mp3",
            "iPod_Control/Music/F00/B.mp3",
            "iPod_Control/Music/F00/C.mp3",
        ]);
        let last = std::sync::Arc::new(Mutex::new(None));
        let sink = std::sync::Arc::clone(&last);
        let progress = Progress::new(
            move |update| *sink.lock() = Some((update.processed, update.total)),
            std::time::Duration::from_secs(60),
        );
        scan_library(
            &index,
            &FakeReader::new(),
            ScanOptions::default(),
            None,
            &progress,
            &CancelToken::new(),
            Diagnostics::new(),
        );
        assert_eq!(*last.lock(), Some((3, 3)));
    }
}
