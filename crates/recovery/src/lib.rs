use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use common::{CancelToken, Diagnostic, Diagnostics, Library};
use itunesdb::{read_database, DatabaseContents};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{info, warn};

pub mod config;
pub mod index;
pub mod progress;
pub mod reconcile;
pub mod scan;

pub use config::{config_path_from_env, load_config, ConfigError, RecoveryConfig};
pub use index::{FileIndex, IndexError, IndexedFile};
pub use progress::{Progress, ProgressUpdate};
pub use reconcile::reconcile;
pub use scan::{scan_library, LoftyTagReader, ScanOptions, TagReader};

#[derive(Clone, Debug)]
pub struct RecoveryRequest {
    pub device_root: PathBuf,
    pub database_override: Option<PathBuf>,
    pub config: RecoveryConfig,
}

impl RecoveryRequest {
    pub fn new(device_root: impl Into<PathBuf>) -> Self {
        Self {
            device_root: device_root.into(),
            database_override: None,
            config: RecoveryConfig::default(),
        }
    }

    pub fn with_database(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_override = Some(path.into());
        self
    }

    pub fn with_config(mut self, config: RecoveryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn database_path(&self) -> PathBuf {
        match &self.database_override {
            Some(path) => path.clone(),
            None => self.device_root.join(&self.config.database_relpath),
        }
    }

    pub fn music_path(&self) -> PathBuf {
        self.device_root.join(&self.config.music_relpath)
    }
}

#[derive(Debug)]
pub enum RecoveryError {
    /// Neither the database nor the music directory could be used.
    NoRecoverableSource { database: String, music: String },
}

impl fmt::Display for RecoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryError::NoRecoverableSource { database, music } => write!(
                f,
                "nothing to recover: database {}; music directory {}",
                database, music
            ),
        }
    }
}

impl std::error::Error for RecoveryError {}

/// Runs a full recovery. Every problem short of having no source at all is
/// reported through the returned library's diagnostics.
pub fn recover(
    request: &RecoveryRequest,
    reader: &dyn TagReader,
    progress: &Progress,
    cancel: &CancelToken,
) -> Result<Library, RecoveryError> {
    let config = &request.config;
    let mut diagnostics = Diagnostics::new();

    let database_path = request.database_path();
    let assemble_pool = build_pool("assemble", config.assemble_workers());
    let loaded = load_database(
        &database_path,
        assemble_pool.as_ref(),
        progress,
        cancel,
        &mut diagnostics,
    );
    let contents = match loaded {
        Ok(contents) => Some(contents),
        Err(reason) => {
            diagnostics.push(Diagnostic::DatabaseUnusable { reason });
            None
        }
    };

    let index = match FileIndex::build(&request.device_root, config) {
        Ok(index) => Some(index),
        Err(err) => {
            diagnostics.push(Diagnostic::MusicDirectoryUnavailable {
                reason: err.to_string(),
            });
            None
        }
    };

    if let Some(contents) = contents {
        if !contents.tracks.is_empty() || contents.partial.is_some() || index.is_none() {
            return Ok(reconcile(contents, index.as_ref(), diagnostics));
        }
        diagnostics.push(Diagnostic::DatabaseUnusable {
            reason: "no tracks could be assembled".to_string(),
        });
    }

    let index = match index {
        Some(index) => index,
        None => {
            return Err(RecoveryError::NoRecoverableSource {
                database: unusable_reason(&diagnostics),
                music: request.music_path().display().to_string(),
            })
        }
    };

    info!("Falling back to a direct scan of {:?}", index.music_root());
    let scan_pool = build_pool("scan", config.scan_workers());
    let options = ScanOptions {
        retry_transient_reads: config.retry_transient_reads,
    };
    Ok(scan_library(
        &index,
        reader,
        options,
        scan_pool.as_ref(),
        progress,
        cancel,
        diagnostics,
    ))
}

fn load_database(
    path: &Path,
    pool: Option<&ThreadPool>,
    progress: &Progress,
    cancel: &CancelToken,
    diagnostics: &mut Diagnostics,
) -> Result<DatabaseContents, String> {
    let bytes = fs::read(path).map_err(|err| format!("{}: {}", path.display(), err))?;
    info!("Read {} database bytes from {:?}", bytes.len(), path);
    let on_item = |done: usize, total: usize| progress.report(done, total, "database");
    read_database(&bytes, diagnostics, cancel, pool, &on_item)
        .map_err(|err| format!("{}: {}", path.display(), err))
}

fn unusable_reason(diagnostics: &Diagnostics) -> String {
    diagnostics
        .iter()
        .find_map(|d| match d {
            Diagnostic::DatabaseUnusable { reason } => Some(reason.clone()),
            _ => None,
        })
        .unwrap_or_else(|| "unusable".to_string())
}

fn build_pool(name: &'static str, workers: usize) -> Option<ThreadPool> {
    match ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(move |idx| format!("{}-{}", name, idx))
        .build()
    {
        Ok(pool) => Some(pool),
        Err(err) => {
            warn!("Failed to start {} workers ({}); running inline", name, err);
            None
        }
    }
}
