use std::env;
use std::path::PathBuf;

use common::CancelToken;
use recovery::{
    config_path_from_env, load_config, recover, LoftyTagReader, Progress, RecoveryRequest,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = env::args().skip(1);
    let device_root = args
        .next()
        .or_else(|| env::var("DEVICE_ROOT").ok())
        .ok_or("DEVICE_ROOT not set and no path argument")?;
    let database_override = args.next().map(PathBuf::from);

    let config_path = config_path_from_env();
    let config = load_config(&config_path)?;
    info!("Using configuration {:?}", config_path);

    let mut request = RecoveryRequest::new(device_root).with_config(config);
    if let Some(path) = database_override {
        request = request.with_database(path);
    }

    let interval = request.config.progress_interval();
    let progress = Progress::new(
        |update| info!("{}/{} {}", update.processed, update.total, update.item),
        interval,
    );
    let library = recover(&request, &LoftyTagReader, &progress, &CancelToken::new())?;

    let summary = library.summary();
    let missing = library.tracks.values().filter(|t| t.file_missing).count();
    println!(
        "Recovered: {} tracks ({} without files), {} playlists, source {:?}",
        library.tracks.len(),
        missing,
        library.playlists.len(),
        library.source
    );
    println!(
        "Diagnostics: {} total, {} decode errors, {} skipped fields, {} dangling references, {} orphaned files, {} tag read failures",
        library.diagnostics.len(),
        summary.decode_errors,
        summary.skipped_fields,
        summary.dangling_references,
        summary.orphaned_files,
        summary.tag_read_failures
    );
    if summary.missing_master_playlist {
        println!("No master playlist was found");
    }
    for diagnostic in library.diagnostics.iter() {
        println!("  {}", diagnostic);
    }

    Ok(())
}
