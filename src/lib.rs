mod discover;
mod hasher;
mod integrity;
mod lock;
mod snapshot;

use futures::future::join_all;
use hasher::Hasher;
use log::{error, info};
use snapshot::Snapshot;
use std::path::{Path, PathBuf};
use tokio::task;

pub struct Options {
    /// Compute and report new integrity values without writing any lockfile.
    pub dry_run: bool,
    /// Upper bound on artifacts being read at the same time.
    pub max_open_files: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_open_files: 64,
        }
    }
}

#[derive(Debug, Default)]
pub struct Summary {
    pub found: usize,
    pub loaded: usize,
    pub written: usize,
    pub changed_entries: usize,
    pub failed_entries: usize,
    pub failed_writes: Vec<PathBuf>,
}

/// Rewrites the integrity of every entry of every `package-lock.json` under `root`
/// which can be resolved through the snapshot at `snapshot`.
///
/// Only an unusable snapshot is an error here. Lockfiles that can't be loaded
/// and entries that can't be hashed are logged and skipped, while lockfiles
/// that can't be written are reported in [`Summary::failed_writes`].
pub async fn patch_lockfiles<S, R>(snapshot: S, root: R, options: &Options) -> anyhow::Result<Summary>
where
    S: AsRef<Path>,
    R: AsRef<Path>,
{
    info!("Loading snapshot ...");
    let snapshot = Snapshot::load(snapshot).await?;
    info!("Loaded {} packages", snapshot.len());

    let root = root.as_ref().to_path_buf();
    info!("Looking for package locks (in {}) ...", root.display());
    let found = task::spawn_blocking(move || discover::find_lockfiles(root)).await?;
    info!("Found: {:?}", found);

    info!("Loading package locks ...");
    let lockfiles = join_all(found.iter().map(|path| async move {
        match lock::load_lockfile(path).await {
            Ok(lockfile) => Some((path, lockfile)),
            Err(err) => {
                error!("Could not load: {}", path.display());
                error!("{:#}", err);
                None
            }
        }
    }))
    .await
    .into_iter()
    .flatten()
    .collect::<Vec<_>>();

    info!("Patching locks ...");
    let hasher = Hasher::new(&snapshot, options.max_open_files);
    let mut summary = Summary {
        found: found.len(),
        loaded: lockfiles.len(),
        ..Summary::default()
    };

    let results = join_all(lockfiles.into_iter().map(|(path, mut lockfile)| {
        let hasher = &hasher;
        async move {
            let report = lockfile.update(hasher).await;
            if options.dry_run {
                info!("Would patch {} ({} changed)", path.display(), report.changed);
                return (path, report, None);
            }

            let written = lock::write_lockfile(path, &lockfile).await;
            match &written {
                Ok(()) => info!("Patched integrity in {} ({} changed)", path.display(), report.changed),
                Err(err) => error!("{:#}", err),
            }
            (path, report, Some(written.is_ok()))
        }
    }))
    .await;

    for (path, report, written) in results {
        summary.changed_entries += report.changed;
        summary.failed_entries += report.failed;
        match written {
            Some(true) => summary.written += 1,
            Some(false) => summary.failed_writes.push(path.clone()),
            None => {}
        }
    }

    Ok(summary)
}
