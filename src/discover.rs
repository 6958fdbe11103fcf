use log::warn;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub(crate) const LOCKFILE_NAME: &str = "package-lock.json";

/// Finds every `package-lock.json` below `root`.
///
/// Symbolic links are never followed, so a link pointing back up the tree
/// can't make the walk loop.
pub(crate) fn find_lockfiles<P: AsRef<Path>>(root: P) -> Vec<PathBuf> {
    let mut lockfiles = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("Skipping unreadable path: {}", err);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == LOCKFILE_NAME)
        .map(|entry| entry.into_path())
        .collect::<Vec<_>>();
    lockfiles.sort();

    lockfiles
}
