use log::{info, warn};
use std::{env, path::PathBuf, process};
use structopt::{clap::ErrorKind, StructOpt};

/// Rewrite the integrity of every `package-lock.json` under the current directory
/// using artifacts from a package snapshot.
#[derive(StructOpt)]
#[structopt(name = "lock-patcher")]
struct Opt {
    /// JSON file mapping package name -> version -> artifact path
    #[structopt(parse(from_os_str))]
    snapshot: PathBuf,

    /// Report what would change without writing any lockfile
    #[structopt(long)]
    dry_run: bool,

    /// Maximum number of artifacts read at the same time
    #[structopt(long, default_value = "64")]
    max_open_files: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Opt {
        snapshot,
        dry_run,
        max_open_files,
    } = match Opt::from_iter_safe(env::args_os()) {
        Ok(opt) => opt,
        Err(err) if matches!(err.kind, ErrorKind::HelpDisplayed | ErrorKind::VersionDisplayed) => {
            err.exit()
        }
        Err(err) => {
            println!("{}", err.message);
            process::exit(2);
        }
    };

    let summary = lock_patcher::patch_lockfiles(
        &snapshot,
        env::current_dir()?,
        &lock_patcher::Options {
            dry_run,
            max_open_files,
        },
    )
    .await?;

    info!(
        "Done: {} of {} lockfiles loaded, {} written, {} entries changed, {} entries failed",
        summary.loaded,
        summary.found,
        summary.written,
        summary.changed_entries,
        summary.failed_entries
    );
    if !summary.failed_writes.is_empty() {
        warn!("Some lockfiles were not written: {:?}", summary.failed_writes);
        anyhow::bail!("failed to write {} lockfiles", summary.failed_writes.len());
    }

    Ok(())
}
