use crate::{integrity::compute_ssri, snapshot::Snapshot};
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use log::error;
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};
use tokio::sync::{Mutex, Semaphore};

/// One artifact to hash: a package version digested with a given algorithm.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct Target {
    pub(crate) package: String,
    pub(crate) version: String,
    pub(crate) hash_type: String,
}

/// A hash that is computed once and awaited by every entry asking for it.
/// Failures resolve to `None` so they are reported only once per run.
type Pending<'a> = Shared<BoxFuture<'a, Option<String>>>;

pub(crate) type HashCache<'a> = Mutex<HashMap<Target, Pending<'a>>>;

pub(crate) struct Hasher<'a> {
    snapshot: &'a Snapshot,
    cache: HashCache<'a>,
    open_files: Arc<Semaphore>,
}

impl<'a> Hasher<'a> {
    pub(crate) fn new(snapshot: &'a Snapshot, max_open_files: usize) -> Self {
        Self {
            snapshot,
            cache: Mutex::new(HashMap::with_capacity(100)),
            open_files: Arc::new(Semaphore::new(max_open_files.max(1))),
        }
    }

    /// Hashes every target concurrently. Targets that can't be hashed are
    /// logged and left out of the result.
    pub(crate) async fn hash_all(&self, targets: BTreeSet<Target>) -> HashMap<Target, String> {
        let futures = targets.into_iter().map(|target| async move {
            self.integrity_of(&target)
                .await
                .map(|integrity| (target, integrity))
        });

        join_all(futures).await.into_iter().flatten().collect()
    }

    async fn integrity_of(&self, target: &Target) -> Option<String> {
        let pending = {
            let mut cache = self.cache.lock().await;
            cache
                .entry(target.clone())
                .or_insert_with(|| {
                    hash_target(self.snapshot, Arc::clone(&self.open_files), target.clone())
                        .boxed()
                        .shared()
                })
                .clone()
        };

        pending.await
    }

    #[cfg(test)]
    async fn cached(&self) -> usize {
        self.cache.lock().await.len()
    }
}

async fn hash_target(
    snapshot: &Snapshot,
    open_files: Arc<Semaphore>,
    target: Target,
) -> Option<String> {
    match compute(snapshot, &open_files, &target).await {
        Ok(integrity) => Some(integrity),
        Err(err) => {
            error!(
                "At: {}-{} ({})",
                &target.package,
                &target.version,
                snapshot.describe(&target.package)
            );
            error!("{:#}", err);
            None
        }
    }
}

async fn compute(
    snapshot: &Snapshot,
    open_files: &Semaphore,
    target: &Target,
) -> anyhow::Result<String> {
    let path = snapshot.resolve(&target.package, &target.version)?;
    let _permit = open_files.acquire().await?;

    compute_ssri(&target.hash_type, path).await
}
