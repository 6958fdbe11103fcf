use anyhow::{anyhow, Context};
use serde::Deserialize;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};
use tokio::fs;

/// Package name -> version -> path of the artifact on disk.
#[derive(Debug, Default, Deserialize)]
#[serde(transparent)]
pub(crate) struct Snapshot {
    packages: HashMap<String, HashMap<String, PathBuf>>,
}

impl Snapshot {
    pub(crate) async fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = fs::read(path)
            .await
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;

        serde_json::from_slice(&file)
            .with_context(|| format!("failed to parse snapshot {}", path.display()))
    }

    pub(crate) fn len(&self) -> usize {
        self.packages.len()
    }

    pub(crate) fn resolve(&self, package: &str, version: &str) -> anyhow::Result<&Path> {
        self.packages
            .get(package)
            .ok_or_else(|| anyhow!("package `{}` is not in the snapshot", package))?
            .get(version)
            .map(PathBuf::as_path)
            .ok_or_else(|| {
                anyhow!(
                    "version `{}` of package `{}` is not in the snapshot",
                    version,
                    package
                )
            })
    }

    /// The snapshot's whole entry for `package` as JSON, for diagnostics.
    pub(crate) fn describe(&self, package: &str) -> String {
        self.packages
            .get(package)
            .and_then(|versions| serde_json::to_string(versions).ok())
            .unwrap_or_else(|| "undefined".to_string())
    }
}
