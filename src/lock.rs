use crate::{
    hasher::{Hasher, Target},
    integrity::hash_type,
};
use anyhow::Context;
use indexmap::IndexMap;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{de, ser, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::{
    collections::{BTreeSet, HashMap},
    mem,
    path::Path,
};
use tokio::fs;

static PACKAGE_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|/)node_modules/((?:@[^/]+/)?[^/@][^/]*)$").unwrap());

/// A parsed lockfile. The integrity-bearing trees are lifted out of the
/// document and written back into their original slots, so every other key
/// keeps its value and position.
pub(crate) struct Lockfile {
    i_dont_care: Map<String, Value>,
    trees: Vec<Tree>,
}

/// Entry of the nested `dependencies` tree used by lockfile versions 1 and 2.
/// Its own `dependencies` are lifted out like the lockfile's trees.
#[derive(Clone)]
pub(crate) struct Dependency {
    fields: Map<String, Value>,
    dependencies: Option<IndexMap<String, Dependency>>,
}

impl<'de> Deserialize<'de> for Dependency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut fields: Map<String, Value> = Map::deserialize(deserializer)?;
        let dependencies = take_object(&mut fields, LEGACY_KEY)
            .map(serde_json::from_value::<IndexMap<String, Dependency>>)
            .transpose()
            .map_err(de::Error::custom)?;

        Ok(Self {
            fields,
            dependencies,
        })
    }
}

impl Serialize for Dependency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut fields = self.fields.clone();
        if let Some(dependencies) = &self.dependencies {
            let dependencies = serde_json::to_value(dependencies).map_err(ser::Error::custom)?;
            fields.insert(LEGACY_KEY.to_string(), dependencies);
        }
        fields.serialize(serializer)
    }
}

/// Entry of the flat `packages` map used by lockfile versions 2 and 3.
#[derive(Clone, Deserialize, Serialize)]
#[serde(transparent)]
pub(crate) struct Package {
    fields: Map<String, Value>,
}

/// Fields are read and replaced in place, so an entry keeps its key order.
trait Entry {
    fn fields(&self) -> &Map<String, Value>;
    fn fields_mut(&mut self) -> &mut Map<String, Value>;

    fn version(&self) -> Option<&str> {
        self.fields().get("version").and_then(Value::as_str)
    }

    fn integrity(&self) -> Option<&str> {
        self.fields().get("integrity").and_then(Value::as_str)
    }

    fn set_integrity(&mut self, integrity: String) {
        self.fields_mut()
            .insert("integrity".to_string(), Value::String(integrity));
    }
}

impl Entry for Dependency {
    fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.fields
    }
}

impl Entry for Package {
    fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.fields
    }
}

/// Per-lockfile counters.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct Report {
    pub(crate) changed: usize,
    pub(crate) failed: usize,
}

/// The integrity-bearing part of a lockfile. A lockfile may carry both.
pub(crate) enum Tree {
    Legacy(IndexMap<String, Dependency>),
    Flat(IndexMap<String, Package>),
}

const FLAT_KEY: &str = "packages";
const LEGACY_KEY: &str = "dependencies";

impl Lockfile {
    pub(crate) fn from_slice(json: &[u8]) -> anyhow::Result<Self> {
        let mut i_dont_care: Map<String, Value> = serde_json::from_slice(json)?;

        let mut trees = Vec::with_capacity(2);
        if let Some(packages) = take_object(&mut i_dont_care, FLAT_KEY) {
            let packages = serde_json::from_value(packages)
                .with_context(|| format!("malformed `{}`", FLAT_KEY))?;
            trees.push(Tree::Flat(packages));
        }
        if let Some(dependencies) = take_object(&mut i_dont_care, LEGACY_KEY) {
            let dependencies = serde_json::from_value(dependencies)
                .with_context(|| format!("malformed `{}`", LEGACY_KEY))?;
            trees.push(Tree::Legacy(dependencies));
        }

        Ok(Self { i_dont_care, trees })
    }

    pub(crate) fn to_vec_pretty(&self) -> anyhow::Result<Vec<u8>> {
        let mut document = self.i_dont_care.clone();
        for tree in &self.trees {
            // the key is still present, so the tree lands back in its own slot
            document.insert(tree.shape().to_string(), tree.to_value()?);
        }

        let mut json = serde_json::to_vec_pretty(&document)?;
        json.push(b'\n');
        Ok(json)
    }

    /// Replaces every integrity value that can be recomputed from the snapshot.
    /// Everything else is carried through as it was read.
    pub(crate) async fn update(&mut self, hasher: &Hasher<'_>) -> Report {
        let mut targets = BTreeSet::new();
        self.trees
            .iter()
            .for_each(|tree| tree.collect_targets(&mut targets));

        let hashes = hasher.hash_all(targets).await;

        let mut report = Report::default();
        self.trees = mem::take(&mut self.trees)
            .into_iter()
            .map(|tree| tree.rewrite(&hashes, &mut report))
            .collect();
        report
    }
}

/// Takes the value of `key` out of `document` when it is an object, leaving
/// `null` in its place. Anything else under `key` stays untouched.
fn take_object(document: &mut Map<String, Value>, key: &str) -> Option<Value> {
    match document.get_mut(key) {
        Some(value) if value.is_object() => Some(value.take()),
        _ => None,
    }
}

impl Tree {
    fn shape(&self) -> &'static str {
        match self {
            Tree::Legacy(_) => LEGACY_KEY,
            Tree::Flat(_) => FLAT_KEY,
        }
    }

    fn to_value(&self) -> serde_json::Result<Value> {
        match self {
            Tree::Legacy(dependencies) => serde_json::to_value(dependencies),
            Tree::Flat(packages) => serde_json::to_value(packages),
        }
    }

    fn collect_targets(&self, targets: &mut BTreeSet<Target>) {
        debug!("Collecting packages from `{}`", self.shape());
        match self {
            Tree::Legacy(dependencies) => collect_dependencies(dependencies, targets),
            Tree::Flat(packages) => packages.iter().for_each(|(path, package)| {
                if let Some(name) = package_name(path) {
                    collect_target(name, package, path, targets);
                }
            }),
        }
    }

    fn rewrite(self, hashes: &HashMap<Target, String>, report: &mut Report) -> Tree {
        match self {
            Tree::Legacy(dependencies) => {
                Tree::Legacy(rewrite_dependencies(dependencies, hashes, report))
            }
            Tree::Flat(packages) => Tree::Flat(
                packages
                    .into_iter()
                    .map(|(path, package)| {
                        let package = match package_name(&path) {
                            Some(name) => refresh(name, package, hashes, report),
                            None => {
                                if package.integrity().is_some() {
                                    warn!("Cannot tell which package `{}` is, skipping", path);
                                }
                                package
                            }
                        };
                        (path, package)
                    })
                    .collect(),
            ),
        }
    }
}

/// Recovers the package name from a `packages` key such as
/// `node_modules/a/node_modules/@scope/b`.
fn package_name(path: &str) -> Option<&str> {
    PACKAGE_PATH
        .captures(path)
        .and_then(|captures| captures.get(1))
        .map(|name| name.as_str())
}

fn target_of<E: Entry>(package: &str, entry: &E) -> Option<Target> {
    let integrity = entry.integrity()?;
    let version = entry.version()?;

    Some(Target {
        package: package.to_string(),
        version: version.to_string(),
        hash_type: hash_type(integrity).to_string(),
    })
}

fn collect_target<E: Entry>(package: &str, entry: &E, location: &str, targets: &mut BTreeSet<Target>) {
    if entry.integrity().is_some() && entry.version().is_none() {
        warn!("`{}` has an integrity but no version, skipping", location);
    }
    if let Some(target) = target_of(package, entry) {
        targets.insert(target);
    }
}

fn collect_dependencies(dependencies: &IndexMap<String, Dependency>, targets: &mut BTreeSet<Target>) {
    dependencies.iter().for_each(|(package, dependency)| {
        collect_target(package, dependency, package, targets);
        if let Some(dependencies) = &dependency.dependencies {
            collect_dependencies(dependencies, targets);
        }
    });
}

fn rewrite_dependencies(
    dependencies: IndexMap<String, Dependency>,
    hashes: &HashMap<Target, String>,
    report: &mut Report,
) -> IndexMap<String, Dependency> {
    dependencies
        .into_iter()
        .map(|(package, dependency)| {
            let mut dependency = refresh(&package, dependency, hashes, report);
            dependency.dependencies = dependency
                .dependencies
                .map(|dependencies| rewrite_dependencies(dependencies, hashes, report));
            (package, dependency)
        })
        .collect()
}

fn refresh<E: Entry>(
    package: &str,
    mut entry: E,
    hashes: &HashMap<Target, String>,
    report: &mut Report,
) -> E {
    let target = match target_of(package, &entry) {
        Some(target) => target,
        None => {
            debug!("{} has nothing to refresh, skipping", package);
            return entry;
        }
    };

    let integrity = match hashes.get(&target) {
        Some(integrity) => integrity,
        None => {
            report.failed += 1;
            return entry;
        }
    };

    if entry.integrity() != Some(integrity.as_str()) {
        info!(
            "{}-{}: {} -> {}",
            package,
            &target.version,
            entry.integrity().unwrap_or_default(),
            integrity
        );
        report.changed += 1;
        entry.set_integrity(integrity.clone());
    }
    entry
}

pub(crate) async fn load_lockfile<P: AsRef<Path>>(path: P) -> anyhow::Result<Lockfile> {
    let path = path.as_ref();
    let file = fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;

    Lockfile::from_slice(&file).with_context(|| format!("failed to parse {}", path.display()))
}

pub(crate) async fn write_lockfile<P: AsRef<Path>>(path: P, lockfile: &Lockfile) -> anyhow::Result<()> {
    let path = path.as_ref();
    let json = lockfile.to_vec_pretty()?;

    fs::write(path, &json)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}
