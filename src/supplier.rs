// src/supplier.rs

//! Package suppliers: where missing packages come from
//!
//! A supplier answers two questions for the resolver: which versions of a
//! package exist, and where an unpacked copy of one of them can be found.
//! Registry HTTP clients and archive extraction live behind this trait;
//! the crate itself ships a filesystem-backed supplier used for local
//! registries and for tests.

use crate::dependency::Dependency;
use crate::error::{Error, Result};
use crate::package;
use crate::recipe::{self, PackageRecipe};
use crate::version::Version;
use std::path::{Path, PathBuf};

/// A source of packages, typically a remote registry
pub trait PackageSupplier {
    /// Human-readable origin, for diagnostics
    fn description(&self) -> String;

    /// All known versions of a package, in any order
    fn versions(&self, name: &str) -> Result<Vec<Version>>;

    /// Make an unpacked copy of the best match for `dep` available
    ///
    /// `dest` may be used as scratch space; the returned path is the
    /// recipe root and stays valid until the caller copies it into a
    /// cache location.
    fn fetch(&self, name: &str, dep: &Dependency, dest: &Path) -> Result<PathBuf>;

    /// The recipe of the best match for `dep`, without fetching contents
    fn recipe(&self, name: &str, dep: &Dependency) -> Result<PackageRecipe>;
}

/// Serves packages from a local directory of `<name>-<version>` trees
///
/// Each entry holds the recipe root either directly or below a `<name>`
/// subdirectory (the cache layout).
#[derive(Debug)]
pub struct FileSystemSupplier {
    dir: PathBuf,
}

impl FileSystemSupplier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn entries(&self, name: &str) -> Vec<(Version, PathBuf)> {
        let mut found = Vec::new();
        let Ok(dir) = std::fs::read_dir(&self.dir) else {
            return found;
        };
        for entry in dir.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(dir_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some((entry_name, version)) = crate::manager::split_package_dir_name(dir_name)
            else {
                continue;
            };
            if entry_name != name {
                continue;
            }
            let root = if package::find_recipe_file(&path.join(name)).is_ok() {
                path.join(name)
            } else if package::find_recipe_file(&path).is_ok() {
                path
            } else {
                continue;
            };
            found.push((version, root));
        }
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found
    }

    fn best(&self, name: &str, dep: &Dependency) -> Result<(Version, PathBuf)> {
        self.entries(name)
            .into_iter()
            .filter(|(v, _)| dep.matches(v))
            .next_back()
            .ok_or_else(|| Error::UnknownPackage {
                name: name.to_string(),
                spec: dep.to_string(),
            })
    }
}

impl PackageSupplier for FileSystemSupplier {
    fn description(&self) -> String {
        format!("file repository ({})", self.dir.display())
    }

    fn versions(&self, name: &str) -> Result<Vec<Version>> {
        Ok(self.entries(name).into_iter().map(|(v, _)| v).collect())
    }

    fn fetch(&self, name: &str, dep: &Dependency, _dest: &Path) -> Result<PathBuf> {
        let (_, root) = self.best(name, dep)?;
        Ok(root)
    }

    fn recipe(&self, name: &str, dep: &Dependency) -> Result<PackageRecipe> {
        let (_, root) = self.best(name, dep)?;
        let recipe_path = package::find_recipe_file(&root)?;
        let text = std::fs::read_to_string(&recipe_path)?;
        let filename = recipe_path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or(recipe::DEFAULT_RECIPE_FILE);
        recipe::parse_recipe(filename, &text, None)
    }
}
