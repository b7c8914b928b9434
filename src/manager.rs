// src/manager.rs

//! Index of known packages across the standard search locations
//!
//! Packages live either in override search paths (scanned as plain
//! directories of checkouts) or in one of the three standard cache
//! locations, laid out as `<location>/<name>-<version>/<name>/`. The
//! manager owns every loaded [`Package`]; projects and the resolver hold
//! cheap handles into the index.

use crate::dependency::Dependency;
use crate::error::{Error, Result};
use crate::package::{self, Package};
use crate::version::Version;
use fs2::FileExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Environment variable holding extra package search paths
pub const DUBPATH_VAR: &str = "DUBPATH";

/// Bounded wait for a concurrent installer of the same package
const INSTALL_LOCK_TIMEOUT: Duration = Duration::from_secs(30);
const INSTALL_LOCK_POLL: Duration = Duration::from_millis(500);

/// Index of packages across search paths and cache locations
#[derive(Debug)]
pub struct PackageManager {
    /// Override search paths: plain directories of package checkouts
    search_paths: Vec<PathBuf>,
    /// Standard cache locations (project-local, user-wide, system-wide)
    locations: Vec<PathBuf>,
    packages: Vec<Rc<Package>>,
}

impl PackageManager {
    /// The standard three-location setup for a project root, extended by
    /// any paths in the `DUBPATH` environment variable
    pub fn for_project(project_root: &Path) -> Self {
        let mut locations = vec![project_root.join(".dub").join("packages")];
        if let Some(home) = dirs::home_dir() {
            locations.push(home.join(".dub").join("packages"));
        }
        locations.push(PathBuf::from("/var/lib/dub/packages"));

        let search_paths = std::env::var_os(DUBPATH_VAR)
            .map(|raw| std::env::split_paths(&raw).collect())
            .unwrap_or_default();

        let mut manager = Self {
            search_paths,
            locations,
            packages: Vec::new(),
        };
        manager.refresh();
        manager
    }

    /// Explicit paths, for tests and embedders
    pub fn with_locations(search_paths: Vec<PathBuf>, locations: Vec<PathBuf>) -> Self {
        let mut manager = Self {
            search_paths,
            locations,
            packages: Vec::new(),
        };
        manager.refresh();
        manager
    }

    /// The location new packages are placed into (the first writable
    /// standard location, by convention the user-wide cache when the
    /// project-local one is absent from the configuration)
    pub fn install_location(&self) -> Option<&Path> {
        self.locations.first().map(PathBuf::as_path)
    }

    /// Rebuild the index by scanning every search path and location
    pub fn refresh(&mut self) {
        self.packages.clear();

        for path in self.search_paths.clone() {
            if package::find_recipe_file(&path).is_ok() {
                let _ = self.load_into_index(&path, None);
                continue;
            }
            for entry in read_dirs(&path) {
                if package::find_recipe_file(&entry).is_ok() {
                    let _ = self.load_into_index(&entry, None);
                }
            }
        }

        for location in self.locations.clone() {
            for entry in read_dirs(&location) {
                let dir_name = match entry.file_name().and_then(|n| n.to_str()) {
                    Some(n) => n.to_string(),
                    None => continue,
                };
                let Some((name, version)) = split_package_dir_name(&dir_name) else {
                    continue;
                };
                let root = entry.join(&name);
                if package::find_recipe_file(&root).is_err() {
                    continue;
                }
                if let Some(pkg) = self.load_into_index(&root, Some(version)) {
                    if pkg.base_name() != name {
                        warn!(
                            "package at {} names itself '{}' but is cached as '{}'",
                            root.display(),
                            pkg.name(),
                            name
                        );
                    }
                }
            }
        }
        debug!("package index holds {} packages", self.packages.len());
    }

    fn load_into_index(&mut self, root: &Path, version: Option<Version>) -> Option<Rc<Package>> {
        match Package::load(root, None, None, version) {
            Ok(pkg) => Some(self.add_package(pkg)),
            Err(e) => {
                warn!("skipping unloadable package at {}: {}", root.display(), e);
                None
            }
        }
    }

    /// Add a package and its sub-packages to the index
    pub fn add_package(&mut self, pkg: Package) -> Rc<Package> {
        let pkg = Rc::new(pkg);
        self.packages.push(pkg.clone());
        match self.load_sub_packages(&pkg) {
            Ok(subs) => self.packages.extend(subs),
            Err(e) => warn!("failed to load sub-packages of '{}': {}", pkg.name(), e),
        }
        pkg
    }

    fn load_sub_packages(&self, parent: &Rc<Package>) -> Result<Vec<Rc<Package>>> {
        let mut subs = Vec::new();
        for sub in &parent.recipe().sub_packages {
            let pkg = match sub {
                crate::recipe::SubPackage::Inline(recipe) => Package::from_recipe(
                    recipe.clone(),
                    parent.root(),
                    parent.recipe_path(),
                    Some(parent.as_ref()),
                    Some(parent.version().clone()),
                )?,
                crate::recipe::SubPackage::Path(rel) => {
                    let root = safe_sub_path(parent.root(), rel)?;
                    Package::load(
                        &root,
                        None,
                        Some(parent.as_ref()),
                        Some(parent.version().clone()),
                    )?
                }
            };
            subs.push(Rc::new(pkg));
        }
        Ok(subs)
    }

    /// All indexed packages, name-sorted
    pub fn packages(&self) -> Vec<Rc<Package>> {
        let mut all = self.packages.clone();
        all.sort_by(|a, b| a.name().cmp(b.name()).then(a.version().cmp(b.version())));
        all
    }

    /// An exact name/version lookup
    pub fn get_package(&self, name: &str, version: &Version) -> Option<Rc<Package>> {
        self.packages
            .iter()
            .find(|p| p.name() == name && p.version() == version)
            .cloned()
    }

    /// The highest indexed version of `name` satisfying `dep`
    pub fn get_best_package(&self, name: &str, dep: &Dependency) -> Option<Rc<Package>> {
        self.packages
            .iter()
            .filter(|p| p.name() == name && dep.matches(p.version()))
            .max_by(|a, b| a.version().cmp(b.version()))
            .cloned()
    }

    /// All indexed versions of a package, descending
    pub fn versions_of(&self, name: &str) -> Vec<Version> {
        let mut versions: Vec<Version> = self
            .packages
            .iter()
            .filter(|p| p.name() == name)
            .map(|p| p.version().clone())
            .collect();
        versions.sort();
        versions.dedup();
        versions.reverse();
        versions
    }

    /// Load a package from an explicit directory, reusing the index when
    /// the path is already known
    pub fn get_or_load_package(&mut self, path: &Path) -> Result<Rc<Package>> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if let Some(existing) = self
            .packages
            .iter()
            .find(|p| p.root() == canonical || p.root() == path)
        {
            return Ok(existing.clone());
        }
        let pkg = Package::load(&canonical, None, None, None)?;
        Ok(self.add_package(pkg))
    }

    /// Install an unpacked package into a cache location
    ///
    /// Atomic per package: the tree is copied to a temporary sibling and
    /// renamed into place. Concurrent installers of the same package are
    /// serialized by an exclusive lock on `<dst>.lock` with a bounded
    /// wait; the loser of the race short-circuits to a cache hit.
    pub fn store_fetched_package(
        &mut self,
        source: &Path,
        name: &str,
        version: &Version,
        location: &Path,
    ) -> Result<Rc<Package>> {
        std::fs::create_dir_all(location)?;
        let dir_name = format!("{}-{}", name, version);
        let dest_base = location.join(&dir_name);
        let dest = dest_base.join(name);
        let lock_path = location.join(format!("{}.lock", dir_name));

        let lock_file = std::fs::File::create(&lock_path)?;
        let deadline = Instant::now() + INSTALL_LOCK_TIMEOUT;
        loop {
            match lock_file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(Error::ConcurrentInstallTimeout(name.to_string()));
                    }
                    std::thread::sleep(INSTALL_LOCK_POLL);
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }

        // Re-check under the lock: a concurrent installer may have won
        if package::find_recipe_file(&dest).is_ok() {
            debug!("package {} {} already installed at {}", name, version, dest.display());
            let _ = fs2::FileExt::unlock(&lock_file);
            let pkg = Package::load(&dest, None, None, Some(version.clone()))?;
            return Ok(self.add_package(pkg));
        }

        let staging = tempfile::tempdir_in(location)?;
        let staged = staging.path().join(name);
        copy_tree(source, &staged)?;
        std::fs::create_dir_all(&dest_base)?;
        std::fs::rename(&staged, &dest)?;
        let _ = fs2::FileExt::unlock(&lock_file);
        info!("installed package {} {} to {}", name, version, dest.display());

        let pkg = Package::load(&dest, None, None, Some(version.clone()))?;
        Ok(self.add_package(pkg))
    }

    /// Remove an installed package (and its indexed sub-packages)
    pub fn remove(&mut self, name: &str, version: &Version) -> Result<()> {
        let pkg = self
            .get_package(name, version)
            .ok_or_else(|| Error::UnknownPackage {
                name: name.to_string(),
                spec: version.to_string(),
            })?;

        let dir_name = format!("{}-{}", name, version);
        let container = pkg.root().parent().ok_or_else(|| {
            Error::invalid(format!("package '{}' has no containing directory", name))
        })?;
        if container.file_name().and_then(|n| n.to_str()) != Some(dir_name.as_str()) {
            return Err(Error::invalid(format!(
                "refusing to remove '{}': {} is not a managed cache entry",
                name,
                pkg.root().display()
            )));
        }
        std::fs::remove_dir_all(container)?;
        let root = pkg.root().to_path_buf();
        self.packages.retain(|p| !p.root().starts_with(&root));
        info!("removed package {} {}", name, version);
        Ok(())
    }
}

/// Split a cache directory name `<name>-<version>` at the first hyphen
/// whose tail parses as a version
pub(crate) fn split_package_dir_name(dir_name: &str) -> Option<(String, Version)> {
    for (idx, _) in dir_name.match_indices('-') {
        let (name, tail) = dir_name.split_at(idx);
        if let Ok(version) = Version::parse(&tail[1..]) {
            if !name.is_empty() {
                return Some((name.to_string(), version));
            }
        }
    }
    None
}

/// Resolve a sub-package path, rejecting escapes from the parent root
fn safe_sub_path(root: &Path, rel: &str) -> Result<PathBuf> {
    let rel_path = Path::new(rel);
    if rel_path.is_absolute() {
        return Err(Error::PathOutsideWorkspace(rel_path.to_path_buf()));
    }
    let mut depth: i32 = 0;
    for component in rel_path.components() {
        match component {
            std::path::Component::ParentDir => depth -= 1,
            std::path::Component::Normal(_) => depth += 1,
            _ => {}
        }
        if depth < 0 {
            return Err(Error::PathOutsideWorkspace(rel_path.to_path_buf()));
        }
    }
    Ok(root.join(rel_path))
}

fn read_dirs(path: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(path)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect()
        })
        .unwrap_or_default();
    dirs.sort();
    dirs
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(|e| Error::invalid(format!("walking {}: {}", from.display(), e)))?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| Error::invalid(format!("walking {}: {}", from.display(), e)))?;
        let target = to.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
