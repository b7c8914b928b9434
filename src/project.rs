// src/project.rs

//! A root package with its resolved dependency graph
//!
//! The project binds declared dependencies to loaded packages (selections
//! first, then peers, then paths), computes a single configuration per
//! package for a target platform, and aggregates the per-platform build
//! settings the compiler driver consumes.

use crate::dependency::{Dependency, DependencySpec};
use crate::error::{Error, Result};
use crate::manager::PackageManager;
use crate::package::Package;
use crate::platform::BuildPlatform;
use crate::resolver::{self, UpgradeOptions};
use crate::selections::{SELECTIONS_FILE, SelectedVersions};
use crate::settings::BuildSettings;
use crate::supplier::PackageSupplier;
use crate::vars::expand_vars;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info, warn};

/// Environment breadcrumb guarding against recursive builder invocations
pub const PACKAGES_USED_VAR: &str = "DUB_PACKAGES_USED";

/// Per-project cache below `<root>/.dub/`
const PROJECT_CACHE_FILE: &str = "dub.json";

/// Contents of `<root>/.dub/dub.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_upgrade: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_upgrades: Option<CachedUpgrades>,
}

/// A memoized resolver run, valid while the dependency set is unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedUpgrades {
    /// The root dependency set the resolution was computed for
    pub dependency_specs: Vec<String>,
    /// Resolved package name to dependency spec (JSON surface form)
    pub resolution: BTreeMap<String, serde_json::Value>,
}

/// The root package plus its transitively bound dependencies
pub struct Project {
    manager: PackageManager,
    root: Rc<Package>,
    root_path: PathBuf,
    dependencies: Vec<Rc<Package>>,
    missing: Vec<String>,
    selections: SelectedVersions,
    selections_existed: bool,
    settings: ProjectSettings,
}

impl Project {
    /// Load a project with the standard package-manager setup
    pub fn load(root_path: &Path) -> Result<Project> {
        let manager = PackageManager::for_project(root_path);
        Self::load_with_manager(root_path, manager)
    }

    /// Load a project with an explicitly configured package manager
    pub fn load_with_manager(root_path: &Path, mut manager: PackageManager) -> Result<Project> {
        let root = manager.get_or_load_package(root_path)?;
        check_recursion_guard(root.base_name())?;

        let selections_path = root_path.join(SELECTIONS_FILE);
        let (selections, selections_existed) = if selections_path.is_file() {
            match SelectedVersions::load(&selections_path) {
                Ok(s) => (s, true),
                Err(e) => {
                    warn!(
                        "ignoring unusable selections file {}: {}",
                        selections_path.display(),
                        e
                    );
                    (SelectedVersions::new(), false)
                }
            }
        } else {
            (SelectedVersions::new(), false)
        };

        let settings = load_project_settings(root_path);

        let mut project = Project {
            manager,
            root,
            root_path: root_path.to_path_buf(),
            dependencies: Vec::new(),
            missing: Vec::new(),
            selections,
            selections_existed,
            settings,
        };
        project.reinit();
        Ok(project)
    }

    pub fn root_package(&self) -> &Rc<Package> {
        &self.root
    }

    pub fn dependencies(&self) -> &[Rc<Package>] {
        &self.dependencies
    }

    pub fn selections(&self) -> &SelectedVersions {
        &self.selections
    }

    pub fn missing_dependencies(&self) -> &[String] {
        &self.missing
    }

    pub fn package_manager(&self) -> &PackageManager {
        &self.manager
    }

    /// Whether every required dependency is bound to a package
    pub fn has_all_dependencies(&self) -> bool {
        self.missing.is_empty()
    }

    /// Find a bound package (the root, one of its sub-packages, or a
    /// dependency) by its qualified name
    pub fn package_by_name(&self, name: &str) -> Option<Rc<Package>> {
        if self.root.name() == name {
            return Some(self.root.clone());
        }
        if let Some(dep) = self.dependencies.iter().find(|p| p.name() == name) {
            return Some(dep.clone());
        }
        // Root sub-packages are bound in place
        if name.split(':').next() == Some(self.root.base_name()) {
            return self.manager.get_package(name, self.root.version());
        }
        None
    }

    /// Rebuild the dependency bindings from the declared dependency
    /// graph, selections and peer choices
    pub fn reinit(&mut self) {
        self.dependencies.clear();
        self.missing.clear();

        let mut queue = vec![self.root.clone()];
        let mut visited: BTreeSet<String> = BTreeSet::new();
        visited.insert(self.root.name().to_string());

        while let Some(pkg) = queue.pop() {
            for (name, dep) in pkg.all_dependencies() {
                if visited.contains(&name) {
                    continue;
                }
                match self.bind_dependency(&pkg, &name, &dep) {
                    Some(bound) => {
                        visited.insert(name.clone());
                        if bound.name() != self.root.name() {
                            self.dependencies.push(bound.clone());
                        }
                        queue.push(bound);
                    }
                    None => {
                        if !dep.optional {
                            debug!("dependency '{}' of '{}' is not present", name, pkg.name());
                            self.missing.push(name.clone());
                        }
                    }
                }
            }
        }
        self.dependencies
            .sort_by(|a, b| a.name().cmp(b.name()));
        self.missing.sort();
        self.missing.dedup();
    }

    /// Bind one declared dependency to a loaded package, if possible
    fn bind_dependency(
        &mut self,
        referrer: &Rc<Package>,
        name: &str,
        dep: &Dependency,
    ) -> Option<Rc<Package>> {
        let base = name.split(':').next().unwrap_or(name);

        // The root package and its sub-packages are bound in place
        if base == self.root.base_name() {
            if name == self.root.name() {
                return Some(self.root.clone());
            }
            return self.manager.get_package(name, self.root.version());
        }

        // A pinned selection wins over everything else
        if let Some(pin) = self.selections.selected(base).cloned() {
            return match &pin.spec {
                DependencySpec::Path(p) => {
                    let path = if p.is_relative() {
                        self.root_path.join(p)
                    } else {
                        p.clone()
                    };
                    self.load_path_dependency(name, &path)
                }
                _ => {
                    let version = pin.exact_version()?;
                    self.manager.get_package(name, &version)
                }
            };
        }

        // Reuse a peer's choice of the same base package
        if let Some(peer) = self
            .dependencies
            .iter()
            .find(|p| p.base_name() == base)
            .cloned()
        {
            return self.manager.get_package(name, peer.version());
        }

        // Path specs are deterministic and load directly
        if let DependencySpec::Path(p) = &dep.spec {
            let path = if p.is_relative() {
                referrer.root().join(p)
            } else {
                p.clone()
            };
            return self.load_path_dependency(name, &path);
        }

        None
    }

    /// Load a package from a path spec, re-applying the sub-package name
    /// when the path leads to the parent package
    fn load_path_dependency(&mut self, name: &str, path: &Path) -> Option<Rc<Package>> {
        match self.manager.get_or_load_package(path) {
            Ok(pkg) => {
                if pkg.name() == name {
                    Some(pkg)
                } else if name.contains(':') {
                    self.manager.get_package(name, pkg.version())
                } else {
                    warn!(
                        "path dependency at {} names itself '{}', expected '{}'",
                        path.display(),
                        pkg.name(),
                        name
                    );
                    Some(pkg)
                }
            }
            Err(e) => {
                warn!("failed to load path dependency '{}': {}", name, e);
                None
            }
        }
    }

    /// Every package of the project in dependency order
    ///
    /// Each package appears at most once; edges are walked in sorted name
    /// order and filtered by whether the dependency is enabled in the
    /// referrer's active configuration from `configs`.
    pub fn topological_package_list(
        &self,
        children_first: bool,
        root: Option<&Rc<Package>>,
        configs: &BTreeMap<String, String>,
    ) -> Vec<Rc<Package>> {
        let start = root.unwrap_or(&self.root).clone();
        let mut visited = BTreeSet::new();
        let mut out = Vec::new();
        self.topological_visit(&start, configs, &mut visited, &mut out);
        if !children_first {
            out.reverse();
        }
        out
    }

    fn topological_visit(
        &self,
        pkg: &Rc<Package>,
        configs: &BTreeMap<String, String>,
        visited: &mut BTreeSet<String>,
        out: &mut Vec<Rc<Package>>,
    ) {
        if !visited.insert(pkg.name().to_string()) {
            return;
        }
        let deps = match configs.get(pkg.name()) {
            Some(config) => pkg.dependencies(config),
            None => pkg.all_dependencies(),
        };
        for name in deps.keys() {
            if let Some(child) = self.package_by_name(name) {
                self.topological_visit(&child, configs, visited, out);
            }
        }
        out.push(pkg.clone());
    }

    /// Choose one configuration per reachable package
    ///
    /// Every chosen configuration admits the platform, and every referrer
    /// agrees with it, either through a sub-configuration override or by
    /// the dependency's own platform configurations. Cycles among
    /// packages are fatal.
    pub fn package_configs(
        &self,
        platform: &BuildPlatform,
        root_config: Option<&str>,
        allow_non_library: bool,
    ) -> Result<BTreeMap<String, String>> {
        if let Some(config) = root_config {
            if self.root.recipe().configuration(config).is_none() {
                return Err(Error::UnknownConfiguration {
                    package: self.root.name().to_string(),
                    config: config.to_string(),
                });
            }
        }

        let order = self.reachable_topological_order()?;

        // Candidate configurations per package, in declaration order
        let mut candidates: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for name in &order {
            let pkg = self.package_by_name(name).expect("reachable package");
            let configs = if *name == self.root.name() {
                match root_config {
                    Some(config) => vec![config.to_string()],
                    None => pkg.platform_configurations(platform, allow_non_library),
                }
            } else {
                pkg.platform_configurations(platform, false)
            };
            if configs.is_empty() {
                return Err(Error::NoValidConfiguration {
                    package: name.clone(),
                });
            }
            candidates.insert(name.clone(), configs);
        }

        // Parents of each package in the union graph
        let mut parents: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for name in &order {
            let pkg = self.package_by_name(name).expect("reachable package");
            for dep_name in pkg.all_dependencies().keys() {
                if candidates.contains_key(dep_name) {
                    parents
                        .entry(dep_name.clone())
                        .or_default()
                        .push(name.clone());
                }
            }
        }

        let seeded_root = root_config.map(|_| self.root.name().to_string());
        loop {
            let mut changed = false;
            for name in &order {
                if Some(name) == seeded_root.as_ref() {
                    continue;
                }
                let Some(package_parents) = parents.get(name) else {
                    continue;
                };
                let current = candidates[name].clone();
                let pkg = self.package_by_name(name).expect("reachable package");
                let kept: Vec<String> = current
                    .iter()
                    .filter(|config| {
                        package_parents.iter().all(|parent| {
                            self.parent_admits(
                                parent,
                                &candidates,
                                name,
                                config.as_str(),
                                &pkg,
                                platform,
                            )
                        })
                    })
                    .cloned()
                    .collect();
                if kept.len() != current.len() {
                    if kept.is_empty() {
                        return Err(Error::NoValidConfiguration {
                            package: name.clone(),
                        });
                    }
                    candidates.insert(name.clone(), kept);
                    changed = true;
                }
            }
            if changed {
                continue;
            }
            // Fixed point: commit the first remaining ambiguity and retry
            let ambiguous = order
                .iter()
                .find(|name| candidates[name.as_str()].len() > 1);
            match ambiguous {
                Some(name) => {
                    let choice = candidates[name.as_str()][0].clone();
                    debug!("picking configuration '{}' for package '{}'", choice, name);
                    candidates.insert(name.clone(), vec![choice]);
                }
                None => break,
            }
        }

        Ok(candidates
            .into_iter()
            .map(|(name, mut configs)| (name, configs.remove(0)))
            .collect())
    }

    /// Whether any remaining candidate of `parent` admits `config` for
    /// the dependency `name`
    fn parent_admits(
        &self,
        parent: &str,
        candidates: &BTreeMap<String, Vec<String>>,
        name: &str,
        config: &str,
        pkg: &Rc<Package>,
        platform: &BuildPlatform,
    ) -> bool {
        let parent_pkg = match self.package_by_name(parent) {
            Some(p) => p,
            None => return true,
        };
        candidates
            .get(parent)
            .map(|parent_configs| {
                parent_configs.iter().any(|pc| {
                    if !parent_pkg.dependencies(pc).contains_key(name) {
                        // This parent flavor has no edge at all
                        return true;
                    }
                    match parent_pkg.sub_configuration(pc, name, platform) {
                        Some(forced) => forced == config,
                        None => pkg
                            .platform_configurations(platform, false)
                            .iter()
                            .any(|c| c == config),
                    }
                })
            })
            .unwrap_or(true)
    }

    /// Reachable packages, parents before children, rejecting cycles
    fn reachable_topological_order(&self) -> Result<Vec<String>> {
        let mut order = Vec::new();
        let mut visited = BTreeSet::new();
        let mut in_progress = Vec::new();
        self.topo_dfs(self.root.name(), &mut visited, &mut in_progress, &mut order)?;
        order.reverse();
        Ok(order)
    }

    fn topo_dfs(
        &self,
        name: &str,
        visited: &mut BTreeSet<String>,
        in_progress: &mut Vec<String>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        if in_progress.iter().any(|n| n == name) {
            let mut cycle = in_progress.clone();
            cycle.push(name.to_string());
            return Err(Error::DependencyCycle(cycle));
        }
        if !visited.insert(name.to_string()) {
            return Ok(());
        }
        let Some(pkg) = self.package_by_name(name) else {
            visited.remove(name);
            return Ok(());
        };
        in_progress.push(name.to_string());
        for dep_name in pkg.all_dependencies().keys() {
            self.topo_dfs(dep_name, visited, in_progress, order)?;
        }
        in_progress.pop();
        order.push(name.to_string());
        Ok(())
    }

    /// Aggregate the build settings of every package for one platform
    ///
    /// Packages contribute in topological order, parents first, with
    /// `$VARIABLE` references expanded and relative paths rebased onto
    /// the owning package. The walk root additionally contributes target
    /// and working-directory settings, and every traversed package adds a
    /// `Have_<name>` version identifier. `shallow` skips non-root source
    /// files and the root-buildability check.
    pub fn add_build_settings(
        &self,
        dst: &mut BuildSettings,
        platform: &BuildPlatform,
        root_config: &str,
        root_override: Option<&Rc<Package>>,
        shallow: bool,
    ) -> Result<()> {
        let configs = self.package_configs(platform, Some(root_config), true)?;
        let walk_root = root_override.unwrap_or(&self.root);
        let list = self.topological_package_list(false, Some(walk_root), &configs);

        for pkg in &list {
            let Some(config) = configs.get(pkg.name()) else {
                continue;
            };
            let mut settings = pkg.build_settings(platform, config)?;
            self.expand_settings(&mut settings, pkg)?;
            let is_root = pkg.name() == walk_root.name();

            if is_root {
                if !shallow && !settings.target_type.is_buildable() {
                    return Err(Error::invalid(format!(
                        "root package '{}' has the unbuildable target type '{}'",
                        pkg.name(),
                        settings.target_type
                    )));
                }
                dst.target_type = settings.target_type;
                dst.target_path = settings.target_path.clone();
                dst.target_name = settings.target_name.clone();
                dst.working_directory = settings.working_directory.clone();
                dst.main_source_file = settings.main_source_file.clone();
            }

            if is_root || !shallow {
                dst.add_source_files(settings.source_files.iter().cloned());
            }
            dst.add_dflags(settings.dflags.iter().cloned());
            dst.add_lflags(settings.lflags.iter().cloned());
            dst.add_libs(settings.libs.iter().cloned());
            dst.add_import_paths(settings.import_paths.iter().cloned());
            dst.add_string_import_paths(settings.string_import_paths.iter().cloned());
            dst.add_string_import_files(settings.string_import_files.iter().cloned());
            dst.add_versions(settings.versions.iter().cloned());
            dst.add_debug_versions(settings.debug_versions.iter().cloned());
            dst.pre_generate_commands
                .extend(settings.pre_generate_commands.iter().cloned());
            dst.post_generate_commands
                .extend(settings.post_generate_commands.iter().cloned());
            dst.pre_build_commands
                .extend(settings.pre_build_commands.iter().cloned());
            dst.post_build_commands
                .extend(settings.post_build_commands.iter().cloned());
            dst.add_requirements(settings.build_requirements);
            dst.add_options(settings.build_options);

            dst.add_versions([format!("Have_{}", sanitize_version_identifier(pkg.name()))]);
        }
        Ok(())
    }

    /// Expand `$VARIABLE` references in every string of `settings`
    fn expand_settings(&self, settings: &mut BuildSettings, pkg: &Rc<Package>) -> Result<()> {
        let lookup = |name: &str| self.lookup_variable(name, pkg);

        for field in [
            &mut settings.target_path,
            &mut settings.working_directory,
            &mut settings.main_source_file,
        ] {
            if !field.is_empty() {
                *field = expand_vars(field, lookup)?;
            }
        }
        let path_lists = [
            &mut settings.source_files,
            &mut settings.import_paths,
            &mut settings.string_import_paths,
            &mut settings.string_import_files,
        ];
        for list in path_lists {
            for value in list.iter_mut() {
                let expanded = expand_vars(value, lookup)?;
                *value = if Path::new(&expanded).is_relative() {
                    pkg.root().join(&expanded).to_string_lossy().into_owned()
                } else {
                    expanded
                };
            }
        }
        let flat_lists = [
            &mut settings.dflags,
            &mut settings.lflags,
            &mut settings.libs,
            &mut settings.versions,
            &mut settings.debug_versions,
            &mut settings.pre_generate_commands,
            &mut settings.post_generate_commands,
            &mut settings.pre_build_commands,
            &mut settings.post_build_commands,
        ];
        for list in flat_lists {
            for value in list.iter_mut() {
                *value = expand_vars(value, lookup)?;
            }
        }
        Ok(())
    }

    fn lookup_variable(&self, name: &str, pkg: &Rc<Package>) -> Option<String> {
        if name == "PACKAGE_DIR" {
            return Some(pkg.root().to_string_lossy().into_owned());
        }
        if name == "ROOT_PACKAGE_DIR" {
            return Some(self.root.root().to_string_lossy().into_owned());
        }
        if let Some(pkg_part) = name.strip_suffix("_PACKAGE_DIR") {
            let want = pkg_part.to_string();
            for candidate in std::iter::once(&self.root).chain(self.dependencies.iter()) {
                if sanitize_version_identifier(candidate.name()).to_uppercase() == want {
                    return Some(candidate.root().to_string_lossy().into_owned());
                }
            }
        }
        std::env::var(name).ok()
    }

    /// Run the resolver and apply its result
    ///
    /// Returns the resolved package-to-dependency map. With `select` set
    /// the result is written into the selections (and saved); with
    /// `print_upgrades_only` nothing is applied.
    pub fn upgrade(
        &mut self,
        options: UpgradeOptions,
        suppliers: &[Box<dyn PackageSupplier>],
    ) -> Result<BTreeMap<String, Dependency>> {
        let current_specs = self.dependency_spec_strings();

        if options.use_cached_result {
            if let Some(cached) = &self.settings.cached_upgrades {
                if cached.dependency_specs == current_specs {
                    debug!("reusing cached upgrade result");
                    let mut result = BTreeMap::new();
                    for (name, value) in &cached.resolution {
                        result.insert(name.clone(), Dependency::from_json(value)?);
                    }
                    return Ok(result);
                }
            }
        }

        let result = resolver::resolve_versions(
            &mut self.manager,
            suppliers,
            &self.selections,
            self.selections_existed,
            self.root.clone(),
            options,
        )?;

        if options.print_upgrades_only {
            for (name, dep) in &result {
                match self.selections.selected(name) {
                    Some(current) if current != dep => {
                        info!("would upgrade '{}': {} -> {}", name, current, dep);
                    }
                    None => info!("would select '{}': {}", name, dep),
                    _ => {}
                }
            }
            return Ok(result);
        }

        if options.select {
            for (name, dep) in &result {
                self.selections.select(name.clone(), dep.clone());
            }
            if self.selections.is_dirty() {
                self.selections.save(&self.root_path.join(SELECTIONS_FILE))?;
            }
        }

        self.settings.last_upgrade = Some(Utc::now());
        self.settings.cached_upgrades = Some(CachedUpgrades {
            dependency_specs: current_specs,
            resolution: result
                .iter()
                .map(|(name, dep)| (name.clone(), dep.to_json()))
                .collect(),
        });
        if let Err(e) = self.save_project_settings() {
            warn!("failed to save project cache: {}", e);
        }

        self.reinit();
        Ok(result)
    }

    fn dependency_spec_strings(&self) -> Vec<String> {
        self.root
            .all_dependencies()
            .iter()
            .map(|(name, dep)| format!("{} {}", name, dep))
            .collect()
    }

    /// Persist `<root>/.dub/dub.json` with the atomic-rename pattern
    pub fn save_project_settings(&self) -> Result<()> {
        let dir = self.root_path.join(".dub");
        std::fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(serde_json::to_string_pretty(&self.settings)?.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.persist(dir.join(PROJECT_CACHE_FILE))
            .map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// Save dirty selections to `dub.selections.json`
    pub fn save_selections(&mut self) -> Result<()> {
        if self.selections.is_dirty() {
            self.selections.save(&self.root_path.join(SELECTIONS_FILE))?;
        }
        Ok(())
    }

    /// The environment for spawned build commands: the current
    /// breadcrumb extended by this project's package
    pub fn command_environment(&self) -> Vec<(String, String)> {
        vec![(
            PACKAGES_USED_VAR.to_string(),
            extended_recursion_guard(self.root.base_name()),
        )]
    }
}

fn load_project_settings(root_path: &Path) -> ProjectSettings {
    let path = root_path.join(".dub").join(PROJECT_CACHE_FILE);
    if !path.is_file() {
        return ProjectSettings::default();
    }
    match std::fs::read_to_string(&path)
        .map_err(Error::Io)
        .and_then(|text| serde_json::from_str(&text).map_err(Error::Json))
    {
        Ok(settings) => settings,
        Err(e) => {
            warn!(
                "rebuilding corrupt project cache {}: {}",
                path.display(),
                Error::CacheCorrupt {
                    file: path.display().to_string(),
                    message: e.to_string(),
                }
            );
            ProjectSettings::default()
        }
    }
}

/// `Have_<...>` identifiers and `<PKG>_PACKAGE_DIR` variables use the
/// package name with `:` and `-` replaced by `_`
pub fn sanitize_version_identifier(name: &str) -> String {
    name.replace([':', '-'], "_")
}

/// Fail when this package already appears in the invocation breadcrumb
pub fn check_recursion_guard(base_name: &str) -> Result<()> {
    if let Ok(used) = std::env::var(PACKAGES_USED_VAR) {
        if used.split(',').any(|entry| entry == base_name) {
            return Err(Error::invalid(format!(
                "refusing recursive invocation: package '{}' is already being built ({}={})",
                base_name, PACKAGES_USED_VAR, used
            )));
        }
    }
    Ok(())
}

/// The breadcrumb value for nested builder invocations
pub fn extended_recursion_guard(base_name: &str) -> String {
    match std::env::var(PACKAGES_USED_VAR) {
        Ok(used) if !used.is_empty() => format!("{},{}", used, base_name),
        _ => base_name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::TargetType;
    use tempfile::TempDir;

    fn linux() -> BuildPlatform {
        BuildPlatform::new(
            vec!["posix".into(), "linux".into()],
            vec!["x86_64".into()],
            "dmd",
        )
    }

    fn write_recipe(dir: &Path, body: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("dub.json"), body).unwrap();
    }

    /// A project whose dependencies live in a local search path
    fn project_with(root_recipe: &str, packages: &[(&str, &str)]) -> (TempDir, Project) {
        let tmp = TempDir::new().unwrap();
        let pool = tmp.path().join("pool");
        for (name, recipe) in packages {
            write_recipe(&pool.join(name), recipe);
        }
        let root_dir = tmp.path().join("project");
        write_recipe(&root_dir, root_recipe);

        let manager = PackageManager::with_locations(vec![pool], vec![]);
        let project = Project::load_with_manager(&root_dir, manager).unwrap();
        (tmp, project)
    }

    #[test]
    fn test_reinit_binds_search_path_peer() {
        let (_tmp, project) = project_with(
            r#"{"name": "app", "version": "0.0.1",
                "dependencies": {"dep": "*"}}"#,
            &[("dep", r#"{"name": "dep", "version": "1.0.0"}"#)],
        );
        assert!(project.has_all_dependencies());
        assert_eq!(project.dependencies().len(), 1);
        assert_eq!(project.dependencies()[0].name(), "dep");
    }

    #[test]
    fn test_reinit_notes_missing() {
        let (_tmp, project) = project_with(
            r#"{"name": "app", "version": "0.0.1",
                "dependencies": {"ghost": "^1.0.0"}}"#,
            &[],
        );
        assert!(!project.has_all_dependencies());
        assert_eq!(project.missing_dependencies(), ["ghost"]);
    }

    #[test]
    fn test_reinit_missing_optional_is_fine() {
        let (_tmp, project) = project_with(
            r#"{"name": "app", "version": "0.0.1",
                "dependencies": {"ghost": {"version": "^1.0.0", "optional": true}}}"#,
            &[],
        );
        assert!(project.has_all_dependencies());
    }

    #[test]
    fn test_reinit_binds_own_sub_package() {
        let (_tmp, project) = project_with(
            r#"{"name": "app", "version": "0.0.1",
                "dependencies": {"app:util": "*"},
                "subPackages": [{"name": "util"}]}"#,
            &[],
        );
        assert!(project.has_all_dependencies());
        assert_eq!(project.dependencies()[0].name(), "app:util");
    }

    #[test]
    fn test_reinit_follows_path_dependencies() {
        let tmp = TempDir::new().unwrap();
        write_recipe(
            &tmp.path().join("sibling"),
            r#"{"name": "sibling", "version": "0.2.0"}"#,
        );
        let root_dir = tmp.path().join("project");
        write_recipe(
            &root_dir,
            r#"{"name": "app", "version": "0.0.1",
                "dependencies": {"sibling": {"path": "../sibling"}}}"#,
        );
        let manager = PackageManager::with_locations(vec![], vec![]);
        let project = Project::load_with_manager(&root_dir, manager).unwrap();
        assert!(project.has_all_dependencies());
        assert_eq!(project.dependencies()[0].name(), "sibling");
    }

    #[test]
    fn test_selection_pins_resolution() {
        let tmp = TempDir::new().unwrap();
        let pool = tmp.path().join("pool");
        // Two checked-out versions; the selection picks the older one
        write_recipe(
            &pool.join("old"),
            r#"{"name": "dep", "version": "1.0.0"}"#,
        );
        write_recipe(
            &pool.join("new"),
            r#"{"name": "dep", "version": "1.2.0"}"#,
        );
        let root_dir = tmp.path().join("project");
        write_recipe(
            &root_dir,
            r#"{"name": "app", "version": "0.0.1",
                "dependencies": {"dep": "^1.0.0"}}"#,
        );
        std::fs::write(
            root_dir.join(SELECTIONS_FILE),
            r#"{"fileVersion": 1, "versions": {"dep": "1.0.0"}}"#,
        )
        .unwrap();

        let manager = PackageManager::with_locations(vec![pool], vec![]);
        let project = Project::load_with_manager(&root_dir, manager).unwrap();
        assert_eq!(project.dependencies()[0].version().to_string(), "1.0.0");
    }

    #[test]
    fn test_malformed_selections_degrade() {
        let tmp = TempDir::new().unwrap();
        let root_dir = tmp.path().join("project");
        write_recipe(&root_dir, r#"{"name": "app", "version": "0.0.1"}"#);
        std::fs::write(root_dir.join(SELECTIONS_FILE), "{broken").unwrap();

        let manager = PackageManager::with_locations(vec![], vec![]);
        let project = Project::load_with_manager(&root_dir, manager).unwrap();
        assert!(project.selections().is_empty());
    }

    #[test]
    fn test_package_configs_sub_configuration_pins() {
        // Scenario: A depends on B, forcing B into c1 regardless of order
        let (_tmp, project) = project_with(
            r#"{"name": "a", "version": "1.0.0",
                "dependencies": {"b": "*"},
                "subConfigurations": {"b": "c1"},
                "configurations": [{"name": "default"}]}"#,
            &[(
                "b",
                r#"{"name": "b", "version": "1.0.0",
                    "configurations": [{"name": "c2"}, {"name": "c1"}]}"#,
            )],
        );
        let configs = project.package_configs(&linux(), None, true).unwrap();
        assert_eq!(configs["b"], "c1");
        assert_eq!(configs["a"], "default");
    }

    #[test]
    fn test_package_configs_defaults_to_declaration_order() {
        let (_tmp, project) = project_with(
            r#"{"name": "a", "version": "1.0.0",
                "dependencies": {"b": "*"},
                "configurations": [{"name": "default"}]}"#,
            &[(
                "b",
                r#"{"name": "b", "version": "1.0.0",
                    "configurations": [{"name": "first"}, {"name": "second"}]}"#,
            )],
        );
        let configs = project.package_configs(&linux(), None, true).unwrap();
        assert_eq!(configs["b"], "first");
    }

    #[test]
    fn test_package_configs_rejects_cycles() {
        let (_tmp, project) = project_with(
            r#"{"name": "p", "version": "1.0.0",
                "dependencies": {"q": "*"}}"#,
            &[(
                "q",
                r#"{"name": "q", "version": "1.0.0", "dependencies": {"p": "*"}}"#,
            )],
        );
        match project.package_configs(&linux(), None, true) {
            Err(Error::DependencyCycle(cycle)) => {
                assert!(cycle.contains(&"p".to_string()));
                assert!(cycle.contains(&"q".to_string()));
            }
            other => panic!("expected DependencyCycle, got {:?}", other),
        }
    }

    #[test]
    fn test_package_configs_platform_filter() {
        let (_tmp, project) = project_with(
            r#"{"name": "a", "version": "1.0.0",
                "dependencies": {"b": "*"},
                "configurations": [{"name": "default"}]}"#,
            &[(
                "b",
                r#"{"name": "b", "version": "1.0.0",
                    "configurations": [
                        {"name": "win", "platforms": ["windows"]},
                        {"name": "nix", "platforms": ["posix"]}
                    ]}"#,
            )],
        );
        let configs = project.package_configs(&linux(), None, true).unwrap();
        assert_eq!(configs["b"], "nix");
    }

    #[test]
    fn test_package_configs_unknown_root_config() {
        let (_tmp, project) = project_with(
            r#"{"name": "a", "version": "1.0.0",
                "configurations": [{"name": "only"}]}"#,
            &[],
        );
        assert!(matches!(
            project.package_configs(&linux(), Some("nope"), true),
            Err(Error::UnknownConfiguration { .. })
        ));
    }

    #[test]
    fn test_topological_order() {
        let (_tmp, project) = project_with(
            r#"{"name": "top", "version": "1.0.0",
                "dependencies": {"mid": "*"}}"#,
            &[
                (
                    "mid",
                    r#"{"name": "mid", "version": "1.0.0", "dependencies": {"leaf": "*"}}"#,
                ),
                ("leaf", r#"{"name": "leaf", "version": "1.0.0"}"#),
            ],
        );
        let configs = project.package_configs(&linux(), None, true).unwrap();
        let parents_first: Vec<String> = project
            .topological_package_list(false, None, &configs)
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(parents_first, vec!["top", "mid", "leaf"]);

        let children_first: Vec<String> = project
            .topological_package_list(true, None, &configs)
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(children_first, vec!["leaf", "mid", "top"]);
    }

    #[test]
    fn test_add_build_settings_aggregates() {
        let tmp = TempDir::new().unwrap();
        let pool = tmp.path().join("pool");
        let dep_dir = pool.join("dep");
        write_recipe(
            &dep_dir,
            r#"{"name": "dep", "version": "1.0.0", "dflags": ["-dep-flag"]}"#,
        );
        std::fs::create_dir_all(dep_dir.join("source")).unwrap();
        std::fs::write(dep_dir.join("source/dep.d"), "module dep;\n").unwrap();

        let root_dir = tmp.path().join("project");
        write_recipe(
            &root_dir,
            r#"{"name": "app", "version": "0.0.1", "targetType": "executable",
                "dependencies": {"dep": "*"}}"#,
        );
        std::fs::create_dir_all(root_dir.join("source")).unwrap();
        std::fs::write(root_dir.join("source/app.d"), "void main() {}\n").unwrap();

        let manager = PackageManager::with_locations(vec![pool], vec![]);
        let project = Project::load_with_manager(&root_dir, manager).unwrap();

        let mut dst = BuildSettings::default();
        project
            .add_build_settings(&mut dst, &linux(), "application", None, false)
            .unwrap();
        assert_eq!(dst.target_type, TargetType::Executable);
        assert_eq!(dst.target_name, "app");
        assert!(dst.dflags.contains(&"-dep-flag".to_string()));
        assert!(dst.versions.contains(&"Have_app".to_string()));
        assert!(dst.versions.contains(&"Have_dep".to_string()));
        assert!(dst.source_files.iter().any(|f| f.ends_with("app.d")));
        assert!(dst.source_files.iter().any(|f| f.ends_with("dep.d")));

        // Shallow mode skips dependency sources
        let mut shallow = BuildSettings::default();
        project
            .add_build_settings(&mut shallow, &linux(), "application", None, true)
            .unwrap();
        assert!(shallow.source_files.iter().any(|f| f.ends_with("app.d")));
        assert!(!shallow.source_files.iter().any(|f| f.ends_with("dep.d")));
    }

    #[test]
    fn test_add_build_settings_expands_variables() {
        let (_tmp, project) = project_with(
            r#"{"name": "app", "version": "0.0.1", "targetType": "executable",
                "dflags": ["-I$PACKAGE_DIR/extra"],
                "configurations": [{"name": "application"}]}"#,
            &[],
        );
        let mut dst = BuildSettings::default();
        project
            .add_build_settings(&mut dst, &linux(), "application", None, false)
            .unwrap();
        let flag = dst.dflags.iter().find(|f| f.starts_with("-I")).unwrap();
        assert!(!flag.contains('$'));
        assert!(flag.ends_with("/extra"));
    }

    #[test]
    fn test_add_build_settings_unknown_variable_fails() {
        let (_tmp, project) = project_with(
            r#"{"name": "app", "version": "0.0.1", "targetType": "executable",
                "dflags": ["$SURELY_NOT_SET_ANYWHERE_AT_ALL"],
                "configurations": [{"name": "application"}]}"#,
            &[],
        );
        let mut dst = BuildSettings::default();
        assert!(matches!(
            project.add_build_settings(&mut dst, &linux(), "application", None, false),
            Err(Error::UnknownVariable(_))
        ));
    }

    #[test]
    fn test_recursion_guard() {
        assert!(check_recursion_guard("fresh-package").is_ok());
        let crumb = extended_recursion_guard("fresh-package");
        assert!(crumb.ends_with("fresh-package"));
    }

    #[test]
    fn test_project_settings_cache_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let root_dir = tmp.path().join("project");
        write_recipe(&root_dir, r#"{"name": "app", "version": "0.0.1"}"#);
        let manager = PackageManager::with_locations(vec![], vec![]);
        let mut project = Project::load_with_manager(&root_dir, manager).unwrap();

        project.settings.last_upgrade = Some(Utc::now());
        project.settings.cached_upgrades = Some(CachedUpgrades {
            dependency_specs: vec!["dep ^1.0.0".to_string()],
            resolution: [("dep".to_string(), serde_json::json!("1.2.0"))]
                .into_iter()
                .collect(),
        });
        project.save_project_settings().unwrap();

        let reloaded = load_project_settings(&root_dir);
        assert!(reloaded.last_upgrade.is_some());
        assert_eq!(
            reloaded.cached_upgrades.unwrap().dependency_specs,
            vec!["dep ^1.0.0".to_string()]
        );
    }
}
