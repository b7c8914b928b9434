// src/resolver/upgrade.rs

//! Version resolution for a concrete project
//!
//! Supplies the generic engine with real candidate sets: pinned
//! selections when no upgrade was requested, otherwise the merged local
//! and supplier-reported version lists. Missing packages are fetched
//! through the suppliers into the package cache on the way, so recipe
//! inspection of a transitive dependency also warms the cache.

use super::engine::{self, ChildDependency, ResolveContext, TreeNode};
use crate::dependency::{Dependency, DependencySpec};
use crate::error::{Error, Result};
use crate::manager::PackageManager;
use crate::package::Package;
use crate::selections::SelectedVersions;
use crate::supplier::PackageSupplier;
use crate::version::Version;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use tracing::{debug, warn};

/// Knobs controlling an upgrade run
#[derive(Debug, Clone, Copy, Default)]
pub struct UpgradeOptions {
    /// Ignore pinned selections and look for newer versions
    pub upgrade: bool,
    /// Let pre-release versions compete with releases
    pub pre_release: bool,
    /// Reuse the cached resolution result when the dependency set is
    /// unchanged
    pub use_cached_result: bool,
    /// Report what would change without fetching anything
    pub print_upgrades_only: bool,
    /// Write the result back into the selections
    pub select: bool,
}

/// The resolve context for a loaded project
pub struct DependencyVersionResolver<'a> {
    manager: &'a mut PackageManager,
    suppliers: &'a [Box<dyn PackageSupplier>],
    selections: &'a SelectedVersions,
    selections_existed: bool,
    options: UpgradeOptions,
    root: Rc<Package>,
    candidate_cache: HashMap<String, Vec<Dependency>>,
    /// Scratch space handed to suppliers; kept alive for the whole run
    scratch: tempfile::TempDir,
}

/// Resolve every transitive dependency of `root` to a version or path
///
/// The returned map is keyed by base package name; the root package and
/// its sub-packages never appear in it.
pub fn resolve_versions(
    manager: &mut PackageManager,
    suppliers: &[Box<dyn PackageSupplier>],
    selections: &SelectedVersions,
    selections_existed: bool,
    root: Rc<Package>,
    options: UpgradeOptions,
) -> Result<BTreeMap<String, Dependency>> {
    let root_node = TreeNode::new(root.name().to_string(), Dependency::exact(root.version()));
    let root_base = root.base_name().to_string();
    let mut ctx = DependencyVersionResolver {
        manager,
        suppliers,
        selections,
        selections_existed,
        options,
        root,
        candidate_cache: HashMap::new(),
        scratch: tempfile::tempdir()?,
    };

    let assignments = engine::resolve(&mut ctx, root_node)?;

    let mut result = BTreeMap::new();
    for (pack, candidate) in assignments {
        let base = base_name(&pack);
        if base == root_base {
            continue;
        }
        result.entry(base.to_string()).or_insert(candidate);
    }
    Ok(result)
}

fn base_name(pack: &str) -> &str {
    pack.split(':').next().unwrap_or(pack)
}

fn default_matches(candidate: &Dependency, constraint: &Dependency) -> bool {
    match (&candidate.spec, &constraint.spec) {
        (DependencySpec::Path(a), DependencySpec::Path(b)) => a == b,
        (DependencySpec::Path(_), _) => true,
        (_, DependencySpec::Path(_)) => false,
        _ => match candidate.exact_version() {
            Some(v) => constraint.matches(&v),
            None => false,
        },
    }
}

impl DependencyVersionResolver<'_> {
    /// Whether candidates for this package come from an authority that
    /// overrides range checks (the root binding or a pinned selection)
    fn is_authoritative(&self, base: &str) -> bool {
        base == self.root.base_name()
            || (!self.options.upgrade && self.selections.has_selected(base))
    }

    /// Rebase a relative path spec onto a package root
    fn absolutize(&self, dep: &Dependency, base_dir: &std::path::Path) -> Dependency {
        match &dep.spec {
            DependencySpec::Path(p) if p.is_relative() => {
                let mut abs = dep.clone();
                abs.spec = DependencySpec::Path(base_dir.join(p));
                abs
            }
            _ => dep.clone(),
        }
    }

    /// The merged, preference-ordered version list for a base package:
    /// releases descending, then pre-releases unless they may compete,
    /// then branches
    fn registry_versions(&mut self, base: &str) -> Vec<Version> {
        let mut versions = self.manager.versions_of(base);
        for supplier in self.suppliers {
            match supplier.versions(base) {
                Ok(remote) => versions.extend(remote),
                Err(e) => debug!(
                    "supplier {} has no versions for '{}': {}",
                    supplier.description(),
                    base,
                    e
                ),
            }
        }
        versions.sort();
        versions.dedup();
        versions.reverse();

        let (branches, numeric): (Vec<_>, Vec<_>) =
            versions.into_iter().partition(Version::is_branch);
        let mut ordered = if self.options.pre_release {
            numeric
        } else {
            let (pre, releases): (Vec<_>, Vec<_>) =
                numeric.into_iter().partition(Version::is_pre_release);
            let mut ordered = releases;
            ordered.extend(pre);
            ordered
        };
        ordered.extend(branches);
        ordered
    }

    /// Locate or fetch the package backing a chosen candidate
    fn package_for(&mut self, node: &TreeNode) -> Result<Rc<Package>> {
        let base = base_name(&node.pack).to_string();

        if let Some(path) = node.config.path() {
            let loaded = self.manager.get_or_load_package(path)?;
            if loaded.name() == node.pack {
                return Ok(loaded);
            }
            // The path led to a parent package; re-apply the sub-package
            // name against the freshly indexed tree
            if node.pack.contains(':') {
                if let Some(sub) = self.manager.get_package(&node.pack, loaded.version()) {
                    return Ok(sub);
                }
            }
            return Err(Error::UnknownPackage {
                name: node.pack.clone(),
                spec: format!("path:{}", path.display()),
            });
        }

        let version = node.config.exact_version().ok_or_else(|| Error::UnknownPackage {
            name: node.pack.clone(),
            spec: node.config.to_string(),
        })?;

        if base == self.root.base_name() {
            if node.pack == self.root.name() {
                return Ok(self.root.clone());
            }
            return self
                .manager
                .get_package(&node.pack, self.root.version())
                .ok_or_else(|| Error::UnknownPackage {
                    name: node.pack.clone(),
                    spec: self.root.version().to_string(),
                });
        }

        if let Some(pkg) = self.manager.get_package(&node.pack, &version) {
            return Ok(pkg);
        }

        // Fetch the base package; sub-packages come along with it
        let location = self
            .manager
            .install_location()
            .ok_or_else(|| Error::invalid("no package cache location configured"))?
            .to_path_buf();
        let exact = Dependency::exact(&version);
        for supplier in self.suppliers {
            match supplier.fetch(&base, &exact, self.scratch.path()) {
                Ok(src) => {
                    self.manager
                        .store_fetched_package(&src, &base, &version, &location)?;
                    return self
                        .manager
                        .get_package(&node.pack, &version)
                        .ok_or_else(|| Error::UnknownPackage {
                            name: node.pack.clone(),
                            spec: version.to_string(),
                        });
                }
                Err(e) => debug!(
                    "supplier {} cannot provide {} {}: {}",
                    supplier.description(),
                    base,
                    version,
                    e
                ),
            }
        }
        Err(Error::UnknownPackage {
            name: node.pack.clone(),
            spec: version.to_string(),
        })
    }
}

impl ResolveContext for DependencyVersionResolver<'_> {
    fn all_candidates(&mut self, pack: &str) -> Result<Vec<Dependency>> {
        if let Some(cached) = self.candidate_cache.get(pack) {
            return Ok(cached.clone());
        }
        let base = base_name(pack).to_string();

        let candidates = if base == self.root.base_name() {
            vec![Dependency::exact(self.root.version())]
        } else if !self.options.upgrade && self.selections.has_selected(&base) {
            let pin = self.selections.selected(&base).expect("checked above");
            vec![self.absolutize(pin, self.root.root())]
        } else {
            self.registry_versions(&base)
                .into_iter()
                .map(|v| Dependency::exact(&v))
                .collect()
        };
        self.candidate_cache.insert(pack.to_string(), candidates.clone());
        Ok(candidates)
    }

    fn specific_candidates(
        &mut self,
        pack: &str,
        parent: &TreeNode,
    ) -> Result<Option<Vec<Dependency>>> {
        let parent_pkg = match self.package_for(parent) {
            Ok(pkg) => pkg,
            Err(_) => return Ok(None),
        };
        let Some(dep) = parent_pkg.all_dependencies().get(pack).cloned() else {
            return Ok(None);
        };
        if dep.path().is_none() {
            return Ok(None);
        }
        let abs = self.absolutize(&dep, parent_pkg.root());
        let path = abs.path().expect("path spec").clone();
        match self.manager.get_or_load_package(&path) {
            Ok(_) => Ok(Some(vec![abs])),
            Err(e) => {
                warn!(
                    "path dependency '{}' of '{}' does not load: {}",
                    pack, parent.pack, e
                );
                Ok(Some(vec![]))
            }
        }
    }

    fn children(&mut self, node: &TreeNode) -> Result<Vec<ChildDependency>> {
        let pkg = self.package_for(node)?;
        let root_dir = pkg.root().to_path_buf();
        Ok(pkg
            .all_dependencies()
            .iter()
            .map(|(name, dep)| ChildDependency {
                pack: name.clone(),
                dep: self.absolutize(dep, &root_dir),
            })
            .collect())
    }

    fn matches(&self, pack: &str, candidate: &Dependency, constraint: &Dependency) -> bool {
        let base = base_name(pack);
        if self.is_authoritative(base) {
            if !default_matches(candidate, constraint) {
                warn!(
                    "selected version {} of '{}' does not match the constraint {}",
                    candidate, pack, constraint
                );
            }
            return true;
        }
        default_matches(candidate, constraint)
    }

    fn is_selected(&self, pack: &str) -> bool {
        self.selections.has_selected(base_name(pack))
    }

    fn had_selections(&self) -> bool {
        self.selections_existed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supplier::FileSystemSupplier;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_recipe(dir: &Path, body: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("dub.json"), body).unwrap();
    }

    fn registry_entry(dir: &Path, name: &str, version: &str, deps: &str) {
        let root = dir.join(format!("{}-{}", name, version));
        write_recipe(
            &root,
            &format!(
                r#"{{"name": "{}", "version": "{}", "dependencies": {}}}"#,
                name, version, deps
            ),
        );
    }

    struct Fixture {
        _tmp: TempDir,
        manager: PackageManager,
        suppliers: Vec<Box<dyn PackageSupplier>>,
        root: Rc<Package>,
    }

    fn fixture(root_recipe: &str, registry: &[(&str, &str, &str)]) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let registry_dir = tmp.path().join("registry");
        std::fs::create_dir_all(&registry_dir).unwrap();
        for (name, version, deps) in registry {
            registry_entry(&registry_dir, name, version, deps);
        }
        let cache = tmp.path().join("cache");
        std::fs::create_dir_all(&cache).unwrap();

        let root_dir = tmp.path().join("project");
        write_recipe(&root_dir, root_recipe);

        let mut manager = PackageManager::with_locations(vec![], vec![cache]);
        let root = manager.get_or_load_package(&root_dir).unwrap();
        let suppliers: Vec<Box<dyn PackageSupplier>> =
            vec![Box::new(FileSystemSupplier::new(registry_dir))];
        Fixture {
            _tmp: tmp,
            manager,
            suppliers,
            root,
        }
    }

    fn version_of(result: &BTreeMap<String, Dependency>, name: &str) -> String {
        result
            .get(name)
            .and_then(|d| d.exact_version())
            .map(|v| v.to_string())
            .unwrap_or_else(|| panic!("no version resolved for {}", name))
    }

    #[test]
    fn test_resolves_highest_matching_version() {
        let mut fx = fixture(
            r#"{"name": "app", "version": "0.0.1",
                "dependencies": {"dep": "^1.0.0"}}"#,
            &[
                ("dep", "1.0.0", "{}"),
                ("dep", "1.2.0", "{}"),
                ("dep", "2.0.0", "{}"),
            ],
        );
        let result = resolve_versions(
            &mut fx.manager,
            &fx.suppliers,
            &SelectedVersions::new(),
            false,
            fx.root.clone(),
            UpgradeOptions::default(),
        )
        .unwrap();
        assert_eq!(version_of(&result, "dep"), "1.2.0");
    }

    #[test]
    fn test_transitive_dependencies_are_fetched_and_resolved() {
        let mut fx = fixture(
            r#"{"name": "app", "version": "0.0.1",
                "dependencies": {"direct": "^1.0.0"}}"#,
            &[
                ("direct", "1.0.0", r#"{"transitive": "^2.0.0"}"#),
                ("transitive", "2.3.0", "{}"),
            ],
        );
        let result = resolve_versions(
            &mut fx.manager,
            &fx.suppliers,
            &SelectedVersions::new(),
            false,
            fx.root.clone(),
            UpgradeOptions::default(),
        )
        .unwrap();
        assert_eq!(version_of(&result, "direct"), "1.0.0");
        assert_eq!(version_of(&result, "transitive"), "2.3.0");
        // The transient fetch warmed the cache
        assert!(
            fx.manager
                .get_package("direct", &Version::parse("1.0.0").unwrap())
                .is_some()
        );
    }

    #[test]
    fn test_selections_pin_unless_upgrading() {
        let mut fx = fixture(
            r#"{"name": "app", "version": "0.0.1",
                "dependencies": {"dep": "^1.0.0"}}"#,
            &[("dep", "1.0.0", "{}"), ("dep", "1.2.0", "{}")],
        );
        let mut selections = SelectedVersions::new();
        selections.select("dep", Dependency::parse("1.0.0").unwrap());

        let pinned = resolve_versions(
            &mut fx.manager,
            &fx.suppliers,
            &selections,
            true,
            fx.root.clone(),
            UpgradeOptions::default(),
        )
        .unwrap();
        assert_eq!(version_of(&pinned, "dep"), "1.0.0");

        let upgraded = resolve_versions(
            &mut fx.manager,
            &fx.suppliers,
            &selections,
            true,
            fx.root.clone(),
            UpgradeOptions {
                upgrade: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(version_of(&upgraded, "dep"), "1.2.0");
    }

    #[test]
    fn test_pre_releases_lose_unless_allowed() {
        let mut fx = fixture(
            r#"{"name": "app", "version": "0.0.1",
                "dependencies": {"dep": ">=1.0.0 <3.0.0"}}"#,
            &[("dep", "1.5.0", "{}"), ("dep", "2.0.0-rc.1", "{}")],
        );
        let result = resolve_versions(
            &mut fx.manager,
            &fx.suppliers,
            &SelectedVersions::new(),
            false,
            fx.root.clone(),
            UpgradeOptions::default(),
        )
        .unwrap();
        assert_eq!(version_of(&result, "dep"), "1.5.0");

        let result = resolve_versions(
            &mut fx.manager,
            &fx.suppliers,
            &SelectedVersions::new(),
            false,
            fx.root.clone(),
            UpgradeOptions {
                pre_release: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(version_of(&result, "dep"), "2.0.0-rc.1");
    }

    #[test]
    fn test_path_dependency_yields_single_candidate() {
        let tmp = TempDir::new().unwrap();
        let cache = tmp.path().join("cache");
        std::fs::create_dir_all(&cache).unwrap();

        write_recipe(
            &tmp.path().join("local-dep"),
            r#"{"name": "local-dep", "version": "0.1.0"}"#,
        );
        let root_dir = tmp.path().join("project");
        write_recipe(
            &root_dir,
            r#"{"name": "app", "version": "0.0.1",
                "dependencies": {"local-dep": {"path": "../local-dep"}}}"#,
        );

        let mut manager = PackageManager::with_locations(vec![], vec![cache]);
        let root = manager.get_or_load_package(&root_dir).unwrap();
        let suppliers: Vec<Box<dyn PackageSupplier>> = vec![];
        let result = resolve_versions(
            &mut manager,
            &suppliers,
            &SelectedVersions::new(),
            false,
            root,
            UpgradeOptions::default(),
        )
        .unwrap();
        assert!(result["local-dep"].path().is_some());
    }

    #[test]
    fn test_conflicting_ranges_fail() {
        let mut fx = fixture(
            r#"{"name": "app", "version": "0.0.1",
                "dependencies": {"a": "^1.0.0", "b": "^1.0.0"}}"#,
            &[
                ("a", "1.0.0", r#"{"shared": "^1.0.0"}"#),
                ("b", "1.0.0", r#"{"shared": "^2.0.0"}"#),
                ("shared", "1.0.0", "{}"),
                ("shared", "2.0.0", "{}"),
            ],
        );
        let result = resolve_versions(
            &mut fx.manager,
            &fx.suppliers,
            &SelectedVersions::new(),
            false,
            fx.root.clone(),
            UpgradeOptions::default(),
        );
        assert!(matches!(result, Err(Error::UnresolvableConflict { .. })));
    }

    #[test]
    fn test_resolver_reports_cycles() {
        let mut fx = fixture(
            r#"{"name": "p", "version": "1.0.0",
                "dependencies": {"q": "^1.0.0"}}"#,
            &[("q", "1.0.0", r#"{"p": "*"}"#)],
        );
        let result = resolve_versions(
            &mut fx.manager,
            &fx.suppliers,
            &SelectedVersions::new(),
            false,
            fx.root.clone(),
            UpgradeOptions::default(),
        );
        match result {
            Err(Error::DependencyCycle(cycle)) => {
                assert!(cycle.contains(&"p".to_string()));
                assert!(cycle.contains(&"q".to_string()));
            }
            other => panic!("expected DependencyCycle, got {:?}", other),
        }
    }

    #[test]
    fn test_sub_package_resolves_through_base() {
        let mut fx = fixture(
            r#"{"name": "app", "version": "0.0.1",
                "dependencies": {"combo:part": "^1.0.0"}}"#,
            &[],
        );
        // Registry entry with an inline sub-package
        let registry_dir = fx._tmp.path().join("registry");
        write_recipe(
            &registry_dir.join("combo-1.1.0"),
            r#"{"name": "combo", "version": "1.1.0",
                "subPackages": [{"name": "part"}]}"#,
        );
        let result = resolve_versions(
            &mut fx.manager,
            &fx.suppliers,
            &SelectedVersions::new(),
            false,
            fx.root.clone(),
            UpgradeOptions::default(),
        )
        .unwrap();
        assert_eq!(version_of(&result, "combo"), "1.1.0");
    }
}
