// src/package.rs

//! A loaded package: a recipe rooted at a directory
//!
//! Loading reads and decodes the recipe, fills in conventional defaults
//! (source folders, string imports), detects an application main file and
//! synthesizes default configurations when the recipe declares none. After
//! construction a package is immutable.

use crate::dependency::Dependency;
use crate::error::{Error, Result};
use crate::platform::BuildPlatform;
use crate::recipe::{self, ConfigurationInfo, PackageRecipe};
use crate::settings::{BuildOption, BuildSettings, BuildSettingsTemplate, TargetType};
use crate::version::Version;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Candidate file names for an application entry point
const MAIN_FILE_NAMES: &[&str] = &["app.d", "main.d"];

/// A recipe bound to a directory, with derived defaults applied
#[derive(Debug, Clone)]
pub struct Package {
    recipe: PackageRecipe,
    root: PathBuf,
    recipe_path: PathBuf,
    /// Qualified name of the parent package, for sub-packages
    parent_name: Option<String>,
    version: Version,
}

impl Package {
    /// Load a package from a directory
    ///
    /// When `recipe_path` is not given, the recipe file is discovered by
    /// trying `dub.json`, `dub.sdl` and the legacy `package.json` in that
    /// order. A missing version is inferred from source control when the
    /// package has no parent, falling back to `~master`.
    pub fn load(
        root: &Path,
        recipe_path: Option<&Path>,
        parent: Option<&Package>,
        version_override: Option<Version>,
    ) -> Result<Package> {
        let recipe_path = match recipe_path {
            Some(p) => p.to_path_buf(),
            None => find_recipe_file(root)?,
        };
        let text = std::fs::read_to_string(&recipe_path)?;
        let filename = recipe_path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or(recipe::DEFAULT_RECIPE_FILE);
        let recipe = recipe::parse_recipe(filename, &text, parent.map(|p| p.name()))?;
        Self::from_recipe(recipe, root, &recipe_path, parent, version_override)
    }

    /// Construct from an already decoded recipe (inline sub-packages,
    /// supplier-provided descriptions)
    pub fn from_recipe(
        mut recipe: PackageRecipe,
        root: &Path,
        recipe_path: &Path,
        parent: Option<&Package>,
        version_override: Option<Version>,
    ) -> Result<Package> {
        let version = match version_override {
            Some(v) => v,
            None => match &recipe.version {
                Some(s) => Version::parse(s)?,
                None => match parent {
                    Some(p) => p.version().clone(),
                    None => match crate::scm::determine_version_with_git(root) {
                        Ok(v) => v,
                        Err(e) => {
                            debug!(
                                "no version in recipe at {} and none from SCM ({}); assuming ~master",
                                root.display(),
                                e
                            );
                            Version::master()
                        }
                    },
                },
            },
        };

        apply_folder_defaults(&mut recipe, root);
        let main_file = detect_main_file(&recipe, root);
        if recipe.configurations.is_empty() {
            synthesize_configurations(&mut recipe, main_file.as_deref());
        }

        if let Some(parent) = parent {
            if recipe.license.is_some() && recipe.license != parent.recipe.license {
                warn!(
                    "sub-package '{}' declares license {:?} which differs from its parent's {:?}",
                    recipe.name, recipe.license, parent.recipe.license
                );
            }
        }
        if recipe.license.is_none() {
            warn!("package '{}' does not declare a license", recipe.name);
        }

        Ok(Package {
            recipe,
            root: root.to_path_buf(),
            recipe_path: recipe_path.to_path_buf(),
            parent_name: parent.map(|p| p.name().to_string()),
            version,
        })
    }

    /// The qualified package name (`parent:sub` for sub-packages)
    pub fn name(&self) -> &str {
        &self.recipe.name
    }

    /// The base package name, without sub-package qualifiers
    pub fn base_name(&self) -> &str {
        self.recipe.base_name()
    }

    pub fn is_sub_package(&self) -> bool {
        self.recipe.name.contains(':')
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn recipe(&self) -> &PackageRecipe {
        &self.recipe
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn recipe_path(&self) -> &Path {
        &self.recipe_path
    }

    pub fn parent_name(&self) -> Option<&str> {
        self.parent_name.as_deref()
    }

    /// Configuration names in declaration order
    pub fn configurations(&self) -> Vec<&str> {
        self.recipe
            .configurations
            .iter()
            .map(|c| c.name.as_str())
            .collect()
    }

    /// The effective target type of a configuration
    ///
    /// An unset configuration target type inherits the recipe's top-level
    /// target type; if that is also unset, the configuration is a library.
    pub fn configuration_target_type(&self, config: &ConfigurationInfo) -> TargetType {
        let tt = match config.settings.target_type {
            TargetType::Autodetect => self.recipe.settings.target_type,
            tt => tt,
        };
        match tt {
            TargetType::Autodetect => TargetType::Library,
            tt => tt,
        }
    }

    /// Resolve the build settings of a named configuration for a platform
    ///
    /// The root template is folded first, then the configuration's
    /// template, so configuration entries override and extend root
    /// entries.
    pub fn build_settings(
        &self,
        platform: &BuildPlatform,
        config: &str,
    ) -> Result<BuildSettings> {
        let config = self
            .recipe
            .configuration(config)
            .ok_or_else(|| Error::UnknownConfiguration {
                package: self.recipe.name.clone(),
                config: config.to_string(),
            })?;
        let mut settings = BuildSettings::default();
        self.recipe
            .settings
            .apply_to(&mut settings, platform, &self.root);
        config.settings.apply_to(&mut settings, platform, &self.root);
        if settings.target_type == TargetType::Autodetect {
            settings.target_type = TargetType::Library;
        }
        if settings.target_name.is_empty() {
            settings.target_name = self.recipe.name.replace(':', "_");
        }
        Ok(settings)
    }

    /// The first configuration admitting the platform
    ///
    /// Executable configurations are skipped unless `allow_non_library`
    /// is set.
    pub fn default_configuration(
        &self,
        platform: &BuildPlatform,
        allow_non_library: bool,
    ) -> Option<&str> {
        self.recipe
            .configurations
            .iter()
            .find(|c| {
                c.matches_platform(platform)
                    && (allow_non_library
                        || self.configuration_target_type(c) != TargetType::Executable)
            })
            .map(|c| c.name.as_str())
    }

    /// All configurations admitting the platform, with the same
    /// executable filter as [`Package::default_configuration`]
    pub fn platform_configurations(&self, platform: &BuildPlatform, is_main: bool) -> Vec<String> {
        self.recipe
            .configurations
            .iter()
            .filter(|c| {
                c.matches_platform(platform)
                    && (is_main || self.configuration_target_type(c) != TargetType::Executable)
            })
            .map(|c| c.name.clone())
            .collect()
    }

    /// Resolve a sub-configuration override for a dependency
    ///
    /// An override declared inside the named configuration wins over one
    /// declared at the recipe root.
    pub fn sub_configuration(
        &self,
        config: &str,
        dependency: &str,
        platform: &BuildPlatform,
    ) -> Option<&str> {
        if let Some(c) = self
            .recipe
            .configurations
            .iter()
            .find(|c| c.name == config && c.matches_platform(platform))
        {
            if let Some(override_) = c.settings.sub_configurations.get(dependency) {
                return Some(override_);
            }
        }
        self.recipe
            .settings
            .sub_configurations
            .get(dependency)
            .map(String::as_str)
    }

    /// The dependency map active in a configuration: root dependencies
    /// plus the configuration's own, which override on name collision
    pub fn dependencies(&self, config: &str) -> BTreeMap<String, Dependency> {
        let mut deps = self.recipe.settings.dependencies.clone();
        if let Some(c) = self.recipe.configuration(config) {
            for (name, dep) in &c.settings.dependencies {
                deps.insert(name.clone(), dep.clone());
            }
        }
        deps
    }

    pub fn has_dependency(&self, name: &str, config: &str) -> bool {
        self.dependencies(config).contains_key(name)
    }

    /// Every dependency reachable through any configuration, merged by
    /// name; used by the resolver to discover transitive constraints
    pub fn all_dependencies(&self) -> BTreeMap<String, Dependency> {
        let mut deps = self.recipe.settings.dependencies.clone();
        for config in &self.recipe.configurations {
            for (name, dep) in &config.settings.dependencies {
                deps.entry(name.clone())
                    .and_modify(|existing| {
                        let merged = existing.merge(dep);
                        if merged.is_valid() {
                            *existing = merged;
                        }
                    })
                    .or_insert_with(|| dep.clone());
            }
        }
        deps
    }

    /// Mix a named build type into already resolved settings
    ///
    /// Build types declared in the recipe override the built-in presets.
    /// The special name `$DFLAGS` appends the contents of the `DFLAGS`
    /// environment variable.
    pub fn add_build_type_settings(
        &self,
        settings: &mut BuildSettings,
        platform: &BuildPlatform,
        build_type: &str,
    ) -> Result<()> {
        if let Some(template) = self.recipe.build_types.get(build_type) {
            template.apply_to(settings, platform, &self.root);
            return Ok(());
        }
        match build_type {
            "plain" => {}
            "debug" => settings.add_options(BuildOption::DEBUG_MODE | BuildOption::DEBUG_INFO),
            "release" => settings.add_options(
                BuildOption::RELEASE_MODE | BuildOption::OPTIMIZE | BuildOption::INLINE,
            ),
            "release-debug" => settings.add_options(
                BuildOption::RELEASE_MODE
                    | BuildOption::OPTIMIZE
                    | BuildOption::INLINE
                    | BuildOption::DEBUG_INFO,
            ),
            "release-nobounds" => settings.add_options(
                BuildOption::RELEASE_MODE
                    | BuildOption::OPTIMIZE
                    | BuildOption::INLINE
                    | BuildOption::NO_BOUNDS_CHECK,
            ),
            "unittest" => settings.add_options(
                BuildOption::UNITTESTS | BuildOption::DEBUG_MODE | BuildOption::DEBUG_INFO,
            ),
            "docs" => {
                settings.add_options(BuildOption::SYNTAX_ONLY);
                settings.add_dflags(["-Dddocs".to_string()]);
            }
            "ddox" => {
                settings.add_options(BuildOption::SYNTAX_ONLY);
                settings.add_dflags(["-Xfdocs.json".to_string(), "-Df__dummy.html".to_string()]);
            }
            "profile" => settings.add_options(
                BuildOption::PROFILE
                    | BuildOption::OPTIMIZE
                    | BuildOption::INLINE
                    | BuildOption::DEBUG_INFO,
            ),
            "profile-gc" => {
                settings.add_options(BuildOption::PROFILE_GC | BuildOption::DEBUG_INFO)
            }
            "cov" => settings.add_options(BuildOption::COVERAGE | BuildOption::DEBUG_INFO),
            "unittest-cov" => settings.add_options(
                BuildOption::UNITTESTS
                    | BuildOption::COVERAGE
                    | BuildOption::DEBUG_MODE
                    | BuildOption::DEBUG_INFO,
            ),
            "$DFLAGS" => {
                let dflags = std::env::var("DFLAGS").unwrap_or_default();
                settings.add_dflags(dflags.split_whitespace().map(str::to_string));
            }
            other => return Err(Error::UnknownBuildType(other.to_string())),
        }
        Ok(())
    }
}

/// Discover the recipe file in a package root
pub fn find_recipe_file(root: &Path) -> Result<PathBuf> {
    for name in recipe::RECIPE_FILES {
        let candidate = root.join(name);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(Error::RecipeNotFound(root.to_path_buf()))
}

/// Fill conventional folders into an undeclared template
fn apply_folder_defaults(recipe: &mut PackageRecipe, root: &Path) {
    if recipe.settings.string_import_paths.is_empty() && root.join("views").is_dir() {
        recipe
            .settings
            .string_import_paths
            .entry_mut("")
            .push("views".to_string());
    }
    if recipe.settings.source_paths.is_empty() {
        for folder in ["source", "src"] {
            if root.join(folder).is_dir() {
                recipe
                    .settings
                    .source_paths
                    .entry_mut("")
                    .push(folder.to_string());
                recipe
                    .settings
                    .import_paths
                    .entry_mut("")
                    .push(folder.to_string());
                break;
            }
        }
    }
}

/// Look for an application entry point in the declared source paths
///
/// Returns the path relative to the package root.
fn detect_main_file(recipe: &PackageRecipe, root: &Path) -> Option<String> {
    if recipe.settings.main_source_file.is_some() {
        return recipe.settings.main_source_file.clone();
    }
    let base = recipe.base_name();
    for (_, paths) in recipe.settings.source_paths.iter() {
        for source_path in paths {
            let mut candidates: Vec<String> =
                MAIN_FILE_NAMES.iter().map(|n| n.to_string()).collect();
            candidates.push(format!("{}/main.d", base));
            candidates.push(format!("{}/app.d", base));
            for candidate in candidates {
                let rel = format!("{}/{}", source_path, candidate);
                if root.join(&rel).is_file() {
                    return Some(rel);
                }
            }
        }
    }
    None
}

/// Create the default configuration set for a recipe that declares none
fn synthesize_configurations(recipe: &mut PackageRecipe, main_file: Option<&str>) {
    match recipe.settings.target_type {
        TargetType::Executable => {
            let mut settings = BuildSettingsTemplate::default();
            settings.target_type = TargetType::Executable;
            if recipe.settings.main_source_file.is_none() {
                settings.main_source_file = main_file.map(str::to_string);
            }
            recipe
                .configurations
                .push(ConfigurationInfo::new("application", settings));
        }
        TargetType::Autodetect => {
            if let Some(main) = main_file {
                let mut app = BuildSettingsTemplate::default();
                app.target_type = TargetType::Executable;
                if recipe.settings.main_source_file.is_none() {
                    app.main_source_file = Some(main.to_string());
                }
                recipe
                    .configurations
                    .push(ConfigurationInfo::new("application", app));

                let mut lib = BuildSettingsTemplate::default();
                lib.target_type = TargetType::Library;
                lib.excluded_source_files
                    .entry_mut("")
                    .push(main.to_string());
                recipe
                    .configurations
                    .push(ConfigurationInfo::new("library", lib));
            } else {
                let mut lib = BuildSettingsTemplate::default();
                lib.target_type = TargetType::Library;
                recipe
                    .configurations
                    .push(ConfigurationInfo::new("library", lib));
            }
        }
        other => {
            let mut settings = BuildSettingsTemplate::default();
            settings.target_type = other;
            recipe
                .configurations
                .push(ConfigurationInfo::new("library", settings));
        }
    }
}
