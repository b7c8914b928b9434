// src/settings.rs

//! Build settings and their pre-platform-filter templates
//!
//! Recipes carry [`BuildSettingsTemplate`]s, where every list-valued field
//! is an ordered sequence of `(platform filter, values)` pairs. Resolving a
//! template against a concrete [`BuildPlatform`] folds the matching entries
//! in declaration order into a flat [`BuildSettings`] that the compiler
//! driver consumes.

use crate::dependency::Dependency;
use crate::platform::BuildPlatform;
use bitflags::bitflags;
use std::collections::BTreeMap;
use std::path::Path;
use strum_macros::{Display, EnumString};
use walkdir::WalkDir;

/// The kind of artifact a package or configuration produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "camelCase")]
pub enum TargetType {
    /// Decide based on the presence of an application main file
    #[default]
    Autodetect,
    /// No artifact; the package only contributes settings
    None,
    Executable,
    Library,
    SourceLibrary,
    StaticLibrary,
    DynamicLibrary,
}

impl TargetType {
    /// Whether a root package of this type can be built into an artifact
    pub fn is_buildable(self) -> bool {
        !matches!(self, TargetType::None | TargetType::SourceLibrary)
    }
}

bitflags! {
    /// Requirements a package imposes on how it must be compiled
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BuildRequirement: u32 {
        const ALLOW_WARNINGS        = 1 << 0;
        const SILENCE_WARNINGS      = 1 << 1;
        const DISALLOW_DEPRECATIONS = 1 << 2;
        const SILENCE_DEPRECATIONS  = 1 << 3;
        const DISALLOW_INLINING     = 1 << 4;
        const DISALLOW_OPTIMIZATION = 1 << 5;
        const REQUIRE_BOUNDS_CHECK  = 1 << 6;
        const REQUIRE_CONTRACTS     = 1 << 7;
        const RELAX_PROPERTIES      = 1 << 8;
        const NO_DEFAULT_FLAGS      = 1 << 9;
    }
}

bitflags! {
    /// Abstract compiler options mixed in by build types and recipes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BuildOption: u32 {
        const DEBUG_MODE         = 1 << 0;
        const RELEASE_MODE       = 1 << 1;
        const COVERAGE           = 1 << 2;
        const DEBUG_INFO         = 1 << 3;
        const DEBUG_INFO_C       = 1 << 4;
        const ALWAYS_STACK_FRAME = 1 << 5;
        const STACK_STOMPING     = 1 << 6;
        const INLINE             = 1 << 7;
        const NO_BOUNDS_CHECK    = 1 << 8;
        const OPTIMIZE           = 1 << 9;
        const PROFILE            = 1 << 10;
        const UNITTESTS          = 1 << 11;
        const VERBOSE            = 1 << 12;
        const SYNTAX_ONLY        = 1 << 13;
        const WARNINGS           = 1 << 14;
        const WARNINGS_AS_ERRORS = 1 << 15;
        const IGNORE_DEPRECATIONS     = 1 << 16;
        const DEPRECATION_WARNINGS    = 1 << 17;
        const DEPRECATION_ERRORS      = 1 << 18;
        const PROPERTY           = 1 << 19;
        const PROFILE_GC         = 1 << 20;
    }
}

impl BuildRequirement {
    /// Look up a single requirement by its recipe surface name
    pub fn from_recipe_name(name: &str) -> Option<Self> {
        Some(match name {
            "allowWarnings" => Self::ALLOW_WARNINGS,
            "silenceWarnings" => Self::SILENCE_WARNINGS,
            "disallowDeprecations" => Self::DISALLOW_DEPRECATIONS,
            "silenceDeprecations" => Self::SILENCE_DEPRECATIONS,
            "disallowInlining" => Self::DISALLOW_INLINING,
            "disallowOptimization" => Self::DISALLOW_OPTIMIZATION,
            "requireBoundsCheck" => Self::REQUIRE_BOUNDS_CHECK,
            "requireContracts" => Self::REQUIRE_CONTRACTS,
            "relaxProperties" => Self::RELAX_PROPERTIES,
            "noDefaultFlags" => Self::NO_DEFAULT_FLAGS,
            _ => return None,
        })
    }

    /// Render the set as recipe surface names
    pub fn names(self) -> Vec<&'static str> {
        const TABLE: &[(BuildRequirement, &str)] = &[
            (BuildRequirement::ALLOW_WARNINGS, "allowWarnings"),
            (BuildRequirement::SILENCE_WARNINGS, "silenceWarnings"),
            (BuildRequirement::DISALLOW_DEPRECATIONS, "disallowDeprecations"),
            (BuildRequirement::SILENCE_DEPRECATIONS, "silenceDeprecations"),
            (BuildRequirement::DISALLOW_INLINING, "disallowInlining"),
            (BuildRequirement::DISALLOW_OPTIMIZATION, "disallowOptimization"),
            (BuildRequirement::REQUIRE_BOUNDS_CHECK, "requireBoundsCheck"),
            (BuildRequirement::REQUIRE_CONTRACTS, "requireContracts"),
            (BuildRequirement::RELAX_PROPERTIES, "relaxProperties"),
            (BuildRequirement::NO_DEFAULT_FLAGS, "noDefaultFlags"),
        ];
        TABLE
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BuildOption {
    /// Look up a single option by its recipe surface name
    pub fn from_recipe_name(name: &str) -> Option<Self> {
        Some(match name {
            "debugMode" => Self::DEBUG_MODE,
            "releaseMode" => Self::RELEASE_MODE,
            "coverage" => Self::COVERAGE,
            "debugInfo" => Self::DEBUG_INFO,
            "debugInfoC" => Self::DEBUG_INFO_C,
            "alwaysStackFrame" => Self::ALWAYS_STACK_FRAME,
            "stackStomping" => Self::STACK_STOMPING,
            "inline" => Self::INLINE,
            "noBoundsCheck" => Self::NO_BOUNDS_CHECK,
            "optimize" => Self::OPTIMIZE,
            "profile" => Self::PROFILE,
            "unittests" => Self::UNITTESTS,
            "verbose" => Self::VERBOSE,
            "syntaxOnly" => Self::SYNTAX_ONLY,
            "warnings" => Self::WARNINGS,
            "warningsAsErrors" => Self::WARNINGS_AS_ERRORS,
            "ignoreDeprecations" => Self::IGNORE_DEPRECATIONS,
            "deprecationWarnings" => Self::DEPRECATION_WARNINGS,
            "deprecationErrors" => Self::DEPRECATION_ERRORS,
            "property" => Self::PROPERTY,
            "profileGC" => Self::PROFILE_GC,
            _ => return None,
        })
    }

    /// Render the set as recipe surface names
    pub fn names(self) -> Vec<&'static str> {
        const TABLE: &[(BuildOption, &str)] = &[
            (BuildOption::DEBUG_MODE, "debugMode"),
            (BuildOption::RELEASE_MODE, "releaseMode"),
            (BuildOption::COVERAGE, "coverage"),
            (BuildOption::DEBUG_INFO, "debugInfo"),
            (BuildOption::DEBUG_INFO_C, "debugInfoC"),
            (BuildOption::ALWAYS_STACK_FRAME, "alwaysStackFrame"),
            (BuildOption::STACK_STOMPING, "stackStomping"),
            (BuildOption::INLINE, "inline"),
            (BuildOption::NO_BOUNDS_CHECK, "noBoundsCheck"),
            (BuildOption::OPTIMIZE, "optimize"),
            (BuildOption::PROFILE, "profile"),
            (BuildOption::UNITTESTS, "unittests"),
            (BuildOption::VERBOSE, "verbose"),
            (BuildOption::SYNTAX_ONLY, "syntaxOnly"),
            (BuildOption::WARNINGS, "warnings"),
            (BuildOption::WARNINGS_AS_ERRORS, "warningsAsErrors"),
            (BuildOption::IGNORE_DEPRECATIONS, "ignoreDeprecations"),
            (BuildOption::DEPRECATION_WARNINGS, "deprecationWarnings"),
            (BuildOption::DEPRECATION_ERRORS, "deprecationErrors"),
            (BuildOption::PROPERTY, "property"),
            (BuildOption::PROFILE_GC, "profileGC"),
        ];
        TABLE
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

/// An ordered list of `(platform filter, value)` pairs
///
/// The empty filter applies unconditionally. Resolution is a stable fold:
/// entries are visited in declaration order and every matching entry
/// contributes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlatformTagged<T> {
    entries: Vec<(String, T)>,
}

impl<T> PlatformTagged<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, filter: impl Into<String>, value: T) {
        self.entries.push((filter.into(), value));
    }

    /// The value for a filter, inserting a default entry if absent
    pub fn entry_mut(&mut self, filter: &str) -> &mut T
    where
        T: Default,
    {
        if let Some(pos) = self.entries.iter().position(|(f, _)| f == filter) {
            return &mut self.entries[pos].1;
        }
        self.entries.push((filter.to_string(), T::default()));
        &mut self.entries.last_mut().unwrap().1
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(f, v)| (f.as_str(), v))
    }

    /// All values whose filter admits the platform, in declaration order
    pub fn matching<'a>(&'a self, platform: &'a BuildPlatform) -> impl Iterator<Item = &'a T> {
        self.entries
            .iter()
            .filter(move |(f, _)| platform.matches_specification(f))
            .map(|(_, v)| v)
    }
}

/// Fully resolved, platform-specific build settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildSettings {
    pub target_type: TargetType,
    pub target_path: String,
    pub target_name: String,
    pub working_directory: String,
    pub main_source_file: String,
    pub dflags: Vec<String>,
    pub lflags: Vec<String>,
    pub libs: Vec<String>,
    pub source_files: Vec<String>,
    pub import_paths: Vec<String>,
    pub string_import_paths: Vec<String>,
    pub string_import_files: Vec<String>,
    pub versions: Vec<String>,
    pub debug_versions: Vec<String>,
    pub pre_generate_commands: Vec<String>,
    pub post_generate_commands: Vec<String>,
    pub pre_build_commands: Vec<String>,
    pub post_build_commands: Vec<String>,
    pub build_requirements: BuildRequirement,
    pub build_options: BuildOption,
}

fn add_unique(dst: &mut Vec<String>, items: impl IntoIterator<Item = String>) {
    for item in items {
        if !dst.contains(&item) {
            dst.push(item);
        }
    }
}

impl BuildSettings {
    pub fn add_dflags(&mut self, flags: impl IntoIterator<Item = String>) {
        self.dflags.extend(flags);
    }

    pub fn add_lflags(&mut self, flags: impl IntoIterator<Item = String>) {
        self.lflags.extend(flags);
    }

    pub fn add_libs(&mut self, libs: impl IntoIterator<Item = String>) {
        add_unique(&mut self.libs, libs);
    }

    pub fn add_source_files(&mut self, files: impl IntoIterator<Item = String>) {
        add_unique(&mut self.source_files, files);
    }

    pub fn add_import_paths(&mut self, paths: impl IntoIterator<Item = String>) {
        add_unique(&mut self.import_paths, paths);
    }

    pub fn add_string_import_paths(&mut self, paths: impl IntoIterator<Item = String>) {
        add_unique(&mut self.string_import_paths, paths);
    }

    pub fn add_string_import_files(&mut self, files: impl IntoIterator<Item = String>) {
        add_unique(&mut self.string_import_files, files);
    }

    pub fn add_versions(&mut self, versions: impl IntoIterator<Item = String>) {
        add_unique(&mut self.versions, versions);
    }

    pub fn add_debug_versions(&mut self, versions: impl IntoIterator<Item = String>) {
        add_unique(&mut self.debug_versions, versions);
    }

    pub fn add_options(&mut self, options: BuildOption) {
        self.build_options |= options;
    }

    pub fn remove_options(&mut self, options: BuildOption) {
        self.build_options &= !options;
    }

    pub fn add_requirements(&mut self, requirements: BuildRequirement) {
        self.build_requirements |= requirements;
    }
}

/// The pre-platform-filter form of build settings, as written in a recipe
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildSettingsTemplate {
    pub target_type: TargetType,
    pub target_path: Option<String>,
    pub target_name: Option<String>,
    pub working_directory: Option<String>,
    pub main_source_file: Option<String>,
    pub dependencies: BTreeMap<String, Dependency>,
    pub sub_configurations: BTreeMap<String, String>,
    pub dflags: PlatformTagged<Vec<String>>,
    pub lflags: PlatformTagged<Vec<String>>,
    pub libs: PlatformTagged<Vec<String>>,
    pub source_files: PlatformTagged<Vec<String>>,
    pub source_paths: PlatformTagged<Vec<String>>,
    pub excluded_source_files: PlatformTagged<Vec<String>>,
    pub import_paths: PlatformTagged<Vec<String>>,
    pub string_import_paths: PlatformTagged<Vec<String>>,
    pub string_import_files: PlatformTagged<Vec<String>>,
    pub versions: PlatformTagged<Vec<String>>,
    pub debug_versions: PlatformTagged<Vec<String>>,
    pub pre_generate_commands: PlatformTagged<Vec<String>>,
    pub post_generate_commands: PlatformTagged<Vec<String>>,
    pub pre_build_commands: PlatformTagged<Vec<String>>,
    pub post_build_commands: PlatformTagged<Vec<String>>,
    pub build_requirements: PlatformTagged<BuildRequirement>,
    pub build_options: PlatformTagged<BuildOption>,
}

impl BuildSettingsTemplate {
    /// Fold this template into `settings` for the given platform
    ///
    /// Source paths are scanned for D source files relative to
    /// `base_path`; files matching an excluded-source-files pattern are
    /// dropped from both the scan results and explicitly listed files.
    pub fn apply_to(
        &self,
        settings: &mut BuildSettings,
        platform: &BuildPlatform,
        base_path: &Path,
    ) {
        if self.target_type != TargetType::Autodetect {
            settings.target_type = self.target_type;
        }
        if let Some(v) = &self.target_path {
            settings.target_path = v.clone();
        }
        if let Some(v) = &self.target_name {
            settings.target_name = v.clone();
        }
        if let Some(v) = &self.working_directory {
            settings.working_directory = v.clone();
        }
        if let Some(v) = &self.main_source_file {
            settings.main_source_file = join_path(base_path, v);
        }

        let excluded: Vec<glob::Pattern> = self
            .excluded_source_files
            .matching(platform)
            .flatten()
            .filter_map(|pat| glob::Pattern::new(pat).ok())
            .collect();
        let is_excluded = |rel: &str| excluded.iter().any(|p| p.matches(rel));

        for values in self.source_files.matching(platform) {
            settings.add_source_files(
                values
                    .iter()
                    .filter(|f| !is_excluded(f.as_str()))
                    .map(|f| join_path(base_path, f)),
            );
        }
        for values in self.source_paths.matching(platform) {
            for dir in values {
                settings.add_source_files(
                    scan_source_files(base_path, dir)
                        .into_iter()
                        .filter(|rel| !is_excluded(rel))
                        .map(|rel| join_path(base_path, &rel)),
                );
            }
        }

        for values in self.import_paths.matching(platform) {
            settings.add_import_paths(values.iter().map(|p| join_path(base_path, p)));
        }
        for values in self.string_import_paths.matching(platform) {
            settings.add_string_import_paths(values.iter().map(|p| join_path(base_path, p)));
        }
        for values in self.string_import_files.matching(platform) {
            settings.add_string_import_files(values.iter().map(|p| join_path(base_path, p)));
        }
        for values in self.dflags.matching(platform) {
            settings.add_dflags(values.iter().cloned());
        }
        for values in self.lflags.matching(platform) {
            settings.add_lflags(values.iter().cloned());
        }
        for values in self.libs.matching(platform) {
            settings.add_libs(values.iter().cloned());
        }
        for values in self.versions.matching(platform) {
            settings.add_versions(values.iter().cloned());
        }
        for values in self.debug_versions.matching(platform) {
            settings.add_debug_versions(values.iter().cloned());
        }
        for values in self.pre_generate_commands.matching(platform) {
            settings.pre_generate_commands.extend(values.iter().cloned());
        }
        for values in self.post_generate_commands.matching(platform) {
            settings.post_generate_commands.extend(values.iter().cloned());
        }
        for values in self.pre_build_commands.matching(platform) {
            settings.pre_build_commands.extend(values.iter().cloned());
        }
        for values in self.post_build_commands.matching(platform) {
            settings.post_build_commands.extend(values.iter().cloned());
        }
        for requirements in self.build_requirements.matching(platform) {
            settings.add_requirements(*requirements);
        }
        for options in self.build_options.matching(platform) {
            settings.add_options(*options);
        }
    }

    /// Dependencies declared by this template, name-sorted
    pub fn dependency_names(&self) -> Vec<&str> {
        self.dependencies.keys().map(String::as_str).collect()
    }
}

fn join_path(base: &Path, rel: &str) -> String {
    let p = Path::new(rel);
    if p.is_absolute() {
        rel.to_string()
    } else {
        base.join(p).to_string_lossy().into_owned()
    }
}

/// Collect D source files below `base/dir`, as paths relative to `base`
fn scan_source_files(base: &Path, dir: &str) -> Vec<String> {
    let root = base.join(dir);
    let mut files: Vec<String> = WalkDir::new(&root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            matches!(
                e.path().extension().and_then(|x| x.to_str()),
                Some("d") | Some("di")
            )
        })
        .filter_map(|e| {
            e.path()
                .strip_prefix(base)
                .ok()
                .map(|p| p.to_string_lossy().into_owned())
        })
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linux() -> BuildPlatform {
        BuildPlatform::new(
            vec!["posix".into(), "linux".into()],
            vec!["x86_64".into()],
            "dmd",
        )
    }

    fn windows() -> BuildPlatform {
        BuildPlatform::new(vec!["windows".into()], vec!["x86_64".into()], "dmd")
    }

    #[test]
    fn test_target_type_strings() {
        assert_eq!(TargetType::SourceLibrary.to_string(), "sourceLibrary");
        assert_eq!(
            "staticLibrary".parse::<TargetType>().unwrap(),
            TargetType::StaticLibrary
        );
        assert!("bogus".parse::<TargetType>().is_err());
    }

    #[test]
    fn test_build_option_names_roundtrip() {
        let opts = BuildOption::DEBUG_MODE | BuildOption::DEBUG_INFO;
        let names = opts.names();
        assert_eq!(names, vec!["debugMode", "debugInfo"]);
        let mut back = BuildOption::default();
        for name in names {
            back |= BuildOption::from_recipe_name(name).unwrap();
        }
        assert_eq!(back, opts);
    }

    #[test]
    fn test_platform_tagged_fold_order() {
        let mut tagged = PlatformTagged::new();
        tagged.push("", vec!["-a".to_string()]);
        tagged.push("linux", vec!["-b".to_string()]);
        tagged.push("windows", vec!["-c".to_string()]);
        tagged.push("", vec!["-d".to_string()]);

        let collected: Vec<_> = tagged.matching(&linux()).flatten().cloned().collect();
        assert_eq!(collected, vec!["-a", "-b", "-d"]);

        let collected: Vec<_> = tagged.matching(&windows()).flatten().cloned().collect();
        assert_eq!(collected, vec!["-a", "-c", "-d"]);
    }

    #[test]
    fn test_apply_dflags_and_versions() {
        let mut tpl = BuildSettingsTemplate::default();
        tpl.dflags.entry_mut("").push("-g".to_string());
        tpl.dflags.entry_mut("linux").push("-fPIC".to_string());
        tpl.versions.entry_mut("").push("Have_x".to_string());

        let mut settings = BuildSettings::default();
        tpl.apply_to(&mut settings, &linux(), Path::new("/pkg"));
        assert_eq!(settings.dflags, vec!["-g", "-fPIC"]);
        assert_eq!(settings.versions, vec!["Have_x"]);

        let mut settings = BuildSettings::default();
        tpl.apply_to(&mut settings, &windows(), Path::new("/pkg"));
        assert_eq!(settings.dflags, vec!["-g"]);
    }

    #[test]
    fn test_apply_does_not_override_unset_target() {
        let tpl = BuildSettingsTemplate::default();
        let mut settings = BuildSettings::default();
        settings.target_type = TargetType::Executable;
        tpl.apply_to(&mut settings, &linux(), Path::new("/pkg"));
        assert_eq!(settings.target_type, TargetType::Executable);
    }

    #[test]
    fn test_source_path_scanning() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = tmp.path().join("source");
        std::fs::create_dir_all(src.join("sub")).unwrap();
        std::fs::write(src.join("app.d"), "void main() {}\n").unwrap();
        std::fs::write(src.join("sub").join("util.d"), "module sub.util;\n").unwrap();
        std::fs::write(src.join("notes.txt"), "ignored\n").unwrap();

        let mut tpl = BuildSettingsTemplate::default();
        tpl.source_paths.entry_mut("").push("source".to_string());

        let mut settings = BuildSettings::default();
        tpl.apply_to(&mut settings, &linux(), tmp.path());
        assert_eq!(settings.source_files.len(), 2);
        assert!(settings.source_files.iter().any(|f| f.ends_with("app.d")));
        assert!(settings.source_files.iter().any(|f| f.ends_with("util.d")));
    }

    #[test]
    fn test_excluded_source_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = tmp.path().join("source");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("app.d"), "void main() {}\n").unwrap();
        std::fs::write(src.join("lib.d"), "module lib;\n").unwrap();

        let mut tpl = BuildSettingsTemplate::default();
        tpl.source_paths.entry_mut("").push("source".to_string());
        tpl.excluded_source_files
            .entry_mut("")
            .push("source/app.d".to_string());

        let mut settings = BuildSettings::default();
        tpl.apply_to(&mut settings, &linux(), tmp.path());
        assert_eq!(settings.source_files.len(), 1);
        assert!(settings.source_files[0].ends_with("lib.d"));
    }
}
