// src/recipe/mod.rs

//! Package recipe model and its two textual encodings
//!
//! A recipe describes one package: identity metadata, a root build-settings
//! template, named configurations, build-type presets and sub-packages.
//! Recipes are written either as JSON (`dub.json`, legacy `package.json`)
//! or as SDL (`dub.sdl`); both surfaces decode into the same
//! [`PackageRecipe`] model and re-encode without loss.

pub mod json;
pub mod sdl;

use crate::error::{Error, Result};
use crate::platform::BuildPlatform;
use crate::settings::BuildSettingsTemplate;

/// Recipe file names in discovery precedence order
pub const RECIPE_FILES: &[&str] = &["dub.json", "dub.sdl", "package.json"];

/// The default recipe file name used when writing
pub const DEFAULT_RECIPE_FILE: &str = "dub.json";

/// A named variant of build settings within one recipe
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigurationInfo {
    pub name: String,
    /// Platform filter specifications; empty means all platforms
    pub platforms: Vec<String>,
    pub settings: BuildSettingsTemplate,
}

impl ConfigurationInfo {
    pub fn new(name: impl Into<String>, settings: BuildSettingsTemplate) -> Self {
        Self {
            name: name.into(),
            platforms: Vec::new(),
            settings,
        }
    }

    /// Whether this configuration is available on the given platform
    pub fn matches_platform(&self, platform: &BuildPlatform) -> bool {
        self.platforms.is_empty()
            || self
                .platforms
                .iter()
                .any(|spec| platform.matches_specification(spec))
    }
}

/// A package declared inside another package's recipe
#[derive(Debug, Clone, PartialEq)]
pub enum SubPackage {
    /// Path to the sub-package directory, relative to the parent root
    Path(String),
    /// A complete recipe nested inline
    Inline(PackageRecipe),
}

/// The parsed contents of a package description file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageRecipe {
    /// Package name; sub-package recipes carry the parent-qualified form
    /// (`parent:sub`)
    pub name: String,
    /// Version string; absent at load time when inferred from SCM
    pub version: Option<String>,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub authors: Vec<String>,
    pub copyright: Option<String>,
    pub license: Option<String>,
    /// The root build-settings template
    pub settings: BuildSettingsTemplate,
    /// Named configurations in declaration order
    pub configurations: Vec<ConfigurationInfo>,
    /// Build-type presets declared by the recipe; override built-ins
    pub build_types: std::collections::BTreeMap<String, BuildSettingsTemplate>,
    pub sub_packages: Vec<SubPackage>,
}

impl PackageRecipe {
    pub fn configuration(&self, name: &str) -> Option<&ConfigurationInfo> {
        self.configurations.iter().find(|c| c.name == name)
    }

    /// The base package name: the first segment, without sub-package
    /// qualifiers
    pub fn base_name(&self) -> &str {
        self.name.split(':').next().unwrap_or(&self.name)
    }

    /// Enforce the model invariants that the surface syntax cannot
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::invalid("recipe has no 'name' field"));
        }
        validate_name(&self.name)?;
        let mut seen = std::collections::BTreeSet::new();
        for config in &self.configurations {
            if config.name.is_empty() {
                return Err(Error::invalid(format!(
                    "package '{}' contains an unnamed configuration",
                    self.name
                )));
            }
            if !seen.insert(config.name.as_str()) {
                return Err(Error::invalid(format!(
                    "package '{}' declares configuration '{}' more than once",
                    self.name, config.name
                )));
            }
        }
        for sub in &self.sub_packages {
            if let SubPackage::Inline(recipe) = sub {
                if !recipe.sub_packages.is_empty() {
                    return Err(Error::invalid(format!(
                        "sub-package '{}' must not declare sub-packages of its own",
                        recipe.name
                    )));
                }
                recipe.validate()?;
            }
        }
        Ok(())
    }
}

/// Check the package name charset: lowercase alphanumeric plus `-` and
/// `_`, with `:` separating sub-package qualifiers
pub fn validate_name(name: &str) -> Result<()> {
    for segment in name.split(':') {
        if segment.is_empty()
            || !segment
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(Error::invalid(format!(
                "invalid package name '{}': names are lowercase alphanumeric plus '-' and '_'",
                name
            )));
        }
    }
    Ok(())
}

/// Decode a recipe from text, dispatching on the file-name suffix
///
/// `parent_name` must be given when decoding a sub-package recipe so the
/// package's qualified name can be formed. Any suffix other than `.json`
/// or `.sdl` is a programmer error.
pub fn parse_recipe(
    filename: &str,
    text: &str,
    parent_name: Option<&str>,
) -> Result<PackageRecipe> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let recipe = match extension(filename) {
        "json" => json::decode_str(filename, text, parent_name)?,
        "sdl" => sdl::decode_str(filename, text, parent_name)?,
        other => panic!("unsupported recipe format '.{}' for '{}'", other, filename),
    };
    recipe.validate()?;
    Ok(recipe)
}

/// Encode a recipe to text, dispatching on the file-name suffix
pub fn serialize_recipe(filename: &str, recipe: &PackageRecipe) -> Result<String> {
    match extension(filename) {
        "json" => json::encode_str(recipe),
        "sdl" => Ok(sdl::encode_str(recipe)),
        other => panic!("unsupported recipe format '.{}' for '{}'", other, filename),
    }
}

fn extension(filename: &str) -> &str {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("my-pkg_2").is_ok());
        assert!(validate_name("parent:sub").is_ok());
        assert!(validate_name("Bad").is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name("trailing:").is_err());
    }

    #[test]
    fn test_duplicate_configurations_rejected() {
        let mut recipe = PackageRecipe {
            name: "x".into(),
            ..Default::default()
        };
        recipe
            .configurations
            .push(ConfigurationInfo::new("a", Default::default()));
        recipe
            .configurations
            .push(ConfigurationInfo::new("a", Default::default()));
        assert!(recipe.validate().is_err());
    }

    #[test]
    fn test_nested_sub_packages_rejected() {
        let inner = PackageRecipe {
            name: "x:y".into(),
            sub_packages: vec![SubPackage::Path("deep".into())],
            ..Default::default()
        };
        let outer = PackageRecipe {
            name: "x".into(),
            sub_packages: vec![SubPackage::Inline(inner)],
            ..Default::default()
        };
        assert!(outer.validate().is_err());
    }

    #[test]
    fn test_bom_is_stripped() {
        let text = "\u{feff}{\"name\": \"bommed\"}";
        let recipe = parse_recipe("dub.json", text, None).unwrap();
        assert_eq!(recipe.name, "bommed");
    }

    #[test]
    #[should_panic(expected = "unsupported recipe format")]
    fn test_unknown_suffix_panics() {
        let _ = parse_recipe("dub.toml", "", None);
    }
}
