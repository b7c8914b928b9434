// src/recipe/json.rs

//! JSON surface of the package recipe
//!
//! The surface is an object whose keys are either recipe attributes or
//! build-settings attributes with an optional platform-filter suffix
//! (`"dflags-linux-x86_64"`). Unknown keys are skipped with a diagnostic
//! so newer recipes stay loadable by older tools.

use super::{ConfigurationInfo, PackageRecipe, SubPackage};
use crate::dependency::Dependency;
use crate::error::{Error, Result};
use crate::settings::{BuildOption, BuildRequirement, BuildSettingsTemplate, TargetType};
use serde_json::{Map, Value, json};
use tracing::warn;

/// Settings field names that may carry a platform-filter suffix
const LIST_FIELDS: &[&str] = &[
    "dflags",
    "lflags",
    "libs",
    "sourceFiles",
    "sourcePaths",
    "excludedSourceFiles",
    "importPaths",
    "stringImportPaths",
    "stringImportFiles",
    "versions",
    "debugVersions",
    "preGenerateCommands",
    "postGenerateCommands",
    "preBuildCommands",
    "postBuildCommands",
    "buildRequirements",
    "buildOptions",
];

/// Settings field names that never carry a platform suffix
const PLAIN_FIELDS: &[&str] = &[
    "targetType",
    "targetPath",
    "targetName",
    "workingDirectory",
    "mainSourceFile",
    "dependencies",
    "subConfigurations",
];

pub fn decode_str(filename: &str, text: &str, parent_name: Option<&str>) -> Result<PackageRecipe> {
    let value: Value = serde_json::from_str(text).map_err(|e| Error::MalformedSyntax {
        file: filename.to_string(),
        message: e.to_string(),
    })?;
    decode_value(filename, &value, parent_name)
}

pub fn decode_value(
    filename: &str,
    value: &Value,
    parent_name: Option<&str>,
) -> Result<PackageRecipe> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::invalid(format!("recipe in '{}' must be a JSON object", filename)))?;

    let mut recipe = PackageRecipe::default();
    if let Some(name) = obj.get("name") {
        let short = string_value(name, "name")?;
        recipe.name = match parent_name {
            Some(parent) => format!("{}:{}", parent, short),
            None => short,
        };
    }

    for (key, value) in obj {
        match key.as_str() {
            "name" => {}
            "version" => recipe.version = Some(string_value(value, key)?),
            "description" => recipe.description = Some(string_value(value, key)?),
            "homepage" => recipe.homepage = Some(string_value(value, key)?),
            "copyright" => recipe.copyright = Some(string_value(value, key)?),
            "license" => recipe.license = Some(string_value(value, key)?),
            "authors" => recipe.authors = string_array(value, key)?,
            "configurations" => {
                let list = value
                    .as_array()
                    .ok_or_else(|| Error::invalid("'configurations' must be an array"))?;
                for entry in list {
                    recipe.configurations.push(decode_configuration(entry)?);
                }
            }
            "buildTypes" => {
                let map = value
                    .as_object()
                    .ok_or_else(|| Error::invalid("'buildTypes' must be an object"))?;
                for (name, settings) in map {
                    let mut template = BuildSettingsTemplate::default();
                    decode_settings_object(settings, &mut template, &format!("buildTypes.{}", name))?;
                    recipe.build_types.insert(name.clone(), template);
                }
            }
            "subPackages" => {
                let list = value
                    .as_array()
                    .ok_or_else(|| Error::invalid("'subPackages' must be an array"))?;
                for entry in list {
                    recipe.sub_packages.push(match entry {
                        Value::String(path) => SubPackage::Path(path.clone()),
                        Value::Object(_) => SubPackage::Inline(decode_value(
                            filename,
                            entry,
                            Some(&recipe.name),
                        )?),
                        _ => {
                            return Err(Error::invalid(
                                "subPackages entries must be strings or objects",
                            ));
                        }
                    });
                }
            }
            _ => {
                if !decode_settings_key(key, value, &mut recipe.settings)? {
                    warn!("ignoring unknown attribute '{}' in '{}'", key, filename);
                }
            }
        }
    }
    Ok(recipe)
}

fn decode_configuration(value: &Value) -> Result<ConfigurationInfo> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::invalid("configuration entries must be objects"))?;
    let mut config = ConfigurationInfo::default();
    for (key, value) in obj {
        match key.as_str() {
            "name" => config.name = string_value(value, key)?,
            "platforms" => config.platforms = string_array(value, key)?,
            _ => {
                if !decode_settings_key(key, value, &mut config.settings)? {
                    warn!("ignoring unknown attribute '{}' in configuration", key);
                }
            }
        }
    }
    if config.name.is_empty() {
        return Err(Error::invalid("configuration is missing a 'name' field"));
    }
    Ok(config)
}

fn decode_settings_object(
    value: &Value,
    template: &mut BuildSettingsTemplate,
    context: &str,
) -> Result<()> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::invalid(format!("'{}' must be an object", context)))?;
    for (key, value) in obj {
        if !decode_settings_key(key, value, template)? {
            warn!("ignoring unknown attribute '{}' in {}", key, context);
        }
    }
    Ok(())
}

/// Decode one settings key into the template
///
/// Returns false when the key names no known settings field.
fn decode_settings_key(
    key: &str,
    value: &Value,
    template: &mut BuildSettingsTemplate,
) -> Result<bool> {
    if PLAIN_FIELDS.contains(&key) {
        match key {
            "targetType" => {
                let s = string_value(value, key)?;
                template.target_type = s
                    .parse::<TargetType>()
                    .map_err(|_| Error::invalid(format!("unknown target type '{}'", s)))?;
            }
            "targetPath" => template.target_path = Some(string_value(value, key)?),
            "targetName" => template.target_name = Some(string_value(value, key)?),
            "workingDirectory" => template.working_directory = Some(string_value(value, key)?),
            "mainSourceFile" => template.main_source_file = Some(string_value(value, key)?),
            "dependencies" => {
                let map = value
                    .as_object()
                    .ok_or_else(|| Error::invalid("'dependencies' must be an object"))?;
                for (name, spec) in map {
                    template
                        .dependencies
                        .insert(name.clone(), Dependency::from_json(spec)?);
                }
            }
            "subConfigurations" => {
                let map = value
                    .as_object()
                    .ok_or_else(|| Error::invalid("'subConfigurations' must be an object"))?;
                for (name, config) in map {
                    template
                        .sub_configurations
                        .insert(name.clone(), string_value(config, name)?);
                }
            }
            _ => unreachable!(),
        }
        return Ok(true);
    }

    let Some((field, suffix)) = split_settings_key(key) else {
        return Ok(false);
    };
    let values = string_array(value, key)?;
    match field {
        "buildRequirements" => {
            let flags = template.build_requirements.entry_mut(suffix);
            for name in &values {
                *flags |= BuildRequirement::from_recipe_name(name)
                    .ok_or_else(|| Error::invalid(format!("unknown build requirement '{}'", name)))?;
            }
        }
        "buildOptions" => {
            let flags = template.build_options.entry_mut(suffix);
            for name in &values {
                *flags |= BuildOption::from_recipe_name(name)
                    .ok_or_else(|| Error::invalid(format!("unknown build option '{}'", name)))?;
            }
        }
        _ => {
            let list = match field {
                "dflags" => &mut template.dflags,
                "lflags" => &mut template.lflags,
                "libs" => &mut template.libs,
                "sourceFiles" => &mut template.source_files,
                "sourcePaths" => &mut template.source_paths,
                "excludedSourceFiles" => &mut template.excluded_source_files,
                "importPaths" => &mut template.import_paths,
                "stringImportPaths" => &mut template.string_import_paths,
                "stringImportFiles" => &mut template.string_import_files,
                "versions" => &mut template.versions,
                "debugVersions" => &mut template.debug_versions,
                "preGenerateCommands" => &mut template.pre_generate_commands,
                "postGenerateCommands" => &mut template.post_generate_commands,
                "preBuildCommands" => &mut template.pre_build_commands,
                "postBuildCommands" => &mut template.post_build_commands,
                _ => unreachable!(),
            };
            list.entry_mut(suffix).extend(values);
        }
    }
    Ok(true)
}

/// Split `"dflags-linux-x86_64"` into `("dflags", "linux-x86_64")`
fn split_settings_key(key: &str) -> Option<(&'static str, &str)> {
    for field in LIST_FIELDS.iter().copied() {
        if key == field {
            return Some((field, ""));
        }
        if let Some(rest) = key.strip_prefix(field) {
            if let Some(suffix) = rest.strip_prefix('-') {
                return Some((field, suffix));
            }
        }
    }
    None
}

fn string_value(value: &Value, key: &str) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::invalid(format!("'{}' must be a string", key)))
}

fn string_array(value: &Value, key: &str) -> Result<Vec<String>> {
    let list = value
        .as_array()
        .ok_or_else(|| Error::invalid(format!("'{}' must be an array of strings", key)))?;
    list.iter().map(|v| string_value(v, key)).collect()
}

pub fn encode_str(recipe: &PackageRecipe) -> Result<String> {
    let value = encode_value(recipe, None);
    Ok(serde_json::to_string_pretty(&value)?)
}

pub fn encode_value(recipe: &PackageRecipe, parent_name: Option<&str>) -> Value {
    let mut obj = Map::new();
    let name = match parent_name {
        Some(parent) => recipe
            .name
            .strip_prefix(&format!("{}:", parent))
            .unwrap_or(recipe.name.as_str()),
        None => recipe.name.as_str(),
    };
    obj.insert("name".into(), json!(name));
    if let Some(v) = &recipe.version {
        obj.insert("version".into(), json!(v));
    }
    if let Some(v) = &recipe.description {
        obj.insert("description".into(), json!(v));
    }
    if let Some(v) = &recipe.homepage {
        obj.insert("homepage".into(), json!(v));
    }
    if !recipe.authors.is_empty() {
        obj.insert("authors".into(), json!(recipe.authors));
    }
    if let Some(v) = &recipe.copyright {
        obj.insert("copyright".into(), json!(v));
    }
    if let Some(v) = &recipe.license {
        obj.insert("license".into(), json!(v));
    }
    encode_settings(&recipe.settings, &mut obj);
    if !recipe.configurations.is_empty() {
        let configs: Vec<Value> = recipe
            .configurations
            .iter()
            .map(|config| {
                let mut cobj = Map::new();
                cobj.insert("name".into(), json!(config.name));
                if !config.platforms.is_empty() {
                    cobj.insert("platforms".into(), json!(config.platforms));
                }
                encode_settings(&config.settings, &mut cobj);
                Value::Object(cobj)
            })
            .collect();
        obj.insert("configurations".into(), json!(configs));
    }
    if !recipe.build_types.is_empty() {
        let mut types = Map::new();
        for (name, template) in &recipe.build_types {
            let mut tobj = Map::new();
            encode_settings(template, &mut tobj);
            types.insert(name.clone(), Value::Object(tobj));
        }
        obj.insert("buildTypes".into(), Value::Object(types));
    }
    if !recipe.sub_packages.is_empty() {
        let subs: Vec<Value> = recipe
            .sub_packages
            .iter()
            .map(|sub| match sub {
                SubPackage::Path(path) => json!(path),
                SubPackage::Inline(inner) => encode_value(inner, Some(&recipe.name)),
            })
            .collect();
        obj.insert("subPackages".into(), json!(subs));
    }
    Value::Object(obj)
}

fn encode_settings(template: &BuildSettingsTemplate, obj: &mut Map<String, Value>) {
    if template.target_type != TargetType::Autodetect {
        obj.insert("targetType".into(), json!(template.target_type.to_string()));
    }
    if let Some(v) = &template.target_path {
        obj.insert("targetPath".into(), json!(v));
    }
    if let Some(v) = &template.target_name {
        obj.insert("targetName".into(), json!(v));
    }
    if let Some(v) = &template.working_directory {
        obj.insert("workingDirectory".into(), json!(v));
    }
    if let Some(v) = &template.main_source_file {
        obj.insert("mainSourceFile".into(), json!(v));
    }
    if !template.dependencies.is_empty() {
        let mut deps = Map::new();
        for (name, dep) in &template.dependencies {
            deps.insert(name.clone(), dep.to_json());
        }
        obj.insert("dependencies".into(), Value::Object(deps));
    }
    if !template.sub_configurations.is_empty() {
        obj.insert(
            "subConfigurations".into(),
            json!(template.sub_configurations),
        );
    }
    let lists: &[(&str, &crate::settings::PlatformTagged<Vec<String>>)] = &[
        ("dflags", &template.dflags),
        ("lflags", &template.lflags),
        ("libs", &template.libs),
        ("sourceFiles", &template.source_files),
        ("sourcePaths", &template.source_paths),
        ("excludedSourceFiles", &template.excluded_source_files),
        ("importPaths", &template.import_paths),
        ("stringImportPaths", &template.string_import_paths),
        ("stringImportFiles", &template.string_import_files),
        ("versions", &template.versions),
        ("debugVersions", &template.debug_versions),
        ("preGenerateCommands", &template.pre_generate_commands),
        ("postGenerateCommands", &template.post_generate_commands),
        ("preBuildCommands", &template.pre_build_commands),
        ("postBuildCommands", &template.post_build_commands),
    ];
    for (field, tagged) in lists {
        for (suffix, values) in tagged.iter() {
            if values.is_empty() {
                continue;
            }
            obj.insert(settings_key(field, suffix), json!(values));
        }
    }
    for (suffix, flags) in template.build_requirements.iter() {
        if !flags.is_empty() {
            obj.insert(
                settings_key("buildRequirements", suffix),
                json!(flags.names()),
            );
        }
    }
    for (suffix, flags) in template.build_options.iter() {
        if !flags.is_empty() {
            obj.insert(settings_key("buildOptions", suffix), json!(flags.names()));
        }
    }
}

fn settings_key(field: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        field.to_string()
    } else {
        format!("{}-{}", field, suffix)
    }
}
