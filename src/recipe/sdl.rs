// src/recipe/sdl.rs

//! SDL surface of the package recipe
//!
//! The block-structured form: top-level tags set scalar fields, repeated
//! tags accumulate into arrays, a `platform="..."` attribute restricts a
//! settings tag, and `configuration "name" { ... }` opens a nested scope
//! applying to that configuration's template.

use super::{ConfigurationInfo, PackageRecipe, SubPackage};
use crate::dependency::Dependency;
use crate::error::{Error, Result};
use crate::settings::{
    BuildOption, BuildRequirement, BuildSettingsTemplate, PlatformTagged, TargetType,
};
use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;
use tracing::warn;

#[derive(Parser)]
#[grammar = "recipe/sdl.pest"]
struct SdlParser;

/// One parsed SDL tag, before recipe interpretation
#[derive(Debug, Clone, PartialEq)]
struct Tag {
    name: String,
    values: Vec<SdlValue>,
    attributes: Vec<(String, SdlValue)>,
    children: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq)]
enum SdlValue {
    Str(String),
    Bool(bool),
}

impl SdlValue {
    fn as_str(&self, context: &str) -> Result<&str> {
        match self {
            SdlValue::Str(s) => Ok(s),
            SdlValue::Bool(_) => Err(Error::invalid(format!(
                "'{}' expects a string value",
                context
            ))),
        }
    }

    fn as_bool(&self, context: &str) -> Result<bool> {
        match self {
            SdlValue::Bool(b) => Ok(*b),
            SdlValue::Str(_) => Err(Error::invalid(format!(
                "'{}' expects a boolean value",
                context
            ))),
        }
    }
}

impl Tag {
    /// The single string value of a scalar tag
    fn scalar(&self) -> Result<String> {
        match self.values.as_slice() {
            [SdlValue::Str(s)] => Ok(s.clone()),
            _ => Err(Error::invalid(format!(
                "tag '{}' expects exactly one string value",
                self.name
            ))),
        }
    }

    fn strings(&self) -> Result<Vec<String>> {
        self.values
            .iter()
            .map(|v| v.as_str(&self.name).map(str::to_string))
            .collect()
    }

    fn attribute(&self, name: &str) -> Option<&SdlValue> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// The platform filter suffix from a `platform` attribute, if present
    fn platform_suffix(&self) -> Result<String> {
        match self.attribute("platform") {
            Some(v) => Ok(v.as_str("platform")?.to_string()),
            None => Ok(String::new()),
        }
    }
}

pub fn decode_str(filename: &str, text: &str, parent_name: Option<&str>) -> Result<PackageRecipe> {
    let document = SdlParser::parse(Rule::document, text)
        .map_err(|e| Error::MalformedSyntax {
            file: filename.to_string(),
            message: e.to_string(),
        })?
        .next()
        .expect("document rule always yields one pair");

    let mut tags = Vec::new();
    for pair in document.into_inner() {
        if pair.as_rule() == Rule::tag {
            tags.push(build_tag(pair)?);
        }
    }
    interpret_recipe(filename, &tags, parent_name)
}

fn build_tag(pair: Pair<'_, Rule>) -> Result<Tag> {
    let mut inner = pair.into_inner();
    let name = inner.next().expect("tag starts with an ident").as_str().to_string();
    let mut tag = Tag {
        name,
        values: Vec::new(),
        attributes: Vec::new(),
        children: Vec::new(),
    };
    for part in inner {
        match part.as_rule() {
            Rule::value => tag.values.push(build_value(part)),
            Rule::attribute => {
                let mut kv = part.into_inner();
                let key = kv.next().expect("attribute key").as_str().to_string();
                let value = build_value(kv.next().expect("attribute value"));
                tag.attributes.push((key, value));
            }
            Rule::block => {
                for child in part.into_inner() {
                    if child.as_rule() == Rule::tag {
                        tag.children.push(build_tag(child)?);
                    }
                }
            }
            _ => {}
        }
    }
    Ok(tag)
}

fn build_value(pair: Pair<'_, Rule>) -> SdlValue {
    let inner = pair.into_inner().next().expect("value wraps one literal");
    match inner.as_rule() {
        Rule::boolean => SdlValue::Bool(inner.as_str() == "true"),
        Rule::string => {
            let raw = inner
                .into_inner()
                .next()
                .expect("string wraps string_inner")
                .as_str();
            SdlValue::Str(unescape(raw))
        }
        other => unreachable!("unexpected value rule {:?}", other),
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn interpret_recipe(
    filename: &str,
    tags: &[Tag],
    parent_name: Option<&str>,
) -> Result<PackageRecipe> {
    let mut recipe = PackageRecipe::default();
    for tag in tags {
        if tag.name == "name" {
            let short = tag.scalar()?;
            recipe.name = match parent_name {
                Some(parent) => format!("{}:{}", parent, short),
                None => short,
            };
        }
    }

    for tag in tags {
        match tag.name.as_str() {
            "name" => {}
            "version" => recipe.version = Some(tag.scalar()?),
            "description" => recipe.description = Some(tag.scalar()?),
            "homepage" => recipe.homepage = Some(tag.scalar()?),
            "copyright" => recipe.copyright = Some(tag.scalar()?),
            "license" => recipe.license = Some(tag.scalar()?),
            "authors" => recipe.authors.extend(tag.strings()?),
            "configuration" => {
                let mut config = ConfigurationInfo::default();
                config.name = tag.scalar()?;
                for child in &tag.children {
                    if child.name == "platforms" {
                        config.platforms.extend(child.strings()?);
                    } else if !apply_settings_tag(child, &mut config.settings)? {
                        warn!(
                            "ignoring unknown attribute '{}' in configuration '{}' of '{}'",
                            child.name, config.name, filename
                        );
                    }
                }
                recipe.configurations.push(config);
            }
            "buildType" => {
                let name = tag.scalar()?;
                let mut template = BuildSettingsTemplate::default();
                for child in &tag.children {
                    if !apply_settings_tag(child, &mut template)? {
                        warn!(
                            "ignoring unknown attribute '{}' in build type '{}' of '{}'",
                            child.name, name, filename
                        );
                    }
                }
                recipe.build_types.insert(name, template);
            }
            "subPackage" => {
                if tag.children.is_empty() {
                    recipe.sub_packages.push(SubPackage::Path(tag.scalar()?));
                } else {
                    let inner = interpret_recipe(filename, &tag.children, Some(&recipe.name))?;
                    recipe.sub_packages.push(SubPackage::Inline(inner));
                }
            }
            _ => {
                if !apply_settings_tag(tag, &mut recipe.settings)? {
                    warn!("ignoring unknown attribute '{}' in '{}'", tag.name, filename);
                }
            }
        }
    }
    Ok(recipe)
}

/// Apply one settings tag to a template
///
/// Returns false when the tag names no known settings field.
fn apply_settings_tag(tag: &Tag, template: &mut BuildSettingsTemplate) -> Result<bool> {
    match tag.name.as_str() {
        "targetType" => {
            let s = tag.scalar()?;
            template.target_type = s
                .parse::<TargetType>()
                .map_err(|_| Error::invalid(format!("unknown target type '{}'", s)))?;
        }
        "targetPath" => template.target_path = Some(tag.scalar()?),
        "targetName" => template.target_name = Some(tag.scalar()?),
        "workingDirectory" => template.working_directory = Some(tag.scalar()?),
        "mainSourceFile" => template.main_source_file = Some(tag.scalar()?),
        "dependency" => {
            let (name, dep) = interpret_dependency(tag)?;
            template.dependencies.insert(name, dep);
        }
        "subConfiguration" => match tag.values.as_slice() {
            [SdlValue::Str(dep), SdlValue::Str(config)] => {
                template
                    .sub_configurations
                    .insert(dep.clone(), config.clone());
            }
            _ => {
                return Err(Error::invalid(
                    "'subConfiguration' expects a dependency name and a configuration name",
                ));
            }
        },
        "buildRequirements" => {
            let suffix = tag.platform_suffix()?;
            let flags = template.build_requirements.entry_mut(&suffix);
            for name in tag.strings()? {
                *flags |= BuildRequirement::from_recipe_name(&name)
                    .ok_or_else(|| Error::invalid(format!("unknown build requirement '{}'", name)))?;
            }
        }
        "buildOptions" => {
            let suffix = tag.platform_suffix()?;
            let flags = template.build_options.entry_mut(&suffix);
            for name in tag.strings()? {
                *flags |= BuildOption::from_recipe_name(&name)
                    .ok_or_else(|| Error::invalid(format!("unknown build option '{}'", name)))?;
            }
        }
        _ => {
            let Some(list) = list_field_mut(&tag.name, template) else {
                return Ok(false);
            };
            let suffix = tag.platform_suffix()?;
            list.entry_mut(&suffix).extend(tag.strings()?);
        }
    }
    Ok(true)
}

fn interpret_dependency(tag: &Tag) -> Result<(String, Dependency)> {
    let mut values = tag.values.iter();
    let name = values
        .next()
        .ok_or_else(|| Error::invalid("'dependency' expects the package name as first value"))?
        .as_str("dependency")?
        .to_string();

    let mut dep = if let Some(path) = tag.attribute("path") {
        Dependency::from_path(path.as_str("path")?)
    } else if let Some(version) = tag.attribute("version") {
        Dependency::parse(version.as_str("version")?)?
    } else if let Some(spec) = values.next() {
        // positional spec as shorthand for version=
        Dependency::parse(spec.as_str("dependency")?)?
    } else {
        Dependency::any()
    };
    if let Some(optional) = tag.attribute("optional") {
        dep.optional = optional.as_bool("optional")?;
    }
    if let Some(default) = tag.attribute("default") {
        dep.enabled_by_default = default.as_bool("default")?;
    }
    Ok((name, dep))
}

fn list_field_mut<'a>(
    name: &str,
    template: &'a mut BuildSettingsTemplate,
) -> Option<&'a mut PlatformTagged<Vec<String>>> {
    Some(match name {
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
        _ => return None,
    })
}

pub fn encode_str(recipe: &PackageRecipe) -> String {
    let mut out = String::new();
    encode_recipe(recipe, None, 0, &mut out);
    out
}

fn encode_recipe(recipe: &PackageRecipe, parent_name: Option<&str>, depth: usize, out: &mut String) {
    let name = match parent_name {
        Some(parent) => recipe
            .name
            .strip_prefix(&format!("{}:", parent))
            .unwrap_or(recipe.name.as_str()),
        None => recipe.name.as_str(),
    };
    write_tag(out, depth, "name", &[name]);
    if let Some(v) = &recipe.version {
        write_tag(out, depth, "version", &[v]);
    }
    if let Some(v) = &recipe.description {
        write_tag(out, depth, "description", &[v]);
    }
    if let Some(v) = &recipe.homepage {
        write_tag(out, depth, "homepage", &[v]);
    }
    if !recipe.authors.is_empty() {
        let authors: Vec<&str> = recipe.authors.iter().map(String::as_str).collect();
        write_tag(out, depth, "authors", &authors);
    }
    if let Some(v) = &recipe.copyright {
        write_tag(out, depth, "copyright", &[v]);
    }
    if let Some(v) = &recipe.license {
        write_tag(out, depth, "license", &[v]);
    }
    encode_settings(&recipe.settings, depth, out);
    for config in &recipe.configurations {
        indent(out, depth);
        out.push_str(&format!("configuration {} {{\n", quote(&config.name)));
        if !config.platforms.is_empty() {
            let platforms: Vec<&str> = config.platforms.iter().map(String::as_str).collect();
            write_tag(out, depth + 1, "platforms", &platforms);
        }
        encode_settings(&config.settings, depth + 1, out);
        indent(out, depth);
        out.push_str("}\n");
    }
    for (name, template) in &recipe.build_types {
        indent(out, depth);
        out.push_str(&format!("buildType {} {{\n", quote(name)));
        encode_settings(template, depth + 1, out);
        indent(out, depth);
        out.push_str("}\n");
    }
    for sub in &recipe.sub_packages {
        match sub {
            SubPackage::Path(path) => write_tag(out, depth, "subPackage", &[path]),
            SubPackage::Inline(inner) => {
                indent(out, depth);
                out.push_str("subPackage {\n");
                encode_recipe(inner, Some(&recipe.name), depth + 1, out);
                indent(out, depth);
                out.push_str("}\n");
            }
        }
    }
}

fn encode_settings(template: &BuildSettingsTemplate, depth: usize, out: &mut String) {
    if template.target_type != TargetType::Autodetect {
        write_tag(out, depth, "targetType", &[&template.target_type.to_string()]);
    }
    if let Some(v) = &template.target_path {
        write_tag(out, depth, "targetPath", &[v]);
    }
    if let Some(v) = &template.target_name {
        write_tag(out, depth, "targetName", &[v]);
    }
    if let Some(v) = &template.working_directory {
        write_tag(out, depth, "workingDirectory", &[v]);
    }
    if let Some(v) = &template.main_source_file {
        write_tag(out, depth, "mainSourceFile", &[v]);
    }
    for (name, dep) in &template.dependencies {
        indent(out, depth);
        out.push_str(&format!("dependency {}", quote(name)));
        match dep.path() {
            Some(path) => out.push_str(&format!(" path={}", quote(&path.to_string_lossy()))),
            None => out.push_str(&format!(" version={}", quote(&dep.spec_string()))),
        }
        if dep.optional {
            out.push_str(" optional=true");
        }
        if dep.enabled_by_default {
            out.push_str(" default=true");
        }
        out.push('\n');
    }
    for (dep, config) in &template.sub_configurations {
        write_tag(out, depth, "subConfiguration", &[dep, config]);
    }
    let lists: &[(&str, &PlatformTagged<Vec<String>>)] = &[
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
            let values: Vec<&str> = values.iter().map(String::as_str).collect();
            write_filtered_tag(out, depth, field, &values, suffix);
        }
    }
    for (suffix, flags) in template.build_requirements.iter() {
        if !flags.is_empty() {
            write_filtered_tag(out, depth, "buildRequirements", &flags.names(), suffix);
        }
    }
    for (suffix, flags) in template.build_options.iter() {
        if !flags.is_empty() {
            write_filtered_tag(out, depth, "buildOptions", &flags.names(), suffix);
        }
    }
}

fn write_tag<S: AsRef<str>>(out: &mut String, depth: usize, name: &str, values: &[S]) {
    write_filtered_tag(out, depth, name, values, "");
}

fn write_filtered_tag<S: AsRef<str>>(
    out: &mut String,
    depth: usize,
    name: &str,
    values: &[S],
    suffix: &str,
) {
    indent(out, depth);
    out.push_str(name);
    for value in values {
        out.push(' ');
        out.push_str(&quote(value.as_ref()));
    }
    if !suffix.is_empty() {
        out.push_str(&format!(" platform={}", quote(suffix)));
    }
    out.push('\n');
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push('\t');
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::parse_recipe;

    #[test]
    fn test_decode_scalars() {
        let text = "name \"demo\"\nversion \"1.0.0\"\nlicense \"MIT\"\n";
        let recipe = parse_recipe("dub.sdl", text, None).unwrap();
        assert_eq!(recipe.name, "demo");
        assert_eq!(recipe.version.as_deref(), Some("1.0.0"));
        assert_eq!(recipe.license.as_deref(), Some("MIT"));
    }

    #[test]
    fn test_repeated_tags_accumulate() {
        let text = "name \"demo\"\ndflags \"-a\"\ndflags \"-b\" \"-c\"\n";
        let recipe = parse_recipe("dub.sdl", text, None).unwrap();
        let all: Vec<_> = recipe
            .settings
            .dflags
            .iter()
            .flat_map(|(_, v)| v.iter().cloned())
            .collect();
        assert_eq!(all, vec!["-a", "-b", "-c"]);
    }

    #[test]
    fn test_platform_attribute() {
        let text = "name \"demo\"\ndflags \"-g\" platform=\"linux\"\n";
        let recipe = parse_recipe("dub.sdl", text, None).unwrap();
        let entries: Vec<_> = recipe.settings.dflags.iter().collect();
        assert_eq!(entries[0].0, "linux");
    }

    #[test]
    fn test_dependency_tag() {
        let text = concat!(
            "name \"demo\"\n",
            "dependency \"vibe-d\" version=\"~>0.9.0\"\n",
            "dependency \"local\" path=\"../local\" optional=true default=true\n",
        );
        let recipe = parse_recipe("dub.sdl", text, None).unwrap();
        assert_eq!(recipe.settings.dependencies.len(), 2);
        let local = &recipe.settings.dependencies["local"];
        assert!(local.optional);
        assert!(local.enabled_by_default);
        assert!(local.path().is_some());
    }

    #[test]
    fn test_configuration_block() {
        let text = concat!(
            "name \"demo\"\n",
            "configuration \"app\" {\n",
            "\ttargetType \"executable\"\n",
            "\tversions \"AppBuild\"\n",
            "}\n",
        );
        let recipe = parse_recipe("dub.sdl", text, None).unwrap();
        assert_eq!(recipe.configurations.len(), 1);
        let config = &recipe.configurations[0];
        assert_eq!(config.name, "app");
        assert_eq!(config.settings.target_type, TargetType::Executable);
    }

    #[test]
    fn test_empty_configuration_block() {
        let text = "name \"test\"\nconfiguration \"a\" {\n}\n";
        let recipe = parse_recipe("dub.sdl", text, None).unwrap();
        assert_eq!(recipe.configurations.len(), 1);
        assert_eq!(recipe.configurations[0].name, "a");
        assert_eq!(
            recipe.configurations[0].settings.target_type,
            TargetType::Autodetect
        );
    }

    #[test]
    fn test_sub_package_forms() {
        let text = concat!(
            "name \"outer\"\n",
            "subPackage \"component\"\n",
            "subPackage {\n",
            "\tname \"inner\"\n",
            "\ttargetType \"library\"\n",
            "}\n",
        );
        let recipe = parse_recipe("dub.sdl", text, None).unwrap();
        assert_eq!(recipe.sub_packages.len(), 2);
        match &recipe.sub_packages[1] {
            SubPackage::Inline(inner) => assert_eq!(inner.name, "outer:inner"),
            other => panic!("expected inline sub-package, got {:?}", other),
        }
    }

    #[test]
    fn test_comments_and_continuations() {
        let text = concat!(
            "// leading comment\n",
            "name \"demo\" // trailing\n",
            "# hash comment\n",
            "-- dash comment\n",
            "/* block\n   comment */\n",
            "dflags \"-a\" \\\n\t\"-b\"\n",
        );
        let recipe = parse_recipe("dub.sdl", text, None).unwrap();
        let all: Vec<_> = recipe
            .settings
            .dflags
            .iter()
            .flat_map(|(_, v)| v.iter().cloned())
            .collect();
        assert_eq!(all, vec!["-a", "-b"]);
    }

    #[test]
    fn test_string_escapes() {
        let text = "name \"demo\"\ndescription \"a \\\"quoted\\\" word\\nnext line\"\n";
        let recipe = parse_recipe("dub.sdl", text, None).unwrap();
        assert_eq!(
            recipe.description.as_deref(),
            Some("a \"quoted\" word\nnext line")
        );
    }

    #[test]
    fn test_malformed_syntax() {
        assert!(matches!(
            parse_recipe("dub.sdl", "name \"unclosed\nconfiguration {", None),
            Err(Error::MalformedSyntax { .. })
        ));
    }

    #[test]
    fn test_roundtrip() {
        let text = concat!(
            "name \"round\"\n",
            "version \"1.2.3\"\n",
            "authors \"a\" \"b\"\n",
            "license \"MIT\"\n",
            "targetType \"library\"\n",
            "dflags \"-g\"\n",
            "dflags \"-m64\" platform=\"windows\"\n",
            "dependency \"dep\" version=\">=1.0.0 <2.0.0\"\n",
            "buildRequirements \"allowWarnings\"\n",
            "configuration \"default\" {\n",
            "\tversions \"Special\"\n",
            "}\n",
            "subPackage {\n",
            "\tname \"part\"\n",
            "\ttargetType \"library\"\n",
            "}\n",
        );
        let recipe = parse_recipe("dub.sdl", text, None).unwrap();
        let encoded = encode_str(&recipe);
        let again = parse_recipe("dub.sdl", &encoded, None).unwrap();
        assert_eq!(recipe, again);
    }

    #[test]
    fn test_cross_format_agreement() {
        let sdl = concat!(
            "name \"cross\"\n",
            "version \"0.5.0\"\n",
            "targetType \"executable\"\n",
            "dflags \"-g\" platform=\"linux\"\n",
            "dependency \"dep\" version=\"^1.0.0\"\n",
        );
        let from_sdl = parse_recipe("dub.sdl", sdl, None).unwrap();
        let json = crate::recipe::json::encode_str(&from_sdl).unwrap();
        let from_json = parse_recipe("dub.json", &json, None).unwrap();
        assert_eq!(from_sdl, from_json);
    }
}
