// src/commands.rs

//! Command implementations driving the library
//!
//! Each function maps one CLI subcommand onto the project, manager and
//! resolver APIs and prints human-readable results.

use crate::dependency::Dependency;
use crate::manager::PackageManager;
use crate::platform::BuildPlatform;
use crate::project::Project;
use crate::resolver::UpgradeOptions;
use crate::supplier::{FileSystemSupplier, PackageSupplier};
use crate::version::Version;
use anyhow::{Context, Result, bail};
use std::path::Path;
use tracing::info;

fn suppliers_from(registries: &[String]) -> Vec<Box<dyn PackageSupplier>> {
    registries
        .iter()
        .map(|dir| Box::new(FileSystemSupplier::new(dir.clone())) as Box<dyn PackageSupplier>)
        .collect()
}

pub fn describe(path: &str) -> Result<()> {
    let project = Project::load(Path::new(path))
        .with_context(|| format!("failed to load project at '{}'", path))?;
    let root = project.root_package();
    println!("{} {}", root.name(), root.version());
    if let Some(description) = &root.recipe().description {
        println!("  {}", description);
    }
    println!("  configurations: {}", root.configurations().join(", "));
    for dep in project.dependencies() {
        println!("  dependency: {} {}", dep.name(), dep.version());
    }
    for missing in project.missing_dependencies() {
        println!("  missing: {} (run `dub upgrade`)", missing);
    }
    Ok(())
}

pub fn build_settings(path: &str, config: Option<&str>, build_type: &str) -> Result<()> {
    let project = Project::load(Path::new(path))
        .with_context(|| format!("failed to load project at '{}'", path))?;
    let platform = BuildPlatform::host();
    let root = project.root_package().clone();

    let config = match config {
        Some(c) => c.to_string(),
        None => root
            .default_configuration(&platform, true)
            .map(str::to_string)
            .context("no configuration admits the host platform")?,
    };

    let mut settings = Default::default();
    project.add_build_settings(&mut settings, &platform, &config, None, false)?;
    root.add_build_type_settings(&mut settings, &platform, build_type)?;

    println!("configuration: {}", config);
    println!("targetType: {}", settings.target_type);
    println!("targetName: {}", settings.target_name);
    print_list("dflags", &settings.dflags);
    print_list("lflags", &settings.lflags);
    print_list("libs", &settings.libs);
    print_list("versions", &settings.versions);
    print_list("importPaths", &settings.import_paths);
    print_list("sourceFiles", &settings.source_files);
    Ok(())
}

fn print_list(label: &str, values: &[String]) {
    if !values.is_empty() {
        println!("{}: {}", label, values.join(" "));
    }
}

pub fn upgrade(path: &str, registries: &[String], pre_release: bool, dry_run: bool) -> Result<()> {
    let mut project = Project::load(Path::new(path))
        .with_context(|| format!("failed to load project at '{}'", path))?;
    let suppliers = suppliers_from(registries);
    let options = UpgradeOptions {
        upgrade: true,
        pre_release,
        print_upgrades_only: dry_run,
        select: !dry_run,
        ..Default::default()
    };
    let result = project.upgrade(options, &suppliers)?;
    for (name, dep) in &result {
        println!("{} {}", name, dep);
    }
    Ok(())
}

pub fn fetch(name: &str, version: &str, registries: &[String], path: &str) -> Result<()> {
    let mut manager = PackageManager::for_project(Path::new(path));
    let dep = Dependency::parse(version)?;
    let location = manager
        .install_location()
        .context("no package cache location configured")?
        .to_path_buf();

    let scratch = tempfile::tempdir()?;
    for supplier in suppliers_from(registries) {
        let Ok(src) = supplier.fetch(name, &dep, scratch.path()) else {
            continue;
        };
        let recipe = supplier.recipe(name, &dep)?;
        let fetched_version = recipe
            .version
            .as_deref()
            .map(Version::parse)
            .transpose()?
            .unwrap_or_else(Version::master);
        let pkg = manager.store_fetched_package(&src, name, &fetched_version, &location)?;
        info!("fetched {} {}", pkg.name(), pkg.version());
        println!("{} {}", pkg.name(), pkg.version());
        return Ok(());
    }
    bail!("no registry provides '{}' matching {}", name, dep);
}

pub fn remove(name: &str, version: &str, path: &str) -> Result<()> {
    let mut manager = PackageManager::for_project(Path::new(path));
    let version = Version::parse(version)?;
    manager.remove(name, &version)?;
    println!("removed {} {}", name, version);
    Ok(())
}

pub fn list(path: &str) -> Result<()> {
    let manager = PackageManager::for_project(Path::new(path));
    for pkg in manager.packages() {
        println!("{} {} ({})", pkg.name(), pkg.version(), pkg.root().display());
    }
    Ok(())
}
