// src/selections.rs

//! Persisted version selections (`dub.selections.json`)
//!
//! A selection pins a package to a specific version, branch or path so
//! that repeated builds resolve identically. The file lives next to the
//! root recipe and is written only when something actually changed.

use crate::dependency::{Dependency, DependencySpec};
use crate::error::{Error, Result};
use crate::version::Version;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// File name of the selections file next to the root recipe
pub const SELECTIONS_FILE: &str = "dub.selections.json";

/// The only selections file format this reader understands
pub const FILE_VERSION: i64 = 1;

/// A package-name to pinned-dependency map with change tracking
#[derive(Debug, Clone, Default)]
pub struct SelectedVersions {
    versions: BTreeMap<String, Dependency>,
    dirty: bool,
}

impl SelectedVersions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read selections from a file
    ///
    /// Fails on unreadable files, malformed JSON and unsupported
    /// `fileVersion`s; the project layer decides whether that is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&text)?;
        let obj = value
            .as_object()
            .ok_or_else(|| Error::invalid("selections file must be a JSON object"))?;

        let file_version = obj
            .get("fileVersion")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::invalid("selections file is missing 'fileVersion'"))?;
        if file_version != FILE_VERSION {
            return Err(Error::SelectionsVersionMismatch(file_version));
        }

        let mut selections = Self::new();
        if let Some(versions) = obj.get("versions") {
            let versions = versions
                .as_object()
                .ok_or_else(|| Error::invalid("'versions' must be an object"))?;
            for (name, spec) in versions {
                let dep = match spec {
                    Value::String(s) => Dependency::exact(&Version::parse(s)?),
                    Value::Object(_) => Dependency::from_json(spec)?,
                    _ => {
                        return Err(Error::invalid(format!(
                            "selection for '{}' must be a version string or a path object",
                            name
                        )));
                    }
                };
                selections.versions.insert(name.clone(), dep);
            }
        }
        Ok(selections)
    }

    /// Write the selections atomically, clearing the dirty flag
    pub fn save(&mut self, path: &Path) -> Result<()> {
        let mut versions = Map::new();
        for (name, dep) in &self.versions {
            let value = match &dep.spec {
                DependencySpec::Path(p) => json!({"path": p.to_string_lossy()}),
                _ => json!(dep.spec_string()),
            };
            versions.insert(name.clone(), value);
        }
        let doc = json!({
            "fileVersion": FILE_VERSION,
            "versions": versions,
        });

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(serde_json::to_string_pretty(&doc)?.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.persist(path)
            .map_err(|e| Error::Io(e.error))?;
        self.dirty = false;
        debug!("saved {} selections to {}", self.versions.len(), path.display());
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Pin a package; no-op when the same pin is already present
    pub fn select(&mut self, name: impl Into<String>, dep: Dependency) {
        let name = name.into();
        if self.versions.get(&name) != Some(&dep) {
            self.versions.insert(name, dep);
            self.dirty = true;
        }
    }

    pub fn deselect(&mut self, name: &str) {
        if self.versions.remove(name).is_some() {
            self.dirty = true;
        }
    }

    pub fn has_selected(&self, name: &str) -> bool {
        self.versions.contains_key(name)
    }

    pub fn selected(&self, name: &str) -> Option<&Dependency> {
        self.versions.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Dependency)> {
        self.versions.iter().map(|(n, d)| (n.as_str(), d))
    }

    pub fn clear(&mut self) {
        if !self.versions.is_empty() {
            self.versions.clear();
            self.dirty = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_then_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(SELECTIONS_FILE);

        let mut selections = SelectedVersions::new();
        selections.select("alpha", Dependency::exact(&Version::parse("1.2.3").unwrap()));
        selections.select("branchy", Dependency::exact(&Version::parse("~master").unwrap()));
        selections.select("local", Dependency::from_path("../local"));
        assert!(selections.is_dirty());
        selections.save(&path).unwrap();
        assert!(!selections.is_dirty());

        let loaded = SelectedVersions::load(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(
            loaded.selected("alpha"),
            Some(&Dependency::exact(&Version::parse("1.2.3").unwrap()))
        );
        assert_eq!(
            loaded.selected("branchy"),
            Some(&Dependency::exact(&Version::parse("~master").unwrap()))
        );
        assert_eq!(loaded.selected("local"), Some(&Dependency::from_path("../local")));
    }

    #[test]
    fn test_file_format() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(SELECTIONS_FILE);
        let mut selections = SelectedVersions::new();
        selections.select("x", Dependency::exact(&Version::parse("1.0.0").unwrap()));
        selections.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["fileVersion"], json!(1));
        assert_eq!(value["versions"]["x"], json!("1.0.0"));
    }

    #[test]
    fn test_rejects_other_file_versions() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(SELECTIONS_FILE);
        std::fs::write(&path, r#"{"fileVersion": 2, "versions": {}}"#).unwrap();
        assert!(matches!(
            SelectedVersions::load(&path),
            Err(Error::SelectionsVersionMismatch(2))
        ));
    }

    #[test]
    fn test_select_tracks_dirty() {
        let mut selections = SelectedVersions::new();
        assert!(!selections.is_dirty());
        let dep = Dependency::exact(&Version::parse("1.0.0").unwrap());
        selections.select("x", dep.clone());
        assert!(selections.is_dirty());

        let tmp = TempDir::new().unwrap();
        selections.save(&tmp.path().join(SELECTIONS_FILE)).unwrap();
        assert!(!selections.is_dirty());

        // Re-selecting the same pin is not a change
        selections.select("x", dep);
        assert!(!selections.is_dirty());

        selections.deselect("x");
        assert!(selections.is_dirty());
    }
}
