// src/dependency.rs

//! Dependency specifications and version constraint satisfaction
//!
//! A [`Dependency`] is what a recipe writes on the right-hand side of a
//! dependency entry: a range of acceptable numeric versions, a floating SCM
//! branch, or a filesystem path. Ranges support intersection via
//! [`Dependency::merge`] so that constraints from several referrers can be
//! combined into one.

use crate::error::{Error, Result};
use crate::version::{BRANCH_PREFIX, Version};
use serde_json::{Value, json};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Lowest numeric version, used as the open lower bound
fn min_release() -> semver::Version {
    semver::Version::new(0, 0, 0)
}

/// Sentinel upper bound standing in for "no upper bound"
fn max_release() -> semver::Version {
    semver::Version::new(99999, 0, 0)
}

/// An interval of acceptable numeric versions
///
/// Bounds may each be inclusive or exclusive. An interval with
/// `max < min` (or equal bounds that are not both inclusive) is invalid
/// and matches nothing; [`Dependency::merge`] uses it to signal an empty
/// intersection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    pub min: semver::Version,
    pub max: semver::Version,
    pub inclusive_min: bool,
    pub inclusive_max: bool,
}

impl VersionRange {
    pub fn new(
        min: semver::Version,
        max: semver::Version,
        inclusive_min: bool,
        inclusive_max: bool,
    ) -> Self {
        Self {
            min,
            max,
            inclusive_min,
            inclusive_max,
        }
    }

    /// The range admitting every numeric version
    pub fn any() -> Self {
        Self::new(min_release(), max_release(), true, true)
    }

    /// The range admitting exactly one version
    pub fn exact(v: semver::Version) -> Self {
        Self::new(v.clone(), v, true, true)
    }

    /// An empty interval that matches nothing
    pub fn invalid() -> Self {
        Self::new(max_release(), min_release(), false, false)
    }

    pub fn is_any(&self) -> bool {
        *self == Self::any()
    }

    pub fn is_exact(&self) -> bool {
        self.min == self.max && self.inclusive_min && self.inclusive_max
    }

    /// Whether the interval contains at least one version
    pub fn is_valid(&self) -> bool {
        match self.min.cmp(&self.max) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Equal => self.inclusive_min && self.inclusive_max,
            std::cmp::Ordering::Greater => false,
        }
    }

    pub fn matches(&self, v: &semver::Version) -> bool {
        let lower = match v.cmp(&self.min) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => self.inclusive_min,
            std::cmp::Ordering::Less => false,
        };
        let upper = match v.cmp(&self.max) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Equal => self.inclusive_max,
            std::cmp::Ordering::Greater => false,
        };
        lower && upper
    }

    /// Intersect two intervals
    pub fn merge(&self, other: &VersionRange) -> VersionRange {
        let (min, inclusive_min) = match self.min.cmp(&other.min) {
            std::cmp::Ordering::Greater => (self.min.clone(), self.inclusive_min),
            std::cmp::Ordering::Less => (other.min.clone(), other.inclusive_min),
            std::cmp::Ordering::Equal => {
                (self.min.clone(), self.inclusive_min && other.inclusive_min)
            }
        };
        let (max, inclusive_max) = match self.max.cmp(&other.max) {
            std::cmp::Ordering::Less => (self.max.clone(), self.inclusive_max),
            std::cmp::Ordering::Greater => (other.max.clone(), other.inclusive_max),
            std::cmp::Ordering::Equal => {
                (self.max.clone(), self.inclusive_max && other.inclusive_max)
            }
        };
        VersionRange::new(min, max, inclusive_min, inclusive_max)
    }

    /// Parse a range expression
    ///
    /// Accepted forms:
    /// - `*` (any version)
    /// - `1.2.3` or `==1.2.3` (exact)
    /// - `^1.2.3` (compatible-by-leading-nonzero-component)
    /// - `~>1.2.3` (bump the last listed component)
    /// - `>=1.0.0`, `>1.0.0`, `<=2.0.0`, `<2.0.0`
    /// - `>=1.0.0 <2.0.0` (two comparators)
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(Self::any());
        }
        if let Some(rest) = s.strip_prefix("~>") {
            return Self::parse_approximate(rest.trim());
        }
        if let Some(rest) = s.strip_prefix('^') {
            return Self::parse_caret(rest.trim());
        }
        if let Some(rest) = s.strip_prefix("==") {
            return Ok(Self::exact(parse_semver(rest.trim())?));
        }
        // Two comparators separated by whitespace
        if let Some(pos) = s.find(char::is_whitespace) {
            let (a, b) = s.split_at(pos);
            let lower = Self::parse_comparator(a.trim())?;
            let upper = Self::parse_comparator(b.trim())?;
            return Ok(lower.merge(&upper));
        }
        if s.starts_with('>') || s.starts_with('<') {
            return Self::parse_comparator(s);
        }
        Ok(Self::exact(parse_semver(s)?))
    }

    fn parse_comparator(s: &str) -> Result<Self> {
        if let Some(rest) = s.strip_prefix(">=") {
            Ok(Self::new(parse_semver(rest.trim())?, max_release(), true, true))
        } else if let Some(rest) = s.strip_prefix("<=") {
            Ok(Self::new(min_release(), parse_semver(rest.trim())?, true, true))
        } else if let Some(rest) = s.strip_prefix('>') {
            Ok(Self::new(parse_semver(rest.trim())?, max_release(), false, true))
        } else if let Some(rest) = s.strip_prefix('<') {
            Ok(Self::new(min_release(), parse_semver(rest.trim())?, true, false))
        } else {
            Err(Error::invalid(format!("invalid version comparator '{}'", s)))
        }
    }

    fn parse_caret(s: &str) -> Result<Self> {
        let v = parse_semver(s)?;
        let upper = if v.major > 0 {
            semver::Version::new(v.major + 1, 0, 0)
        } else if v.minor > 0 {
            semver::Version::new(0, v.minor + 1, 0)
        } else {
            semver::Version::new(0, 0, v.patch + 1)
        };
        Ok(Self::new(v, upper, true, false))
    }

    fn parse_approximate(s: &str) -> Result<Self> {
        let components = s.split('.').count();
        let v = parse_semver(&expand_partial_version(s))?;
        let upper = match components {
            0 | 1 => semver::Version::new(v.major + 1, 0, 0),
            2 => semver::Version::new(v.major + 1, 0, 0),
            _ => semver::Version::new(v.major, v.minor + 1, 0),
        };
        Ok(Self::new(v, upper, true, false))
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            return write!(f, "*");
        }
        if self.is_exact() {
            return write!(f, "{}", self.min);
        }
        write!(
            f,
            "{}{}",
            if self.inclusive_min { ">=" } else { ">" },
            self.min
        )?;
        if self.max != max_release() || !self.inclusive_max {
            write!(
                f,
                " {}{}",
                if self.inclusive_max { "<=" } else { "<" },
                self.max
            )?;
        }
        Ok(())
    }
}

/// Pad a partial version like `1.2` out to `1.2.0`
fn expand_partial_version(s: &str) -> String {
    let dots = s.bytes().filter(|&b| b == b'.').count();
    let mut out = s.to_string();
    for _ in dots..2 {
        out.push_str(".0");
    }
    out
}

fn parse_semver(s: &str) -> Result<semver::Version> {
    semver::Version::parse(&expand_partial_version(s))
        .map_err(|e| Error::invalid(format!("invalid version '{}': {}", s, e)))
}

/// The constraint kind of a dependency edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencySpec {
    /// A range of acceptable numeric versions
    Range(VersionRange),
    /// A specific SCM branch, stored without the `~` prefix
    Branch(String),
    /// A filesystem path, absolute or relative to the referring package
    Path(PathBuf),
}

/// A fully qualified dependency: the constraint plus its edge flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub spec: DependencySpec,
    /// Optional dependencies may remain unselected without failing
    pub optional: bool,
    /// Optional dependencies selected unless explicitly deselected
    pub enabled_by_default: bool,
}

impl Dependency {
    pub fn new(spec: DependencySpec) -> Self {
        Self {
            spec,
            optional: false,
            enabled_by_default: false,
        }
    }

    pub fn any() -> Self {
        Self::new(DependencySpec::Range(VersionRange::any()))
    }

    /// A dependency matching exactly the given version
    ///
    /// Branch versions produce a branch spec; `unknown` produces the
    /// invalid dependency.
    pub fn exact(v: &Version) -> Self {
        match v {
            Version::Release(r) => Self::new(DependencySpec::Range(VersionRange::exact(r.clone()))),
            Version::Branch(b) => Self::new(DependencySpec::Branch(b.clone())),
            Version::Unknown => Self::invalid(),
        }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::new(DependencySpec::Path(path.into()))
    }

    pub fn invalid() -> Self {
        Self::new(DependencySpec::Range(VersionRange::invalid()))
    }

    pub fn is_valid(&self) -> bool {
        match &self.spec {
            DependencySpec::Range(r) => r.is_valid(),
            _ => true,
        }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        match &self.spec {
            DependencySpec::Path(p) => Some(p),
            _ => None,
        }
    }

    /// The single version this dependency pins, if it pins one
    pub fn exact_version(&self) -> Option<Version> {
        match &self.spec {
            DependencySpec::Range(r) if r.is_exact() => Some(Version::Release(r.min.clone())),
            DependencySpec::Branch(b) => Some(Version::Branch(b.clone())),
            _ => None,
        }
    }

    /// Whether the given version satisfies this dependency
    ///
    /// Branch versions satisfy only the identical branch spec; path specs
    /// place no constraint on the version at all.
    pub fn matches(&self, v: &Version) -> bool {
        match (&self.spec, v) {
            (DependencySpec::Path(_), _) => true,
            (DependencySpec::Branch(b), Version::Branch(vb)) => b == vb,
            (DependencySpec::Branch(_), _) => false,
            (DependencySpec::Range(r), Version::Release(rv)) => r.matches(rv),
            (DependencySpec::Range(r), Version::Branch(_)) => r.is_any(),
            (DependencySpec::Range(_), Version::Unknown) => false,
        }
    }

    /// Intersect two dependencies
    ///
    /// Mismatched kinds (and unequal branches or paths) merge to the
    /// invalid dependency. The merged edge is optional only if both sides
    /// are, and default-enabled if either side is.
    pub fn merge(&self, other: &Dependency) -> Dependency {
        let spec = match (&self.spec, &other.spec) {
            (DependencySpec::Path(a), DependencySpec::Path(b)) if a == b => {
                DependencySpec::Path(a.clone())
            }
            (DependencySpec::Branch(a), DependencySpec::Branch(b)) if a == b => {
                DependencySpec::Branch(a.clone())
            }
            (DependencySpec::Range(a), DependencySpec::Range(b)) => {
                DependencySpec::Range(a.merge(b))
            }
            _ => DependencySpec::Range(VersionRange::invalid()),
        };
        Dependency {
            spec,
            optional: self.optional && other.optional,
            enabled_by_default: self.enabled_by_default || other.enabled_by_default,
        }
    }

    /// Parse the short textual form of a dependency spec
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(branch) = s.strip_prefix(BRANCH_PREFIX) {
            // "~>1.2.3" is a range, "~master" is a branch
            if !branch.starts_with('>') {
                if branch.is_empty() {
                    return Err(Error::invalid("empty branch name in dependency spec"));
                }
                return Ok(Self::new(DependencySpec::Branch(branch.to_string())));
            }
        }
        Ok(Self::new(DependencySpec::Range(VersionRange::parse(s)?)))
    }

    /// Decode the JSON surface of a dependency: either a spec string or an
    /// object with `version`/`path`/`optional`/`default` members
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Self::parse(s),
            Value::Object(obj) => {
                let mut dep = if let Some(path) = obj.get("path") {
                    let path = path
                        .as_str()
                        .ok_or_else(|| Error::invalid("dependency 'path' must be a string"))?;
                    Self::from_path(path)
                } else if let Some(version) = obj.get("version") {
                    let version = version
                        .as_str()
                        .ok_or_else(|| Error::invalid("dependency 'version' must be a string"))?;
                    Self::parse(version)?
                } else {
                    return Err(Error::invalid(
                        "dependency object needs a 'version' or 'path' member",
                    ));
                };
                if let Some(optional) = obj.get("optional") {
                    dep.optional = optional
                        .as_bool()
                        .ok_or_else(|| Error::invalid("dependency 'optional' must be a boolean"))?;
                }
                if let Some(default) = obj.get("default") {
                    dep.enabled_by_default = default
                        .as_bool()
                        .ok_or_else(|| Error::invalid("dependency 'default' must be a boolean"))?;
                }
                Ok(dep)
            }
            _ => Err(Error::invalid(
                "dependency must be a spec string or an object",
            )),
        }
    }

    /// Encode back to the JSON surface, using the short string form when
    /// no flags or path are involved
    pub fn to_json(&self) -> Value {
        let needs_object =
            self.optional || self.enabled_by_default || matches!(self.spec, DependencySpec::Path(_));
        if !needs_object {
            return Value::String(self.spec_string());
        }
        let mut obj = serde_json::Map::new();
        match &self.spec {
            DependencySpec::Path(p) => {
                obj.insert("path".into(), json!(p.to_string_lossy()));
            }
            _ => {
                obj.insert("version".into(), json!(self.spec_string()));
            }
        }
        if self.optional {
            obj.insert("optional".into(), json!(true));
        }
        if self.enabled_by_default {
            obj.insert("default".into(), json!(true));
        }
        Value::Object(obj)
    }

    /// The spec rendered without flags
    pub fn spec_string(&self) -> String {
        match &self.spec {
            DependencySpec::Range(r) => r.to_string(),
            DependencySpec::Branch(b) => format!("{}{}", BRANCH_PREFIX, b),
            DependencySpec::Path(p) => p.to_string_lossy().into_owned(),
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.spec_string())
    }
}

impl FromStr for Dependency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Dependency::parse(s)
    }
}
