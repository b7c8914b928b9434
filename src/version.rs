// src/version.rs

//! Version handling for package dependencies
//!
//! This module provides version parsing and comparison for package
//! versions: numeric semantic versions (`MAJOR.MINOR.PATCH[-PRE][+BUILD]`),
//! floating SCM branches (`~master`, `~develop`) and the `unknown`
//! placeholder used while a version has not been determined yet.

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Prefix marking a branch-based version string
pub const BRANCH_PREFIX: char = '~';

/// The default branch sentinel used when no version can be inferred
pub const MASTER_BRANCH: &str = "master";

/// A package version
///
/// Ordering is total: `Unknown` sorts below everything, numeric versions
/// compare semver-wise (a pre-release orders before its release), and
/// branches order after all numeric versions, lexicographically among
/// themselves.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    /// Placeholder while no version has been determined
    Unknown,
    /// A numeric semantic version
    Release(semver::Version),
    /// A floating SCM branch, stored without the `~` prefix
    Branch(String),
}

impl Version {
    /// The `~master` sentinel
    pub fn master() -> Self {
        Version::Branch(MASTER_BRANCH.to_string())
    }

    /// Parse a version string
    ///
    /// Accepts `1.2.3`, `1.2.3-rc.1`, `1.2.3+commit.4.abcdef` and branch
    /// forms such as `~master`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(branch) = s.strip_prefix(BRANCH_PREFIX) {
            if branch.is_empty() {
                return Err(Error::invalid("empty branch name in version string"));
            }
            return Ok(Version::Branch(branch.to_string()));
        }
        if s == "unknown" {
            return Ok(Version::Unknown);
        }
        let v = semver::Version::parse(s)
            .map_err(|e| Error::invalid(format!("invalid version '{}': {}", s, e)))?;
        Ok(Version::Release(v))
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, Version::Branch(_))
    }

    pub fn is_master(&self) -> bool {
        matches!(self, Version::Branch(b) if b == MASTER_BRANCH)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Version::Unknown)
    }

    /// Whether this is a numeric version carrying a pre-release tag
    pub fn is_pre_release(&self) -> bool {
        matches!(self, Version::Release(v) if !v.pre.is_empty())
    }

    /// The underlying semantic version, for numeric versions only
    pub fn release(&self) -> Option<&semver::Version> {
        match self {
            Version::Release(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Unknown => write!(f, "unknown"),
            Version::Release(v) => write!(f, "{}", v),
            Version::Branch(b) => write!(f, "{}{}", BRANCH_PREFIX, b),
        }
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        use Version::*;
        match (self, other) {
            (Unknown, Unknown) => Ordering::Equal,
            (Unknown, _) => Ordering::Less,
            (_, Unknown) => Ordering::Greater,
            (Release(a), Release(b)) => a.cmp(b),
            (Release(_), Branch(_)) => Ordering::Less,
            (Branch(_), Release(_)) => Ordering::Greater,
            (Branch(a), Branch(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
