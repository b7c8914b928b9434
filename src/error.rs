// src/error.rs

//! Error types for the dub package manager
//!
//! A single crate-wide error enum keeps the failure taxonomy in one place.
//! Recipe decoding distinguishes surface-level syntax errors from shape
//! errors; resolution failures carry the constraint set that could not be
//! satisfied so the caller can print a useful report.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// No recipe file was found in a package root
    #[error("no package recipe found in '{0}' (expected dub.json, dub.sdl or package.json)")]
    RecipeNotFound(PathBuf),

    /// The recipe text could not be parsed at the surface level
    #[error("malformed recipe syntax in '{file}': {message}")]
    MalformedSyntax { file: String, message: String },

    /// A recipe attribute carried a value of the wrong shape or an
    /// out-of-range content
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// A configuration name was requested that the recipe does not declare
    #[error("package '{package}' has no configuration named '{config}'")]
    UnknownConfiguration { package: String, config: String },

    /// A build type name that is neither built in nor declared in the recipe
    #[error("unknown build type '{0}'")]
    UnknownBuildType(String),

    /// A package name that no search path, selection or supplier knows about
    #[error("unknown package '{name}' (referenced with spec {spec})")]
    UnknownPackage { name: String, spec: String },

    /// A `$VARIABLE` reference in a build setting did not resolve
    #[error("unknown variable '${0}' in build settings")]
    UnknownVariable(String),

    /// The dependency or configuration graph contains a cycle
    #[error("dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    /// No assignment of versions satisfies every transitive constraint
    #[error("unresolvable dependency conflict on '{package}': {}", conflicts.join(", "))]
    UnresolvableConflict {
        package: String,
        conflicts: Vec<String>,
    },

    /// No per-package configuration assignment admits the requested platform
    #[error("no valid configuration for package '{package}' on the requested platform")]
    NoValidConfiguration { package: String },

    /// A relative path in a recipe escapes the package root
    #[error("path '{0}' points outside of the package workspace")]
    PathOutsideWorkspace(PathBuf),

    /// The SCM tool is missing or failed; callers degrade to `~master`
    #[error("source control tool unavailable: {0}")]
    ScmUnavailable(String),

    /// Another installer held the package lock past the bounded wait
    #[error("timed out waiting for concurrent installation of '{0}' to finish")]
    ConcurrentInstallTimeout(String),

    /// A cache file exists but cannot be understood; rebuilding recovers
    #[error("corrupt cache file '{file}': {message}")]
    CacheCorrupt { file: String, message: String },

    /// dub.selections.json carries an unsupported fileVersion
    #[error("unsupported selections file version {0} (expected 1)")]
    SelectionsVersionMismatch(i64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for an [`Error::InvalidValue`] with a formatted message
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidValue(msg.into())
    }
}
