// src/scm.rs

//! Package version inference from source control
//!
//! When a recipe records no version and the package has no parent, the
//! version is derived from `git describe`: an exact tag `v<semver>` is the
//! version itself, and commits on top of a tag are encoded as build
//! metadata (`1.2.3+commit.4.g1a2b3c`). Without any tag the current
//! branch name is used. Spawning git is slow on Windows, so results are
//! cached there keyed by the HEAD commit hash.

use crate::error::{Error, Result};
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Cache file below the package root
const VERSION_CACHE_FILE: &str = ".dub/version.json";

#[derive(Debug, Serialize, Deserialize)]
struct VersionCache {
    commit: String,
    version: String,
}

/// Determine the package version from the git checkout at `root`
///
/// Fails with [`Error::ScmUnavailable`] when git is missing or the
/// directory is not a work tree; callers degrade to `~master`.
pub fn determine_version_with_git(root: &Path) -> Result<Version> {
    let git = which::which("git")
        .map_err(|e| Error::ScmUnavailable(format!("git executable not found: {}", e)))?;

    let head = if cfg!(windows) {
        let head = run_git(&git, root, &["rev-parse", "HEAD"]).ok();
        if let Some(head) = &head {
            if let Some(version) = read_cache(root, head) {
                debug!("using cached SCM version {} for {}", version, root.display());
                return Version::parse(&version);
            }
        }
        head
    } else {
        None
    };

    let version = describe_version(&git, root)?;

    if cfg!(windows) {
        if let Some(head) = head {
            write_cache(root, &head, &version.to_string());
        }
    }
    Ok(version)
}

fn describe_version(git: &Path, root: &Path) -> Result<Version> {
    if let Ok(describe) = run_git(git, root, &["describe", "--long", "--tags"]) {
        if let Some(version) = parse_describe_output(&describe) {
            return Ok(version);
        }
    }

    // No usable tag: fall back to the branch name, excluding detached HEAD
    let branch = run_git(git, root, &["rev-parse", "--abbrev-ref", "HEAD"])?;
    if branch.is_empty() || branch == "HEAD" {
        return Err(Error::ScmUnavailable(
            "work tree has neither a version tag nor a named branch".to_string(),
        ));
    }
    Ok(Version::Branch(branch))
}

/// Interpret `git describe --long --tags` output
///
/// The shape is `<tag>-<commits>-g<hash>`; only tags of the form
/// `v<semver>` are recognized.
fn parse_describe_output(describe: &str) -> Option<Version> {
    let mut parts = describe.rsplitn(3, '-');
    let hash = parts.next()?;
    let count: u64 = parts.next()?.parse().ok()?;
    let tag = parts.next()?;

    let semver_str = tag.strip_prefix('v')?;
    let tagged = semver::Version::parse(semver_str).ok()?;

    if count == 0 {
        return Some(Version::Release(tagged));
    }
    // Append commit info as build metadata; a '.' separator when the tag
    // already carries metadata of its own
    let separator = if semver_str.contains('+') { '.' } else { '+' };
    let full = format!("{}{}commit.{}.{}", semver_str, separator, count, hash);
    Version::parse(&full).ok()
}

fn run_git(git: &Path, root: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new(git)
        .args(args)
        .current_dir(root)
        .output()
        .map_err(|e| Error::ScmUnavailable(format!("failed to spawn git: {}", e)))?;
    if !output.status.success() {
        return Err(Error::ScmUnavailable(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn read_cache(root: &Path, head: &str) -> Option<String> {
    let path = root.join(VERSION_CACHE_FILE);
    let text = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str::<VersionCache>(&text) {
        Ok(cache) if cache.commit == head => Some(cache.version),
        Ok(_) => None,
        Err(e) => {
            debug!("ignoring corrupt version cache {}: {}", path.display(), e);
            None
        }
    }
}

fn write_cache(root: &Path, head: &str, version: &str) {
    let cache = VersionCache {
        commit: head.to_string(),
        version: version.to_string(),
    };
    let dir = root.join(".dub");
    if std::fs::create_dir_all(&dir).is_err() {
        return;
    }
    if let Ok(text) = serde_json::to_string_pretty(&cache) {
        let _ = std::fs::write(dir.join("version.json"), text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_describe_exact_tag() {
        let v = parse_describe_output("v1.2.3-0-g1a2b3c4").unwrap();
        assert_eq!(v.to_string(), "1.2.3");
    }

    #[test]
    fn test_parse_describe_commits_past_tag() {
        let v = parse_describe_output("v1.2.3-5-g1a2b3c4").unwrap();
        assert_eq!(v.to_string(), "1.2.3+commit.5.g1a2b3c4");
    }

    #[test]
    fn test_parse_describe_tag_with_metadata() {
        let v = parse_describe_output("v1.2.3+hotfix-2-gabc1234").unwrap();
        assert_eq!(v.to_string(), "1.2.3+hotfix.commit.2.gabc1234");
    }

    #[test]
    fn test_parse_describe_rejects_unversioned_tags() {
        assert!(parse_describe_output("release-3-gabc1234").is_none());
        assert!(parse_describe_output("nightly").is_none());
    }

    #[test]
    fn test_non_repository_degrades() {
        let tmp = tempfile::TempDir::new().unwrap();
        // Either git is absent or the directory is not a work tree; both
        // must surface as ScmUnavailable rather than a panic
        match determine_version_with_git(tmp.path()) {
            Err(Error::ScmUnavailable(_)) => {}
            other => panic!("expected ScmUnavailable, got {:?}", other),
        }
    }
}
