// src/platform.rs

//! Target platform description and platform-filter matching
//!
//! Recipe fields and configurations can be restricted to matching
//! platforms with hyphenated filter specifications such as `linux`,
//! `windows-x86_64` or `posix-x86_64-ldc`. A specification matches when
//! every token names one of the platform's operating system identifiers,
//! one of its architecture identifiers, or its compiler.

/// The platform a build is targeting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlatform {
    /// Operating system identifiers, most specific last (e.g. `posix`,
    /// `linux`)
    pub platform: Vec<String>,
    /// Architecture identifiers (e.g. `x86_64`)
    pub architecture: Vec<String>,
    /// Canonical compiler name (`dmd`, `ldc`, `gdc`)
    pub compiler: String,
}

impl BuildPlatform {
    pub fn new(
        platform: Vec<String>,
        architecture: Vec<String>,
        compiler: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            architecture,
            compiler: compiler.into(),
        }
    }

    /// The platform of the running host, assuming the default compiler
    pub fn host() -> Self {
        let mut platform = Vec::new();
        if cfg!(unix) {
            platform.push("posix".to_string());
        }
        platform.push(std::env::consts::OS.to_string());
        let architecture = vec![std::env::consts::ARCH.to_string()];
        Self::new(platform, architecture, "dmd")
    }

    /// Check a platform filter specification against this platform
    ///
    /// The specification is a hyphen-separated token list; the empty
    /// specification matches every platform. Leading hyphens (as left by
    /// splitting a suffixed field name) are tolerated.
    pub fn matches_specification(&self, spec: &str) -> bool {
        let spec = spec.trim_start_matches('-');
        if spec.is_empty() {
            return true;
        }
        spec.split('-').all(|token| self.matches_token(token))
    }

    fn matches_token(&self, token: &str) -> bool {
        self.platform.iter().any(|p| p == token)
            || self.architecture.iter().any(|a| a == token)
            || self.compiler == token
    }
}

impl std::fmt::Display for BuildPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.platform.last().map(String::as_str).unwrap_or("unknown"),
            self.architecture.first().map(String::as_str).unwrap_or("unknown"),
            self.compiler
        )
    }
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

    #[test]
    fn test_empty_spec_matches() {
        assert!(linux().matches_specification(""));
        assert!(linux().matches_specification("-"));
    }

    #[test]
    fn test_os_spec() {
        assert!(linux().matches_specification("linux"));
        assert!(linux().matches_specification("posix"));
        assert!(!linux().matches_specification("windows"));
    }

    #[test]
    fn test_os_arch_spec() {
        assert!(linux().matches_specification("linux-x86_64"));
        assert!(!linux().matches_specification("linux-aarch64"));
        assert!(!linux().matches_specification("windows-x86_64"));
    }

    #[test]
    fn test_compiler_spec() {
        assert!(linux().matches_specification("dmd"));
        assert!(linux().matches_specification("linux-x86_64-dmd"));
        assert!(!linux().matches_specification("linux-x86_64-ldc"));
    }
}
