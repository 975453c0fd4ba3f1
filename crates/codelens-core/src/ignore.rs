//! Ignore engine.
//!
//! Matches relative, POSIX-style paths against glob patterns with `*`, `**`,
//! and `?`. Pure and I/O-free: given the same pattern set, matching a path
//! always yields the same answer. The effective pattern set is the built-in
//! blocklist (minus any explicitly disabled entries) unioned with
//! per-project user patterns and patterns loaded from a project ignore
//! manifest.

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{OmniError, OmniResult};

/// Where an ignore pattern came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternSource {
    /// Hard-wired blocklist of dependency / VCS / build / cache directories.
    System,
    /// Configured per-project (e.g. from `hidden-files.json`).
    User,
    /// Loaded from the project's ignore manifest file.
    File,
}

/// One glob pattern plus its provenance and enabled state.
#[derive(Debug, Clone)]
pub struct IgnorePattern {
    pub pattern: String,
    pub source: PatternSource,
    pub disabled: bool,
}

/// Dependency / VCS / build / cache directories ignored unless explicitly
/// disabled. Each entry is a `**`-rooted pattern so it matches at any depth.
const BUILTIN_PATTERNS: &[&str] = &[
    "**/.git/**",
    "**/.svn/**",
    "**/.hg/**",
    "**/node_modules/**",
    "**/target/**",
    "**/dist/**",
    "**/build/**",
    "**/.next/**",
    "**/.nuxt/**",
    "**/out/**",
    "**/vendor/**",
    "**/.venv/**",
    "**/venv/**",
    "**/__pycache__/**",
    "**/.pytest_cache/**",
    "**/.mypy_cache/**",
    "**/.cache/**",
    "**/.DS_Store",
    "**/coverage/**",
    "**/.idea/**",
    "**/.vscode/**",
];

/// The built-in blocklist, for callers (e.g. project initialization)
/// that need to write it out as a starter ignore manifest.
pub fn builtin_patterns() -> &'static [&'static str] {
    BUILTIN_PATTERNS
}

/// A compiled, queryable set of ignore patterns.
///
/// Construction is cheap relative to repeated matching: patterns are
/// compiled once into a `GlobSet` and reused across an entire walk.
pub struct IgnoreEngine {
    patterns: Vec<IgnorePattern>,
    compiled: GlobSet,
}

impl IgnoreEngine {
    /// Build an engine from the built-in blocklist, a list of disabled
    /// built-in pattern strings, per-project user patterns, and patterns
    /// parsed from an ignore manifest's contents.
    pub fn build(disabled_builtins: &[String], user_patterns: &[String], manifest: &str) -> OmniResult<Self> {
        let mut patterns = Vec::new();

        for builtin in BUILTIN_PATTERNS {
            let disabled = disabled_builtins.iter().any(|d| d == builtin);
            patterns.push(IgnorePattern {
                pattern: (*builtin).to_string(),
                source: PatternSource::System,
                disabled,
            });
        }
        for user in user_patterns {
            patterns.push(IgnorePattern {
                pattern: user.clone(),
                source: PatternSource::User,
                disabled: false,
            });
        }
        for line in parse_manifest(manifest) {
            patterns.push(IgnorePattern {
                pattern: line,
                source: PatternSource::File,
                disabled: false,
            });
        }

        let compiled = compile(&patterns)?;
        Ok(Self { patterns, compiled })
    }

    /// An engine carrying only the built-in blocklist, none disabled.
    pub fn with_builtins_only() -> Self {
        let patterns: Vec<IgnorePattern> = BUILTIN_PATTERNS
            .iter()
            .map(|p| IgnorePattern {
                pattern: (*p).to_string(),
                source: PatternSource::System,
                disabled: false,
            })
            .collect();
        let compiled = compile(&patterns).expect("built-in patterns are always valid globs");
        Self { patterns, compiled }
    }

    /// The effective, enabled pattern set.
    pub fn patterns(&self) -> impl Iterator<Item = &IgnorePattern> {
        self.patterns.iter().filter(|p| !p.disabled)
    }

    /// True if `relative_path` (POSIX-separated, relative to the project
    /// root) matches any enabled pattern.
    pub fn is_ignored(&self, relative_path: &str) -> bool {
        self.compiled.is_match(relative_path)
    }

    /// True if a directory at `relative_dir` should be pruned during
    /// recursive enumeration without descending into it. A directory is
    /// prunable if it is itself matched, or if a pattern would match any
    /// path underneath it (tested via a synthetic child so `**` patterns
    /// that only match descendants still trigger the prune).
    pub fn should_prune_dir(&self, relative_dir: &str) -> bool {
        if relative_dir.is_empty() {
            return false;
        }
        self.is_ignored(relative_dir) || self.is_ignored(&format!("{relative_dir}/__codelens_probe__"))
    }
}

fn compile(patterns: &[IgnorePattern]) -> OmniResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for p in patterns.iter().filter(|p| !p.disabled) {
        let glob = Glob::new(&p.pattern).map_err(|e| OmniError::Config {
            details: format!("invalid ignore pattern `{}`: {e}", p.pattern),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| OmniError::Config {
        details: format!("failed to compile ignore pattern set: {e}"),
    })
}

/// Parse an ignore manifest: one pattern per line, `#` begins a comment,
/// blank lines ignored.
fn parse_manifest(manifest: &str) -> Vec<String> {
    manifest
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_blocks_node_modules_at_any_depth() {
        let engine = IgnoreEngine::with_builtins_only();
        assert!(engine.is_ignored("node_modules/left-pad/index.js"));
        assert!(engine.is_ignored("packages/app/node_modules/left-pad/index.js"));
    }

    #[test]
    fn test_double_star_matches_zero_segments() {
        let engine = IgnoreEngine::build(&[], &["**/*.log".to_string()], "").expect("build");
        assert!(engine.is_ignored("error.log"));
        assert!(engine.is_ignored("logs/nested/error.log"));
    }

    #[test]
    fn test_single_segment_pattern_matches_only_leaf() {
        let engine = IgnoreEngine::build(&[], &["README.md".to_string()], "").expect("build");
        assert!(!engine.is_ignored("docs/README.md"));
    }

    #[test]
    fn test_disabled_builtin_is_not_applied() {
        let disabled = vec!["**/dist/**".to_string()];
        let engine = IgnoreEngine::build(&disabled, &[], "").expect("build");
        assert!(!engine.is_ignored("dist/bundle.js"));
        assert!(engine.is_ignored("target/debug/app"));
    }

    #[test]
    fn test_manifest_comments_and_blank_lines_are_skipped() {
        let manifest = "# comment\n\n*.secret\n";
        let engine = IgnoreEngine::build(&[], &[], manifest).expect("build");
        assert!(engine.is_ignored("api.secret"));
    }

    #[test]
    fn test_should_prune_dir_for_blocked_directory() {
        let engine = IgnoreEngine::with_builtins_only();
        assert!(engine.should_prune_dir("node_modules"));
        assert!(!engine.should_prune_dir("src"));
    }

    #[test]
    fn test_effective_pattern_set_excludes_disabled() {
        let disabled = vec!["**/.git/**".to_string()];
        let engine = IgnoreEngine::build(&disabled, &["*.tmp".to_string()], "").expect("build");
        let enabled: Vec<&str> = engine.patterns().map(|p| p.pattern.as_str()).collect();
        assert!(!enabled.contains(&"**/.git/**"));
        assert!(enabled.contains(&"*.tmp"));
    }
}
