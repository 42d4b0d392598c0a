//! Layered ignore rules for archive construction
//!
//! Three tiers feed one exclusion predicate, highest precedence first:
//!
//! 1. **override**: `.liftoffignore` files
//! 2. **base**: `.gitignore` files
//! 3. **default**: a short built-in list of local tooling artefacts
//!
//! The first tier with any matching pattern decides. Inside a tier the
//! most specific match wins: the pattern from the ignore file closest to the
//! path, then the pattern with the most path segments, then the later line.
//! Patterns use gitignore syntax and are relative to the directory holding
//! their ignore file.
//!
//! Independently of every tier, `.git` and secret env files (`.env`,
//! `.env.*`) are always excluded and cannot be re-included.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use globset::GlobBuilder;
use ignore::Match;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use liftoff_runtime::{BASE_IGNORE_FILE, OVERRIDE_IGNORE_FILE};
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::error::DeployError;

/// Version-control metadata directory
const CONTROL_DIR: &str = ".git";

/// Excluded unless an ignore file re-includes them
const DEFAULT_EXCLUDES: &[&str] = &[
    ".venv",
    "__pycache__",
    "*.pyc",
    ".mypy_cache",
    ".pytest_cache",
];

/// Where a pattern came from, in increasing precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IgnoreTier {
    /// Built-in defaults
    Default,
    /// Version-control ignore files
    Base,
    /// Deployment-specific ignore files
    Override,
}

/// Whether a pattern excludes or re-includes what it matches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    /// Plain pattern
    Exclude,
    /// `!` pattern
    Include,
}

/// One compiled ignore-file line
#[derive(Debug, Clone)]
pub struct IgnorePattern {
    tier: IgnoreTier,
    polarity: Polarity,
    text: String,
    /// Directory of the ignore file, relative to the application root
    dir: PathBuf,
    /// Same directory, as the matcher's root
    base: PathBuf,
    matcher: Gitignore,
    segments: usize,
    /// Literal leading path of an anchored pattern, relative to `dir`
    anchor: Option<PathBuf>,
    anchored: bool,
}

impl IgnorePattern {
    /// Compile `line` from an ignore file in `dir` (relative to `root`).
    /// Blank lines and comments yield `None`.
    pub fn parse(
        tier: IgnoreTier,
        root: &Path,
        dir: &Path,
        line: &str,
    ) -> Result<Option<Self>, ignore::Error> {
        let base = if dir.as_os_str().is_empty() {
            root.to_path_buf()
        } else {
            root.join(dir)
        };

        let mut builder = GitignoreBuilder::new(&base);
        builder.add_line(None, line)?;
        let matcher = builder.build()?;
        if matcher.is_empty() {
            return Ok(None);
        }
        check_syntax(line)?;

        let polarity = if matcher.num_whitelists() > 0 {
            Polarity::Include
        } else {
            Polarity::Exclude
        };

        let glob = line.trim().trim_start_matches('!');
        let body = glob.trim_end_matches('/');
        let anchored = body.contains('/');
        let components: Vec<&str> = body
            .trim_start_matches('/')
            .split('/')
            .filter(|c| !c.is_empty())
            .collect();
        let literal: PathBuf = components
            .iter()
            .take_while(|c| !c.contains(['*', '?', '[', '\\']))
            .collect();

        Ok(Some(Self {
            tier,
            polarity,
            text: line.trim().to_string(),
            dir: dir.to_path_buf(),
            base,
            matcher,
            segments: components.len(),
            anchor: (!literal.as_os_str().is_empty()).then_some(literal),
            anchored,
        }))
    }

    /// Source tier
    pub const fn tier(&self) -> IgnoreTier {
        self.tier
    }

    /// Exclude or re-include
    pub const fn polarity(&self) -> Polarity {
        self.polarity
    }

    /// Pattern as written
    pub fn text(&self) -> &str {
        &self.text
    }

    fn matches(&self, path: &Path, is_dir: bool) -> bool {
        if !path.starts_with(&self.base) || path == self.base {
            return false;
        }
        match self.matcher.matched_path_or_any_parents(path, is_dir) {
            Match::None => false,
            Match::Ignore(_) | Match::Whitelist(_) => true,
        }
    }

    /// Could this `!` pattern match something inside `rel_dir`?
    fn may_reinclude_under(&self, rel_dir: &Path) -> bool {
        if self.polarity != Polarity::Include {
            return false;
        }
        if !(rel_dir.starts_with(&self.dir) || self.dir.starts_with(rel_dir)) {
            return false;
        }
        match (&self.anchor, self.anchored) {
            (Some(anchor), true) => {
                let target = self.dir.join(anchor);
                target.starts_with(rel_dir) || rel_dir.starts_with(&target)
            }
            _ => true,
        }
    }
}

/// Gitignore matching reads an unclosed `[` as a literal; reject it instead
fn check_syntax(line: &str) -> Result<(), ignore::Error> {
    let trimmed = line.trim();
    let glob = trimmed.strip_prefix('!').unwrap_or(trimmed);
    GlobBuilder::new(glob.trim_end_matches('/'))
        .literal_separator(true)
        .backslash_escape(true)
        .build()
        .map(drop)
        .map_err(|err| ignore::Error::Glob {
            glob: Some(glob.to_string()),
            err: err.kind().to_string(),
        })
}

/// Specificity of a match inside one tier; larger wins
type Specificity = (usize, usize, usize);

/// Exclusion predicate over paths relative to one application root
#[derive(Debug, Clone)]
pub struct IgnoreRuleSet {
    root: PathBuf,
    overrides: Vec<IgnorePattern>,
    base: Vec<IgnorePattern>,
    defaults: Vec<IgnorePattern>,
    metadata_files: Vec<String>,
}

impl IgnoreRuleSet {
    /// Merge base-tier and override-tier patterns, each in file then line
    /// order, on top of the built-in defaults
    pub fn build(root: &Path, base: Vec<IgnorePattern>, overrides: Vec<IgnorePattern>) -> Self {
        let defaults = DEFAULT_EXCLUDES
            .iter()
            .filter_map(|line| {
                IgnorePattern::parse(IgnoreTier::Default, root, Path::new(""), line)
                    .ok()
                    .flatten()
            })
            .collect();

        Self {
            root: root.to_path_buf(),
            overrides,
            base,
            defaults,
            metadata_files: Vec::new(),
        }
    }

    /// Never ship files with this name (ignore files read by the packager)
    #[must_use]
    pub fn with_metadata_file(mut self, name: impl Into<String>) -> Self {
        self.metadata_files.push(name.into());
        self
    }

    /// Whether `rel_path` (relative to the root) stays out of the archive
    pub fn is_excluded(&self, rel_path: &Path, is_dir: bool) -> bool {
        if self.is_always_excluded(rel_path, is_dir) {
            return true;
        }

        let path = self.root.join(rel_path);
        let Some(pattern) = [&self.overrides, &self.base, &self.defaults]
            .into_iter()
            .find_map(|tier| Self::resolve(tier, &path, is_dir))
        else {
            return false;
        };
        trace!(
            "{} decided by {:?} pattern '{}'",
            rel_path.display(),
            pattern.tier(),
            pattern.text()
        );
        pattern.polarity() == Polarity::Exclude
    }

    /// Whether the walk can skip everything under `rel_dir`: the directory is
    /// excluded and no `!` pattern could re-include anything inside it
    pub fn should_prune(&self, rel_dir: &Path) -> bool {
        if self.is_always_excluded(rel_dir, true) {
            return true;
        }
        if !self.is_excluded(rel_dir, true) {
            return false;
        }
        !self
            .overrides
            .iter()
            .chain(&self.base)
            .chain(&self.defaults)
            .any(|pattern| pattern.may_reinclude_under(rel_dir))
    }

    fn resolve<'a>(
        patterns: &'a [IgnorePattern],
        path: &Path,
        is_dir: bool,
    ) -> Option<&'a IgnorePattern> {
        patterns
            .iter()
            .enumerate()
            .filter(|(_, pattern)| pattern.matches(path, is_dir))
            .max_by_key(|(order, pattern)| -> Specificity {
                (pattern.dir.components().count(), pattern.segments, *order)
            })
            .map(|(_, pattern)| pattern)
    }

    fn is_always_excluded(&self, rel_path: &Path, is_dir: bool) -> bool {
        let mut names = rel_path.components().filter_map(|c| c.as_os_str().to_str());
        if names.any(|name| name == CONTROL_DIR || is_secret_env_file(name)) {
            return true;
        }
        !is_dir
            && rel_path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| self.metadata_files.iter().any(|m| m == name))
    }
}

/// `.env` and `.env.<anything>`, but not `.envrc` or `env.py`
pub fn is_secret_env_file(name: &str) -> bool {
    name == ".env" || name.starts_with(".env.")
}

/// Which ignore files feed the rule set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreSources {
    /// Base tier file name
    pub base_file: String,
    /// Override tier file name
    pub override_file: String,
    /// Read ignore files in subdirectories too
    pub nested: bool,
}

impl Default for IgnoreSources {
    fn default() -> Self {
        Self {
            base_file: BASE_IGNORE_FILE.to_string(),
            override_file: OVERRIDE_IGNORE_FILE.to_string(),
            nested: true,
        }
    }
}

impl IgnoreSources {
    /// Read every ignore file under `root` into a rule set
    pub fn load(&self, root: &Path) -> Result<IgnoreRuleSet, DeployError> {
        let mut base = Vec::new();
        let mut overrides = Vec::new();

        let walker = WalkDir::new(root)
            .max_depth(if self.nested { usize::MAX } else { 0 })
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || e.file_name() != CONTROL_DIR);

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    // the archive walk reports unreadable paths
                    debug!("Skipping during ignore file discovery: {}", err);
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }

            let dir = entry.path().strip_prefix(root).unwrap_or(Path::new(""));
            read_ignore_file(root, dir, &self.base_file, IgnoreTier::Base, &mut base)?;
            read_ignore_file(
                root,
                dir,
                &self.override_file,
                IgnoreTier::Override,
                &mut overrides,
            )?;
        }

        debug!(
            "Loaded {} base and {} override ignore patterns",
            base.len(),
            overrides.len()
        );
        Ok(IgnoreRuleSet::build(root, base, overrides).with_metadata_file(&self.override_file))
    }
}

fn read_ignore_file(
    root: &Path,
    dir: &Path,
    file_name: &str,
    tier: IgnoreTier,
    patterns: &mut Vec<IgnorePattern>,
) -> Result<(), DeployError> {
    let path = root.join(dir).join(file_name);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) if path.is_dir() => {
            debug!("{} is a directory, not an ignore file: {}", path.display(), err);
            return Ok(());
        }
        Err(err) => {
            return Err(DeployError::Configuration(format!(
                "Failed to read {}: {err}",
                path.display()
            )));
        }
    };

    for (index, line) in contents.lines().enumerate() {
        match IgnorePattern::parse(tier, root, dir, line) {
            Ok(Some(pattern)) => patterns.push(pattern),
            Ok(None) => {}
            Err(err) => {
                return Err(DeployError::Configuration(format!(
                    "Invalid pattern '{}' at {}:{}: {err}",
                    line.trim(),
                    path.display(),
                    index + 1
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "ignore_rules_tests.rs"]
mod tests;
