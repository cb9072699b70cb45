//! Glob expansion of archive sources.

use std::collections::HashSet;
use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};

use globset::{Glob, GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Options applied when resolving a [`SourceSelector`].
#[derive(Debug, Clone)]
pub struct GlobOptions {
    /// Directory patterns are resolved against. Defaults to the process
    /// working directory.
    pub cwd: Option<PathBuf>,
    /// Directory archive names are computed relative to. Defaults to the
    /// static prefix of each pattern.
    pub base: Option<PathBuf>,
    /// Let wildcards match names starting with `.`.
    pub dot: bool,
    pub case_sensitive: bool,
}

impl Default for GlobOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            base: None,
            dot: false,
            case_sensitive: true,
        }
    }
}

impl GlobOptions {
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn base(mut self, base: impl Into<PathBuf>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn dot(mut self, dot: bool) -> Self {
        self.dot = dot;
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }
}

/// Ordered glob patterns. A leading `!` turns a pattern into an exclusion.
#[derive(Debug, Clone, Default)]
pub struct SourceSelector {
    patterns: Vec<String>,
}

impl SourceSelector {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Resolve the patterns against the filesystem.
    ///
    /// Matches come out pattern by pattern, in walk order (entries sorted by
    /// file name within each directory). A path matched by several patterns
    /// is reported once. Walking is blocking; call from a blocking context.
    pub fn expand(&self, options: &GlobOptions) -> Result<Vec<MatchedPath>> {
        let cwd = match &options.cwd {
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir()?,
        };
        let base = options.base.as_ref().map(|base| cwd.join(base));

        let (negated, positive): (Vec<&str>, Vec<&str>) = self
            .patterns
            .iter()
            .map(|p| p.strip_prefix("./").unwrap_or(p))
            .partition(|p| p.starts_with('!'));

        let mut excludes = GlobSetBuilder::new();
        for pattern in &negated {
            excludes.add(build_glob(&pattern[1..], options)?);
        }
        let excludes = excludes
            .build()
            .map_err(|e| Error::InvalidArgument(format!("invalid glob pattern: {e}")))?;

        let mut seen = HashSet::new();
        let mut matches = Vec::new();

        for pattern in positive {
            let compiled = PatternWalk::new(pattern, &cwd, options)?;
            let pattern_base = base.clone().unwrap_or_else(|| compiled.base.clone());

            for (path, metadata) in compiled.walk(&cwd, &excludes)? {
                if !seen.insert(path.clone()) {
                    continue;
                }
                debug!(pattern, path = %path.display(), "matched");
                matches.push(MatchedPath {
                    path,
                    base: pattern_base.clone(),
                    metadata,
                });
            }
        }

        Ok(matches)
    }
}

impl From<&str> for SourceSelector {
    fn from(pattern: &str) -> Self {
        Self::new([pattern])
    }
}

impl From<String> for SourceSelector {
    fn from(pattern: String) -> Self {
        Self::new([pattern])
    }
}

impl<S: Into<String>> From<Vec<S>> for SourceSelector {
    fn from(patterns: Vec<S>) -> Self {
        Self::new(patterns)
    }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for SourceSelector {
    fn from(patterns: [S; N]) -> Self {
        Self::new(patterns)
    }
}

impl From<&[&str]> for SourceSelector {
    fn from(patterns: &[&str]) -> Self {
        Self::new(patterns.iter().copied())
    }
}

/// A filesystem path produced by glob expansion.
#[derive(Debug, Clone)]
pub struct MatchedPath {
    pub path: PathBuf,
    /// Directory the archive name is relative to.
    pub base: PathBuf,
    /// `lstat` metadata; symlinks are not followed.
    pub metadata: Metadata,
}

impl MatchedPath {
    /// Slash-separated name of this path relative to its base. Empty when
    /// the path is the base itself.
    pub fn relative_name(&self) -> Result<String> {
        let relative = self.path.strip_prefix(&self.base).map_err(|_| {
            Error::InvalidArgument(format!(
                "'{}' is outside base '{}'",
                self.path.display(),
                self.base.display()
            ))
        })?;

        let segments: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect();
        Ok(segments.join("/"))
    }
}

/// One positive pattern split into the directory to walk and the matcher.
struct PatternWalk {
    /// Where walking starts: the pattern's longest literal prefix.
    root: PathBuf,
    /// Default base for names: `root` for wildcard patterns, the parent of
    /// a literal path.
    base: PathBuf,
    matcher: GlobMatcher,
    literal: bool,
    absolute: bool,
    hidden_allowed: bool,
}

impl PatternWalk {
    fn new(pattern: &str, cwd: &Path, options: &GlobOptions) -> Result<Self> {
        let matcher = build_glob(pattern, options)?.compile_matcher();

        let mut prefix = PathBuf::new();
        let mut literal = true;
        for component in Path::new(pattern).components() {
            if component
                .as_os_str()
                .to_str()
                .is_some_and(is_magic)
            {
                literal = false;
                break;
            }
            prefix.push(component);
        }

        let root = if prefix.as_os_str().is_empty() {
            cwd.to_path_buf()
        } else {
            cwd.join(&prefix)
        };
        let base = if literal {
            root.parent().map_or_else(|| root.clone(), Path::to_path_buf)
        } else {
            root.clone()
        };

        // A pattern that spells out a dot segment opts into hidden entries
        let hidden_allowed = options.dot
            || Path::new(pattern).components().any(|c| match c {
                Component::Normal(name) => name.to_string_lossy().starts_with('.'),
                _ => false,
            });

        Ok(Self {
            root,
            base,
            matcher,
            literal,
            absolute: Path::new(pattern).is_absolute(),
            hidden_allowed,
        })
    }

    fn walk(&self, cwd: &Path, excludes: &GlobSet) -> Result<Vec<(PathBuf, Metadata)>> {
        if std::fs::symlink_metadata(&self.root).is_err() {
            return Ok(Vec::new());
        }

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .follow_root_links(!self.literal)
            .sort_by_file_name()
            .min_depth(if self.literal { 0 } else { 1 })
            .max_depth(if self.literal { 0 } else { usize::MAX });

        let hidden_allowed = self.hidden_allowed;
        let entries = walker.into_iter().filter_entry(move |e| {
            hidden_allowed
                || e.depth() == 0
                || e.file_name().to_str().is_none_or(|s| !s.starts_with('.'))
        });

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::Stream {
                path: e.path().map_or_else(|| self.root.clone(), Path::to_path_buf),
                source: e.into(),
            })?;

            let candidate = if self.absolute {
                entry.path()
            } else {
                entry.path().strip_prefix(cwd).unwrap_or(entry.path())
            };
            if !self.matcher.is_match(candidate) || excludes.is_match(candidate) {
                continue;
            }

            let metadata = entry.metadata().map_err(|e| Error::Stream {
                path: entry.path().to_path_buf(),
                source: e.into(),
            })?;
            found.push((entry.into_path(), metadata));
        }

        Ok(found)
    }
}

fn is_magic(segment: &str) -> bool {
    segment.contains(['*', '?', '[', '{'])
}

fn build_glob(pattern: &str, options: &GlobOptions) -> Result<Glob> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .case_insensitive(!options.case_sensitive)
        .build()
        .map_err(|e| Error::InvalidArgument(format!("invalid glob pattern '{pattern}': {e}")))
}
