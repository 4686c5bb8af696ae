//! Path table: asset categories, their source globs and output directories.
//!
//! The table is built once from configuration and validated up front, so a
//! lookup by [`AssetCategory`] never fails afterwards. Discovery (expanding a
//! category's globs into [`SourceFile`]s) happens per stage run and can fail
//! with a [`ConfigError`] when a source directory is missing.

use crate::config::loader::resolve_path;
use crate::config::{CategoryConfig, ConfigError, SiteConfig};
use glob::{glob_with, MatchOptions, Pattern};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

/// `*` never crosses a directory separator; `**` does.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Logical asset category. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AssetCategory {
    Markup,
    Script,
    VendorScript,
    Stylesheet,
    Image,
    Font,
    Favicon,
}

impl AssetCategory {
    /// Every category, in table order.
    pub const ALL: [AssetCategory; 7] = [
        AssetCategory::Markup,
        AssetCategory::Script,
        AssetCategory::VendorScript,
        AssetCategory::Stylesheet,
        AssetCategory::Image,
        AssetCategory::Font,
        AssetCategory::Favicon,
    ];

    /// Stable name used for task ids and log output.
    pub fn name(self) -> &'static str {
        match self {
            AssetCategory::Markup => "markup",
            AssetCategory::Script => "script",
            AssetCategory::VendorScript => "vendor-script",
            AssetCategory::Stylesheet => "stylesheet",
            AssetCategory::Image => "image",
            AssetCategory::Font => "font",
            AssetCategory::Favicon => "favicon",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for AssetCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a file is a partial (leading underscore): consumed by inclusion,
/// never compiled on its own.
pub fn is_partial(path: &Path) -> bool {
    path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with('_'))
}

/// Lexically normalize a path, folding `.` and `..` components.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn has_wildcards(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

/// The directory a glob is rooted at: every leading component without
/// wildcards. For a literal path this is its parent directory.
pub fn glob_base(pattern: &Path) -> PathBuf {
    let mut base = PathBuf::new();
    let mut literal = true;
    for component in pattern.components() {
        if has_wildcards(&component.as_os_str().to_string_lossy()) {
            literal = false;
            break;
        }
        base.push(component.as_os_str());
    }
    if literal {
        base.pop();
    }
    base
}

/// A discovered source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Absolute path
    pub path: PathBuf,
    /// Category the file was discovered for
    pub category: AssetCategory,
    /// Partial flag (leading underscore naming convention)
    pub partial: bool,
    /// Path relative to the glob base, mirrored into the output directory
    pub relative: PathBuf,
}

impl SourceFile {
    /// Create a source file discovered under `base`.
    pub fn new(path: PathBuf, category: AssetCategory, base: &Path) -> Self {
        let relative = match path.strip_prefix(base) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
            _ => path.file_name().map(PathBuf::from).unwrap_or_default(),
        };
        let partial = is_partial(&path);
        Self { path, category, partial, relative }
    }

    /// Output location of this file inside `dir`.
    pub fn output_in(&self, dir: &Path) -> PathBuf {
        dir.join(&self.relative)
    }
}

#[derive(Debug, Clone)]
struct IncludePattern {
    text: String,
    pattern: Pattern,
    full: PathBuf,
    base: PathBuf,
    literal: bool,
}

/// A set of glob patterns with `!` exclusions, resolved against a root.
#[derive(Debug, Clone, Default)]
pub struct GlobSet {
    includes: Vec<IncludePattern>,
    excludes: Vec<Pattern>,
}

impl GlobSet {
    /// Compile patterns relative to `root`.
    pub fn new(root: &Path, patterns: &[String]) -> Result<Self, ConfigError> {
        let mut set = GlobSet::default();

        for raw in patterns {
            let (negated, pattern) = match raw.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, raw.as_str()),
            };
            let full = resolve_path(root, Path::new(pattern));
            let text = if Path::new(pattern).is_absolute() {
                pattern.to_string()
            } else {
                format!("{}/{}", Pattern::escape(&root.to_string_lossy()), pattern)
            };
            let compiled = Pattern::new(&text).map_err(|e| ConfigError::InvalidPattern {
                pattern: raw.clone(),
                message: e.to_string(),
            })?;

            if negated {
                set.excludes.push(compiled);
            } else {
                set.includes.push(IncludePattern {
                    base: glob_base(&full),
                    literal: !has_wildcards(pattern),
                    full,
                    text,
                    pattern: compiled,
                });
            }
        }

        Ok(set)
    }

    /// Whether `path` matches an include pattern and no exclusion.
    pub fn matches(&self, path: &Path) -> bool {
        self.includes.iter().any(|p| p.pattern.matches_path_with(path, MATCH_OPTIONS))
            && !self.is_excluded(path)
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.excludes.iter().any(|p| p.matches_path_with(path, MATCH_OPTIONS))
    }

    /// Base directories of the include patterns.
    pub fn bases(&self) -> impl Iterator<Item = &Path> {
        self.includes.iter().map(|p| p.base.as_path())
    }

    /// Expand the patterns into `(file, glob base)` pairs, sorted and
    /// deduplicated.
    pub fn discover(&self) -> Result<Vec<(PathBuf, PathBuf)>, ConfigError> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();

        for include in &self.includes {
            if include.literal {
                if !include.full.is_file() {
                    return Err(ConfigError::MissingSource(include.full.clone()));
                }
                if !self.is_excluded(&include.full) && seen.insert(include.full.clone()) {
                    files.push((include.full.clone(), include.base.clone()));
                }
                continue;
            }

            if !include.base.is_dir() {
                return Err(ConfigError::MissingSourceDir(include.base.clone()));
            }

            let entries = glob_with(&include.text, MATCH_OPTIONS).map_err(|e| {
                ConfigError::InvalidPattern { pattern: include.text.clone(), message: e.to_string() }
            })?;
            for entry in entries {
                match entry {
                    Ok(path) => {
                        if path.is_file() && !self.is_excluded(&path) && seen.insert(path.clone())
                        {
                            files.push((path, include.base.clone()));
                        }
                    }
                    Err(e) => tracing::warn!("error reading path: {}", e),
                }
            }
        }

        files.sort();
        Ok(files)
    }
}

/// Resolved locations for one category.
#[derive(Debug, Clone)]
pub struct CategoryPaths {
    pub category: AssetCategory,
    /// Files the stage reads
    pub sources: GlobSet,
    /// Files whose changes re-run the stage
    pub watch: GlobSet,
    /// Absolute output directory
    pub out: PathBuf,
    /// Bundle file name for concatenating stages
    pub bundle: Option<String>,
}

impl CategoryPaths {
    fn from_config(
        category: AssetCategory,
        config: &CategoryConfig,
        root: &Path,
        build_root: &Path,
    ) -> Result<Self, ConfigError> {
        let sources = GlobSet::new(root, &config.sources)?;
        let watch = if config.watch.is_empty() {
            sources.clone()
        } else {
            GlobSet::new(root, &config.watch)?
        };

        let out = normalize(&resolve_path(root, &config.out));
        if !out.starts_with(build_root) {
            return Err(ConfigError::OutsideBuildRoot { out, root: build_root.to_path_buf() });
        }

        Ok(Self { category, sources, watch, out, bundle: config.bundle.clone() })
    }

    /// Discover this category's source files.
    pub fn discover(&self) -> Result<Vec<SourceFile>, ConfigError> {
        Ok(self
            .sources
            .discover()?
            .into_iter()
            .map(|(path, base)| SourceFile::new(path, self.category, &base))
            .collect())
    }

    /// Absolute path of the bundle output, for bundling categories.
    pub fn bundle_path(&self) -> Option<PathBuf> {
        self.bundle.as_ref().map(|name| self.out.join(name))
    }
}

/// Static mapping from category to globs and output directory.
#[derive(Debug, Clone)]
pub struct PathTable {
    project_root: PathBuf,
    src_root: PathBuf,
    build_root: PathBuf,
    entries: Vec<CategoryPaths>,
}

impl PathTable {
    /// Build and validate the table for a project.
    pub fn from_config(config: &SiteConfig, project_root: &Path) -> Result<Self, ConfigError> {
        let root = project_root.canonicalize().unwrap_or_else(|_| normalize(project_root));
        let build_root = normalize(&resolve_path(&root, &config.project.out));
        let src_root = normalize(&resolve_path(&root, &config.project.src));

        let entries = AssetCategory::ALL
            .iter()
            .zip(config.categories())
            .map(|(&category, (_, cfg))| {
                CategoryPaths::from_config(category, cfg, &root, &build_root)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { project_root: root, src_root, build_root, entries })
    }

    /// Paths for a category.
    pub fn lookup(&self, category: AssetCategory) -> &CategoryPaths {
        &self.entries[category.index()]
    }

    /// Classify a changed path: the first category, in table order, whose
    /// watch globs match it.
    pub fn category_for(&self, path: &Path) -> Option<AssetCategory> {
        AssetCategory::ALL.into_iter().find(|&c| self.lookup(c).watch.matches(path))
    }

    /// Existing directories to subscribe to for watch mode, without nesting.
    pub fn watch_roots(&self) -> Vec<PathBuf> {
        let mut bases: Vec<PathBuf> = self
            .entries
            .iter()
            .flat_map(|e| e.watch.bases())
            .filter(|b| b.is_dir())
            .map(Path::to_path_buf)
            .collect();
        bases.sort();
        bases.dedup();

        let mut roots: Vec<PathBuf> = Vec::new();
        for base in bases {
            if !roots.iter().any(|r| base.starts_with(r)) {
                roots.push(base);
            }
        }
        roots
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn src_root(&self) -> &Path {
        &self.src_root
    }

    pub fn build_root(&self) -> &Path {
        &self.build_root
    }
}
