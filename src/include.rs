//! Inline include resolution for scripts and stylesheets
//!
//! Supports the `//= path` directive (scripts and stylesheets) and, for
//! stylesheets, single-line `@import "path";` of local partials. Paths are
//! resolved relative to the including file's directory. Included files are
//! expanded recursively with circular include detection.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

use crate::build::incremental::content_hash;
use crate::paths::normalize;

static INLINE_DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*//=\s*(?:require\s+)?["']?([^"'\s]+)["']?\s*$"#).expect("valid regex")
});
static IMPORT_DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*@import\s+["']([^"']+)["']\s*;?\s*$"#).expect("valid regex")
});

/// Error type for include resolution failures.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum IncludeError {
    /// Circular include detected
    #[error("Circular include detected: {}", .0.display())]
    CircularInclude(PathBuf),
    /// File not found
    #[error("Include file not found '{}': {1}", .0.display())]
    FileNotFound(PathBuf, String),
    /// IO error reading file
    #[error("Error reading include file '{}': {1}", .0.display())]
    IoError(PathBuf, String),
}

/// Which directive forms are recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    Script,
    Stylesheet,
}

/// A source file with every include expanded in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedSource {
    /// Expanded text
    pub text: String,
    /// `(includer, included)` edges in discovery order
    pub edges: Vec<(PathBuf, PathBuf)>,
    /// Content hash of every included file, as read during expansion
    pub digests: BTreeMap<PathBuf, String>,
}

impl ResolvedSource {
    /// Every file reached through inclusion, excluding the root.
    pub fn included_files(&self) -> BTreeSet<PathBuf> {
        self.edges.iter().map(|(_, included)| included.clone()).collect()
    }
}

enum Directive<'a> {
    /// `//=`: the target must exist
    Inline(&'a str),
    /// `@import`: expanded only when it names a local file
    Import(&'a str),
}

fn parse_directive(line: &str, syntax: Syntax) -> Option<Directive<'_>> {
    if let Some(caps) = INLINE_DIRECTIVE.captures(line) {
        return caps.get(1).map(|m| Directive::Inline(m.as_str()));
    }
    if syntax == Syntax::Stylesheet {
        if let Some(caps) = IMPORT_DIRECTIVE.captures(line) {
            return caps.get(1).map(|m| Directive::Import(m.as_str()));
        }
    }
    None
}

/// Locate a stylesheet import target the way Sass does: `_name.scss`,
/// `name.scss`, then the name as written.
///
/// Remote URLs and plain `.css` imports are never resolved locally.
pub fn find_import(dir: &Path, target: &str) -> Option<PathBuf> {
    if target.contains("://") || target.starts_with("url(") || target.ends_with(".css") {
        return None;
    }

    let target_path = Path::new(target);
    let parent = target_path.parent().unwrap_or(Path::new(""));
    let name = target_path.file_name()?.to_string_lossy().into_owned();
    let stem = name.strip_suffix(".scss").unwrap_or(&name);

    let candidates = [
        parent.join(format!("_{}.scss", stem)),
        parent.join(format!("{}.scss", stem)),
        parent.join(&name),
        parent.join(format!("_{}", name)),
    ];

    candidates.iter().map(|c| normalize(&dir.join(c))).find(|c| c.is_file())
}

/// Expand every include directive in `path`.
///
/// # Returns
///
/// The expanded text and the `(includer, included)` edges discovered on the
/// way, or an error for a missing `//=` target or a cycle.
///
/// # Example
///
/// ```ignore
/// // main.scss:  @import "base";   → src/sass/_base.scss inlined
/// // script.js:  //= lib/dom.js    → src/js/lib/dom.js inlined
/// ```
pub fn resolve_includes(path: &Path, syntax: Syntax) -> Result<ResolvedSource, IncludeError> {
    let mut stack = Vec::new();
    let mut resolved = ResolvedSource::default();
    let text = expand(&normalize(path), syntax, &mut stack, &mut resolved)?;
    resolved.text = text;
    Ok(resolved)
}

fn expand(
    path: &Path,
    syntax: Syntax,
    stack: &mut Vec<PathBuf>,
    out: &mut ResolvedSource,
) -> Result<String, IncludeError> {
    if stack.iter().any(|p| p == path) {
        return Err(IncludeError::CircularInclude(path.to_path_buf()));
    }

    let content = fs::read_to_string(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => IncludeError::FileNotFound(path.to_path_buf(), e.to_string()),
        _ => IncludeError::IoError(path.to_path_buf(), e.to_string()),
    })?;
    if !stack.is_empty() {
        out.digests.insert(path.to_path_buf(), content_hash(content.as_bytes()));
    }

    stack.push(path.to_path_buf());
    let dir = path.parent().unwrap_or(Path::new("")).to_path_buf();
    let mut text = String::with_capacity(content.len());

    for line in content.lines() {
        let included = match parse_directive(line, syntax) {
            Some(Directive::Inline(target)) => Some(normalize(&dir.join(target))),
            Some(Directive::Import(target)) => find_import(&dir, target),
            None => None,
        };

        match included {
            Some(included) => {
                out.edges.push((path.to_path_buf(), included.clone()));
                let body = expand(&included, syntax, stack, out)?;
                text.push_str(&body);
                if !body.is_empty() && !body.ends_with('\n') {
                    text.push('\n');
                }
            }
            None => {
                text.push_str(line);
                text.push('\n');
            }
        }
    }

    stack.pop();
    Ok(text)
}
