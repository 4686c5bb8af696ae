//! Stage context containing configuration and state for a build.

use std::path::Path;
use std::sync::Arc;

use crate::config::{ConfigError, SiteConfig};
use crate::paths::PathTable;
use crate::tools::{NullPreview, PreviewChannel, Toolchain};

use super::incremental::SharedCache;

/// Build mode. Fixed for a run and passed explicitly to every stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BuildMode {
    /// Fast, readable output; may use the incremental cache
    #[default]
    Development,
    /// Optimized output; always a full rebuild
    Production,
}

impl BuildMode {
    pub fn is_production(self) -> bool {
        self == BuildMode::Production
    }
}

impl std::fmt::Display for BuildMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildMode::Development => write!(f, "development"),
            BuildMode::Production => write!(f, "production"),
        }
    }
}

/// Everything a stage needs to run.
///
/// Cheap to clone; stages run as independent tasks, each with its own copy.
#[derive(Clone)]
pub struct StageContext {
    /// The loaded configuration
    config: Arc<SiteConfig>,
    /// Resolved paths
    paths: Arc<PathTable>,
    tools: Toolchain,
    preview: Arc<dyn PreviewChannel>,
    mode: BuildMode,
    cache: Option<SharedCache>,
}

impl StageContext {
    /// Create a new stage context.
    ///
    /// # Arguments
    /// - `config` - The loaded configuration
    /// - `project_root` - The project root directory
    pub fn new(config: SiteConfig, project_root: &Path) -> Result<Self, ConfigError> {
        let paths = PathTable::from_config(&config, project_root)?;
        let tools = Toolchain::from_config(&config);
        Ok(Self {
            config: Arc::new(config),
            paths: Arc::new(paths),
            tools,
            preview: Arc::new(NullPreview),
            mode: BuildMode::Development,
            cache: None,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    pub fn paths(&self) -> &PathTable {
        &self.paths
    }

    pub fn tools(&self) -> &Toolchain {
        &self.tools
    }

    pub fn preview(&self) -> &dyn PreviewChannel {
        self.preview.as_ref()
    }

    pub fn mode(&self) -> BuildMode {
        self.mode
    }

    /// The incremental cache, if this run may use it.
    ///
    /// Always `None` in production, whatever was attached.
    pub fn cache(&self) -> Option<&SharedCache> {
        match self.mode {
            BuildMode::Development => self.cache.as_ref(),
            BuildMode::Production => None,
        }
    }

    /// Set the build mode.
    pub fn with_mode(mut self, mode: BuildMode) -> Self {
        self.mode = mode;
        self
    }

    /// Replace the collaborators.
    pub fn with_tools(mut self, tools: Toolchain) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_preview(mut self, preview: Arc<dyn PreviewChannel>) -> Self {
        self.preview = preview;
        self
    }

    /// Attach an incremental cache (used in development only).
    pub fn with_cache(mut self, cache: SharedCache) -> Self {
        self.cache = Some(cache);
        self
    }
}

impl std::fmt::Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("project_root", &self.paths.project_root())
            .field("mode", &self.mode)
            .field("cached", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::incremental::shared_cache;
    use tempfile::TempDir;

    fn create_test_context() -> (TempDir, StageContext) {
        let temp = TempDir::new().expect("should create temp dir");
        let ctx = StageContext::new(SiteConfig::default(), temp.path()).expect("should build context");
        (temp, ctx)
    }

    #[test]
    fn test_defaults() {
        let (_temp, ctx) = create_test_context();
        assert_eq!(ctx.mode(), BuildMode::Development);
        assert!(ctx.cache().is_none());
        assert!(ctx.paths().build_root().ends_with("build"));
    }

    #[test]
    fn test_cache_used_in_development() {
        let (_temp, ctx) = create_test_context();
        let ctx = ctx.with_cache(shared_cache());
        assert!(ctx.cache().is_some());
    }

    #[test]
    fn test_production_bypasses_cache() {
        let (_temp, ctx) = create_test_context();
        let ctx = ctx.with_cache(shared_cache()).with_mode(BuildMode::Production);
        assert!(ctx.cache().is_none());
        assert!(ctx.mode().is_production());
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(BuildMode::Development.to_string(), "development");
        assert_eq!(BuildMode::Production.to_string(), "production");
    }
}
