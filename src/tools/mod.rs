//! Collaborator interfaces for the heavy transformations.
//!
//! The pipeline owns orchestration only. Compiling templates, compiling and
//! post-processing CSS, minifying scripts, re-encoding images, notifying the
//! preview and talking to remote hosts all happen behind the traits below, so
//! tests can swap in fakes and deployments can swap in other tools.

pub mod command;
pub mod css;
pub mod image;
pub mod rtl;
pub mod sourcemap;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::config::SiteConfig;

pub use command::CommandTool;
pub use css::LightningCss;
pub use image::RasterOptimizer;
pub use rtl::RegexMirror;

/// Failure reported by a transformation collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ToolError {
    /// The external program could not be started
    #[error("Failed to run '{program}': {message}")]
    Spawn { program: String, message: String },
    /// The external program exited unsuccessfully
    #[error("'{program}' exited with {status}: {stderr}")]
    Failed { program: String, status: String, stderr: String },
    /// Any other collaborator error (parse errors, bad input)
    #[error("{0}")]
    Message(String),
}

/// Failure talking to the preview, an upload target or version control.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChannelError {
    #[error("Preview notification failed: {0}")]
    Preview(String),
    #[error("Upload failed: {0}")]
    Upload(String),
    #[error("Version control failed: {0}")]
    Vcs(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Compiles one template file to HTML.
#[async_trait]
pub trait TemplateCompiler: Send + Sync {
    async fn compile(&self, path: &Path, source: &str) -> Result<String, ToolError>;
}

/// Compiles one stylesheet (includes already expanded) to CSS.
#[async_trait]
pub trait StylesheetCompiler: Send + Sync {
    async fn compile(&self, path: &Path, source: &str) -> Result<String, ToolError>;
}

/// CSS post-processing passes applied after compilation.
pub trait CssPostProcessor: Send + Sync {
    /// Add vendor prefixes for the configured browser targets.
    fn prefix(&self, css: &str) -> Result<String, ToolError>;
    /// Merge media rules with identical queries, moving them to the end.
    fn merge_media(&self, css: &str) -> Result<String, ToolError>;
    /// Collapse longhand declarations into shorthands.
    fn collapse_shorthands(&self, css: &str) -> Result<String, ToolError>;
    fn minify(&self, css: &str) -> Result<String, ToolError>;
}

#[async_trait]
pub trait ScriptMinifier: Send + Sync {
    async fn minify(&self, path: &Path, source: &str) -> Result<String, ToolError>;
}

/// Re-encodes image bytes. CPU bound; callers run it on a blocking thread.
pub trait ImageOptimizer: Send + Sync {
    fn optimize(&self, path: &Path, bytes: &[u8]) -> Result<Vec<u8>, ToolError>;
}

/// Produces the right-to-left variant of a stylesheet.
pub trait Mirror: Send + Sync {
    fn mirror(&self, css: &str) -> String;
}

/// Receives the output paths a stage wrote.
#[async_trait]
pub trait PreviewChannel: Send + Sync {
    async fn notify(&self, changed: &[PathBuf]) -> Result<(), ChannelError>;
}

/// Preview channel for one-shot builds: drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPreview;

#[async_trait]
impl PreviewChannel for NullPreview {
    async fn notify(&self, _changed: &[PathBuf]) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// Uploads build output to a remote host.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Upload `files` (absolute, under `local_root`) to the same relative
    /// locations under `remote_base`. Returns the number of files sent.
    async fn upload(
        &self,
        local_root: &Path,
        files: &[PathBuf],
        remote_base: &str,
    ) -> Result<usize, ChannelError>;
}

/// The version-control operations the `push` and `pullpush` tasks chain.
#[async_trait]
pub trait VersionControl: Send + Sync {
    async fn init(&self) -> Result<(), ChannelError>;
    async fn add_all(&self) -> Result<(), ChannelError>;
    async fn commit(&self, message: &str) -> Result<(), ChannelError>;
    async fn add_remote(&self, name: &str, url: &str) -> Result<(), ChannelError>;
    async fn push(&self, remote: &str, branch: &str) -> Result<(), ChannelError>;
    async fn pull_rebase(&self, remote: &str, branch: &str) -> Result<(), ChannelError>;
}

/// The set of collaborators a build uses.
#[derive(Clone)]
pub struct Toolchain {
    pub templates: Arc<dyn TemplateCompiler>,
    pub stylesheets: Arc<dyn StylesheetCompiler>,
    pub css: Arc<dyn CssPostProcessor>,
    pub scripts: Arc<dyn ScriptMinifier>,
    pub images: Arc<dyn ImageOptimizer>,
    pub mirror: Arc<dyn Mirror>,
}

impl Toolchain {
    /// Default collaborators for a configuration.
    ///
    /// Templates, stylesheets and script minification run the configured
    /// external commands (`pug`, `sass` and `terser` by default). An empty
    /// stylesheet command selects the built-in plain-CSS engine instead.
    pub fn from_config(config: &SiteConfig) -> Self {
        let css = Arc::new(LightningCss::new(&config.stylesheet.targets));
        let stylesheets: Arc<dyn StylesheetCompiler> = if config.tools.stylesheets.is_empty() {
            css.clone()
        } else {
            Arc::new(CommandTool::from_argv(&config.tools.stylesheets))
        };

        Self {
            templates: Arc::new(CommandTool::from_argv(&config.tools.templates)),
            stylesheets,
            css,
            scripts: Arc::new(CommandTool::from_argv(&config.tools.script_minifier)),
            images: Arc::new(RasterOptimizer::from_config(&config.images)),
            mirror: Arc::new(RegexMirror),
        }
    }

    pub fn with_templates(mut self, templates: impl TemplateCompiler + 'static) -> Self {
        self.templates = Arc::new(templates);
        self
    }

    pub fn with_stylesheets(mut self, stylesheets: impl StylesheetCompiler + 'static) -> Self {
        self.stylesheets = Arc::new(stylesheets);
        self
    }

    pub fn with_css(mut self, css: impl CssPostProcessor + 'static) -> Self {
        self.css = Arc::new(css);
        self
    }

    pub fn with_scripts(mut self, scripts: impl ScriptMinifier + 'static) -> Self {
        self.scripts = Arc::new(scripts);
        self
    }

    pub fn with_images(mut self, images: impl ImageOptimizer + 'static) -> Self {
        self.images = Arc::new(images);
        self
    }

    pub fn with_mirror(mut self, mirror: impl Mirror + 'static) -> Self {
        self.mirror = Arc::new(mirror);
        self
    }
}

impl std::fmt::Debug for Toolchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolchain").finish_non_exhaustive()
    }
}
