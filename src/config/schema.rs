//! Configuration schema types for `assetline.toml`
//!
//! Defines the structure and validation rules for project configuration.
//! Every section has defaults reproducing the conventional `src/` → `build/`
//! layout, so an empty file (or no file at all) is a valid configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Project metadata section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name
    #[serde(default = "default_name")]
    pub name: String,
    /// Source root directory
    #[serde(default = "default_src")]
    pub src: PathBuf,
    /// Build output root directory
    #[serde(default = "default_out")]
    pub out: PathBuf,
}

fn default_name() -> String {
    "site".to_string()
}

fn default_src() -> PathBuf {
    PathBuf::from("src")
}

fn default_out() -> PathBuf {
    PathBuf::from("build")
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self { name: default_name(), src: default_src(), out: default_out() }
    }
}

/// Source, watch and output locations for one asset category.
///
/// Patterns are relative to the project root. A pattern starting with `!`
/// excludes matching files from the set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryConfig {
    /// Glob patterns selecting the files the stage reads
    pub sources: Vec<String>,
    /// Glob patterns whose changes re-run the stage (defaults to `sources`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub watch: Vec<String>,
    /// Output directory
    pub out: PathBuf,
    /// Name of the single bundled output file, for bundling stages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<String>,
}

impl CategoryConfig {
    fn new(sources: &[&str], watch: &[&str], out: &str, bundle: Option<&str>) -> Self {
        Self {
            sources: sources.iter().map(|s| s.to_string()).collect(),
            watch: watch.iter().map(|s| s.to_string()).collect(),
            out: PathBuf::from(out),
            bundle: bundle.map(str::to_string),
        }
    }
}

fn default_markup() -> CategoryConfig {
    CategoryConfig::new(
        &["src/pug/*.pug", "!src/pug/_*.pug"],
        &["src/pug/**/*.pug"],
        "build",
        None,
    )
}

fn default_script() -> CategoryConfig {
    CategoryConfig::new(&["src/js/script.js"], &[], "build/js", Some("script.js"))
}

fn default_vendor_script() -> CategoryConfig {
    CategoryConfig::new(&["src/js/vendor.js"], &[], "build/js", Some("vendor.js"))
}

fn default_stylesheet() -> CategoryConfig {
    CategoryConfig::new(&["src/sass/**/*.scss"], &[], "build/css", Some("main.css"))
}

fn default_image() -> CategoryConfig {
    CategoryConfig::new(&["src/img/**/*.*"], &["src/img/**/*"], "build/img", None)
}

fn default_font() -> CategoryConfig {
    CategoryConfig::new(&["src/fonts/*"], &[], "build/css/fonts", None)
}

fn default_favicon() -> CategoryConfig {
    CategoryConfig::new(&["src/favicon/*"], &[], "build/favicon", None)
}

/// Per-category path table configuration (`[paths.*]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_markup")]
    pub markup: CategoryConfig,
    #[serde(default = "default_script")]
    pub script: CategoryConfig,
    #[serde(default = "default_vendor_script")]
    pub vendor_script: CategoryConfig,
    #[serde(default = "default_stylesheet")]
    pub stylesheet: CategoryConfig,
    #[serde(default = "default_image")]
    pub image: CategoryConfig,
    #[serde(default = "default_font")]
    pub font: CategoryConfig,
    #[serde(default = "default_favicon")]
    pub favicon: CategoryConfig,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            markup: default_markup(),
            script: default_script(),
            vendor_script: default_vendor_script(),
            stylesheet: default_stylesheet(),
            image: default_image(),
            font: default_font(),
            favicon: default_favicon(),
        }
    }
}

/// Stylesheet stage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StylesheetConfig {
    /// Write `<bundle>.map` next to the merged stylesheet
    #[serde(default = "default_true")]
    pub source_map: bool,
    /// Also write a mirrored right-to-left bundle on every build
    #[serde(default)]
    pub rtl: bool,
    /// File-name suffix of the mirrored bundle
    #[serde(default = "default_rtl_suffix")]
    pub rtl_suffix: String,
    /// Minimum browser versions used for vendor prefixing (`chrome = "49"`)
    #[serde(default = "default_targets")]
    pub targets: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

fn default_rtl_suffix() -> String {
    "-rtl".to_string()
}

fn default_targets() -> BTreeMap<String, String> {
    [
        ("android", "4.4"),
        ("chrome", "49"),
        ("edge", "12"),
        ("firefox", "45"),
        ("ie", "10"),
        ("ios_saf", "9"),
        ("safari", "9"),
    ]
    .into_iter()
    .map(|(browser, version)| (browser.to_string(), version.to_string()))
    .collect()
}

impl Default for StylesheetConfig {
    fn default() -> Self {
        Self {
            source_map: true,
            rtl: false,
            rtl_suffix: default_rtl_suffix(),
            targets: default_targets(),
        }
    }
}

/// Image optimization settings (production builds only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    /// PNG optimization level, 0 (fast) to 7 (smallest)
    #[serde(default = "default_optimization_level")]
    pub optimization_level: u8,
    /// JPEG re-encode quality, 1-100
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_optimization_level() -> u8 {
    3
}

fn default_jpeg_quality() -> u8 {
    80
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self { optimization_level: default_optimization_level(), jpeg_quality: default_jpeg_quality() }
    }
}

/// External tool commands.
///
/// Each command receives the source text on stdin and must write the result
/// to stdout. `{input}` in an argument is replaced by the source file path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Template compiler
    #[serde(default = "default_template_command")]
    pub templates: Vec<String>,
    /// Stylesheet compiler; an empty list uses the built-in plain-CSS engine,
    /// which does not understand Sass syntax
    #[serde(default = "default_stylesheet_command")]
    pub stylesheets: Vec<String>,
    /// Script minifier used in production builds
    #[serde(default = "default_script_minifier")]
    pub script_minifier: Vec<String>,
}

fn default_template_command() -> Vec<String> {
    ["pug", "--pretty", "--path", "{input}"].iter().map(|s| s.to_string()).collect()
}

fn default_stylesheet_command() -> Vec<String> {
    ["sass", "--stdin", "--no-source-map"].iter().map(|s| s.to_string()).collect()
}

fn default_script_minifier() -> Vec<String> {
    ["terser", "--compress", "--mangle"].iter().map(|s| s.to_string()).collect()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            templates: default_template_command(),
            stylesheets: default_stylesheet_command(),
            script_minifier: default_script_minifier(),
        }
    }
}

/// Local preview server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServeConfig {
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind
    #[serde(default = "default_port")]
    pub port: u16,
    /// Inject the live-reload client into served HTML pages
    #[serde(default = "default_true")]
    pub live_reload: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port(), live_reload: true }
    }
}

/// Watch mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Debounce delay in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u32,
}

fn default_debounce_ms() -> u32 {
    100
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: default_debounce_ms() }
    }
}

/// Remote publish settings for `deploy`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// FTP host
    #[serde(default)]
    pub host: String,
    /// FTP control port
    #[serde(default = "default_ftp_port")]
    pub port: u16,
    /// FTP user
    #[serde(default)]
    pub user: String,
    /// Environment variable holding the FTP password
    #[serde(default = "default_password_env")]
    pub password_env: String,
    /// Remote directory the build tree is uploaded into
    #[serde(default = "default_remote_base")]
    pub remote_base: String,
}

fn default_ftp_port() -> u16 {
    21
}

fn default_password_env() -> String {
    "ASSETLINE_FTP_PASSWORD".to_string()
}

fn default_remote_base() -> String {
    "/".to_string()
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_ftp_port(),
            user: String::new(),
            password_env: default_password_env(),
            remote_base: default_remote_base(),
        }
    }
}

/// Version-control convenience settings for `push` / `pullpush`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcsConfig {
    /// Remote repository URL added by `push`
    #[serde(default)]
    pub remote_url: String,
    /// Remote name
    #[serde(default = "default_remote_name")]
    pub remote: String,
    /// Branch pushed and pulled
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Commit message
    #[serde(default = "default_commit_message")]
    pub message: String,
}

fn default_remote_name() -> String {
    "origin".to_string()
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_commit_message() -> String {
    "fc".to_string()
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            remote_url: String::new(),
            remote: default_remote_name(),
            branch: default_branch(),
            message: default_commit_message(),
        }
    }
}

/// Complete assetline.toml configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub stylesheet: StylesheetConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub serve: ServeConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub deploy: DeployConfig,
    #[serde(default)]
    pub vcs: VcsConfig,
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    /// Path to the invalid field (e.g., "paths.markup.sources")
    pub field: String,
    /// Error message
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "assetline.toml: '{}' {}", self.field, self.message)
    }
}

impl SiteConfig {
    /// Iterate the category sections with their config key.
    pub fn categories(&self) -> [(&'static str, &CategoryConfig); 7] {
        [
            ("markup", &self.paths.markup),
            ("script", &self.paths.script),
            ("vendor_script", &self.paths.vendor_script),
            ("stylesheet", &self.paths.stylesheet),
            ("image", &self.paths.image),
            ("font", &self.paths.font),
            ("favicon", &self.paths.favicon),
        ]
    }

    /// Validate the configuration and return any errors
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();
        let mut error = |field: String, message: &str| {
            errors.push(ConfigValidationError { field, message: message.to_string() })
        };

        if self.project.name.is_empty() {
            error("project.name".to_string(), "must be a non-empty string");
        }

        for (key, category) in self.categories() {
            if !category.sources.iter().any(|p| !p.starts_with('!')) {
                error(
                    format!("paths.{}.sources", key),
                    "must contain at least one non-negated glob pattern",
                );
            }
            if let Some(bundle) = &category.bundle {
                if bundle.is_empty() || bundle.contains('/') || bundle.contains('\\') {
                    error(format!("paths.{}.bundle", key), "must be a plain file name");
                }
            }
        }

        for key in ["script", "vendor_script", "stylesheet"] {
            let category = match key {
                "script" => &self.paths.script,
                "vendor_script" => &self.paths.vendor_script,
                _ => &self.paths.stylesheet,
            };
            if category.bundle.is_none() {
                error(format!("paths.{}.bundle", key), "is required for bundling stages");
            }
        }

        if self.images.optimization_level > 7 {
            error("images.optimization_level".to_string(), "must be between 0 and 7");
        }
        if !(1..=100).contains(&self.images.jpeg_quality) {
            error("images.jpeg_quality".to_string(), "must be between 1 and 100");
        }
        if self.serve.port == 0 {
            error("serve.port".to_string(), "must be a positive port number");
        }
        if self.tools.templates.is_empty() {
            error("tools.templates".to_string(), "must name a template compiler command");
        }
        if self.stylesheet.rtl_suffix.is_empty() {
            error("stylesheet.rtl_suffix".to_string(), "must be non-empty");
        }

        errors
    }

    /// Check if validation passed
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}
