//! Command-line interface implementation
//!
//! This module provides the CLI entry point and dispatches to submodules
//! for specific command implementations.

mod build;
mod publish;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::build::StageContext;
use crate::config::{find_config, load_config, ConfigError, SiteConfig};
use crate::logging::init_logging;

/// Exit codes
pub(crate) const EXIT_SUCCESS: u8 = 0;
pub(crate) const EXIT_ERROR: u8 = 1;
pub(crate) const EXIT_INVALID_ARGS: u8 = 2;

/// assetline - build, watch and publish a static site
#[derive(Parser)]
#[command(name = "assetline")]
#[command(about = "Incremental asset pipeline for static sites: build, watch with live preview, publish")]
#[command(version)]
pub struct Cli {
    /// Path to assetline.toml (default: search upward from the current directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Defaults to `watch`
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run every stage once in development mode
    Build,
    /// Clean the build root, then run every stage in production mode
    Prod,
    /// Build, start the preview server and rebuild on change
    Watch {
        /// Skip the preview server
        #[arg(long)]
        no_serve: bool,
    },
    /// Remove the build tree
    Clean,
    /// Write the right-to-left variant of the built stylesheet bundle
    Rtl,
    /// Upload the build tree over FTP
    Deploy,
    /// First push: init, add, commit, add remote, push
    Push,
    /// Add, commit, pull --rebase, push
    Pullpush,
}

/// Load the configuration and determine the project root.
///
/// The project root is the directory holding assetline.toml, or the current
/// directory when running on defaults.
pub(crate) fn load_project(config_path: Option<&Path>) -> Result<(SiteConfig, PathBuf), ConfigError> {
    let found = match config_path {
        Some(path) => Some(path.to_path_buf()),
        None => find_config(),
    };

    let cwd = std::env::current_dir()?;
    match found {
        Some(path) => {
            tracing::debug!("Using config: {}", path.display());
            let config = load_config(Some(&path))?;
            let root = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => cwd,
            };
            Ok((config, root))
        }
        None => {
            tracing::debug!("No assetline.toml found, using defaults");
            Ok((load_config(None)?, cwd))
        }
    }
}

/// Build the stage context for a command, mapping config errors to an exit code.
pub(crate) fn load_context(config_path: Option<&Path>) -> Result<StageContext, ExitCode> {
    let loaded = load_project(config_path)
        .and_then(|(config, root)| StageContext::new(config, &root));
    loaded.map_err(|e| {
        eprintln!("Error: {}", e);
        ExitCode::from(EXIT_INVALID_ARGS)
    })
}

/// Parse arguments, initialise logging and run the command.
pub async fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = cli.config.as_deref();
    match cli.command.unwrap_or(Commands::Watch { no_serve: false }) {
        Commands::Build => build::run_build(config).await,
        Commands::Prod => build::run_prod(config).await,
        Commands::Watch { no_serve } => build::run_watch(config, !no_serve).await,
        Commands::Clean => build::run_clean(config).await,
        Commands::Rtl => build::run_rtl(config).await,
        Commands::Deploy => publish::run_deploy(config).await,
        Commands::Push => publish::run_push(config).await,
        Commands::Pullpush => publish::run_pullpush(config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_command_is_none() {
        let cli = Cli::parse_from(["assetline"]);
        assert!(cli.command.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn test_global_flags_after_verb() {
        let cli = Cli::parse_from(["assetline", "prod", "--verbose", "--config", "site/assetline.toml"]);
        assert_eq!(cli.command, Some(Commands::Prod));
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("site/assetline.toml")));
    }

    #[test]
    fn test_load_project_uses_config_directory() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("assetline.toml");
        fs::write(&path, "[project]\nname = \"demo\"\n").unwrap();

        let (config, root) = load_project(Some(&path)).unwrap();
        assert_eq!(config.project.name, "demo");
        assert_eq!(root, temp.path());
    }

    #[test]
    fn test_load_project_invalid_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("assetline.toml");
        fs::write(&path, "[project\n").unwrap();
        assert!(matches!(load_project(Some(&path)), Err(ConfigError::Parse(_))));
    }
}
