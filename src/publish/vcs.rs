//! `git` subprocess implementation of [`VersionControl`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::tools::{ChannelError, VersionControl};

/// Runs `git` in a working directory.
#[derive(Debug, Clone)]
pub struct GitCli {
    dir: PathBuf,
    program: String,
}

impl GitCli {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), program: "git".to_string() }
    }

    /// Use another executable in place of `git`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn git(&self, args: &[&str]) -> Result<(), ChannelError> {
        tracing::debug!("{} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ChannelError::Vcs(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() { stdout } else { stderr };
            return Err(ChannelError::Vcs(format!(
                "{} {} exited with {}: {}",
                self.program,
                args.first().copied().unwrap_or_default(),
                output.status,
                detail.trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn init(&self) -> Result<(), ChannelError> {
        self.git(&["init"]).await
    }

    async fn add_all(&self) -> Result<(), ChannelError> {
        self.git(&["add", "--all", "."]).await
    }

    async fn commit(&self, message: &str) -> Result<(), ChannelError> {
        self.git(&["commit", "-m", message]).await
    }

    async fn add_remote(&self, name: &str, url: &str) -> Result<(), ChannelError> {
        self.git(&["remote", "add", name, url]).await
    }

    async fn push(&self, remote: &str, branch: &str) -> Result<(), ChannelError> {
        self.git(&["push", remote, branch]).await
    }

    async fn pull_rebase(&self, remote: &str, branch: &str) -> Result<(), ChannelError> {
        self.git(&["pull", "--rebase", remote, branch]).await
    }
}
