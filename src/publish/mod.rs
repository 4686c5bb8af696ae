//! Publishing: upload the build tree and the version-control chains.
//!
//! `push` and `pullpush` are linear chains in a [`TaskGraph`], so a failed
//! step reports the remaining steps as blocked instead of running them.

pub mod ftp;
pub mod vcs;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::build::{BuildError, BuildResult, GraphError, StageReport, TaskGraph};
use crate::config::{ConfigError, VcsConfig};
use crate::paths::PathTable;
use crate::tools::{ChannelError, Publisher, VersionControl};

pub use ftp::FtpPublisher;
pub use vcs::GitCli;

/// Every file under the build root, sorted.
pub fn build_files(paths: &PathTable) -> Result<Vec<PathBuf>, ChannelError> {
    let root = glob::Pattern::escape(&paths.build_root().to_string_lossy());
    let pattern = format!("{}/**/*", root);

    let entries = glob::glob(&pattern).map_err(|e| ChannelError::Upload(e.to_string()))?;
    let mut files: Vec<PathBuf> = entries.filter_map(Result::ok).filter(|p| p.is_file()).collect();
    files.sort();
    Ok(files)
}

/// Upload the whole build tree under `remote_base`.
pub async fn deploy(
    paths: &PathTable,
    publisher: &dyn Publisher,
    remote_base: &str,
) -> Result<usize, ChannelError> {
    let files = build_files(paths)?;
    if files.is_empty() {
        return Err(ChannelError::Upload(format!(
            "nothing to upload in {}",
            paths.build_root().display()
        )));
    }
    tracing::info!("Uploading {} file(s) to {}", files.len(), remote_base);
    publisher.upload(paths.build_root(), &files, remote_base).await
}

/// Append a step that runs after `after`.
fn add_step<F, Fut>(
    graph: &mut TaskGraph<StageReport>,
    name: &'static str,
    after: Option<&'static str>,
    step: F,
) -> Result<(), GraphError>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), ChannelError>> + Send + 'static,
{
    let dependencies: Vec<&str> = after.into_iter().collect();
    graph.add_task(name, &dependencies, move || async move {
        let started = Instant::now();
        let result = step().await;
        match &result {
            Ok(()) => tracing::info!("'{}' done", name),
            Err(e) => tracing::error!("'{}' failed: {}", name, e),
        }
        StageReport::task(name, started, result.map_err(|e| e.to_string()))
    })
}

/// `init → add → commit → remote add → push`.
pub fn push_plan(vcs: Arc<dyn VersionControl>, config: &VcsConfig) -> Result<TaskGraph<StageReport>, BuildError> {
    if config.remote_url.is_empty() {
        return Err(ConfigError::Validation(vec!["vcs.remote_url: required by push".to_string()]).into());
    }

    let mut graph = TaskGraph::new();
    let git = vcs.clone();
    add_step(&mut graph, "init", None, move || async move { git.init().await })?;
    let git = vcs.clone();
    add_step(&mut graph, "add", Some("init"), move || async move { git.add_all().await })?;
    let (git, message) = (vcs.clone(), config.message.clone());
    add_step(&mut graph, "commit", Some("add"), move || async move { git.commit(&message).await })?;
    let (git, remote, url) = (vcs.clone(), config.remote.clone(), config.remote_url.clone());
    add_step(&mut graph, "remote", Some("commit"), move || async move {
        git.add_remote(&remote, &url).await
    })?;
    let (git, remote, branch) = (vcs, config.remote.clone(), config.branch.clone());
    add_step(&mut graph, "push", Some("remote"), move || async move { git.push(&remote, &branch).await })?;
    Ok(graph)
}

/// `add → commit → pull --rebase → push`.
pub fn pull_push_plan(vcs: Arc<dyn VersionControl>, config: &VcsConfig) -> Result<TaskGraph<StageReport>, BuildError> {
    let mut graph = TaskGraph::new();
    let git = vcs.clone();
    add_step(&mut graph, "add", None, move || async move { git.add_all().await })?;
    let (git, message) = (vcs.clone(), config.message.clone());
    add_step(&mut graph, "commit", Some("add"), move || async move { git.commit(&message).await })?;
    let (git, remote, branch) = (vcs.clone(), config.remote.clone(), config.branch.clone());
    add_step(&mut graph, "pull", Some("commit"), move || async move {
        git.pull_rebase(&remote, &branch).await
    })?;
    let (git, remote, branch) = (vcs, config.remote.clone(), config.branch.clone());
    add_step(&mut graph, "push", Some("pull"), move || async move { git.push(&remote, &branch).await })?;
    Ok(graph)
}

/// Run a step chain to completion.
pub async fn run_chain(graph: TaskGraph<StageReport>) -> Result<BuildResult, BuildError> {
    let start = Instant::now();
    let reports = graph.execute().await?;
    Ok(BuildResult::from_reports(reports, start.elapsed()))
}
