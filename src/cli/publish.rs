//! Publish command implementations (deploy, push, pullpush)

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use super::{load_context, EXIT_ERROR, EXIT_INVALID_ARGS, EXIT_SUCCESS};
use crate::build::{BuildError, BuildResult};
use crate::publish::{deploy, pull_push_plan, push_plan, run_chain, FtpPublisher, GitCli};

/// Upload the build tree
pub async fn run_deploy(config: Option<&Path>) -> ExitCode {
    let ctx = match load_context(config) {
        Ok(ctx) => ctx,
        Err(code) => return code,
    };
    let settings = &ctx.config().deploy;

    let publisher = match FtpPublisher::from_config(settings) {
        Ok(publisher) => publisher,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };

    match deploy(ctx.paths(), &publisher, &settings.remote_base).await {
        Ok(count) => {
            println!("Uploaded {} file(s) to {}:{}", count, settings.host, settings.remote_base);
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("Deploy failed: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn report_chain(result: Result<BuildResult, BuildError>) -> ExitCode {
    match result {
        Ok(result) if result.is_success() => {
            println!("{}", result.summary());
            ExitCode::from(EXIT_SUCCESS)
        }
        Ok(result) => {
            eprintln!("{}", result.summary());
            ExitCode::from(EXIT_ERROR)
        }
        Err(BuildError::Config(e)) => {
            eprintln!("Error: {}", e);
            ExitCode::from(EXIT_INVALID_ARGS)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// First push of the project repository
pub async fn run_push(config: Option<&Path>) -> ExitCode {
    let ctx = match load_context(config) {
        Ok(ctx) => ctx,
        Err(code) => return code,
    };
    let git = Arc::new(GitCli::new(ctx.paths().project_root()));
    let result = match push_plan(git, &ctx.config().vcs) {
        Ok(plan) => run_chain(plan).await,
        Err(e) => Err(e),
    };
    report_chain(result)
}

/// Commit, rebase on the remote and push
pub async fn run_pullpush(config: Option<&Path>) -> ExitCode {
    let ctx = match load_context(config) {
        Ok(ctx) => ctx,
        Err(code) => return code,
    };
    let git = Arc::new(GitCli::new(ctx.paths().project_root()));
    let result = match pull_push_plan(git, &ctx.config().vcs) {
        Ok(plan) => run_chain(plan).await,
        Err(e) => Err(e),
    };
    report_chain(result)
}
