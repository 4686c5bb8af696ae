//! Build command implementations (build, prod, watch, clean, rtl)

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use super::{load_context, EXIT_ERROR, EXIT_SUCCESS};
use crate::build::stages::stylesheet::write_mirrored;
use crate::build::{clean_output, shared_cache, BuildError, BuildResult, Pipeline};
use crate::serve::PreviewServer;

fn report(result: Result<BuildResult, BuildError>) -> ExitCode {
    match result {
        Ok(result) if result.is_success() => {
            println!("{}", result.summary());
            ExitCode::from(EXIT_SUCCESS)
        }
        Ok(result) => {
            eprintln!("{}", result.summary());
            ExitCode::from(EXIT_ERROR)
        }
        Err(e) => {
            eprintln!("Build error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Run every stage once in development mode
pub async fn run_build(config: Option<&Path>) -> ExitCode {
    let ctx = match load_context(config) {
        Ok(ctx) => ctx,
        Err(code) => return code,
    };
    report(Pipeline::new(ctx).build().await)
}

/// Clean, then run every stage in production mode
pub async fn run_prod(config: Option<&Path>) -> ExitCode {
    let ctx = match load_context(config) {
        Ok(ctx) => ctx,
        Err(code) => return code,
    };
    report(Pipeline::new(ctx).production().await)
}

/// Initial build, preview server, then rebuild on change
pub async fn run_watch(config: Option<&Path>, serve: bool) -> ExitCode {
    let ctx = match load_context(config) {
        Ok(ctx) => ctx.with_cache(shared_cache()),
        Err(code) => return code,
    };

    // Failures are reported and fixed while watching.
    let initial = Pipeline::new(ctx.clone()).build().await;
    match &initial {
        Ok(result) if result.is_success() => println!("{}", result.summary()),
        Ok(result) => eprintln!("{}", result.summary()),
        Err(e) => eprintln!("Build error: {}", e),
    }

    let mut ctx = ctx;
    let mut server = None;
    if serve {
        let settings = ctx.config().serve.clone();
        let root = ctx.paths().build_root().to_path_buf();
        if let Err(e) = tokio::fs::create_dir_all(&root).await {
            eprintln!("Error: cannot create {}: {}", root.display(), e);
            return ExitCode::from(EXIT_ERROR);
        }
        match PreviewServer::start(&root, &settings.host, settings.port, settings.live_reload).await {
            Ok(started) => {
                println!("Serving {} at http://{}", root.display(), started.local_addr());
                ctx = ctx.with_preview(Arc::new(started.handle()));
                server = Some(started);
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::from(EXIT_ERROR);
            }
        }
    }

    println!("Watching for changes, press Ctrl+C to stop");
    let debounce = Duration::from_millis(u64::from(ctx.config().watch.debounce_ms));
    let result = crate::watch::watch(ctx, debounce).await;
    if let Some(server) = server {
        server.shutdown();
    }

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(e) => {
            eprintln!("Watch error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Remove the build tree
pub async fn run_clean(config: Option<&Path>) -> ExitCode {
    let ctx = match load_context(config) {
        Ok(ctx) => ctx,
        Err(code) => return code,
    };
    match clean_output(ctx.paths()).await {
        Ok(()) => {
            println!("Cleaned {}", ctx.paths().build_root().display());
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Mirror the built stylesheet bundle
pub async fn run_rtl(config: Option<&Path>) -> ExitCode {
    let ctx = match load_context(config) {
        Ok(ctx) => ctx,
        Err(code) => return code,
    };
    match write_mirrored(&ctx).await {
        Ok(path) => {
            println!("Wrote {}", path.display());
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Run 'assetline build' first");
            ExitCode::from(EXIT_ERROR)
        }
    }
}
