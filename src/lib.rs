//! assetline - Incremental asset pipeline for static sites
//!
//! This library provides functionality to:
//! - Classify sources into asset categories by glob ([`paths`])
//! - Run per-category transform stages concurrently as a task graph ([`build`])
//! - Reuse compiled stylesheets until one of their includes changes
//! - Watch sources and rebuild only the affected category ([`watch`])
//! - Serve the build root with live reload ([`serve`])
//! - Upload the build and drive version control ([`publish`])

pub mod build;
pub mod cli;
pub mod config;
pub mod include;
pub mod logging;
pub mod paths;
pub mod publish;
pub mod serve;
pub mod tools;
pub mod watch;
