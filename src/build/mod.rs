//! Build pipeline module for assetline
//!
//! Provides the incremental build system that turns sources into a static
//! site's assets.
//!
//! # Overview
//!
//! The build pipeline consists of:
//! - **Stages**: one transform per asset category ([`stages`])
//! - **Cache**: per-stylesheet results with include tracking ([`incremental`])
//! - **Graph**: async task DAG executor ([`graph`])
//! - **Pipeline**: build, production and single-stage plans ([`pipeline`])
//!
//! # Example
//!
//! ```ignore
//! use assetline::build::{Pipeline, StageContext};
//! use assetline::config::load_config;
//!
//! let config = load_config(None)?;
//! let ctx = StageContext::new(config, &project_root)?;
//! let result = Pipeline::new(ctx).build().await?;
//! println!("{}", result.summary());
//! ```

pub mod context;
pub mod graph;
pub mod incremental;
pub mod pipeline;
pub mod result;
pub mod stages;

pub use context::*;
pub use graph::{GraphError, TaskGraph, TaskOutcome};
pub use incremental::*;
pub use pipeline::*;
pub use result::*;
pub use stages::{run_stage, stage_for, StageError, TransformStage};
