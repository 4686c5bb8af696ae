//! Script stage: inline includes, optional minification, one bundle.

use async_trait::async_trait;
use std::time::Instant;

use super::{into_report, write_output, StageError, TransformStage};
use crate::build::{CompileError, StageContext, StageReport};
use crate::include::{resolve_includes, Syntax};
use crate::paths::AssetCategory;

/// Bundles the script or vendor-script entries into their named bundle.
///
/// The bundle is withheld when any entry fails, so a broken edit never
/// replaces a working bundle with a truncated one.
#[derive(Debug, Clone, Copy)]
pub struct ScriptStage {
    category: AssetCategory,
}

impl ScriptStage {
    pub fn new(category: AssetCategory) -> Self {
        Self { category }
    }

    async fn execute(&self, ctx: &StageContext, started: Instant) -> Result<StageReport, StageError> {
        let paths = ctx.paths().lookup(self.category);
        let bundle_path = paths.bundle_path().ok_or(StageError::NoBundle(self.category))?;
        let files = paths.discover()?;

        let mut parts = Vec::new();
        let mut errors = Vec::new();

        for file in files.iter().filter(|f| !f.partial) {
            let resolved = match resolve_includes(&file.path, Syntax::Script) {
                Ok(resolved) => resolved,
                Err(e) => {
                    errors.push(CompileError::new(&file.path, e.to_string()));
                    continue;
                }
            };

            let text = if ctx.mode().is_production() {
                match ctx.tools().scripts.minify(&file.path, &resolved.text).await {
                    Ok(min) => min,
                    Err(e) => {
                        errors.push(CompileError::new(&file.path, e.to_string()));
                        continue;
                    }
                }
            } else {
                resolved.text
            };
            parts.push(text);
        }

        if !errors.is_empty() {
            return Ok(StageReport::finished(self.category, started, Vec::new(), errors));
        }

        let mut bundle = String::new();
        for part in parts {
            bundle.push_str(&part);
            if !bundle.ends_with('\n') {
                bundle.push('\n');
            }
        }

        write_output(&bundle_path, bundle).await?;
        Ok(StageReport::finished(self.category, started, vec![bundle_path], errors))
    }
}

#[async_trait]
impl TransformStage for ScriptStage {
    fn category(&self) -> AssetCategory {
        self.category
    }

    async fn run(&self, ctx: &StageContext) -> StageReport {
        let started = Instant::now();
        into_report(self.category, started, self.execute(ctx, started).await)
    }
}
