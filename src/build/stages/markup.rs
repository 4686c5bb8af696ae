//! Markup stage: templates to HTML.

use async_trait::async_trait;
use std::time::Instant;

use super::{into_report, read_source, write_output, StageError, TransformStage};
use crate::build::{CompileError, StageContext, StageReport};
use crate::paths::AssetCategory;

/// Compiles every non-partial template to `<out>/<relative>.html`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkupStage;

impl MarkupStage {
    async fn execute(&self, ctx: &StageContext, started: Instant) -> Result<StageReport, StageError> {
        let paths = ctx.paths().lookup(AssetCategory::Markup);
        let files = paths.discover()?;

        let mut outputs = Vec::new();
        let mut errors = Vec::new();

        for file in files.iter().filter(|f| !f.partial) {
            let source = match read_source(&file.path).await {
                Ok(source) => source,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };

            match ctx.tools().templates.compile(&file.path, &source).await {
                Ok(html) => {
                    let out = file.output_in(&paths.out).with_extension("html");
                    write_output(&out, html).await?;
                    tracing::debug!("{} -> {}", file.path.display(), out.display());
                    outputs.push(out);
                }
                Err(e) => errors.push(CompileError::new(&file.path, e.to_string())),
            }
        }

        Ok(StageReport::finished(AssetCategory::Markup, started, outputs, errors))
    }
}

#[async_trait]
impl TransformStage for MarkupStage {
    fn category(&self) -> AssetCategory {
        AssetCategory::Markup
    }

    async fn run(&self, ctx: &StageContext) -> StageReport {
        let started = Instant::now();
        into_report(AssetCategory::Markup, started, self.execute(ctx, started).await)
    }
}
