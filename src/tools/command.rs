//! External command collaborator.
//!
//! Runs a configured program with the source on stdin and takes the result
//! from stdout. The literal `{input}` in any argument is replaced with the
//! source path, so tools can resolve their own relative includes.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{ScriptMinifier, StylesheetCompiler, TemplateCompiler, ToolError};

/// Placeholder replaced with the source path.
pub const INPUT_PLACEHOLDER: &str = "{input}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTool {
    program: String,
    args: Vec<String>,
}

impl CommandTool {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }

    /// Build from an argv list (`["pug", "--pretty"]`). An empty list yields a
    /// tool that fails when run.
    pub fn from_argv(argv: &[String]) -> Self {
        match argv.split_first() {
            Some((program, args)) => Self::new(program.clone(), args.to_vec()),
            None => Self::new(String::new(), Vec::new()),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments with the input placeholder substituted.
    pub fn args_for(&self, input: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        self.args.iter().map(|a| a.replace(INPUT_PLACEHOLDER, &input)).collect()
    }

    /// Run the command, feeding `stdin_text` and returning stdout.
    pub async fn run(&self, input: &Path, stdin_text: &str) -> Result<String, ToolError> {
        if self.program.is_empty() {
            return Err(ToolError::Message("no command configured".to_string()));
        }

        let mut child = Command::new(&self.program)
            .args(self.args_for(input))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::Spawn { program: self.program.clone(), message: e.to_string() })?;

        // Write stdin from its own task so a large output can't deadlock us.
        if let Some(mut stdin) = child.stdin.take() {
            let data = stdin_text.as_bytes().to_vec();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&data).await {
                    tracing::debug!("stdin closed early: {}", e);
                }
            });
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ToolError::Spawn { program: self.program.clone(), message: e.to_string() })?;

        if !output.status.success() {
            return Err(ToolError::Failed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        String::from_utf8(output.stdout).map_err(|e| {
            ToolError::Message(format!("'{}' produced invalid UTF-8: {}", self.program, e))
        })
    }
}

#[async_trait]
impl TemplateCompiler for CommandTool {
    async fn compile(&self, path: &Path, source: &str) -> Result<String, ToolError> {
        self.run(path, source).await
    }
}

#[async_trait]
impl StylesheetCompiler for CommandTool {
    async fn compile(&self, path: &Path, source: &str) -> Result<String, ToolError> {
        self.run(path, source).await
    }
}

#[async_trait]
impl ScriptMinifier for CommandTool {
    async fn minify(&self, path: &Path, source: &str) -> Result<String, ToolError> {
        self.run(path, source).await
    }
}
