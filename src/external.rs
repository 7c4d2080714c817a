use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::FetchError;
use crate::template::{render, TemplateContext};

/// Argument that expands to every input file, one argument each.
pub const INPUTS_ARG: &str = "{inputs}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ExternalCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn arguments(&self, context: &TemplateContext, inputs: &[PathBuf]) -> Vec<String> {
        let mut args = Vec::with_capacity(self.args.len() + inputs.len());
        for arg in &self.args {
            if arg == INPUTS_ARG {
                args.extend(inputs.iter().map(|path| path.to_string_lossy().to_string()));
            } else {
                args.push(render(arg, context));
            }
        }
        args
    }

    pub fn run(
        &self,
        context: &TemplateContext,
        inputs: &[PathBuf],
        cwd: Option<&Path>,
    ) -> Result<(), FetchError> {
        let args = self.arguments(context, inputs);
        debug!(program = %self.program, ?args, "running external command");

        let mut cmd = Command::new(&self.program);
        cmd.args(&args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        let output = cmd.output().map_err(|err| FetchError::Command {
            program: self.program.clone(),
            code: None,
            message: err.to_string(),
        })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("exited with {}", output.status)
        } else {
            stderr
        };
        Err(FetchError::Command {
            program: self.program.clone(),
            code: output.status.code(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inputs_expand_in_place() {
        let command = ExternalCommand::new(
            "ncrcat",
            vec!["-O".into(), INPUTS_ARG.into(), "{output}".into()],
        );
        let context = TemplateContext::new().with_text("output", "/out/x.nc");
        let inputs = vec![PathBuf::from("/t/a_000.nc"), PathBuf::from("/t/a_001.nc")];
        assert_eq!(
            command.arguments(&context, &inputs),
            vec!["-O", "/t/a_000.nc", "/t/a_001.nc", "/out/x.nc"]
        );
    }
}
