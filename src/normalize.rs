use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::FetchError;
use crate::external::ExternalCommand;
use crate::models::SpeciesSpec;
use crate::template::TemplateContext;

pub trait Normalizer: Send + Sync {
    fn normalize(
        &self,
        species: &SpeciesSpec,
        init: DateTime<Utc>,
        files: &[PathBuf],
        output: &Path,
    ) -> Result<(), FetchError>;
}

/// Arguments may use `{inputs}`, `{output}`, `{species}`, `{varname}` and
/// `{fcinit[:fmt]}`.
#[derive(Debug, Clone)]
pub struct CommandNormalizer {
    command: ExternalCommand,
}

impl CommandNormalizer {
    pub fn new(command: ExternalCommand) -> Self {
        Self { command }
    }
}

impl Normalizer for CommandNormalizer {
    fn normalize(
        &self,
        species: &SpeciesSpec,
        init: DateTime<Utc>,
        files: &[PathBuf],
        output: &Path,
    ) -> Result<(), FetchError> {
        let context = TemplateContext::new()
            .with_text("species", species.key)
            .with_text("varname", species.varname)
            .with_text("output", output.to_string_lossy())
            .with_time("fcinit", init);
        self.command.run(&context, files, None)?;
        if !output.exists() {
            return Err(FetchError::Command {
                program: self.command.program.clone(),
                code: Some(0),
                message: format!("no output written to {}", output.display()),
            });
        }
        Ok(())
    }
}
