use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::domain::ForecastWindow;
use crate::drivers::{
    sequence_suffix, species_context, staged_name, transfer_each, ForecastSource, DEFAULT_RETRIES,
};
use crate::error::FetchError;
use crate::external::ExternalCommand;
use crate::listing::{filter_by_offset, FilenamePattern};
use crate::models::SpeciesSpec;
use crate::template::render;

/// Hook exit status that means "not published yet" (EX_TEMPFAIL).
pub const DEFAULT_UNAVAILABLE_EXIT_CODE: i32 = 75;

#[derive(Debug, Clone)]
pub struct FilesystemDriver {
    path: String,
    pattern: FilenamePattern,
    copy: bool,
    retries: u32,
    hook: Option<ExternalCommand>,
    unavailable_exit_code: i32,
}

impl FilesystemDriver {
    pub fn new(path: impl Into<String>, pattern: FilenamePattern) -> Self {
        Self {
            path: path.into(),
            pattern,
            copy: true,
            retries: DEFAULT_RETRIES,
            hook: None,
            unavailable_exit_code: DEFAULT_UNAVAILABLE_EXIT_CODE,
        }
    }

    /// Return source files in place instead of copying them to the staging area.
    pub fn with_copy(mut self, copy: bool) -> Self {
        self.copy = copy;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Command run before the directory is listed, e.g. to extract or subset files.
    pub fn with_hook(mut self, hook: ExternalCommand, unavailable_exit_code: i32) -> Self {
        self.hook = Some(hook);
        self.unavailable_exit_code = unavailable_exit_code;
        self
    }

    fn run_hook(
        &self,
        hook: &ExternalCommand,
        species: &SpeciesSpec,
        window: &ForecastWindow,
        source_dir: &str,
        destination: &Path,
    ) -> Result<(), FetchError> {
        let context = species_context(species, window)
            .with_text("path", source_dir)
            .with_text("fnpattern", self.pattern.template())
            .with_text("output", destination.to_string_lossy());
        match hook.run(&context, &[], None) {
            Err(FetchError::Command {
                code: Some(code), ..
            }) if code == self.unavailable_exit_code => Err(FetchError::DataNotAvailable(format!(
                "pre-filter `{}` reported no data for {}",
                hook.program, species.key
            ))),
            other => other,
        }
    }
}

impl ForecastSource for FilesystemDriver {
    fn acquire(
        &self,
        species: &SpeciesSpec,
        window: &ForecastWindow,
        destination: &Path,
    ) -> Result<Vec<PathBuf>, FetchError> {
        let source_dir = render(&self.path, &species_context(species, window));
        if let Some(hook) = &self.hook {
            self.run_hook(hook, species, window, &source_dir, destination)?;
        }

        let pattern = self.pattern.compile(species.urlname, window.init())?;
        let listing = list_dir(Path::new(&source_dir))?;
        let files = filter_by_offset(&listing, &pattern, window);
        info!(dir = %source_dir, species = species.key, count = files.len(), "selected local files");

        if !self.copy {
            return Ok(files
                .iter()
                .map(|file| Path::new(&source_dir).join(&file.name))
                .collect());
        }

        let transfers: Vec<(String, PathBuf)> = files
            .iter()
            .enumerate()
            .map(|(index, file)| {
                (
                    file.name.clone(),
                    staged_name(destination, &sequence_suffix(index)),
                )
            })
            .collect();
        transfer_each(&transfers, self.retries, |index, target| {
            let source = Path::new(&source_dir).join(&files[index].name);
            debug!(from = %source.display(), to = %target.display(), "copying");
            fs::copy(&source, target)
                .map(|_| ())
                .map_err(|err| FetchError::Transport(format!("{}: {err}", source.display())))
        })
    }
}

fn list_dir(dir: &Path) -> Result<Vec<String>, FetchError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(FetchError::DataNotAvailable(format!(
                "directory {} does not exist",
                dir.display()
            )));
        }
        Err(err) => return Err(FetchError::Filesystem(err.to_string())),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| FetchError::Filesystem(err.to_string()))?;
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    names.sort();
    Ok(names)
}
