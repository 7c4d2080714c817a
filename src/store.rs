use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, NaiveDateTime, Utc};
use directories::BaseDirs;
use tempfile::{Builder, TempDir};

use crate::error::FetchError;
use crate::models::SpeciesSpec;

/// Run directory names, e.g. `2017-02-15_00`.
pub const RUN_DIR_FORMAT: &str = "%Y-%m-%d_%H";

/// Where one datasource keeps its runs and staging files.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    model_dir: Utf8PathBuf,
    name: String,
    layer_type: String,
    temp_root: Utf8PathBuf,
}

impl OutputLayout {
    /// `temppath` defaults to `<basepath>/tmp`.
    pub fn new(
        basepath: &Utf8Path,
        name: &str,
        layer_type: &str,
        temppath: Option<Utf8PathBuf>,
    ) -> Self {
        Self {
            model_dir: basepath.join(name),
            name: name.to_string(),
            layer_type: layer_type.to_string(),
            temp_root: temppath.unwrap_or_else(|| basepath.join("tmp")),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model_dir(&self) -> &Utf8Path {
        &self.model_dir
    }

    pub fn temp_root(&self) -> &Utf8Path {
        &self.temp_root
    }

    pub fn run_dir(&self, init: DateTime<Utc>) -> Utf8PathBuf {
        self.model_dir
            .join(init.format(RUN_DIR_FORMAT).to_string())
    }

    /// `<name>_<YYYY-MM-DD_HH>_<layer>_<species>.nc` inside the run directory.
    pub fn output_path(&self, init: DateTime<Utc>, species: &SpeciesSpec) -> Utf8PathBuf {
        self.run_dir(init).join(format!(
            "{}_{}_{}_{}.nc",
            self.name,
            init.format(RUN_DIR_FORMAT),
            self.layer_type,
            species.key.to_lowercase()
        ))
    }

    pub fn ensure_dir(path: &Utf8Path) -> Result<(), FetchError> {
        fs::create_dir_all(path.as_std_path())
            .map_err(|err| FetchError::Filesystem(format!("{path}: {err}")))
    }

    /// Fresh directory under the temp root, removed when the handle drops.
    pub fn staging_dir(&self, species: &str) -> Result<TempDir, FetchError> {
        Self::ensure_dir(&self.temp_root)?;
        Builder::new()
            .prefix(&format!("ctm-fetch-{}-", species.to_lowercase()))
            .tempdir_in(self.temp_root.as_std_path())
            .map_err(|err| FetchError::Filesystem(err.to_string()))
    }

    pub fn run_dirs(&self) -> Result<Vec<(NaiveDateTime, Utf8PathBuf)>, FetchError> {
        if !self.model_dir.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(self.model_dir.as_std_path())
            .map_err(|err| FetchError::Filesystem(err.to_string()))?;
        let mut runs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| FetchError::Filesystem(err.to_string()))?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(time) = parse_run_dir_name(&name) {
                runs.push((time, self.model_dir.join(&name)));
            }
        }
        runs.sort();
        Ok(runs)
    }
}

pub fn parse_run_dir_name(name: &str) -> Option<NaiveDateTime> {
    // chrono needs minutes to build a NaiveDateTime
    NaiveDateTime::parse_from_str(&format!("{name}:00"), "%Y-%m-%d_%H:%M").ok()
}

pub fn expand_home(path: &str) -> Result<Utf8PathBuf, FetchError> {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => return Ok(Utf8PathBuf::from(path)),
    };
    let home = BaseDirs::new()
        .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.home_dir().to_path_buf()).ok())
        .ok_or_else(|| FetchError::Filesystem("unable to resolve home directory".to_string()))?;
    Ok(if rest.is_empty() { home } else { home.join(rest) })
}
