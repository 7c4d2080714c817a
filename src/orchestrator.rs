//! Per-day acquisition state machine.
//!
//! A run directory moves from no markers, to `lock` while species are fetched, to
//! `done` once every species is normalized. A day without upstream data drops the
//! lock again so a later invocation retries it; any other failure leaves the lock
//! in place for inspection.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Days, NaiveDate, Utc};
use serde::Serialize;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::domain::FcTime;
use crate::drivers::ForecastSource;
use crate::error::FetchError;
use crate::inspect::{validate_dimensions, DatasetInspector};
use crate::markers::{MarkerState, RunMarkers};
use crate::models::{ModelSpec, SpeciesSpec, AIR_PRESSURE};
use crate::normalize::Normalizer;
use crate::store::OutputLayout;
use crate::timegrid::{check_day, resolve_window};

/// Files acquired for one species, owned together with their staging directory.
///
/// Dropping the value removes the directory and everything in it.
#[derive(Debug)]
pub struct StagedFiles {
    paths: Vec<PathBuf>,
    dir: TempDir,
}

impl StagedFiles {
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn cleanup(self) -> Result<(), FetchError> {
        self.dir
            .close()
            .map_err(|err| FetchError::Filesystem(err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    NoSpecies,
    AlreadyDone,
    Locked,
    Aborted { species: String, reason: String },
    Completed { species: Vec<String> },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneResult {
    pub removed: Vec<String>,
}

pub struct Orchestrator<S, N, I> {
    model: &'static ModelSpec,
    species: Vec<&'static SpeciesSpec>,
    layout: OutputLayout,
    source: S,
    normalizer: N,
    inspector: I,
}

impl<S, N, I> Orchestrator<S, N, I>
where
    S: ForecastSource,
    N: Normalizer,
    I: DatasetInspector,
{
    /// Species are validated against the model and AIR_PRESSURE is appended when
    /// the model provides it.
    pub fn new(
        model: &'static ModelSpec,
        species: &[String],
        layout: OutputLayout,
        source: S,
        normalizer: N,
        inspector: I,
    ) -> Result<Self, FetchError> {
        let mut resolved: Vec<&'static SpeciesSpec> = Vec::with_capacity(species.len() + 1);
        for key in species {
            let spec = model.require_species(key)?;
            if !resolved.iter().any(|known| known.key == spec.key) {
                resolved.push(spec);
            }
        }
        if !resolved.is_empty() && !resolved.iter().any(|spec| spec.key == AIR_PRESSURE) {
            if let Some(pressure) = model.species(AIR_PRESSURE) {
                resolved.push(pressure);
            }
        }
        Ok(Self {
            model,
            species: resolved,
            layout,
            source,
            normalizer,
            inspector,
        })
    }

    pub fn name(&self) -> &str {
        self.layout.name()
    }

    pub fn model(&self) -> &'static ModelSpec {
        self.model
    }

    pub fn species(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.species.iter().map(|spec| spec.key)
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Fetch and validate one species without normalizing it.
    pub fn acquire(
        &self,
        species: &str,
        day: NaiveDate,
        window_end: FcTime,
        window_start: FcTime,
    ) -> Result<StagedFiles, FetchError> {
        let spec = self.model.require_species(species)?;
        let init = check_day(day, Utc::now())?;
        let window = resolve_window(self.model, init, window_start, window_end)?;

        let dir = self.layout.staging_dir(spec.key)?;
        let template = dir.path().join(format!("{}.nc", spec.key));
        debug!(name = self.name(), species = spec.key, %window, "acquiring");

        // `dir` is dropped (and removed) on every early return below
        let paths = self.source.acquire(spec, &window, &template)?;
        validate_dimensions(&self.inspector, self.model, spec, &paths, &window)?;
        Ok(StagedFiles { paths, dir })
    }

    pub fn get(&self, species: &str, day: NaiveDate) -> Result<PathBuf, FetchError> {
        let spec = self.model.require_species(species)?;
        let staged = self.acquire(spec.key, day, FcTime::Unset, FcTime::Unset)?;
        let init = check_day(day, Utc::now())?;

        let output = self.layout.output_path(init, spec);
        if let Some(parent) = output.parent() {
            OutputLayout::ensure_dir(parent)?;
        }
        if output.as_std_path().exists() {
            fs::remove_file(output.as_std_path())
                .map_err(|err| FetchError::Filesystem(format!("{output}: {err}")))?;
        }

        self.normalizer
            .normalize(spec, init, staged.paths(), output.as_std_path())?;
        staged.cleanup()?;
        info!(name = self.name(), species = spec.key, file = %output, "wrote output");
        Ok(output.into_std_path_buf())
    }

    pub fn run_day(&self, day: NaiveDate) -> Result<RunOutcome, FetchError> {
        let init = check_day(day, Utc::now())?;
        info!(name = self.name(), init = %init.format("%Y-%m-%dT%H:%M:%S"), "starting run");

        if self.species.is_empty() {
            info!(name = self.name(), "no species requested");
            return Ok(RunOutcome::NoSpecies);
        }

        let run_dir = self.layout.run_dir(init);
        OutputLayout::ensure_dir(&run_dir)?;
        let markers = RunMarkers::new(run_dir.as_std_path());

        match markers.state() {
            MarkerState::Done => {
                info!(name = self.name(), dir = %run_dir, "already downloaded");
                return Ok(RunOutcome::AlreadyDone);
            }
            MarkerState::Locked => {
                info!(name = self.name(), dir = %run_dir, "lock marker present, skipping");
                return Ok(RunOutcome::Locked);
            }
            MarkerState::NotStarted => {}
        }
        if !markers.lock()? {
            info!(name = self.name(), dir = %run_dir, "lost the race for the lock");
            return Ok(RunOutcome::Locked);
        }

        let mut completed = Vec::with_capacity(self.species.len());
        for spec in &self.species {
            match self.get(spec.key, day) {
                Ok(_) => completed.push(spec.key.to_string()),
                Err(FetchError::DataNotAvailable(reason)) => {
                    warn!(name = self.name(), species = spec.key, %reason, "no data available");
                    markers.release()?;
                    return Ok(RunOutcome::Aborted {
                        species: spec.key.to_string(),
                        reason,
                    });
                }
                Err(err) => return Err(err),
            }
        }

        markers.complete()?;
        info!(name = self.name(), dir = %run_dir, "run complete");
        Ok(RunOutcome::Completed { species: completed })
    }

    pub fn prune(&self, retention_days: u64) -> Result<PruneResult, FetchError> {
        let today = Utc::now().date_naive();
        let threshold = today
            .checked_sub_days(Days::new(retention_days))
            .unwrap_or(NaiveDate::MIN);
        self.prune_before(threshold)
    }

    pub fn prune_before(&self, threshold: NaiveDate) -> Result<PruneResult, FetchError> {
        let mut result = PruneResult::default();
        for (time, dir) in self.layout.run_dirs()? {
            if time.date() >= threshold {
                continue;
            }
            fs::remove_dir_all(dir.as_std_path())
                .map_err(|err| FetchError::Filesystem(format!("{dir}: {err}")))?;
            info!(name = self.name(), dir = %dir, "pruned");
            result.removed.push(dir.to_string());
        }
        Ok(result)
    }
}

