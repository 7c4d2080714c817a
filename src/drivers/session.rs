use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::domain::ForecastWindow;
use crate::drivers::{sequence_suffix, species_context, staged_name, transfer_each, ForecastSource};
use crate::error::FetchError;
use crate::listing::{filter_by_offset, require_manifest, FilenamePattern, ManifestRule};
use crate::models::SpeciesSpec;
use crate::template::render;

pub trait RemoteSession {
    fn change_dir(&mut self, path: &str) -> Result<(), FetchError>;
    fn list(&mut self) -> Result<Vec<String>, FetchError>;
    fn fetch(&mut self, name: &str, destination: &Path) -> Result<(), FetchError>;
    fn logout(&mut self) -> Result<(), FetchError>;
}

pub trait Connector: Send + Sync {
    type Session: RemoteSession;

    fn login(&self) -> Result<Self::Session, FetchError>;

    fn describe(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub path: String,
    pub pattern: FilenamePattern,
    pub manifest: Option<ManifestRule>,
    pub retries: u32,
}

pub struct SessionDriver<C> {
    connector: C,
    settings: SessionSettings,
}

impl<C: Connector> SessionDriver<C> {
    pub fn new(connector: C, settings: SessionSettings) -> Self {
        Self {
            connector,
            settings,
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }
}

impl<C: Connector> ForecastSource for SessionDriver<C> {
    fn acquire(
        &self,
        species: &SpeciesSpec,
        window: &ForecastWindow,
        destination: &Path,
    ) -> Result<Vec<PathBuf>, FetchError> {
        let pattern = self
            .settings
            .pattern
            .compile(species.urlname, window.init())?;
        let remote_dir = render(&self.settings.path, &species_context(species, window));

        info!(remote = %self.connector.describe(), dir = %remote_dir, species = species.key, "opening session");
        let mut session = SessionGuard(self.connector.login()?);

        session.change_dir(&remote_dir).map_err(|err| {
            FetchError::DataNotAvailable(format!("remote directory {remote_dir}: {err}"))
        })?;
        let listing = session.list()?;

        if let Some(manifest) = &self.settings.manifest {
            require_manifest(&listing, &manifest.name(window.init()))?;
        }

        let files = filter_by_offset(&listing, &pattern, window);
        debug!(count = files.len(), dir = %remote_dir, "remote files selected");

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

        transfer_each(&transfers, self.settings.retries, |index, target| {
            session.fetch(&files[index].name, target)
        })
    }
}

/// Logs the session out when dropped, on success and failure alike.
struct SessionGuard<S: RemoteSession>(S);

impl<S: RemoteSession> Deref for SessionGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.0
    }
}

impl<S: RemoteSession> DerefMut for SessionGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.0
    }
}

impl<S: RemoteSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        if let Err(err) = self.0.logout() {
            debug!(error = %err, "logout failed");
        }
    }
}
