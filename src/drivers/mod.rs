use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::domain::ForecastWindow;
use crate::error::FetchError;
use crate::models::SpeciesSpec;
use crate::retry::{retry_transfer, TransferOutcome};
use crate::template::TemplateContext;

pub mod filesystem;
pub mod ftp;
pub mod http;
pub mod session;
#[cfg(feature = "sftp")]
pub mod sftp;

pub use filesystem::FilesystemDriver;
pub use ftp::FtpConnector;
pub use http::{HttpDriver, HttpRequest, HttpService};
pub use session::{Connector, RemoteSession, SessionDriver, SessionSettings};
#[cfg(feature = "sftp")]
pub use sftp::SftpConnector;

pub const DEFAULT_RETRIES: u32 = 3;

pub trait ForecastSource: Send + Sync {
    /// Transfer every remote object of `window` for one species.
    ///
    /// `destination` is a file template such as `/tmp/x/NO2.nc`; the returned paths
    /// are in temporal order.
    fn acquire(
        &self,
        species: &SpeciesSpec,
        window: &ForecastWindow,
        destination: &Path,
    ) -> Result<Vec<PathBuf>, FetchError>;
}

pub enum Driver {
    Filesystem(FilesystemDriver),
    Ftp(SessionDriver<FtpConnector>),
    #[cfg(feature = "sftp")]
    Sftp(SessionDriver<SftpConnector>),
    Http(HttpDriver),
}

impl Driver {
    pub fn protocol(&self) -> &'static str {
        match self {
            Driver::Filesystem(_) => "filesystem",
            Driver::Ftp(_) => "ftp",
            #[cfg(feature = "sftp")]
            Driver::Sftp(_) => "sftp",
            Driver::Http(_) => "http",
        }
    }
}

impl ForecastSource for Driver {
    fn acquire(
        &self,
        species: &SpeciesSpec,
        window: &ForecastWindow,
        destination: &Path,
    ) -> Result<Vec<PathBuf>, FetchError> {
        match self {
            Driver::Filesystem(driver) => driver.acquire(species, window, destination),
            Driver::Ftp(driver) => driver.acquire(species, window, destination),
            #[cfg(feature = "sftp")]
            Driver::Sftp(driver) => driver.acquire(species, window, destination),
            Driver::Http(driver) => driver.acquire(species, window, destination),
        }
    }
}

/// `/dir/base.ext` + `003` → `/dir/base_003.ext`.
pub fn staged_name(destination: &Path, suffix: &str) -> PathBuf {
    let stem = destination
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match destination.extension() {
        Some(ext) => format!("{stem}_{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{suffix}"),
    };
    destination.with_file_name(name)
}

pub fn sequence_suffix(index: usize) -> String {
    format!("{index:03}")
}

/// Placeholders shared by every driver: `{species}`, `{varname}` and `{fcinit}`.
pub(crate) fn species_context(species: &SpeciesSpec, window: &ForecastWindow) -> TemplateContext {
    TemplateContext::new()
        .with_text("species", species.urlname)
        .with_text("varname", species.varname)
        .with_time("fcinit", window.init())
        .with_time("fcstart", window.start())
        .with_time("fcend", window.end())
}

/// Exhausted transfers are left out of the result and their partial file removed.
pub(crate) fn transfer_each<F>(
    transfers: &[(String, PathBuf)],
    retries: u32,
    mut fetch: F,
) -> Result<Vec<PathBuf>, FetchError>
where
    F: FnMut(usize, &Path) -> Result<(), FetchError>,
{
    let mut fetched = Vec::with_capacity(transfers.len());
    for (index, (label, target)) in transfers.iter().enumerate() {
        match retry_transfer(retries, label, || fetch(index, target))? {
            TransferOutcome::Completed { .. } => fetched.push(target.clone()),
            TransferOutcome::Exhausted { attempts } => {
                warn!(file = %label, attempts, "omitting remote file after failed retries");
                if target.exists() {
                    if let Err(err) = fs::remove_file(target) {
                        debug!(file = %target.display(), error = %err, "cannot remove partial file");
                    }
                }
            }
        }
    }
    Ok(fetched)
}
