use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum FetchError {
    #[error("invalid forecast window: {0}")]
    InvalidForecastWindow(String),

    #[error("data not available: {0}")]
    #[diagnostic(help("upstream data is not published yet; re-run the day later"))]
    DataNotAvailable(String),

    #[error("downloaded data has wrong size on axis {axis}: observed {observed}, expected {expected}")]
    #[diagnostic(help("the run directory keeps its lock marker until this is investigated"))]
    DimensionMismatch {
        axis: String,
        observed: usize,
        expected: usize,
    },

    #[error("cannot retrieve future forecast init time {0}")]
    FutureInitTime(String),

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("species `{species}` is not supported for model `{model}`")]
    UnknownSpecies { model: String, species: String },

    #[error("unknown datasource: {0}")]
    UnknownDatasource(String),

    #[error("invalid filename pattern: {0}")]
    InvalidPattern(String),

    #[error("transfer failed: {0}")]
    Transport(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("server returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("FTP error: {0}")]
    Ftp(String),

    #[error("SFTP error: {0}")]
    Sftp(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("command `{program}` failed: {message}")]
    Command {
        program: String,
        code: Option<i32>,
        message: String,
    },

    #[error("missing config file ctm-fetch.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0} support is not compiled in (rebuild with the `{0}` feature)")]
    FeatureDisabled(&'static str),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transport(_))
    }

    pub fn is_data_not_available(&self) -> bool {
        matches!(self, FetchError::DataNotAvailable(_))
    }
}
