use std::fs::File;
use std::io;
use std::path::Path;

use suppaftp::types::FileType;
use suppaftp::{FtpStream, Mode};

use crate::drivers::session::{Connector, RemoteSession};
use crate::error::FetchError;

pub const DEFAULT_PORT: u16 = 21;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpConnector {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub passive: bool,
}

impl FtpConnector {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            username: "anonymous".to_string(),
            password: String::new(),
            passive: true,
        }
    }
}

impl Connector for FtpConnector {
    type Session = FtpSession;

    fn login(&self) -> Result<FtpSession, FetchError> {
        let mut stream = FtpStream::connect((self.host.as_str(), self.port))
            .map_err(|err| FetchError::Ftp(format!("connect to {}: {err}", self.describe())))?;
        stream
            .login(self.username.as_str(), self.password.as_str())
            .map_err(|err| FetchError::Ftp(format!("login to {}: {err}", self.describe())))?;
        stream.set_mode(if self.passive {
            Mode::Passive
        } else {
            Mode::Active
        });
        stream
            .transfer_type(FileType::Binary)
            .map_err(|err| FetchError::Ftp(err.to_string()))?;
        Ok(FtpSession { stream })
    }

    fn describe(&self) -> String {
        format!("ftp://{}@{}:{}", self.username, self.host, self.port)
    }
}

pub struct FtpSession {
    stream: FtpStream,
}

impl RemoteSession for FtpSession {
    fn change_dir(&mut self, path: &str) -> Result<(), FetchError> {
        self.stream
            .cwd(path)
            .map_err(|err| FetchError::Ftp(err.to_string()))
    }

    fn list(&mut self) -> Result<Vec<String>, FetchError> {
        let names = self
            .stream
            .nlst(None)
            .map_err(|err| FetchError::Ftp(err.to_string()))?;
        // some servers answer NLST with paths instead of bare names
        Ok(names
            .into_iter()
            .map(|name| name.rsplit('/').next().unwrap_or_default().to_string())
            .collect())
    }

    fn fetch(&mut self, name: &str, destination: &Path) -> Result<(), FetchError> {
        let mut file =
            File::create(destination).map_err(|err| FetchError::Filesystem(err.to_string()))?;
        let mut reader = self
            .stream
            .retr_as_stream(name)
            .map_err(|err| FetchError::Transport(format!("{name}: {err}")))?;
        io::copy(&mut reader, &mut file)
            .map_err(|err| FetchError::Transport(format!("{name}: {err}")))?;
        self.stream
            .finalize_retr_stream(reader)
            .map_err(|err| FetchError::Transport(format!("{name}: {err}")))
    }

    fn logout(&mut self) -> Result<(), FetchError> {
        self.stream
            .quit()
            .map_err(|err| FetchError::Ftp(err.to_string()))
    }
}
