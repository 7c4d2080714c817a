use std::fs::File;
use std::io;
use std::net::TcpStream;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use ssh2::{CheckResult, KnownHostFileKind, Session, Sftp};
use tracing::warn;

use crate::drivers::session::{Connector, RemoteSession};
use crate::error::FetchError;

pub const DEFAULT_PORT: u16 = 22;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SftpConnector {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Password, or passphrase of `identity_file` when both are set.
    pub password: Option<String>,
    pub identity_file: Option<PathBuf>,
    /// Defaults to `~/.ssh/known_hosts`.
    pub known_hosts: Option<PathBuf>,
    pub accept_unknown_hosts: bool,
    pub compress: bool,
}

impl SftpConnector {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            username: username.into(),
            password: None,
            identity_file: None,
            known_hosts: None,
            accept_unknown_hosts: false,
            compress: true,
        }
    }

    fn known_hosts_path(&self) -> Option<PathBuf> {
        self.known_hosts.clone().or_else(|| {
            BaseDirs::new().map(|dirs| dirs.home_dir().join(".ssh").join("known_hosts"))
        })
    }

    fn verify_host(&self, session: &Session) -> Result<(), FetchError> {
        let mut known = session
            .known_hosts()
            .map_err(|err| FetchError::Sftp(err.to_string()))?;
        if let Some(path) = self.known_hosts_path().filter(|path| path.exists()) {
            known
                .read_file(&path, KnownHostFileKind::OpenSSH)
                .map_err(|err| FetchError::Sftp(format!("{}: {err}", path.display())))?;
        }
        let (key, _) = session
            .host_key()
            .ok_or_else(|| FetchError::Sftp(format!("{} sent no host key", self.host)))?;

        match known.check_port(&self.host, self.port, key) {
            CheckResult::Match => Ok(()),
            CheckResult::NotFound if self.accept_unknown_hosts => {
                warn!(host = %self.host, "accepting unknown host key");
                Ok(())
            }
            CheckResult::NotFound => Err(FetchError::Sftp(format!(
                "host {} is not in known_hosts",
                self.host
            ))),
            CheckResult::Mismatch => Err(FetchError::Sftp(format!(
                "host key of {} does not match known_hosts",
                self.host
            ))),
            CheckResult::Failure => Err(FetchError::Sftp(format!(
                "cannot check host key of {}",
                self.host
            ))),
        }
    }
}

impl Connector for SftpConnector {
    type Session = SftpSession;

    fn login(&self) -> Result<SftpSession, FetchError> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port))
            .map_err(|err| FetchError::Sftp(format!("connect to {}: {err}", self.describe())))?;
        let mut session = Session::new().map_err(|err| FetchError::Sftp(err.to_string()))?;
        session.set_compress(self.compress);
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|err| FetchError::Sftp(format!("handshake with {}: {err}", self.host)))?;
        self.verify_host(&session)?;

        let auth = match (&self.identity_file, &self.password) {
            (Some(identity), passphrase) => session.userauth_pubkey_file(
                &self.username,
                None,
                identity,
                passphrase.as_deref(),
            ),
            (None, Some(password)) => session.userauth_password(&self.username, password),
            (None, None) => session.userauth_agent(&self.username),
        };
        auth.map_err(|err| FetchError::Sftp(format!("login to {}: {err}", self.describe())))?;
        if !session.authenticated() {
            return Err(FetchError::Sftp(format!(
                "authentication to {} failed",
                self.describe()
            )));
        }

        let sftp = session
            .sftp()
            .map_err(|err| FetchError::Sftp(err.to_string()))?;
        Ok(SftpSession {
            session,
            sftp,
            cwd: PathBuf::from("."),
        })
    }

    fn describe(&self) -> String {
        format!("sftp://{}@{}:{}", self.username, self.host, self.port)
    }
}

pub struct SftpSession {
    session: Session,
    sftp: Sftp,
    cwd: PathBuf,
}

impl RemoteSession for SftpSession {
    fn change_dir(&mut self, path: &str) -> Result<(), FetchError> {
        let target = self.cwd.join(path);
        let stat = self
            .sftp
            .stat(&target)
            .map_err(|err| FetchError::Sftp(format!("{}: {err}", target.display())))?;
        if !stat.is_dir() {
            return Err(FetchError::Sftp(format!(
                "{} is not a directory",
                target.display()
            )));
        }
        self.cwd = target;
        Ok(())
    }

    fn list(&mut self) -> Result<Vec<String>, FetchError> {
        let entries = self
            .sftp
            .readdir(&self.cwd)
            .map_err(|err| FetchError::Sftp(err.to_string()))?;
        Ok(entries
            .into_iter()
            .filter_map(|(path, _)| {
                path.file_name()
                    .map(|name| name.to_string_lossy().to_string())
            })
            .collect())
    }

    fn fetch(&mut self, name: &str, destination: &Path) -> Result<(), FetchError> {
        let mut remote = self
            .sftp
            .open(&self.cwd.join(name))
            .map_err(|err| FetchError::Transport(format!("{name}: {err}")))?;
        let mut file =
            File::create(destination).map_err(|err| FetchError::Filesystem(err.to_string()))?;
        io::copy(&mut remote, &mut file)
            .map_err(|err| FetchError::Transport(format!("{name}: {err}")))?;
        Ok(())
    }

    fn logout(&mut self) -> Result<(), FetchError> {
        self.session
            .disconnect(None, "bye", None)
            .map_err(|err| FetchError::Sftp(err.to_string()))
    }
}
