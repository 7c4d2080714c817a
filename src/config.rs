use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::drivers::filesystem::DEFAULT_UNAVAILABLE_EXIT_CODE;
use crate::drivers::http::DEFAULT_TIMEOUT_SECS;
use crate::drivers::{
    Driver, FilesystemDriver, FtpConnector, HttpDriver, HttpService, SessionDriver,
    SessionSettings, DEFAULT_RETRIES,
};
use crate::error::FetchError;
use crate::external::ExternalCommand;
use crate::inspect::DatasetInspector;
use crate::listing::{FilenamePattern, ManifestRule};
use crate::models::{ModelKind, ModelSpec};
use crate::normalize::CommandNormalizer;
use crate::orchestrator::Orchestrator;
use crate::store::{expand_home, OutputLayout};

pub const DEFAULT_CONFIG_FILE: &str = "ctm-fetch.json";
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub basepath: Option<String>,
    #[serde(default)]
    pub temppath: Option<String>,
    #[serde(default)]
    pub datasources: BTreeMap<String, DatasourceEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DatasourceEntry {
    pub model: ModelKind,
    #[serde(default)]
    pub species: Vec<String>,
    #[serde(default)]
    pub basepath: Option<String>,
    #[serde(default)]
    pub temppath: Option<String>,
    pub driver: DriverConfig,
    pub normalizer: ExternalCommand,
}

/// Driver section; unset remote fields fall back to the model's published defaults.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "protocol", rename_all = "snake_case")]
pub enum DriverConfig {
    Filesystem {
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        fnpattern: Option<String>,
        #[serde(default)]
        copy: Option<bool>,
        #[serde(default)]
        retries: Option<u32>,
        #[serde(default)]
        hook: Option<ExternalCommand>,
        #[serde(default)]
        hook_unavailable_exit_code: Option<i32>,
    },
    Ftp {
        #[serde(default)]
        host: Option<String>,
        #[serde(default)]
        port: Option<u16>,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        passive: Option<bool>,
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        fnpattern: Option<String>,
        /// An empty string disables manifest gating.
        #[serde(default)]
        manifest: Option<String>,
        #[serde(default)]
        retries: Option<u32>,
    },
    Sftp {
        #[serde(default)]
        host: Option<String>,
        #[serde(default)]
        port: Option<u16>,
        username: String,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        identity_file: Option<String>,
        #[serde(default)]
        known_hosts: Option<String>,
        #[serde(default)]
        accept_unknown_hosts: bool,
        #[serde(default)]
        compress: Option<bool>,
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        fnpattern: Option<String>,
        #[serde(default)]
        manifest: Option<String>,
        #[serde(default)]
        retries: Option<u32>,
    },
    Http {
        #[serde(default)]
        service: Option<HttpServiceKind>,
        /// CAMS regional model name (ENSEMBLE, CHIMERE, ...).
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        token: Option<String>,
        /// `custom` service only.
        #[serde(default)]
        base_url: Option<String>,
        #[serde(default)]
        query: BTreeMap<String, String>,
        #[serde(default)]
        daily_buckets: bool,
        #[serde(default)]
        retries: Option<u32>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpServiceKind {
    CamsRegional,
    Silam,
    Custom,
}

#[derive(Debug, Clone)]
pub enum DriverSettings {
    Filesystem(FilesystemDriver),
    Ftp {
        connector: FtpConnector,
        session: SessionSettings,
    },
    #[cfg(feature = "sftp")]
    Sftp {
        connector: crate::drivers::SftpConnector,
        session: SessionSettings,
    },
    Http {
        service: HttpService,
        retries: u32,
        timeout: Duration,
    },
}

impl DriverSettings {
    pub fn build(&self) -> Result<Driver, FetchError> {
        Ok(match self {
            DriverSettings::Filesystem(driver) => Driver::Filesystem(driver.clone()),
            DriverSettings::Ftp { connector, session } => {
                Driver::Ftp(SessionDriver::new(connector.clone(), session.clone()))
            }
            #[cfg(feature = "sftp")]
            DriverSettings::Sftp { connector, session } => {
                Driver::Sftp(SessionDriver::new(connector.clone(), session.clone()))
            }
            DriverSettings::Http {
                service,
                retries,
                timeout,
            } => Driver::Http(HttpDriver::new(service.clone(), *retries, *timeout)?),
        })
    }
}

#[derive(Debug, Clone)]
pub struct DatasourceSettings {
    pub name: String,
    pub model: ModelKind,
    pub species: Vec<String>,
    pub basepath: Utf8PathBuf,
    pub temppath: Option<Utf8PathBuf>,
    pub driver: DriverSettings,
    pub normalizer: ExternalCommand,
}

impl DatasourceSettings {
    pub fn layout(&self) -> OutputLayout {
        OutputLayout::new(
            &self.basepath,
            &self.name,
            self.model.spec().layer_type,
            self.temppath.clone(),
        )
    }

    pub fn build_orchestrator<I: DatasetInspector>(
        &self,
        inspector: I,
    ) -> Result<Orchestrator<Driver, CommandNormalizer, I>, FetchError> {
        Orchestrator::new(
            self.model.spec(),
            &self.species,
            self.layout(),
            self.driver.build()?,
            CommandNormalizer::new(self.normalizer.clone()),
            inspector,
        )
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub datasources: Vec<DatasourceSettings>,
}

impl ResolvedConfig {
    pub fn datasource(&self, name: &str) -> Result<&DatasourceSettings, FetchError> {
        self.datasources
            .iter()
            .find(|source| source.name == name)
            .ok_or_else(|| FetchError::UnknownDatasource(name.to_string()))
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, FetchError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(FetchError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| FetchError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| FetchError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, FetchError> {
        let schema_version = config.schema_version.unwrap_or(SCHEMA_VERSION);
        if schema_version > SCHEMA_VERSION {
            return Err(FetchError::InvalidConfig(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let datasources = config
            .datasources
            .into_iter()
            .map(|(name, entry)| {
                resolve_datasource(name, entry, config.basepath.as_deref(), config.temppath.as_deref())
            })
            .collect::<Result<Vec<_>, FetchError>>()?;

        Ok(ResolvedConfig {
            schema_version,
            datasources,
        })
    }
}

fn resolve_datasource(
    name: String,
    entry: DatasourceEntry,
    basepath: Option<&str>,
    temppath: Option<&str>,
) -> Result<DatasourceSettings, FetchError> {
    let model = entry.model.spec();
    for species in &entry.species {
        model.require_species(species)?;
    }

    let basepath = entry
        .basepath
        .as_deref()
        .or(basepath)
        .ok_or_else(|| FetchError::InvalidConfig(format!("datasource {name} has no basepath")))?;
    let temppath = entry
        .temppath
        .as_deref()
        .or(temppath)
        .map(expand_home)
        .transpose()?;
    let driver = resolve_driver(&name, entry.model, model, entry.driver)?;

    Ok(DatasourceSettings {
        basepath: expand_home(basepath)?,
        temppath,
        model: entry.model,
        species: entry.species,
        driver,
        normalizer: entry.normalizer,
        name,
    })
}

fn resolve_driver(
    name: &str,
    kind: ModelKind,
    model: &ModelSpec,
    config: DriverConfig,
) -> Result<DriverSettings, FetchError> {
    let missing = |field: &str| {
        FetchError::InvalidConfig(format!("datasource {name}: driver needs `{field}`"))
    };
    let defaults = model.remote;

    match config {
        DriverConfig::Filesystem {
            path,
            fnpattern,
            copy,
            retries,
            hook,
            hook_unavailable_exit_code,
        } => {
            let path = path
                .or_else(|| defaults.path.map(str::to_string))
                .ok_or_else(|| missing("path"))?;
            let fnpattern = fnpattern
                .or_else(|| defaults.fnpattern.map(str::to_string))
                .ok_or_else(|| missing("fnpattern"))?;
            let mut driver = FilesystemDriver::new(path, FilenamePattern::new(fnpattern))
                .with_copy(copy.unwrap_or(true))
                .with_retries(retries.unwrap_or(DEFAULT_RETRIES));
            if let Some(hook) = hook {
                driver = driver.with_hook(
                    hook,
                    hook_unavailable_exit_code.unwrap_or(DEFAULT_UNAVAILABLE_EXIT_CODE),
                );
            }
            Ok(DriverSettings::Filesystem(driver))
        }
        DriverConfig::Ftp {
            host,
            port,
            username,
            password,
            passive,
            path,
            fnpattern,
            manifest,
            retries,
        } => {
            let host = host
                .or_else(|| defaults.host.map(str::to_string))
                .ok_or_else(|| missing("host"))?;
            let mut connector = FtpConnector::new(host);
            if let Some(port) = port {
                connector.port = port;
            }
            if let Some(username) = username {
                connector.username = username;
            }
            if let Some(password) = password {
                connector.password = password;
            }
            connector.passive = passive.unwrap_or(true);
            let session = session_settings(model, path, fnpattern, manifest, retries, &missing)?;
            Ok(DriverSettings::Ftp { connector, session })
        }
        #[cfg(feature = "sftp")]
        DriverConfig::Sftp {
            host,
            port,
            username,
            password,
            identity_file,
            known_hosts,
            accept_unknown_hosts,
            compress,
            path,
            fnpattern,
            manifest,
            retries,
        } => {
            let host = host
                .or_else(|| defaults.host.map(str::to_string))
                .ok_or_else(|| missing("host"))?;
            let mut connector = crate::drivers::SftpConnector::new(host, username);
            if let Some(port) = port {
                connector.port = port;
            }
            connector.password = password;
            connector.identity_file = identity_file
                .as_deref()
                .map(expand_home)
                .transpose()?
                .map(Utf8PathBuf::into_std_path_buf);
            connector.known_hosts = known_hosts
                .as_deref()
                .map(expand_home)
                .transpose()?
                .map(Utf8PathBuf::into_std_path_buf);
            connector.accept_unknown_hosts = accept_unknown_hosts;
            connector.compress = compress.unwrap_or(true);
            let session = session_settings(model, path, fnpattern, manifest, retries, &missing)?;
            Ok(DriverSettings::Sftp { connector, session })
        }
        #[cfg(not(feature = "sftp"))]
        DriverConfig::Sftp { .. } => Err(FetchError::FeatureDisabled("sftp")),
        DriverConfig::Http {
            service,
            model: service_model,
            token,
            base_url,
            query,
            daily_buckets,
            retries,
            timeout_secs,
        } => {
            let service = match service.or_else(|| default_http_service(kind)) {
                Some(HttpServiceKind::CamsRegional) => HttpService::cams_regional(
                    service_model.as_deref().ok_or_else(|| missing("model"))?,
                    token.as_deref().ok_or_else(|| missing("token"))?,
                )?,
                Some(HttpServiceKind::Silam) => HttpService::silam(),
                Some(HttpServiceKind::Custom) => {
                    let base_url = base_url.ok_or_else(|| missing("base_url"))?;
                    let query = query.into_iter().collect();
                    if daily_buckets {
                        HttpService::DailyBuckets { base_url, query }
                    } else {
                        HttpService::TimeRange { base_url, query }
                    }
                }
                None => return Err(missing("service")),
            };
            Ok(DriverSettings::Http {
                service,
                retries: retries.unwrap_or(DEFAULT_RETRIES),
                timeout: Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            })
        }
    }
}

fn session_settings(
    model: &ModelSpec,
    path: Option<String>,
    fnpattern: Option<String>,
    manifest: Option<String>,
    retries: Option<u32>,
    missing: &dyn Fn(&str) -> FetchError,
) -> Result<SessionSettings, FetchError> {
    let defaults = model.remote;
    let path = path
        .or_else(|| defaults.path.map(str::to_string))
        .ok_or_else(|| missing("path"))?;
    let fnpattern = fnpattern
        .or_else(|| defaults.fnpattern.map(str::to_string))
        .ok_or_else(|| missing("fnpattern"))?;
    let manifest = match manifest {
        Some(manifest) if manifest.is_empty() => None,
        Some(manifest) => Some(ManifestRule::new(manifest)),
        None => defaults.manifest.map(ManifestRule::new),
    };
    Ok(SessionSettings {
        path,
        pattern: FilenamePattern::new(fnpattern),
        manifest,
        retries: retries.unwrap_or(DEFAULT_RETRIES),
    })
}

fn default_http_service(kind: ModelKind) -> Option<HttpServiceKind> {
    match kind {
        ModelKind::CamsRegional => Some(HttpServiceKind::CamsRegional),
        ModelKind::Silam => Some(HttpServiceKind::Silam),
        ModelKind::CamsGlobal | ModelKind::Emep => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cams_global_ftp_gets_model_defaults() {
        let json = r#"{
            "basepath": "/data",
            "datasources": {
                "CAMS_global": {
                    "model": "cams_global",
                    "species": ["NO2"],
                    "driver": {"protocol": "ftp", "username": "u", "password": "p"},
                    "normalizer": {"program": "true"}
                }
            }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);

        let source = resolved.datasource("CAMS_global").unwrap();
        match &source.driver {
            DriverSettings::Ftp { connector, session } => {
                assert_eq!(connector.host, "dissemination.ecmwf.int");
                assert_eq!(connector.port, 21);
                assert!(connector.passive);
                assert_eq!(session.path, "/DATA/CAMS_NREALTIME/{fcinit:%Y%m%d%H}");
                assert!(session.manifest.is_some());
            }
            other => panic!("unexpected driver {other:?}"),
        }
    }
}
