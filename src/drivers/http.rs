use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Url;
use tracing::{debug, info};

use crate::domain::ForecastWindow;
use crate::drivers::{staged_name, species_context, transfer_each, ForecastSource};
use crate::error::FetchError;
use crate::listing::partition_buckets;
use crate::models::SpeciesSpec;
use crate::template::{render, TemplateContext};

pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

pub const CAMS_REGIONAL_URL: &str =
    "http://download.regional.atmosphere.copernicus.eu/services/CAMS50";
pub const SILAM_URL: &str = "http://silam.fmi.fi/thredds/ncss/silam_europe_v5_5/runs/silam_europe_v5_5_RUN_{fcinit:%Y-%m-%dT%H:%M:%SZ}";

/// Model names accepted by the CAMS regional service.
pub const CAMS_REGIONAL_MODELS: [&str; 8] = [
    "CHIMERE",
    "EMEP",
    "ENSEMBLE",
    "EURAD",
    "LOTOSEUROS",
    "MATCH",
    "MOCAGE",
    "SILAM",
];

/// How a range-subsetting service splits a forecast window into requests.
///
/// Both the base URL and query values are templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpService {
    /// One request per 24h bucket; `{fcrange}` receives the bucket token.
    DailyBuckets {
        base_url: String,
        query: Vec<(String, String)>,
    },
    /// A single request for the whole window (`{fcstart}` / `{fcend}`).
    TimeRange {
        base_url: String,
        query: Vec<(String, String)>,
    },
}

impl HttpService {
    pub fn cams_regional(model: &str, token: &str) -> Result<Self, FetchError> {
        let model = model.to_ascii_uppercase();
        if !CAMS_REGIONAL_MODELS.contains(&model.as_str()) {
            return Err(FetchError::InvalidConfig(format!(
                "unknown CAMS regional model {model}"
            )));
        }
        Ok(HttpService::DailyBuckets {
            base_url: CAMS_REGIONAL_URL.to_string(),
            query: query(&[
                ("token", &escape_braces(token)),
                ("grid", "0.1"),
                ("model", &model),
                ("package", "FORECAST_{species}_ALLLEVELS"),
                ("time", "{fcrange}"),
                ("referencetime", "{fcinit:%Y-%m-%dT%H:%M:%SZ}"),
                ("format", "NETCDF"),
                ("licence", "yes"),
            ]),
        })
    }

    pub fn silam() -> Self {
        HttpService::TimeRange {
            base_url: SILAM_URL.to_string(),
            query: query(&[
                ("var", "{species}"),
                ("disableLLSubset", "on"),
                ("disableProjSubset", "on"),
                ("horizStride", "1"),
                ("time_start", "{fcstart:%Y-%m-%dT%H:%M:%SZ}"),
                ("time_end", "{fcend:%Y-%m-%dT%H:%M:%SZ}"),
                ("timeStride", "1"),
                ("vertStride", "1"),
                ("addLatLon", "true"),
                ("accept", "netcdf"),
            ]),
        }
    }

    pub fn build_requests(
        &self,
        species: &SpeciesSpec,
        window: &ForecastWindow,
        destination: &Path,
    ) -> Result<Vec<HttpRequest>, FetchError> {
        let context = species_context(species, window);
        match self {
            HttpService::DailyBuckets { base_url, query } => partition_buckets(window)?
                .into_iter()
                .map(|bucket| {
                    let context = context.clone().with_text("fcrange", bucket.token());
                    Ok(HttpRequest {
                        url: build_url(base_url, query, &context)?,
                        destination: staged_name(destination, bucket.token()),
                        label: format!("{} {}", species.key, bucket),
                    })
                })
                .collect(),
            HttpService::TimeRange { base_url, query } => Ok(vec![HttpRequest {
                url: build_url(base_url, query, &context)?,
                destination: destination.to_path_buf(),
                label: format!("{} {}", species.key, window),
            }]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: Url,
    pub destination: PathBuf,
    pub label: String,
}

#[derive(Clone)]
pub struct HttpDriver {
    client: Client,
    service: HttpService,
    retries: u32,
}

impl HttpDriver {
    pub fn new(service: HttpService, retries: u32, timeout: Duration) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ctm-fetch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| FetchError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| FetchError::Http(err.to_string()))?;
        Ok(Self {
            client,
            service,
            retries,
        })
    }

    pub fn service(&self) -> &HttpService {
        &self.service
    }

    fn download(&self, request: &HttpRequest) -> Result<(), FetchError> {
        debug!(url = %request.url, "requesting");
        let response = self
            .client
            .get(request.url.clone())
            .send()
            .map_err(classify_error)?;
        let mut response = check_status(response)?;
        let mut file = File::create(&request.destination)
            .map_err(|err| FetchError::Filesystem(err.to_string()))?;
        response
            .copy_to(&mut file)
            .map_err(|err| FetchError::Transport(format!("{}: {err}", request.label)))?;
        Ok(())
    }
}

impl ForecastSource for HttpDriver {
    fn acquire(
        &self,
        species: &SpeciesSpec,
        window: &ForecastWindow,
        destination: &Path,
    ) -> Result<Vec<PathBuf>, FetchError> {
        let requests = self.service.build_requests(species, window, destination)?;
        info!(species = species.key, requests = requests.len(), "downloading over HTTP");
        let transfers: Vec<(String, PathBuf)> = requests
            .iter()
            .map(|request| (request.label.clone(), request.destination.clone()))
            .collect();
        transfer_each(&transfers, self.retries, |index, _| {
            self.download(&requests[index])
        })
    }
}

fn check_status(response: Response) -> Result<Response, FetchError> {
    let status = response.status().as_u16();
    if response.status().is_success() {
        return Ok(response);
    }
    if status == 404 {
        return Err(FetchError::DataNotAvailable(format!(
            "{} returned 404",
            response.url()
        )));
    }
    if is_retryable_status(status) {
        return Err(FetchError::Transport(format!(
            "{} returned {status}",
            response.url()
        )));
    }
    let message = response
        .text()
        .unwrap_or_else(|_| "request failed".to_string());
    Err(FetchError::HttpStatus { status, message })
}

fn classify_error(err: reqwest::Error) -> FetchError {
    if is_retryable_error(&err) {
        FetchError::Transport(err.to_string())
    } else {
        FetchError::Http(err.to_string())
    }
}

fn build_url(
    base_url: &str,
    query: &[(String, String)],
    context: &TemplateContext,
) -> Result<Url, FetchError> {
    let base = render(base_url, context);
    if query.is_empty() {
        return Url::parse(&base).map_err(|err| invalid_url(&base, err));
    }
    let params: Vec<(String, String)> = query
        .iter()
        .map(|(key, value)| (key.clone(), render(value, context)))
        .collect();
    Url::parse_with_params(&base, &params).map_err(|err| invalid_url(&base, err))
}

fn invalid_url(base: &str, err: impl std::fmt::Display) -> FetchError {
    FetchError::InvalidConfig(format!("{base}: {err}"))
}

fn query(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn escape_braces(value: &str) -> String {
    value.replace('{', "{{").replace('}', "}}")
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}
