use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use ctm_fetch::domain::ForecastWindow;
use ctm_fetch::drivers::{
    Connector, FilesystemDriver, ForecastSource, HttpDriver, HttpService, RemoteSession,
    SessionDriver, SessionSettings,
};
use ctm_fetch::error::FetchError;
use ctm_fetch::external::ExternalCommand;
use ctm_fetch::listing::{FilenamePattern, ManifestRule};
use ctm_fetch::models::{SpeciesSpec, CAMS_GLOBAL, CAMS_REGIONAL, SILAM};

fn init() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2017, 2, 15, 0, 0, 0).unwrap()
}

fn window(start: i64, end: i64) -> ForecastWindow {
    ForecastWindow::new(
        init(),
        init() + TimeDelta::hours(start),
        init() + TimeDelta::hours(end),
    )
    .unwrap()
}

fn no2() -> &'static SpeciesSpec {
    CAMS_GLOBAL.species("NO2").unwrap()
}

#[derive(Clone, Default)]
struct Script {
    listing: Vec<String>,
    missing_dir: bool,
    flaky: Vec<String>,
    broken: Vec<String>,
}

struct MockConnector {
    script: Script,
    events: Arc<Mutex<Vec<String>>>,
}

struct MockSession {
    script: Script,
    events: Arc<Mutex<Vec<String>>>,
}

impl MockConnector {
    fn new(script: Script) -> Self {
        Self {
            script,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl Connector for MockConnector {
    type Session = MockSession;

    fn login(&self) -> Result<MockSession, FetchError> {
        self.events.lock().unwrap().push("login".to_string());
        Ok(MockSession {
            script: self.script.clone(),
            events: Arc::clone(&self.events),
        })
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

impl RemoteSession for MockSession {
    fn change_dir(&mut self, path: &str) -> Result<(), FetchError> {
        self.events.lock().unwrap().push(format!("cd {path}"));
        if self.script.missing_dir {
            return Err(FetchError::Ftp("550 no such directory".to_string()));
        }
        Ok(())
    }

    fn list(&mut self) -> Result<Vec<String>, FetchError> {
        Ok(self.script.listing.clone())
    }

    fn fetch(&mut self, name: &str, destination: &Path) -> Result<(), FetchError> {
        self.events.lock().unwrap().push(format!("get {name}"));
        if self.script.flaky.iter().any(|flaky| flaky == name) {
            return Err(FetchError::Transport("connection reset".to_string()));
        }
        if self.script.broken.iter().any(|broken| broken == name) {
            return Err(FetchError::Ftp("451 aborted".to_string()));
        }
        fs::write(destination, name).map_err(|err| FetchError::Filesystem(err.to_string()))
    }

    fn logout(&mut self) -> Result<(), FetchError> {
        self.events.lock().unwrap().push("logout".to_string());
        Ok(())
    }
}

fn settings(manifest: bool) -> SessionSettings {
    SessionSettings {
        path: "/runs/{fcinit:%Y%m%d%H}".to_string(),
        pattern: FilenamePattern::new(r"fc_(\d{{3}})_{species}.nc"),
        manifest: manifest.then(|| ManifestRule::new("{fcinit:%Y%m%d%H}.manifest")),
        retries: 2,
    }
}

fn listing(offsets: &[u32]) -> Vec<String> {
    offsets.iter().map(|h| format!("fc_{h:03}_no2.nc")).collect()
}

fn staged(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn session_fetches_selected_files_in_order_and_logs_out() {
    let temp = tempfile::tempdir().unwrap();
    let mut names = listing(&[9, 0, 3, 6, 12]);
    names.push("2017021500.manifest".to_string());
    let connector = MockConnector::new(Script {
        listing: names,
        ..Script::default()
    });
    let driver = SessionDriver::new(connector, settings(true));

    let files = driver
        .acquire(no2(), &window(3, 9), &temp.path().join("NO2.nc"))
        .unwrap();

    assert_eq!(
        files,
        vec![
            temp.path().join("NO2_000.nc"),
            temp.path().join("NO2_001.nc"),
            temp.path().join("NO2_002.nc"),
        ]
    );
    assert_eq!(fs::read_to_string(&files[2]).unwrap(), "fc_009_no2.nc");
    assert_eq!(
        driver.connector().events(),
        vec![
            "login",
            "cd /runs/2017021500",
            "get fc_003_no2.nc",
            "get fc_006_no2.nc",
            "get fc_009_no2.nc",
            "logout",
        ]
    );
}

#[test]
fn missing_manifest_leaves_no_files() {
    let temp = tempfile::tempdir().unwrap();
    let connector = MockConnector::new(Script {
        listing: listing(&[0, 3, 6]),
        ..Script::default()
    });
    let driver = SessionDriver::new(connector, settings(true));

    let err = driver
        .acquire(no2(), &window(0, 6), &temp.path().join("NO2.nc"))
        .unwrap_err();

    assert_matches!(err, FetchError::DataNotAvailable(_));
    assert!(staged(temp.path()).is_empty());
    assert_eq!(
        driver.connector().events().last().map(String::as_str),
        Some("logout")
    );
}

#[test]
fn missing_remote_directory_is_data_not_available() {
    let temp = tempfile::tempdir().unwrap();
    let connector = MockConnector::new(Script {
        missing_dir: true,
        ..Script::default()
    });
    let driver = SessionDriver::new(connector, settings(false));

    let err = driver
        .acquire(no2(), &window(0, 6), &temp.path().join("NO2.nc"))
        .unwrap_err();

    assert_matches!(err, FetchError::DataNotAvailable(_));
    assert_eq!(
        driver.connector().events(),
        vec!["login", "cd /runs/2017021500", "logout"]
    );
}

#[test]
fn exhausted_transfers_are_omitted() {
    let temp = tempfile::tempdir().unwrap();
    let connector = MockConnector::new(Script {
        listing: listing(&[0, 3, 6]),
        flaky: vec!["fc_003_no2.nc".to_string()],
        ..Script::default()
    });
    let driver = SessionDriver::new(connector, settings(false));

    let files = driver
        .acquire(no2(), &window(0, 6), &temp.path().join("NO2.nc"))
        .unwrap();

    assert_eq!(
        files,
        vec![temp.path().join("NO2_000.nc"), temp.path().join("NO2_002.nc")]
    );
    let attempts = driver
        .connector()
        .events()
        .iter()
        .filter(|event| *event == "get fc_003_no2.nc")
        .count();
    assert_eq!(attempts, 2);
}

#[test]
fn fatal_transfer_errors_propagate_after_logout() {
    let temp = tempfile::tempdir().unwrap();
    let connector = MockConnector::new(Script {
        listing: listing(&[0, 3]),
        broken: vec!["fc_000_no2.nc".to_string()],
        ..Script::default()
    });
    let driver = SessionDriver::new(connector, settings(false));

    let err = driver
        .acquire(no2(), &window(0, 6), &temp.path().join("NO2.nc"))
        .unwrap_err();

    assert_matches!(err, FetchError::Ftp(_));
    assert_eq!(
        driver.connector().events().last().map(String::as_str),
        Some("logout")
    );
}

fn mirror(offsets: &[u32]) -> tempfile::TempDir {
    let mirror = tempfile::tempdir().unwrap();
    let run = mirror.path().join("2017021500");
    fs::create_dir_all(&run).unwrap();
    for name in listing(offsets) {
        fs::write(run.join(&name), &name).unwrap();
    }
    mirror
}

fn mirror_driver(mirror: &Path) -> FilesystemDriver {
    FilesystemDriver::new(
        format!("{}/{{fcinit:%Y%m%d%H}}", mirror.display()),
        FilenamePattern::new(r"fc_(\d{{3}})_{species}.nc"),
    )
}

#[test]
fn filesystem_copies_into_staging() {
    let mirror = mirror(&[0, 3, 6, 9]);
    let staging = tempfile::tempdir().unwrap();

    let files = mirror_driver(mirror.path())
        .acquire(no2(), &window(3, 6), &staging.path().join("NO2.nc"))
        .unwrap();

    assert_eq!(staged(staging.path()), vec!["NO2_000.nc", "NO2_001.nc"]);
    assert_eq!(fs::read_to_string(&files[0]).unwrap(), "fc_003_no2.nc");
}

#[test]
fn filesystem_can_return_files_in_place() {
    let mirror = mirror(&[0, 3]);
    let staging = tempfile::tempdir().unwrap();

    let files = mirror_driver(mirror.path())
        .with_copy(false)
        .acquire(no2(), &window(0, 6), &staging.path().join("NO2.nc"))
        .unwrap();

    let run = mirror.path().join("2017021500");
    assert_eq!(
        files,
        vec![run.join("fc_000_no2.nc"), run.join("fc_003_no2.nc")]
    );
    assert!(staged(staging.path()).is_empty());
}

#[test]
fn filesystem_missing_directory_is_data_not_available() {
    let mirror = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();

    let err = mirror_driver(mirror.path())
        .acquire(no2(), &window(0, 6), &staging.path().join("NO2.nc"))
        .unwrap_err();

    assert_matches!(err, FetchError::DataNotAvailable(_));
}

#[test]
fn filesystem_hook_can_postpone_the_day() {
    let mirror = mirror(&[0, 3]);
    let staging = tempfile::tempdir().unwrap();
    let hook = ExternalCommand::new("sh", vec!["-c".to_string(), "exit 75".to_string()]);

    let err = mirror_driver(mirror.path())
        .with_hook(hook, 75)
        .acquire(no2(), &window(0, 6), &staging.path().join("NO2.nc"))
        .unwrap_err();
    assert_matches!(err, FetchError::DataNotAvailable(_));

    let failing = ExternalCommand::new("sh", vec!["-c".to_string(), "exit 3".to_string()]);
    let err = mirror_driver(mirror.path())
        .with_hook(failing, 75)
        .acquire(no2(), &window(0, 6), &staging.path().join("NO2.nc"))
        .unwrap_err();
    assert_matches!(err, FetchError::Command { code: Some(3), .. });
}

fn query_value(url: &reqwest::Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.to_string())
}

#[test]
fn cams_regional_requests_one_url_per_bucket() {
    let service = HttpService::cams_regional("ensemble", "secret").unwrap();
    let species = CAMS_REGIONAL.species("NO2").unwrap();
    let start = Utc.with_ymd_and_hms(2017, 2, 15, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2017, 2, 16, 1, 0, 0).unwrap();
    let two_days = ForecastWindow::new(init(), start, end).unwrap();

    let requests = service
        .build_requests(species, &two_days, Path::new("/tmp/NO2.nc"))
        .unwrap();

    assert_eq!(requests.len(), 2);
    let first = &requests[0].url;
    assert!(first.as_str().starts_with(
        "http://download.regional.atmosphere.copernicus.eu/services/CAMS50?"
    ));
    assert_eq!(query_value(first, "token").as_deref(), Some("secret"));
    assert_eq!(query_value(first, "model").as_deref(), Some("ENSEMBLE"));
    assert_eq!(
        query_value(first, "package").as_deref(),
        Some("FORECAST_NO2_ALLLEVELS")
    );
    assert_eq!(query_value(first, "time").as_deref(), Some("0H24H"));
    assert_eq!(
        query_value(first, "referencetime").as_deref(),
        Some("2017-02-15T00:00:00Z")
    );
    assert_eq!(query_value(&requests[1].url, "time").as_deref(), Some("25H48H"));
    assert_eq!(
        requests
            .iter()
            .map(|request| request.destination.clone())
            .collect::<Vec<_>>(),
        vec![
            PathBuf::from("/tmp/NO2_0H24H.nc"),
            PathBuf::from("/tmp/NO2_25H48H.nc")
        ]
    );
}

#[test]
fn silam_requests_the_whole_window_at_once() {
    let species = SILAM.species("O3").unwrap();
    let requests = HttpService::silam()
        .build_requests(species, &window(1, 24), Path::new("/tmp/O3.nc"))
        .unwrap();

    assert_eq!(requests.len(), 1);
    let url = &requests[0].url;
    assert_eq!(
        url.path(),
        "/thredds/ncss/silam_europe_v5_5/runs/silam_europe_v5_5_RUN_2017-02-15T00:00:00Z"
    );
    assert_eq!(query_value(url, "var").as_deref(), Some("cnc_O3_gas"));
    assert_eq!(
        query_value(url, "time_start").as_deref(),
        Some("2017-02-15T01:00:00Z")
    );
    assert_eq!(
        query_value(url, "time_end").as_deref(),
        Some("2017-02-16T00:00:00Z")
    );
    assert_eq!(requests[0].destination, PathBuf::from("/tmp/O3.nc"));
}

/// Answers `connections` requests with `status`, then returns how many it served.
fn serve(status: &'static str, connections: usize) -> (String, thread::JoinHandle<usize>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/forecast/{{species}}", listener.local_addr().unwrap());
    let handle = thread::spawn(move || {
        let mut served = 0;
        for stream in listener.incoming().take(connections) {
            let mut stream = stream.unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 && line != "\r\n" {
                line.clear();
            }
            let body = "no such product";
            write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();
            served += 1;
        }
        served
    });
    (url, handle)
}

fn http_driver(base_url: String, retries: u32) -> HttpDriver {
    let service = HttpService::TimeRange {
        base_url,
        query: Vec::new(),
    };
    HttpDriver::new(service, retries, Duration::from_secs(10)).unwrap()
}

#[test]
fn http_not_found_is_data_not_available() {
    let (url, server) = serve("404 Not Found", 1);
    let staging = tempfile::tempdir().unwrap();
    let species = SILAM.species("O3").unwrap();

    let err = http_driver(url, 3)
        .acquire(species, &window(1, 24), &staging.path().join("O3.nc"))
        .unwrap_err();

    assert_matches!(err, FetchError::DataNotAvailable(_));
    assert_eq!(server.join().unwrap(), 1);
    assert!(staged(staging.path()).is_empty());
}

#[test]
fn http_unavailable_is_retried_then_omitted() {
    let (url, server) = serve("503 Service Unavailable", 3);
    let staging = tempfile::tempdir().unwrap();
    let species = SILAM.species("O3").unwrap();

    let files = http_driver(url, 3)
        .acquire(species, &window(1, 24), &staging.path().join("O3.nc"))
        .unwrap();

    assert!(files.is_empty());
    assert_eq!(server.join().unwrap(), 3);
    assert!(staged(staging.path()).is_empty());
}

#[test]
fn http_forbidden_propagates_the_status() {
    let (url, server) = serve("403 Forbidden", 1);
    let staging = tempfile::tempdir().unwrap();
    let species = SILAM.species("O3").unwrap();

    let err = http_driver(url, 3)
        .acquire(species, &window(1, 24), &staging.path().join("O3.nc"))
        .unwrap_err();

    assert_matches!(err, FetchError::HttpStatus { status: 403, .. });
    assert_eq!(server.join().unwrap(), 1);
}
