use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use tracing::debug;

use crate::domain::{Bucket, ForecastWindow, RemoteFile};
use crate::error::FetchError;
use crate::template::{render, render_with, TemplateContext};

/// Capture group that holds the forecast hour when a pattern names it.
pub const OFFSET_GROUP: &str = "offset";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenamePattern {
    template: String,
}

impl FilenamePattern {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn compile(&self, species: &str, init: DateTime<Utc>) -> Result<Regex, FetchError> {
        let context = TemplateContext::new()
            .with_text("species", species)
            .with_time("fcinit", init);
        let rendered = render_with(&self.template, &context, regex::escape);
        let regex = Regex::new(&format!("^(?:{rendered})"))
            .map_err(|err| FetchError::InvalidPattern(err.to_string()))?;
        if regex.captures_len() < 2 {
            return Err(FetchError::InvalidPattern(format!(
                "`{}` has no capture group for the forecast hour",
                self.template
            )));
        }
        Ok(regex)
    }
}

/// Names whose captured hour offset falls inside the window, ascending by offset.
///
/// A repeated offset keeps the entry listed last.
pub fn filter_by_offset<S>(listing: &[S], pattern: &Regex, window: &ForecastWindow) -> Vec<RemoteFile>
where
    S: AsRef<str>,
{
    let mut selected: BTreeMap<i64, String> = BTreeMap::new();
    for name in listing {
        let name = name.as_ref();
        let Some(captures) = pattern.captures(name) else {
            continue;
        };
        let Some(group) = captures.name(OFFSET_GROUP).or_else(|| captures.get(1)) else {
            continue;
        };
        let Ok(hours) = group.as_str().parse::<i64>() else {
            continue;
        };
        if window.contains(window.init() + TimeDelta::hours(hours)) {
            selected.insert(hours, name.to_string());
        }
    }
    debug!(matched = selected.len(), listed = listing.len(), "filtered remote listing");
    selected
        .into_iter()
        .map(|(hours, name)| RemoteFile::with_offset(name, hours))
        .collect()
}

pub fn partition_buckets(window: &ForecastWindow) -> Result<Vec<Bucket>, FetchError> {
    let first = Bucket::for_offset(window.start_offset());
    let last = Bucket::for_offset(window.end_offset());
    match (first, last) {
        (Some(first), Some(last)) => Ok(Bucket::range(first, last)),
        _ => Err(FetchError::InvalidForecastWindow(format!(
            "{window} reaches beyond the last 24h range (73H96H)"
        ))),
    }
}

/// Name of the object whose presence marks a complete upstream run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRule {
    template: String,
}

impl ManifestRule {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn name(&self, init: DateTime<Utc>) -> String {
        render(&self.template, &TemplateContext::new().with_time("fcinit", init))
    }
}

pub fn require_manifest<S>(listing: &[S], name: &str) -> Result<(), FetchError>
where
    S: AsRef<str>,
{
    if listing.iter().any(|entry| entry.as_ref() == name) {
        Ok(())
    } else {
        Err(FetchError::DataNotAvailable(format!(
            "manifest {name} is not published"
        )))
    }
}
