use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::error::FetchError;

/// A requested window boundary, either absent (model default) or given relative to
/// the init time or as an absolute timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FcTime {
    #[default]
    Unset,
    RelativeHours(i64),
    Duration(TimeDelta),
    Absolute(DateTime<Utc>),
}

impl FcTime {
    pub fn offset_from(&self, init: DateTime<Utc>) -> Option<TimeDelta> {
        match self {
            FcTime::Unset => None,
            FcTime::RelativeHours(hours) => Some(TimeDelta::hours(*hours)),
            FcTime::Duration(delta) => Some(*delta),
            FcTime::Absolute(time) => Some(*time - init),
        }
    }
}

impl fmt::Display for FcTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FcTime::Unset => write!(f, "default"),
            FcTime::RelativeHours(hours) => write!(f, "+{hours}h"),
            FcTime::Duration(delta) => write!(f, "+{}m", delta.num_minutes()),
            FcTime::Absolute(time) => write!(f, "{}", time.format("%Y-%m-%dT%H:%M:%SZ")),
        }
    }
}

impl FromStr for FcTime {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Ok(FcTime::Unset);
        }
        if let Ok(hours) = trimmed.trim_start_matches('+').parse::<i64>() {
            return Ok(FcTime::RelativeHours(hours));
        }
        if let Some(number) = trimmed.strip_suffix('h') {
            if let Ok(hours) = number.trim_start_matches('+').parse::<i64>() {
                return Ok(FcTime::Duration(TimeDelta::hours(hours)));
            }
        }
        if let Some(number) = trimmed.strip_suffix('m') {
            if let Ok(minutes) = number.trim_start_matches('+').parse::<i64>() {
                return Ok(FcTime::Duration(TimeDelta::minutes(minutes)));
            }
        }
        if let Ok(time) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(FcTime::Absolute(time.with_timezone(&Utc)));
        }
        let candidates = [
            (trimmed.to_string(), "%Y-%m-%dT%H:%M:%S"),
            (trimmed.to_string(), "%Y-%m-%dT%H:%M"),
            // chrono cannot parse a timestamp without minutes
            (format!("{trimmed}:00"), "%Y-%m-%dT%H:%M"),
        ];
        for (candidate, format) in &candidates {
            if let Ok(time) = NaiveDateTime::parse_from_str(candidate, format) {
                return Ok(FcTime::Absolute(time.and_utc()));
            }
        }
        Err(FetchError::InvalidForecastWindow(format!(
            "cannot interpret `{value}` as a forecast time"
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowBound {
    Start,
    End,
}

impl fmt::Display for WindowBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowBound::Start => write!(f, "fc_start"),
            WindowBound::End => write!(f, "fc_end"),
        }
    }
}

/// Init time plus the inclusive `[start, end]` range requested from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForecastWindow {
    init: DateTime<Utc>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl ForecastWindow {
    pub fn new(
        init: DateTime<Utc>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self, FetchError> {
        if start > end {
            return Err(FetchError::InvalidForecastWindow(format!(
                "window start {} lies after window end {}",
                start.format("%Y-%m-%dT%H:%M"),
                end.format("%Y-%m-%dT%H:%M")
            )));
        }
        Ok(Self { init, start, end })
    }

    pub fn init(&self) -> DateTime<Utc> {
        self.init
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        self.start <= time && time <= self.end
    }

    pub fn start_offset(&self) -> TimeDelta {
        self.start - self.init
    }

    pub fn end_offset(&self) -> TimeDelta {
        self.end - self.init
    }
}

impl fmt::Display for ForecastWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [+{}h, +{}h]",
            self.init.format("%Y-%m-%dT%H"),
            self.start_offset().num_hours(),
            self.end_offset().num_hours()
        )
    }
}

/// 24-hour forecast range served by range-subsetting services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Bucket {
    Day1,
    Day2,
    Day3,
    Day4,
}

impl Bucket {
    pub const ALL: [Bucket; 4] = [Bucket::Day1, Bucket::Day2, Bucket::Day3, Bucket::Day4];

    pub fn token(self) -> &'static str {
        match self {
            Bucket::Day1 => "0H24H",
            Bucket::Day2 => "25H48H",
            Bucket::Day3 => "49H72H",
            Bucket::Day4 => "73H96H",
        }
    }

    /// Bucket holding a forecast offset; upper bounds are inclusive.
    pub fn for_offset(offset: TimeDelta) -> Option<Bucket> {
        let minutes = offset.num_minutes();
        match minutes {
            m if m <= 24 * 60 => Some(Bucket::Day1),
            m if m <= 48 * 60 => Some(Bucket::Day2),
            m if m <= 72 * 60 => Some(Bucket::Day3),
            m if m <= 96 * 60 => Some(Bucket::Day4),
            _ => None,
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    pub fn range(first: Bucket, last: Bucket) -> Vec<Bucket> {
        Bucket::ALL[first.index()..=last.index()].to_vec()
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RemoteKey {
    Offset(i64),
    Bucket(Bucket),
}

/// One remote object selected for a window, in canonical temporal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: String,
    pub key: RemoteKey,
}

impl RemoteFile {
    pub fn with_offset(name: impl Into<String>, hours: i64) -> Self {
        Self {
            name: name.into(),
            key: RemoteKey::Offset(hours),
        }
    }

    pub fn for_bucket(bucket: Bucket) -> Self {
        Self {
            name: bucket.token().to_string(),
            key: RemoteKey::Bucket(bucket),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn parse_fctime_variants() {
        assert_eq!("".parse::<FcTime>().unwrap(), FcTime::Unset);
        assert_eq!("24".parse::<FcTime>().unwrap(), FcTime::RelativeHours(24));
        assert_eq!("+6".parse::<FcTime>().unwrap(), FcTime::RelativeHours(6));
        assert_eq!(
            "90m".parse::<FcTime>().unwrap(),
            FcTime::Duration(TimeDelta::minutes(90))
        );
        assert_eq!(
            "2017-02-16T01".parse::<FcTime>().unwrap(),
            FcTime::Absolute(Utc.with_ymd_and_hms(2017, 2, 16, 1, 0, 0).unwrap())
        );
        assert_eq!(
            "2017-02-16T01:00:00Z".parse::<FcTime>().unwrap(),
            FcTime::Absolute(Utc.with_ymd_and_hms(2017, 2, 16, 1, 0, 0).unwrap())
        );
    }

    #[test]
    fn parse_fctime_invalid() {
        let err = "tomorrow".parse::<FcTime>().unwrap_err();
        assert_matches!(err, FetchError::InvalidForecastWindow(_));
    }

    #[test]
    fn window_rejects_reversed_bounds() {
        let init = Utc.with_ymd_and_hms(2017, 2, 15, 0, 0, 0).unwrap();
        let err = ForecastWindow::new(init, init + TimeDelta::hours(2), init).unwrap_err();
        assert_matches!(err, FetchError::InvalidForecastWindow(_));
    }

    #[test]
    fn bucket_boundaries_are_inclusive() {
        assert_eq!(Bucket::for_offset(TimeDelta::hours(0)), Some(Bucket::Day1));
        assert_eq!(Bucket::for_offset(TimeDelta::hours(24)), Some(Bucket::Day1));
        assert_eq!(Bucket::for_offset(TimeDelta::hours(25)), Some(Bucket::Day2));
        assert_eq!(Bucket::for_offset(TimeDelta::hours(96)), Some(Bucket::Day4));
        assert_eq!(Bucket::for_offset(TimeDelta::hours(97)), None);
    }
}
