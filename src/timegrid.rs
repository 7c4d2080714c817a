use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};

use crate::domain::{FcTime, ForecastWindow, WindowBound};
use crate::error::FetchError;
use crate::models::{ModelSpec, StepRule};

/// Init time (00:00 UTC) of a calendar day, rejecting days that have not started.
pub fn check_day(day: NaiveDate, now: DateTime<Utc>) -> Result<DateTime<Utc>, FetchError> {
    let init = day.and_time(NaiveTime::MIN).and_utc();
    if init > now {
        return Err(FetchError::FutureInitTime(init.format("%Y-%m-%d").to_string()));
    }
    Ok(init)
}

pub fn resolve_bound(
    model: &ModelSpec,
    bound: WindowBound,
    init: DateTime<Utc>,
    fctime: FcTime,
) -> Result<DateTime<Utc>, FetchError> {
    let offset = match fctime.offset_from(init) {
        Some(offset) => offset,
        None => match bound {
            WindowBound::Start => model.fcstart_offset(),
            WindowBound::End => model.fcend_offset(),
        },
    };

    if offset < model.fcstart_offset() || offset > model.fcend_offset() {
        return Err(FetchError::InvalidForecastWindow(format!(
            "{bound} {} lies outside +{}h..+{}h of {}",
            describe_offset(offset),
            model.fcstart_offset_hours,
            model.fcend_offset_hours,
            model.name
        )));
    }

    let step = model.fcstep().num_seconds();
    if step <= 0 || offset.num_seconds() % step != 0 {
        return Err(FetchError::InvalidForecastWindow(format!(
            "{bound} {} is not a multiple of the {}h step of {}",
            describe_offset(offset),
            model.fcstep_hours,
            model.name
        )));
    }

    Ok(init + offset)
}

pub fn resolve_window(
    model: &ModelSpec,
    init: DateTime<Utc>,
    start: FcTime,
    end: FcTime,
) -> Result<ForecastWindow, FetchError> {
    let start = resolve_bound(model, WindowBound::Start, init, start)?;
    let end = resolve_bound(model, WindowBound::End, init, end)?;
    ForecastWindow::new(init, start, end)
}

pub fn expected_steps(model: &ModelSpec, window: &ForecastWindow) -> usize {
    match model.step_rule {
        StepRule::Uniform => {
            let step = model.fcstep().num_seconds().max(1);
            let span = (window.end() - window.start()).num_seconds();
            usize::try_from(span / step).unwrap_or(0) + 1
        }
        StepRule::DailyBlocks => {
            let day = TimeDelta::hours(24);
            let mut steps = 0;
            if window.start_offset() <= day {
                steps += 25;
            }
            for days in 1..=3 {
                if window.end_offset() > day * days {
                    steps += 24;
                }
            }
            steps
        }
    }
}

fn describe_offset(offset: TimeDelta) -> String {
    if offset.num_seconds() % 3600 == 0 {
        format!("+{}h", offset.num_hours())
    } else {
        format!("+{}m", offset.num_minutes())
    }
}
