//! Observation dates and file-name date extraction.

use chrono::{Datelike, NaiveDate};

use crate::error::{EngineError, Result};

/// Offset subtracted from `ce` when a disturbance timestamp is written
/// out. A raw day-count offset, not a calendar conversion.
pub const EPOCH_DAY_OFFSET: i32 = 1970 * 365;

/// The timestamp of one observation in a stack.
///
/// `ce` is a continuous-era day count and serves as the time axis of the
/// harmonic model; `year` and `doy` are kept alongside because the
/// engines reason about calendar years (reference windows, target years)
/// and report day-of-year in outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObsDate {
    /// Days since the common era.
    pub ce: i32,
    /// Calendar year.
    pub year: i32,
    /// Day of year, 1-based.
    pub doy: i32,
}

impl ObsDate {
    /// Build from a calendar date.
    pub fn from_calendar(date: NaiveDate) -> Self {
        ObsDate {
            ce: date.num_days_from_ce(),
            year: date.year(),
            doy: date.ordinal() as i32,
        }
    }

    /// Extract the acquisition date from an image file name.
    ///
    /// The first run of eight digits that parses as a calendar date with
    /// a year in [1900, 2100] wins, e.g. `20180415_LEVEL2_BOA.tif`.
    pub fn from_file_name(name: &str) -> Result<Self> {
        let bytes = name.as_bytes();
        for start in 0..bytes.len().saturating_sub(7) {
            let window = &bytes[start..start + 8];
            if !window.iter().all(u8::is_ascii_digit) {
                continue;
            }
            let text = std::str::from_utf8(window).expect("digits are valid utf-8");
            if let Ok(date) = NaiveDate::parse_from_str(text, "%Y%m%d") {
                if (1900..=2100).contains(&date.year()) {
                    return Ok(ObsDate::from_calendar(date));
                }
            }
        }
        Err(EngineError::UndatedFileName(name.to_string()))
    }
}
