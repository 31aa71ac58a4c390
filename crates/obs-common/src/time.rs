//! Time handling for observation data.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TimeParseError, TimeResult};

/// Assimilation time window.
///
/// The window is half-open: an observation at `begin` is outside, one at
/// `end` is inside. When `extended_lower_bound` is set it replaces `begin`
/// as the lower edge used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_lower_bound: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn new(begin: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            begin,
            end,
            extended_lower_bound: None,
        }
    }

    /// Parse a window from two ISO 8601 strings.
    pub fn parse(begin: &str, end: &str) -> TimeResult<Self> {
        let window = Self::new(parse_datetime(begin)?, parse_datetime(end)?);
        window.validate()?;
        Ok(window)
    }

    /// Set the extended lower bound used in place of `begin` when filtering.
    pub fn with_extended_lower_bound(mut self, bound: DateTime<Utc>) -> Self {
        self.extended_lower_bound = Some(bound);
        self
    }

    /// Lower edge (exclusive) actually applied by [`TimeWindow::contains`].
    pub fn effective_begin(&self) -> DateTime<Utc> {
        self.extended_lower_bound.unwrap_or(self.begin)
    }

    /// `effective_begin < dt <= end`.
    pub fn contains(&self, dt: &DateTime<Utc>) -> bool {
        dt > &self.effective_begin() && dt <= &self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.begin
    }

    pub fn validate(&self) -> TimeResult<()> {
        if self.begin >= self.end {
            return Err(TimeParseError::InvalidWindow {
                begin: self.begin.to_rfc3339(),
                end: self.end.to_rfc3339(),
            });
        }
        if let Some(bound) = self.extended_lower_bound {
            if bound > self.begin {
                return Err(TimeParseError::InvalidWindow {
                    begin: bound.to_rfc3339(),
                    end: self.begin.to_rfc3339(),
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}]", self.effective_begin().to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Parse an ISO 8601 date time, assuming UTC when no offset is given.
pub fn parse_datetime(s: &str) -> TimeResult<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%SZ"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(ndt) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    Err(TimeParseError::InvalidFormat(s.to_string()))
}

/// Decode a `YYYYMMDDhh` reference date time (the legacy `date_time` global
/// attribute).
pub fn reference_datetime(packed: i64) -> TimeResult<DateTime<Utc>> {
    let year = packed / 1_000_000;
    let rest = packed % 1_000_000;
    let month = rest / 10_000;
    let rest = rest % 10_000;
    let day = rest / 100;
    let hour = rest % 100;

    Utc.with_ymd_and_hms(year as i32, month as u32, day as u32, hour as u32, 0, 0)
        .single()
        .ok_or(TimeParseError::InvalidReference(packed))
}

/// Parse a `"seconds since <ISO 8601>"` units string into its epoch.
pub fn parse_epoch_units(units: &str) -> TimeResult<DateTime<Utc>> {
    let epoch = units
        .trim()
        .strip_prefix("seconds since ")
        .ok_or_else(|| TimeParseError::InvalidUnits(units.to_string()))?;
    parse_datetime(epoch).map_err(|_| TimeParseError::InvalidUnits(units.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> TimeWindow {
        TimeWindow::parse("2018-04-14T21:00:00Z", "2018-04-15T03:00:00Z").unwrap()
    }

    #[test]
    fn test_window_is_half_open() {
        let w = window();
        assert!(!w.contains(&w.begin));
        assert!(w.contains(&w.end));
        assert!(w.contains(&(w.begin + Duration::hours(1))));
        assert!(!w.contains(&(w.begin - Duration::seconds(1))));
        assert!(!w.contains(&(w.end + Duration::seconds(1))));
    }

    #[test]
    fn test_extended_lower_bound() {
        let w = window();
        let early = w.begin - Duration::hours(1);
        assert!(!w.contains(&early));

        let extended = w.with_extended_lower_bound(w.begin - Duration::hours(2));
        assert!(extended.contains(&early));
        assert!(extended.contains(&extended.begin));
        assert!(extended.validate().is_ok());
    }

    #[test]
    fn test_window_validation() {
        assert!(TimeWindow::parse("2018-04-15T03:00:00Z", "2018-04-14T21:00:00Z").is_err());

        let w = window().with_extended_lower_bound(window().begin + Duration::hours(1));
        assert!(w.validate().is_err());
    }

    #[test]
    fn test_parse_datetime_formats() {
        let expected = Utc.with_ymd_and_hms(2018, 4, 15, 0, 0, 0).unwrap();
        assert_eq!(parse_datetime("2018-04-15T00:00:00Z").unwrap(), expected);
        assert_eq!(parse_datetime("2018-04-15T00:00:00").unwrap(), expected);
        assert_eq!(parse_datetime("2018-04-15").unwrap(), expected);
        assert!(parse_datetime("not a time").is_err());
    }

    #[test]
    fn test_reference_datetime() {
        let dt = reference_datetime(2018041500).unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2018, 4, 15, 0, 0, 0).unwrap());
        assert!(reference_datetime(2018133200).is_err());
    }

    #[test]
    fn test_parse_epoch_units() {
        let epoch = parse_epoch_units("seconds since 1970-01-01T00:00:00Z").unwrap();
        assert_eq!(epoch.timestamp(), 0);
        assert!(parse_epoch_units("hours since 1970-01-01T00:00:00Z").is_err());
    }
}
