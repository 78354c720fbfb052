use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use anyhow::{
  anyhow,
  bail
};
use chrono::{
  DateTime,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  TimeZone,
  Utc
};
use chrono_tz::Tz;
use regex::Regex;
use tracing::{
  debug,
  trace,
  warn
};

/// Same shape as JavaScript's
/// `Date.prototype.toISOString`.
pub const ISO_MILLIS_FORMAT: &str =
  "%Y-%m-%dT%H:%M:%S%.3fZ";

const DATE_MARKER_PATTERN: &str =
  r"^(?P<year>\d{4})[-/](?P<month>\d{1,2})[-/](?P<day>\d{1,2})$";

const DST_PROBE_STEP_MINUTES: i64 = 15;
const DST_PROBE_LIMIT_STEPS: i64 = 16;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
)]
pub enum CalendarSystem {
  #[default]
  Gregorian,
  Jalali
}

impl FromStr for CalendarSystem {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "gregorian" | "greg" => {
        Ok(Self::Gregorian)
      }
      | "jalali" | "persian"
      | "shamsi" => Ok(Self::Jalali),
      | other => {
        Err(anyhow!(
          "unknown calendar system: \
           {other}"
        ))
      }
    }
  }
}

/// A day picked in the UI's calendar.
/// The Gregorian equivalent is resolved
/// once, at construction, so an invalid
/// day can never reach the normalizer.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct CalendarDate {
  system:    CalendarSystem,
  year:      i32,
  month:     u32,
  day:       u32,
  gregorian: NaiveDate
}

impl CalendarDate {
  pub fn new(
    system: CalendarSystem,
    year: i32,
    month: u32,
    day: u32
  ) -> anyhow::Result<Self> {
    let gregorian = match system {
      | CalendarSystem::Gregorian => {
        NaiveDate::from_ymd_opt(
          year, month, day
        )
      }
      | CalendarSystem::Jalali => {
        jalali_to_gregorian(
          year, month, day
        )
      }
    }
    .ok_or_else(|| {
      anyhow!(
        "{year:04}-{month:02}-{day:02} \
         is not a valid {system:?} \
         date"
      )
    })?;

    Ok(Self {
      system,
      year,
      month,
      day,
      gregorian
    })
  }

  /// Accepts `YYYY-MM-DD` and
  /// `YYYY/MM/DD`.
  #[tracing::instrument(skip(system), fields(input = input))]
  pub fn parse(
    system: CalendarSystem,
    input: &str
  ) -> anyhow::Result<Self> {
    let marker_re = date_marker_re()?;

    let token = input.trim();
    let caps = marker_re
      .captures(token)
      .ok_or_else(|| {
        anyhow!(
          "expected a date like \
           YYYY-MM-DD, got: {token}"
        )
      })?;

    let year = caps["year"]
      .parse::<i32>()
      .map_err(|e| {
        anyhow!("invalid year: {e}")
      })?;
    let month = caps["month"]
      .parse::<u32>()
      .map_err(|e| {
        anyhow!("invalid month: {e}")
      })?;
    let day = caps["day"]
      .parse::<u32>()
      .map_err(|e| {
        anyhow!("invalid day: {e}")
      })?;

    Self::new(system, year, month, day)
  }

  pub fn to_gregorian(
    &self
  ) -> NaiveDate {
    self.gregorian
  }
}

impl fmt::Display for CalendarDate {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    let sep = match self.system {
      | CalendarSystem::Gregorian => '-',
      | CalendarSystem::Jalali => '/'
    };
    write!(
      f,
      "{:04}{sep}{:02}{sep}{:02}",
      self.year, self.month, self.day
    )
  }
}

/// Draft value of a date-range filter.
/// A range without a start is treated
/// as "no filter".
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
)]
pub struct DateRange {
  pub start: Option<CalendarDate>,
  pub end:   Option<CalendarDate>
}

impl DateRange {
  pub fn new(
    start: CalendarDate,
    end: Option<CalendarDate>
  ) -> Self {
    Self {
      start: Some(start),
      end
    }
  }

  pub fn single_day(
    day: CalendarDate
  ) -> Self {
    Self::new(day, None)
  }

  /// Parses `start`, `start..end` or
  /// `start..`. A missing start
  /// (`..end`) yields a range that
  /// filters nothing.
  pub fn parse(
    system: CalendarSystem,
    input: &str
  ) -> anyhow::Result<Self> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
      return Ok(Self::default());
    }

    match trimmed.split_once("..") {
      | Some((start, end)) => {
        let end = if end.trim().is_empty()
        {
          None
        } else {
          Some(CalendarDate::parse(
            system, end
          )?)
        };
        if start.trim().is_empty() {
          return Ok(Self {
            start: None,
            end
          });
        }
        let start = CalendarDate::parse(
          system, start
        )?;
        Ok(Self::new(start, end))
      }
      | None => {
        Ok(Self::single_day(
          CalendarDate::parse(
            system, trimmed
          )?
        ))
      }
    }
  }

  pub fn is_empty(&self) -> bool {
    self.start.is_none()
  }

  pub fn is_inverted(&self) -> bool {
    match (self.start, self.end) {
      | (Some(start), Some(end)) => {
        end.to_gregorian()
          < start.to_gregorian()
      }
      | _ => false
    }
  }
}

/// Inclusive UTC bounds of a normalized
/// range.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct TimeRange {
  pub from: DateTime<Utc>,
  pub to:   DateTime<Utc>
}

impl TimeRange {
  pub fn from_iso(&self) -> String {
    self
      .from
      .format(ISO_MILLIS_FORMAT)
      .to_string()
  }

  pub fn to_iso(&self) -> String {
    self
      .to
      .format(ISO_MILLIS_FORMAT)
      .to_string()
  }
}

#[derive(Debug, Clone, Copy)]
enum Probe {
  Forward,
  Backward
}

/// Converts calendar-day ranges into
/// UTC instants, interpreting civil
/// time in one timezone.
#[derive(Debug, Clone, Copy)]
pub struct RangeNormalizer {
  timezone: Tz
}

impl Default for RangeNormalizer {
  fn default() -> Self {
    Self {
      timezone: chrono_tz::UTC
    }
  }
}

impl RangeNormalizer {
  pub fn new(timezone: Tz) -> Self {
    Self {
      timezone
    }
  }

  pub fn timezone(&self) -> Tz {
    self.timezone
  }

  /// `from` is the first millisecond
  /// of the start day, `to` the last
  /// millisecond of the end day. A
  /// missing end collapses to the start
  /// day; an end before the start is
  /// rejected.
  #[tracing::instrument(skip(self), fields(tz = %self.timezone))]
  pub fn normalize(
    &self,
    start: CalendarDate,
    end: Option<CalendarDate>
  ) -> anyhow::Result<TimeRange> {
    let end = end.unwrap_or(start);
    let first_day = start.to_gregorian();
    let last_day = end.to_gregorian();

    if last_day < first_day {
      warn!(
        start = %start,
        end = %end,
        "rejecting inverted date range"
      );
      bail!(
        "date range ends ({end}) \
         before it starts ({start})"
      );
    }

    let from = self.resolve_local(
      first_day
        .and_time(NaiveTime::MIN),
      Probe::Forward
    )?;
    let day_end =
      NaiveTime::from_hms_milli_opt(
        23, 59, 59, 999
      )
      .ok_or_else(|| {
        anyhow!(
          "invalid end-of-day time"
        )
      })?;
    let to = self.resolve_local(
      last_day.and_time(day_end),
      Probe::Backward
    )?;

    debug!(
      from = %from,
      to = %to,
      "normalized calendar range"
    );
    Ok(TimeRange {
      from,
      to
    })
  }

  pub fn normalize_range(
    &self,
    range: &DateRange
  ) -> anyhow::Result<Option<TimeRange>>
  {
    match range.start {
      | Some(start) => {
        self
          .normalize(start, range.end)
          .map(Some)
      }
      | None => Ok(None)
    }
  }

  fn resolve_local(
    &self,
    local: NaiveDateTime,
    probe: Probe
  ) -> anyhow::Result<DateTime<Utc>> {
    for step in 0..=DST_PROBE_LIMIT_STEPS
    {
      let offset = Duration::minutes(
        step * DST_PROBE_STEP_MINUTES
      );
      let candidate = match probe {
        | Probe::Forward => local + offset,
        | Probe::Backward => {
          local - offset
        }
      };

      match self
        .timezone
        .from_local_datetime(&candidate)
      {
        | LocalResult::Single(dt) => {
          return Ok(
            dt.with_timezone(&Utc)
          );
        }
        | LocalResult::Ambiguous(
          first,
          second
        ) => {
          let (early, late) =
            if first <= second {
              (first, second)
            } else {
              (second, first)
            };
          let chosen = match probe {
            | Probe::Forward => early,
            | Probe::Backward => late
          };
          trace!(
            local = %candidate,
            chosen = %chosen,
            "ambiguous local datetime"
          );
          return Ok(
            chosen.with_timezone(&Utc)
          );
        }
        | LocalResult::None => {
          trace!(
            local = %candidate,
            "local datetime falls in a \
             timezone gap; probing"
          );
        }
      }
    }

    Err(anyhow!(
      "local datetime {local} does not \
       exist in {}",
      self.timezone
    ))
  }
}

fn date_marker_re()
-> anyhow::Result<&'static Regex> {
  static MARKER_RE: OnceLock<
    Result<Regex, regex::Error>
  > = OnceLock::new();
  MARKER_RE
    .get_or_init(|| {
      Regex::new(DATE_MARKER_PATTERN)
    })
    .as_ref()
    .map_err(|e| {
      anyhow!(
        "internal regex compile \
         failure: {e}"
      )
    })
}

pub fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "configured filter timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

/// Solar Hijri to Gregorian using the
/// 33-year arithmetic cycle. Returns
/// `None` for days the Jalali year does
/// not have.
fn jalali_to_gregorian(
  year: i32,
  month: u32,
  day: u32
) -> Option<NaiveDate> {
  if !(1..=9000).contains(&year)
    || !(1..=12).contains(&month)
    || day == 0
  {
    return None;
  }

  let month_len =
    if month <= 6 { 31 } else { 30 };
  if day > month_len {
    return None;
  }

  let date = jalali_days_to_gregorian(
    year, month, day
  )?;

  // Esfand 30 only exists in leap
  // years; otherwise it lands on the
  // next Nowruz.
  if month == 12 && day == 30 {
    let nowruz =
      jalali_days_to_gregorian(
        year + 1,
        1,
        1
      )?;
    if date >= nowruz {
      return None;
    }
  }

  Some(date)
}

fn jalali_days_to_gregorian(
  year: i32,
  month: u32,
  day: u32
) -> Option<NaiveDate> {
  let jy = i64::from(year) + 1595;
  let jm = i64::from(month);
  let jd = i64::from(day);

  let month_offset = if jm < 7 {
    (jm - 1) * 31
  } else {
    (jm - 7) * 30 + 186
  };
  let mut days = -355_668
    + 365 * jy
    + (jy / 33) * 8
    + ((jy % 33) + 3) / 4
    + jd
    + month_offset;

  let mut gy = 400 * (days / 146_097);
  days %= 146_097;
  if days > 36_524 {
    days -= 1;
    gy += 100 * (days / 36_524);
    days %= 36_524;
    if days >= 365 {
      days += 1;
    }
  }
  gy += 4 * (days / 1_461);
  days %= 1_461;
  if days > 365 {
    gy += (days - 1) / 365;
    days = (days - 1) % 365;
  }

  let gy = i32::try_from(gy).ok()?;
  let ordinal =
    u32::try_from(days + 1).ok()?;
  NaiveDate::from_yo_opt(gy, ordinal)
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::{
    CalendarDate,
    CalendarSystem,
    DateRange,
    RangeNormalizer,
    date_marker_re
  };

  fn greg(
    y: i32,
    m: u32,
    d: u32
  ) -> CalendarDate {
    CalendarDate::new(
      CalendarSystem::Gregorian,
      y,
      m,
      d
    )
    .expect("valid gregorian date")
  }

  #[test]
  fn range_covers_both_full_days() {
    let range = RangeNormalizer::default()
      .normalize(
        greg(2024, 1, 10),
        Some(greg(2024, 1, 12))
      )
      .expect("normalize");

    assert_eq!(
      range.from_iso(),
      "2024-01-10T00:00:00.000Z"
    );
    assert_eq!(
      range.to_iso(),
      "2024-01-12T23:59:59.999Z"
    );
  }

  #[test]
  fn missing_end_collapses_to_single_day()
  {
    let range = RangeNormalizer::default()
      .normalize(greg(2024, 2, 29), None)
      .expect("normalize");

    assert_eq!(
      range.from_iso(),
      "2024-02-29T00:00:00.000Z"
    );
    assert_eq!(
      range.to_iso(),
      "2024-02-29T23:59:59.999Z"
    );
  }

  #[test]
  fn inverted_range_is_rejected() {
    let err = RangeNormalizer::default()
      .normalize(
        greg(2024, 1, 12),
        Some(greg(2024, 1, 10))
      )
      .expect_err("inverted range");
    assert!(
      err
        .to_string()
        .contains("before it starts")
    );
  }

  #[test]
  fn civil_day_follows_timezone() {
    let normalizer = RangeNormalizer::new(
      chrono_tz::Asia::Tehran
    );
    let range = normalizer
      .normalize(
        greg(2024, 1, 10),
        Some(greg(2024, 1, 12))
      )
      .expect("normalize");

    // Tehran is UTC+03:30 in winter.
    assert_eq!(
      range.from_iso(),
      "2024-01-09T20:30:00.000Z"
    );
    assert_eq!(
      range.to_iso(),
      "2024-01-12T20:29:59.999Z"
    );
  }

  #[test]
  fn midnight_gap_moves_start_forward() {
    // Tehran skipped 00:00-01:00 on
    // 2021-03-22 when DST began.
    let normalizer = RangeNormalizer::new(
      chrono_tz::Asia::Tehran
    );
    let range = normalizer
      .normalize(greg(2021, 3, 22), None)
      .expect("normalize");

    assert_eq!(
      range.from_iso(),
      "2021-03-21T20:30:00.000Z"
    );
  }

  #[test]
  fn jalali_markers_convert_to_gregorian()
  {
    let nowruz = CalendarDate::new(
      CalendarSystem::Jalali,
      1403,
      1,
      1
    )
    .expect("nowruz 1403");
    assert_eq!(
      nowruz.to_gregorian(),
      NaiveDate::from_ymd_opt(2024, 3, 20)
        .expect("date")
    );

    let dey = CalendarDate::parse(
      CalendarSystem::Jalali,
      "1402/10/20"
    )
    .expect("parse jalali");
    assert_eq!(
      dey.to_gregorian(),
      NaiveDate::from_ymd_opt(2024, 1, 10)
        .expect("date")
    );
    assert_eq!(
      dey.to_string(),
      "1402/10/20"
    );
  }

  #[test]
  fn esfand_thirty_needs_a_leap_year() {
    // 1403 is a Jalali leap year, 1402
    // is not.
    assert!(
      CalendarDate::new(
        CalendarSystem::Jalali,
        1403,
        12,
        30
      )
      .is_ok()
    );
    assert!(
      CalendarDate::new(
        CalendarSystem::Jalali,
        1402,
        12,
        30
      )
      .is_err()
    );
  }

  #[test]
  fn rejects_impossible_gregorian_days()
  {
    assert!(
      CalendarDate::parse(
        CalendarSystem::Gregorian,
        "2023-02-29"
      )
      .is_err()
    );
    assert!(
      CalendarDate::parse(
        CalendarSystem::Gregorian,
        "10/01/2024"
      )
      .is_err()
    );
  }

  #[test]
  fn parses_open_and_closed_ranges() {
    let closed = DateRange::parse(
      CalendarSystem::Gregorian,
      "2024-01-10..2024-01-12"
    )
    .expect("closed range");
    assert_eq!(
      closed.end,
      Some(greg(2024, 1, 12))
    );

    let single = DateRange::parse(
      CalendarSystem::Gregorian,
      "2024-01-10"
    )
    .expect("single day");
    assert_eq!(single.end, None);
    assert!(!single.is_empty());

    let empty = DateRange::parse(
      CalendarSystem::Gregorian,
      "  "
    )
    .expect("empty");
    assert!(empty.is_empty());

    let open_start = DateRange::parse(
      CalendarSystem::Gregorian,
      "..2024-01-12"
    )
    .expect("range without start");
    assert!(open_start.is_empty());
    assert_eq!(
      open_start.end,
      Some(greg(2024, 1, 12))
    );
    assert_eq!(
      RangeNormalizer::default()
        .normalize_range(&open_start)
        .expect("normalize"),
      None
    );
  }

  #[test]
  fn date_pattern_is_compiled_once() {
    let first =
      date_marker_re().expect("regex");
    let second =
      date_marker_re().expect("regex");
    assert!(std::ptr::eq(first, second));
  }
}
