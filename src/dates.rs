use chrono::{
  DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, Offset, SecondsFormat, Utc,
};
use serde_json::Value;

// Indian Standard Time, UTC+05:30, no DST.
const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;
const SHEETS_SERIAL_MAX: f64 = 2_958_466.0;

const NAIVE_DATETIME_FORMATS: [&str; 5] = [
  "%Y-%m-%dT%H:%M:%S%.f",
  "%Y-%m-%dT%H:%M",
  "%Y-%m-%d %H:%M:%S",
  "%m/%d/%Y %H:%M:%S",
  "%m/%d/%Y %H:%M",
];

const NAIVE_DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

pub fn ist() -> FixedOffset {
  FixedOffset::east_opt(IST_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// A point in time pinned to IST. All persisted and compared dates go through this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CanonicalInstant(DateTime<FixedOffset>);

impl CanonicalInstant {
  pub fn now() -> Self {
    Self::from_utc(Utc::now())
  }

  pub fn from_utc(value: DateTime<Utc>) -> Self {
    Self(value.with_timezone(&ist()))
  }

  pub fn from_date(date: NaiveDate) -> Self {
    Self::from_local(date.and_hms_opt(0, 0, 0).unwrap_or_default())
  }

  fn from_local(naive: NaiveDateTime) -> Self {
    let offset = ist();
    Self(DateTime::from_naive_utc_and_offset(naive - Duration::seconds(IST_OFFSET_SECS as i64), offset))
  }

  /// Reads back a value written by [`to_storage`].
  pub fn from_storage(value: &str) -> Option<Self> {
    DateTime::parse_from_rfc3339(value)
      .ok()
      .map(|dt| Self(dt.with_timezone(&ist())))
  }

  pub fn as_datetime(&self) -> DateTime<FixedOffset> {
    self.0
  }

  pub fn date(&self) -> NaiveDate {
    self.0.date_naive()
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DateInput {
  Text(String),
  /// Spreadsheet serial day number, days since 1899-12-30.
  Serial(f64),
  Utc(DateTime<Utc>),
  Date(NaiveDate),
}

impl DateInput {
  pub fn from_json(value: &Value) -> Self {
    match value {
      Value::String(text) => DateInput::Text(text.clone()),
      Value::Number(number) => number
        .as_f64()
        .map(DateInput::Serial)
        .unwrap_or_else(|| DateInput::Text(number.to_string())),
      other => DateInput::Text(other.to_string()),
    }
  }
}

impl From<&str> for DateInput {
  fn from(value: &str) -> Self {
    DateInput::Text(value.to_string())
  }
}

impl From<String> for DateInput {
  fn from(value: String) -> Self {
    DateInput::Text(value)
  }
}

impl From<DateTime<Utc>> for DateInput {
  fn from(value: DateTime<Utc>) -> Self {
    DateInput::Utc(value)
  }
}

impl From<NaiveDate> for DateInput {
  fn from(value: NaiveDate) -> Self {
    DateInput::Date(value)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseWarning {
  pub input: String,
}

impl std::fmt::Display for ParseWarning {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "unrecognised date value {:?}", self.input)
  }
}

pub fn try_normalize(input: &DateInput) -> Result<CanonicalInstant, ParseWarning> {
  match input {
    DateInput::Utc(value) => Ok(CanonicalInstant::from_utc(*value)),
    DateInput::Date(value) => Ok(CanonicalInstant::from_date(*value)),
    DateInput::Serial(serial) => parse_serial(*serial).ok_or_else(|| ParseWarning {
      input: serial.to_string(),
    }),
    DateInput::Text(text) => parse_text(text).ok_or_else(|| ParseWarning { input: text.clone() }),
  }
}

/// Best-effort coercion; falls back to `fallback` and logs when the input is unreadable.
pub fn normalize_or(input: &DateInput, fallback: CanonicalInstant) -> CanonicalInstant {
  match try_normalize(input) {
    Ok(instant) => instant,
    Err(warning) => {
      log::warn!("{warning}, using {}", to_storage(&fallback));
      fallback
    }
  }
}

pub fn normalize(input: &DateInput) -> CanonicalInstant {
  normalize_or(input, CanonicalInstant::now())
}

pub fn to_storage(instant: &CanonicalInstant) -> String {
  instant.0.to_rfc3339_opts(SecondsFormat::Secs, false)
}

pub fn to_display(instant: &CanonicalInstant) -> String {
  instant.0.format("%d %b %Y").to_string()
}

pub fn to_remote_date_key(instant: &CanonicalInstant) -> String {
  instant.0.format("%Y-%m-%d").to_string()
}

pub fn month_key(instant: &CanonicalInstant) -> String {
  instant.0.format("%Y-%m").to_string()
}

fn parse_text(raw: &str) -> Option<CanonicalInstant> {
  let value = raw.trim();
  if value.is_empty() {
    return None;
  }

  if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
    return Some(CanonicalInstant(dt.with_timezone(&ist())));
  }

  for format in NAIVE_DATE_FORMATS {
    if let Ok(date) = NaiveDate::parse_from_str(value, format) {
      return Some(CanonicalInstant::from_date(date));
    }
  }

  for format in NAIVE_DATETIME_FORMATS {
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
      return Some(CanonicalInstant::from_local(naive));
    }
  }

  // JavaScript Date#toString, e.g. "Tue Mar 05 2024 10:00:00 GMT+0530 (India Standard Time)"
  let stripped = value.split(" (").next().unwrap_or(value);
  if let Ok(dt) = DateTime::parse_from_str(stripped, "%a %b %d %Y %H:%M:%S GMT%z") {
    return Some(CanonicalInstant(dt.with_timezone(&ist())));
  }

  None
}

fn parse_serial(serial: f64) -> Option<CanonicalInstant> {
  if !serial.is_finite() || serial <= 0.0 || serial >= SHEETS_SERIAL_MAX {
    return None;
  }
  let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
  let days = serial.trunc() as i64;
  let seconds = ((serial - serial.trunc()) * 86_400.0).round() as i64;
  let naive = epoch.checked_add_signed(Duration::days(days))? + Duration::seconds(seconds);
  Some(CanonicalInstant::from_local(naive))
}
