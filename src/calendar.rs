//! Featured events and their iCalendar export.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default length of an occurrence without an explicit end time.
pub const DEFAULT_DURATION_MINUTES: i64 = 90;

const PRODUCT_ID: &str = "-//MFLC//Eventos//ES";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CalendarError {
    #[error("Invalid date: {0}")]
    InvalidDate(String),
    #[error("Invalid time: {0}")]
    InvalidTime(String),
}

/// One dated session of a featured event, as written by the site editors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturedOccurrence {
    pub title: String,
    /// `MM/DD/YYYY`
    pub date: String,
    /// `"2:30 PM"`, `"19:30"` or `"7pm"`
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
}

impl FeaturedOccurrence {
    pub fn new(title: &str, date: &str, time: &str) -> Self {
        Self {
            title: title.to_string(),
            date: date.to_string(),
            time: time.to_string(),
            end_time: None,
        }
    }

    pub fn with_end_time(mut self, end_time: &str) -> Self {
        self.end_time = Some(end_time.to_string());
        self
    }

    /// Start and end as local wall-clock times.
    pub fn span(&self) -> Result<(NaiveDateTime, NaiveDateTime), CalendarError> {
        let date = parse_mdy(&self.date)?;
        let start = date.and_time(parse_time_flexible(&self.time)?);

        let end = match &self.end_time {
            Some(end_time) => date.and_time(parse_time_flexible(end_time)?),
            None => start + Duration::minutes(DEFAULT_DURATION_MINUTES),
        };

        Ok((start, end))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturedEvent {
    pub title: String,
    pub address: String,
    #[serde(default)]
    pub maps_query: String,
    #[serde(default)]
    pub description: String,
    pub occurrences: Vec<FeaturedOccurrence>,
}

/// Parse `MM/DD/YYYY`.
///
/// Exactly three numeric fields are required; zero fields and dates that do
/// not exist on the calendar are rejected.
pub fn parse_mdy(mdy: &str) -> Result<NaiveDate, CalendarError> {
    let invalid = || CalendarError::InvalidDate(mdy.to_string());

    let fields: Vec<&str> = mdy.split('/').map(str::trim).collect();
    let [m, d, y] = fields.as_slice() else {
        return Err(invalid());
    };

    let m: u32 = m.parse().map_err(|_| invalid())?;
    let d: u32 = d.parse().map_err(|_| invalid())?;
    let y: i32 = y.parse().map_err(|_| invalid())?;
    if m == 0 || d == 0 || y <= 0 {
        return Err(invalid());
    }

    NaiveDate::from_ymd_opt(y, m, d).ok_or_else(invalid)
}

/// Parse `"2:30 PM"`, `"2:30pm"`, `"7 pm"`, `"19:30"` or `"7"`.
pub fn parse_time_flexible(t: &str) -> Result<NaiveTime, CalendarError> {
    let invalid = || CalendarError::InvalidTime(t.to_string());

    let s = t.trim().to_ascii_lowercase();
    let (core, meridiem) = if let Some(rest) = s.strip_suffix("am") {
        (rest.trim_end(), Some(false))
    } else if let Some(rest) = s.strip_suffix("pm") {
        (rest.trim_end(), Some(true))
    } else {
        (s.as_str(), None)
    };

    let (hh, mm) = match core.split_once(':') {
        Some((hh, mm)) => (hh, mm),
        None => (core, ""),
    };

    let mut hour: u32 = hh.trim().parse().map_err(|_| invalid())?;
    let minute: u32 = if mm.is_empty() {
        0
    } else {
        mm.trim().parse().map_err(|_| invalid())?
    };

    match meridiem {
        Some(_) if hour == 0 || hour > 12 => return Err(invalid()),
        Some(true) if hour < 12 => hour += 12,
        Some(false) if hour == 12 => hour = 0,
        _ => {}
    }

    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)
}

/// `"2:30 PM"` style, accepted back by [`parse_time_flexible`].
pub fn format_time_12h(time: NaiveTime) -> String {
    let (pm, hour) = time.hour12();
    let suffix = if pm { "PM" } else { "AM" };
    format!("{}:{:02} {}", hour, time.minute(), suffix)
}

/// `"7:30pm"`, the compact form used on event cards.
pub fn format_time_compact(time: NaiveTime) -> String {
    let (pm, hour) = time.hour12();
    let suffix = if pm { "pm" } else { "am" };
    format!("{}:{:02}{}", hour, time.minute(), suffix)
}

fn ics_local(dt: NaiveDateTime) -> String {
    dt.format("%Y%m%dT%H%M%S").to_string()
}

fn escape_text(text: &str) -> String {
    text.replace('\n', "\\n")
}

/// Serialize every occurrence of `event` into one iCalendar document.
///
/// Blocks follow the input order. Any malformed date or time fails the whole
/// document.
pub fn to_calendar_file(event: &FeaturedEvent, tz: Tz, uid_base: &str) -> Result<String, CalendarError> {
    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        format!("PRODID:{PRODUCT_ID}"),
    ];

    for (idx, occ) in event.occurrences.iter().enumerate() {
        let (start, end) = occ.span()?;

        lines.push("BEGIN:VEVENT".to_string());
        lines.push(format!("UID:{uid_base}-{idx}@mflc"));
        lines.push(format!("SUMMARY:{} — {}", occ.title, event.title));
        lines.push(format!("DTSTART;TZID={}:{}", tz.name(), ics_local(start)));
        lines.push(format!("DTEND;TZID={}:{}", tz.name(), ics_local(end)));
        lines.push(format!("LOCATION:{}", event.address));
        lines.push(format!("DESCRIPTION:{}", escape_text(&event.description)));
        lines.push("END:VEVENT".to_string());
    }

    lines.push("END:VCALENDAR".to_string());
    Ok(lines.join("\r\n"))
}

/// `"14º Aniversario"` becomes `"14-aniversario.ics"`.
///
/// Only ASCII letters and digits survive so the name fits a header value.
pub fn calendar_file_name(title: &str) -> String {
    let slug = title
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(char::is_ascii_alphanumeric)
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    if slug.is_empty() {
        "evento.ics".to_string()
    } else {
        format!("{slug}.ics")
    }
}
