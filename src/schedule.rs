use std::collections::HashSet;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::Serialize;

use crate::calendar::format_time_compact;
use crate::seed::local_date;

/// Number of weeks of weekly rules expanded by [`upcoming`].
pub const DEFAULT_WEEKS: u32 = 12;

/// Calendar months (current included) searched for monthly rules.
pub const MONTHLY_HORIZON: u32 = 3;

const MONTHS_ES_SHORT: [&str; 12] = [
    "ene", "feb", "mar", "abr", "may", "jun", "jul", "ago", "sept", "oct", "nov", "dic",
];

/// How a service repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecurrenceRule {
    /// Every week on `weekday`.
    Weekly {
        weekday: Weekday,
        time: NaiveTime,
        title: &'static str,
        slug: &'static str,
    },
    /// The last `weekday` of every month.
    MonthlyLast {
        weekday: Weekday,
        time: NaiveTime,
        title: &'static str,
        slug: &'static str,
    },
}

impl RecurrenceRule {
    pub fn title(&self) -> &'static str {
        match self {
            Self::Weekly { title, .. } | Self::MonthlyLast { title, .. } => *title,
        }
    }

    /// Local start time of every occurrence.
    pub fn time(&self) -> NaiveTime {
        match self {
            Self::Weekly { time, .. } | Self::MonthlyLast { time, .. } => *time,
        }
    }
}

/// `HH:MM` for the built-in rules; an impossible time fails the build.
const fn service_time(hour: u32, minute: u32) -> NaiveTime {
    match NaiveTime::from_hms_opt(hour, minute, 0) {
        Some(time) => time,
        None => panic!("service time out of range"),
    }
}

/// The regular services.
pub const SERVICE_RULES: [RecurrenceRule; 7] = [
    RecurrenceRule::Weekly {
        weekday: Weekday::Tue,
        time: service_time(19, 30),
        title: "Discipulado",
        slug: "tue",
    },
    RecurrenceRule::Weekly {
        weekday: Weekday::Fri,
        time: service_time(19, 30),
        title: "Servicio de Viernes",
        slug: "fri",
    },
    RecurrenceRule::Weekly {
        weekday: Weekday::Sat,
        time: service_time(9, 0),
        title: "Oración",
        slug: "sat-am",
    },
    RecurrenceRule::Weekly {
        weekday: Weekday::Sat,
        time: service_time(19, 0),
        title: "Servicio de Sábado",
        slug: "sat-pm",
    },
    RecurrenceRule::Weekly {
        weekday: Weekday::Sun,
        time: service_time(14, 30),
        title: "Servicio Dominical",
        slug: "sun",
    },
    RecurrenceRule::MonthlyLast {
        weekday: Weekday::Fri,
        time: service_time(23, 0),
        title: "Vigilia",
        slug: "vigilia",
    },
    RecurrenceRule::MonthlyLast {
        weekday: Weekday::Sat,
        time: service_time(19, 0),
        title: "Cena del Señor",
        slug: "cena",
    },
];

/// One concrete instance of a recurring service, in site-local time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Occurrence {
    pub id: String,
    pub title: String,
    pub when: NaiveDateTime,
}

/// Labels shown on an upcoming-event card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpcomingDisplay {
    pub day: String,
    pub month_short: String,
    pub weekday_short: String,
    pub time: String,
}

impl Occurrence {
    pub fn display(&self) -> UpcomingDisplay {
        let date = self.when.date();
        UpcomingDisplay {
            day: format!("{:02}", date.day()),
            month_short: MONTHS_ES_SHORT[date.month0() as usize].to_string(),
            weekday_short: weekday_short_es(date.weekday()).to_string(),
            time: format_time_compact(self.when.time()),
        }
    }
}

pub fn weekday_short_es(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Sun => "dom",
        Weekday::Mon => "lun",
        Weekday::Tue => "mar",
        Weekday::Wed => "mié",
        Weekday::Thu => "jue",
        Weekday::Fri => "vie",
        Weekday::Sat => "sáb",
    }
}

/// Local midnight of today's site date.
pub fn local_today_start(now: DateTime<Utc>, tz: Tz) -> NaiveDateTime {
    local_date(now, tz).and_time(NaiveTime::MIN)
}

/// The first `weekday` on or after `anchor` (zero days if it already is one).
pub fn weekday_on_or_after(anchor: NaiveDate, weekday: Weekday) -> NaiveDate {
    let delta = (weekday.num_days_from_sunday() + 7 - anchor.weekday().num_days_from_sunday()) % 7;
    anchor + Duration::days(i64::from(delta))
}

/// The last `weekday` of `month` in `year`.
pub fn last_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let last_day = NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()?;
    let diff = (last_day.weekday().num_days_from_sunday() + 7 - weekday.num_days_from_sunday()) % 7;
    Some(last_day - Duration::days(i64::from(diff)))
}

/// `(year, month)` shifted forward by `offset` months.
fn add_months(year: i32, month: u32, offset: u32) -> (i32, u32) {
    let zero_based = month - 1 + offset;
    (year + (zero_based / 12) as i32, zero_based % 12 + 1)
}

/// Expand `rules` from `anchor`: `weeks` weeks of weekly rules and
/// [`MONTHLY_HORIZON`] months of monthly rules.
///
/// The result is sorted by time and holds at most one occurrence per
/// `(title, date)`; the earliest one wins.
pub fn build_schedule(anchor: NaiveDate, rules: &[RecurrenceRule], weeks: u32) -> Vec<Occurrence> {
    let anchor_start = anchor.and_time(NaiveTime::MIN);
    let mut items = Vec::new();

    for rule in rules {
        match *rule {
            RecurrenceRule::Weekly { weekday, title, slug, .. } => {
                let first = weekday_on_or_after(anchor, weekday).and_time(rule.time());
                for w in 0..weeks {
                    items.push(Occurrence {
                        id: format!("{slug}-{w}"),
                        title: title.to_string(),
                        when: first + Duration::weeks(i64::from(w)),
                    });
                }
            }
            RecurrenceRule::MonthlyLast { weekday, title, slug, .. } => {
                for offset in 0..MONTHLY_HORIZON {
                    let (year, month) = add_months(anchor.year(), anchor.month(), offset);
                    let Some(date) = last_weekday_of_month(year, month, weekday) else {
                        continue;
                    };
                    let when = date.and_time(rule.time());
                    if when >= anchor_start {
                        items.push(Occurrence {
                            id: format!("{slug}-{year}-{month}"),
                            title: title.to_string(),
                            when,
                        });
                    }
                }
            }
        }
    }

    // Stable sort keeps rule order for identical instants
    items.sort_by_key(|o| o.when);

    let mut seen = HashSet::new();
    items.retain(|o| seen.insert((o.title.clone(), o.when.date())));
    items
}

/// The `count` earliest occurrences on or after `anchor`.
///
/// Filtering is by date: a service earlier today is still listed.
pub fn upcoming(anchor: NaiveDate, rules: &[RecurrenceRule], count: usize) -> Vec<Occurrence> {
    upcoming_within(anchor, rules, count, DEFAULT_WEEKS)
}

/// [`upcoming`] over a custom weekly horizon.
pub fn upcoming_within(
    anchor: NaiveDate,
    rules: &[RecurrenceRule],
    count: usize,
    weeks: u32,
) -> Vec<Occurrence> {
    let anchor_start = anchor.and_time(NaiveTime::MIN);
    build_schedule(anchor, rules, weeks)
        .into_iter()
        .filter(|o| o.when >= anchor_start)
        .take(count)
        .collect()
}
