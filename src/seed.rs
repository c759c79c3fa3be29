//! Day-keyed determinism.
//!
//! Everything that must change "once a day" derives from the calendar date
//! in the site's timezone: the seed, the generator built from it, and the
//! number of seconds a cached result stays valid.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Calendar date of `now` as seen in `tz`.
pub fn local_date(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// `YYYYMMDD` of a date as an integer.
pub fn date_key(date: NaiveDate) -> u32 {
    // Years before 0 never reach this code; clamp instead of wrapping
    let year = date.year().max(0) as u32;
    year * 10_000 + date.month() * 100 + date.day()
}

/// Seed for the local calendar day containing `now`.
pub fn today_key(now: DateTime<Utc>, tz: Tz) -> u32 {
    date_key(local_date(now, tz))
}

/// First instant of `date` in `tz`.
///
/// Midnight can be skipped by a DST transition in a handful of zones; the
/// first existing hour of the day is used then.
pub fn start_of_day(date: NaiveDate, tz: Tz) -> Option<DateTime<Tz>> {
    let midnight = date.and_time(NaiveTime::MIN);
    (0..=2).find_map(|h| {
        tz.from_local_datetime(&(midnight + Duration::hours(h)))
            .earliest()
    })
}

/// First instant of the local day after the one containing `now`.
pub fn next_midnight(now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
    let tomorrow = local_date(now, tz).succ_opt()?;
    start_of_day(tomorrow, tz).map(|next| next.with_timezone(&Utc))
}

/// Seconds from `now` until the next local midnight, floored, never less than 1.
///
/// Suited to cache lifetimes. Sleeping for it can wake just before midnight;
/// use [`duration_until_next_midnight`] for that.
pub fn seconds_until_next_midnight(now: DateTime<Utc>, tz: Tz) -> u64 {
    match next_midnight(now, tz) {
        Some(next) => next.signed_duration_since(now).num_seconds().max(1) as u64,
        None => 1,
    }
}

/// Exact time from `now` until the next local midnight.
///
/// A sleep of this length ends on the new local day.
pub fn duration_until_next_midnight(now: DateTime<Utc>, tz: Tz) -> std::time::Duration {
    next_midnight(now, tz)
        .and_then(|next| next.signed_duration_since(now).to_std().ok())
        .filter(|wait| !wait.is_zero())
        .unwrap_or(std::time::Duration::from_secs(1))
}

/// Index of the background image that rotates with the verse, in `1..=31`.
pub fn daily_image_index(day_key: u32) -> u32 {
    (day_key % 31) + 1
}

/// SplitMix64 stream seeded from a day key.
///
/// Not cryptographically secure. Two generators built from the same seed
/// yield identical sequences for any number of draws.
#[derive(Debug, Clone)]
pub struct DailyRng {
    state: u64,
}

impl DailyRng {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn for_day(day_key: u32) -> Self {
        Self::new(u64::from(day_key))
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Next value in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        const SCALE: f64 = (1u64 << 53) as f64;
        ((self.next_u64() >> 11) as f64) / SCALE
    }

    /// Pick one element with `floor(next_f64() * len)`.
    ///
    /// Consumes exactly one draw, even for a single-element slice. Returns
    /// `None` without drawing when the slice is empty.
    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let index = (self.next_f64() * items.len() as f64).floor() as usize;
        items.get(index.min(items.len() - 1))
    }
}
