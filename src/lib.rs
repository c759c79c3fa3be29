//! MFLC Site Library
//!
//! This module exposes the logic behind the site's dynamic pieces (verse of
//! the day, service schedule, calendar export, contact relay) for testing
//! and for the server binary.

pub mod api;
pub mod calendar;
pub mod config;
pub mod contact;
pub mod schedule;
pub mod seed;
pub mod server;
pub mod traits;
pub mod verse;

// Re-export commonly used types
pub use api::{BibleApiClient, Book, Chapter, VerseContent, VerseSummary};
pub use calendar::{
    CalendarError, FeaturedEvent, FeaturedOccurrence, calendar_file_name, format_time_12h,
    parse_mdy, parse_time_flexible, to_calendar_file,
};
pub use config::AppConfig;
pub use contact::{ContactOutcome, ContactRelay, ContactSubmission, EmailMessage, ResendMailer};
pub use schedule::{
    Occurrence, RecurrenceRule, SERVICE_RULES, build_schedule, local_today_start, upcoming,
    upcoming_within,
};
pub use seed::{
    DailyRng, daily_image_index, duration_until_next_midnight, seconds_until_next_midnight,
    today_key,
};
pub use traits::{
    Clock, ContentProvider, Mailer, MockClock, MockContentProvider, MockMailer, SystemClock,
};
pub use verse::{MidnightRefresher, VerseCache, VerseError, VerseSelection, pick_verse_of_day};
