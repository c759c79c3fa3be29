//! Abstractions for time and external collaborators to enable testing.
//!
//! This module provides traits for:
//! - `Clock`: Abstracting time access for deterministic testing
//! - `ContentProvider`: The Bible content API consumed by the verse selector
//! - `Mailer`: The email relay used by the contact form

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::api::{Book, Chapter, VerseContent, VerseSummary};
use crate::contact::EmailMessage;

// ==================== Clock Trait ====================

/// Trait for abstracting time access.
///
/// This allows injecting mock clocks during testing to create
/// deterministic, reproducible tests for day rollover logic.
pub trait Clock: Send + Sync {
    /// Get the current time in UTC.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Get the current time in the given timezone.
    fn now_in(&self, tz: Tz) -> DateTime<Tz> {
        self.now_utc().with_timezone(&tz)
    }
}

/// System clock implementation using real time.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Mock clock for testing with controllable time.
#[derive(Debug, Clone)]
pub struct MockClock {
    utc_time: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    /// Create a new mock clock set to the given UTC time.
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            utc_time: Arc::new(Mutex::new(time)),
        }
    }

    /// Set the mock clock to a new time.
    pub fn set_time(&self, time: DateTime<Utc>) {
        *self.utc_time.lock().unwrap() = time;
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: chrono::Duration) {
        let mut time = self.utc_time.lock().unwrap();
        *time = *time + duration;
    }
}

impl Clock for MockClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.utc_time.lock().unwrap()
    }
}

// ==================== ContentProvider Trait ====================

/// Read access to a single Bible version.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    async fn list_books(&self) -> Result<Vec<Book>>;

    async fn list_chapters(&self, book_id: &str) -> Result<Vec<Chapter>>;

    async fn list_verses(&self, chapter_id: &str) -> Result<Vec<VerseSummary>>;

    /// Plain-text content of one verse.
    async fn get_verse(&self, verse_id: &str) -> Result<VerseContent>;
}

/// In-memory content provider that counts every call.
#[derive(Debug, Clone, Default)]
pub struct MockContentProvider {
    books: Vec<Book>,
    chapters: HashMap<String, Vec<Chapter>>,
    verses: HashMap<String, Vec<VerseSummary>>,
    contents: HashMap<String, VerseContent>,
    calls: Arc<AtomicUsize>,
    failing: bool,
}

impl MockContentProvider {
    /// Create an empty provider (no books).
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider whose every call fails as if the network were down.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Three books, a few chapters each, and text for every verse.
    pub fn sample() -> Self {
        let mut provider = Self::new();
        for (book_id, name, chapters) in [("GEN", "Génesis", 3), ("PSA", "Salmos", 4), ("JHN", "Juan", 2)]
        {
            provider = provider.with_book(book_id, name, chapters, 5);
        }
        provider
    }

    /// Add a book with `chapters` chapters of `verses` verses each.
    pub fn with_book(mut self, book_id: &str, name: &str, chapters: usize, verses: usize) -> Self {
        self.books.push(Book {
            id: book_id.to_string(),
            name: Some(name.to_string()),
        });

        let mut chapter_list = Vec::with_capacity(chapters);
        for c in 1..=chapters {
            let chapter_id = format!("{book_id}.{c}");
            chapter_list.push(Chapter {
                id: chapter_id.clone(),
                number: Some(c.to_string()),
            });

            let mut verse_list = Vec::with_capacity(verses);
            for v in 1..=verses {
                let verse_id = format!("{chapter_id}.{v}");
                let reference = format!("{name} {c}:{v}");
                verse_list.push(VerseSummary {
                    id: verse_id.clone(),
                    reference: Some(reference.clone()),
                    number: Some(v.to_string()),
                });
                self.contents.insert(
                    verse_id.clone(),
                    VerseContent {
                        id: Some(verse_id.clone()),
                        reference: Some(reference),
                        content: Some(format!("Text of {verse_id}")),
                    },
                );
            }
            self.verses.insert(chapter_id, verse_list);
        }
        self.chapters.insert(book_id.to_string(), chapter_list);
        self
    }

    /// Replace the stored content of one verse.
    pub fn with_content(mut self, verse_id: &str, content: VerseContent) -> Self {
        self.contents.insert(verse_id.to_string(), content);
        self
    }

    /// Total number of provider calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record_call(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            bail!("Upstream 503: service unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl ContentProvider for MockContentProvider {
    async fn list_books(&self) -> Result<Vec<Book>> {
        self.record_call()?;
        Ok(self.books.clone())
    }

    async fn list_chapters(&self, book_id: &str) -> Result<Vec<Chapter>> {
        self.record_call()?;
        Ok(self.chapters.get(book_id).cloned().unwrap_or_default())
    }

    async fn list_verses(&self, chapter_id: &str) -> Result<Vec<VerseSummary>> {
        self.record_call()?;
        Ok(self.verses.get(chapter_id).cloned().unwrap_or_default())
    }

    async fn get_verse(&self, verse_id: &str) -> Result<VerseContent> {
        self.record_call()?;
        match self.contents.get(verse_id) {
            Some(content) => Ok(content.clone()),
            None => bail!("Upstream 404: verse {verse_id} not found"),
        }
    }
}

// ==================== Mailer Trait ====================

/// Trait for abstracting outgoing email.
///
/// This allows testing the contact relay without actually
/// delivering messages.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver one message.
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Mock mailer for testing that records all messages.
#[derive(Debug, Clone, Default)]
pub struct MockMailer {
    messages: Arc<Mutex<Vec<EmailMessage>>>,
    failing: bool,
}

impl MockMailer {
    /// Create a new mock mailer.
    pub fn new() -> Self {
        Self::default()
    }

    /// A mailer that rejects every message.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Get all messages that have been sent.
    pub fn get_messages(&self) -> Vec<EmailMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// Get the count of messages sent.
    pub fn message_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    /// Check if any message was sent.
    pub fn was_called(&self) -> bool {
        !self.messages.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        if self.failing {
            bail!("Mail provider returned 500");
        }
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }
}
