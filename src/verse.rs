//! Verse of the day.
//!
//! The pick is a pure function of the site-local date and the provider's
//! data: three draws from the day's generator choose a book, a chapter and
//! a verse, in that order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::seed::{DailyRng, duration_until_next_midnight, today_key};
use crate::traits::{Clock, ContentProvider};

pub const TEXT_UNAVAILABLE: &str = "Verse text unavailable";

#[derive(Debug, Error)]
pub enum VerseError {
    #[error("No books returned for this Bible")]
    EmptyBooks,
    #[error("No chapters for book {book_id}")]
    EmptyChapters { book_id: String },
    #[error("No verses for chapter {chapter_id}")]
    EmptyVerses { chapter_id: String },
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerseSelection {
    pub book_id: String,
    pub chapter_id: String,
    pub verse_id: String,
    pub reference: String,
    pub text: String,
}

/// `"Génesis 1 3"` from whichever parts are known.
pub fn fallback_reference(book: Option<&str>, chapter: Option<&str>, verse: Option<&str>) -> String {
    [book, chapter, verse]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Select the verse for the site-local day containing `now`.
pub async fn pick_verse_of_day(
    now: DateTime<Utc>,
    tz: Tz,
    provider: &dyn ContentProvider,
) -> Result<VerseSelection, VerseError> {
    let key = today_key(now, tz);
    let mut rng = DailyRng::for_day(key);

    let books = provider.list_books().await?;
    let book = rng.pick(&books).ok_or(VerseError::EmptyBooks)?;

    let chapters = provider.list_chapters(&book.id).await?;
    let chapter = rng.pick(&chapters).ok_or_else(|| VerseError::EmptyChapters {
        book_id: book.id.clone(),
    })?;

    let verses = provider.list_verses(&chapter.id).await?;
    let verse = rng.pick(&verses).ok_or_else(|| VerseError::EmptyVerses {
        chapter_id: chapter.id.clone(),
    })?;

    let content = provider.get_verse(&verse.id).await?;

    let reference = content.reference.unwrap_or_else(|| {
        fallback_reference(
            book.name.as_deref(),
            chapter.number.as_deref(),
            verse.number.as_deref(),
        )
    });
    let text = content
        .content
        .map(|t| t.trim().to_string())
        .unwrap_or_else(|| TEXT_UNAVAILABLE.to_string());

    tracing::debug!(day = key, verse = %verse.id, "Selected verse of the day");

    Ok(VerseSelection {
        book_id: book.id.clone(),
        chapter_id: chapter.id.clone(),
        verse_id: verse.id.clone(),
        reference,
        text,
    })
}

#[derive(Debug, Clone)]
struct CachedVerse {
    day_key: u32,
    selection: VerseSelection,
}

/// Today's selection, reused until the site-local date changes.
///
/// Failures are never stored. Two requests racing on an empty cache may
/// both fetch; they converge on the same value.
#[derive(Debug, Default)]
pub struct VerseCache {
    inner: RwLock<Option<CachedVerse>>,
}

impl VerseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached selection for the day containing `now`, if any.
    pub async fn get(&self, now: DateTime<Utc>, tz: Tz) -> Option<VerseSelection> {
        let key = today_key(now, tz);
        self.inner
            .read()
            .await
            .as_ref()
            .filter(|c| c.day_key == key)
            .map(|c| c.selection.clone())
    }

    pub async fn get_or_fetch(
        &self,
        now: DateTime<Utc>,
        tz: Tz,
        provider: &dyn ContentProvider,
    ) -> Result<VerseSelection, VerseError> {
        if let Some(selection) = self.get(now, tz).await {
            tracing::debug!("Verse cache hit");
            return Ok(selection);
        }
        self.refresh(now, tz, provider).await
    }

    /// Fetch unconditionally and store the result.
    pub async fn refresh(
        &self,
        now: DateTime<Utc>,
        tz: Tz,
        provider: &dyn ContentProvider,
    ) -> Result<VerseSelection, VerseError> {
        let selection = pick_verse_of_day(now, tz, provider).await?;
        *self.inner.write().await = Some(CachedVerse {
            day_key: today_key(now, tz),
            selection: selection.clone(),
        });
        Ok(selection)
    }

    pub async fn clear(&self) {
        *self.inner.write().await = None;
    }
}

/// Background task that re-selects the verse right after each local midnight.
///
/// The task belongs to whoever holds this value and is aborted when it is
/// dropped or shut down.
#[derive(Debug)]
pub struct MidnightRefresher {
    handle: Option<JoinHandle<()>>,
}

impl MidnightRefresher {
    pub fn spawn(
        cache: Arc<VerseCache>,
        provider: Arc<dyn ContentProvider>,
        clock: Arc<dyn Clock>,
        tz: Tz,
    ) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                let wait = duration_until_next_midnight(clock.now_utc(), tz);
                tracing::debug!("Next verse refresh in {:?}", wait);
                tokio::time::sleep(wait).await;

                match cache.refresh(clock.now_utc(), tz, provider.as_ref()).await {
                    Ok(selection) => {
                        tracing::info!("Verse of the day refreshed: {}", selection.reference);
                    }
                    Err(e) => {
                        // Left empty; the next request retries
                        tracing::warn!("Midnight verse refresh failed: {:#}", e);
                    }
                }
            }
        });

        Self {
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Abort the task and wait for it to stop.
    pub async fn shutdown(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for MidnightRefresher {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use chrono_tz::America::New_York;

    use std::time::Duration;

    use super::*;
    use crate::api::VerseContent;
    use crate::traits::{MockClock, MockContentProvider};

    fn noon(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        // Noon in New York during EDT
        Utc.with_ymd_and_hms(y, m, d, 16, 0, 0).unwrap()
    }

    /// Wall clock driven by tokio's timer, so paused-time tests move both.
    struct TimerClock {
        origin: DateTime<Utc>,
        started: tokio::time::Instant,
    }

    impl TimerClock {
        fn new(origin: DateTime<Utc>) -> Self {
            Self {
                origin,
                started: tokio::time::Instant::now(),
            }
        }
    }

    impl Clock for TimerClock {
        fn now_utc(&self) -> DateTime<Utc> {
            self.origin + chrono::Duration::from_std(self.started.elapsed()).unwrap()
        }
    }

    /// Let spawned tasks run until they block again.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    // ==================== Selection Tests ====================

    #[tokio::test]
    async fn test_same_day_same_selection() {
        let provider = MockContentProvider::sample();
        let morning = Utc.with_ymd_and_hms(2025, 9, 14, 5, 0, 0).unwrap();
        let night = Utc.with_ymd_and_hms(2025, 9, 15, 3, 59, 0).unwrap();

        let a = pick_verse_of_day(morning, New_York, &provider).await.unwrap();
        let b = pick_verse_of_day(night, New_York, &provider).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_selection_follows_draw_order() {
        let provider = MockContentProvider::sample();
        let now = noon(2025, 9, 14);
        let selection = pick_verse_of_day(now, New_York, &provider).await.unwrap();

        let mut rng = DailyRng::for_day(20250914);
        let books = provider.list_books().await.unwrap();
        let book = rng.pick(&books).unwrap();
        let chapters = provider.list_chapters(&book.id).await.unwrap();
        let chapter = rng.pick(&chapters).unwrap();
        let verses = provider.list_verses(&chapter.id).await.unwrap();
        let verse = rng.pick(&verses).unwrap();

        assert_eq!(selection.book_id, book.id);
        assert_eq!(selection.chapter_id, chapter.id);
        assert_eq!(selection.verse_id, verse.id);
        assert_eq!(selection.text, format!("Text of {}", verse.id));
    }

    #[tokio::test]
    async fn test_selection_makes_four_calls() {
        let provider = MockContentProvider::sample();
        pick_verse_of_day(noon(2025, 9, 14), New_York, &provider).await.unwrap();
        assert_eq!(provider.call_count(), 4);
    }

    #[tokio::test]
    async fn test_selection_varies_across_days() {
        let provider = MockContentProvider::sample();
        let mut distinct = std::collections::HashSet::new();
        for day in 1..=20 {
            let selection = pick_verse_of_day(noon(2025, 9, day), New_York, &provider)
                .await
                .unwrap();
            distinct.insert(selection.verse_id);
        }
        assert!(distinct.len() > 1, "Twenty days should not all pick one verse");
    }

    #[tokio::test]
    async fn test_no_books_is_error() {
        let provider = MockContentProvider::new();
        let result = pick_verse_of_day(noon(2025, 9, 14), New_York, &provider).await;
        assert!(matches!(result, Err(VerseError::EmptyBooks)));
    }

    #[tokio::test]
    async fn test_book_without_chapters_is_error() {
        let provider = MockContentProvider::new().with_book("OBA", "Abdías", 0, 0);
        let result = pick_verse_of_day(noon(2025, 9, 14), New_York, &provider).await;
        match result {
            Err(VerseError::EmptyChapters { book_id }) => assert_eq!(book_id, "OBA"),
            other => panic!("Expected EmptyChapters, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chapter_without_verses_is_error() {
        let provider = MockContentProvider::new().with_book("OBA", "Abdías", 1, 0);
        let result = pick_verse_of_day(noon(2025, 9, 14), New_York, &provider).await;
        match result {
            Err(VerseError::EmptyVerses { chapter_id }) => assert_eq!(chapter_id, "OBA.1"),
            other => panic!("Expected EmptyVerses, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_upstream_failure_is_error() {
        let provider = MockContentProvider::failing();
        let result = pick_verse_of_day(noon(2025, 9, 14), New_York, &provider).await;
        match result {
            Err(VerseError::Upstream(e)) => assert!(e.to_string().contains("503")),
            other => panic!("Expected Upstream, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_reference_falls_back_to_numbers() {
        let provider = MockContentProvider::new().with_book("OBA", "Abdías", 1, 1).with_content(
            "OBA.1.1",
            VerseContent {
                id: Some("OBA.1.1".to_string()),
                reference: None,
                content: None,
            },
        );
        let selection = pick_verse_of_day(noon(2025, 9, 14), New_York, &provider)
            .await
            .unwrap();
        assert_eq!(selection.reference, "Abdías 1 1");
        assert_eq!(selection.text, TEXT_UNAVAILABLE);
    }

    #[test]
    fn test_fallback_reference_skips_missing_parts() {
        assert_eq!(fallback_reference(Some("Juan"), None, Some("16")), "Juan 16");
        assert_eq!(fallback_reference(None, None, None), "");
        assert_eq!(fallback_reference(Some(""), Some("3"), None), "3");
    }

    // ==================== Cache Tests ====================

    #[tokio::test]
    async fn test_cache_reuses_selection_within_day() {
        let provider = MockContentProvider::sample();
        let cache = VerseCache::new();

        let first = cache.get_or_fetch(noon(2025, 9, 14), New_York, &provider).await.unwrap();
        let later = Utc.with_ymd_and_hms(2025, 9, 15, 3, 0, 0).unwrap();
        let second = cache.get_or_fetch(later, New_York, &provider).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.call_count(), 4, "Second call should be served from cache");
    }

    #[tokio::test]
    async fn test_cache_expires_at_local_midnight() {
        let provider = MockContentProvider::sample();
        let cache = VerseCache::new();

        cache.get_or_fetch(noon(2025, 9, 14), New_York, &provider).await.unwrap();
        let after_midnight = Utc.with_ymd_and_hms(2025, 9, 15, 4, 0, 1).unwrap();
        assert!(cache.get(after_midnight, New_York).await.is_none());

        cache.get_or_fetch(after_midnight, New_York, &provider).await.unwrap();
        assert_eq!(provider.call_count(), 8);
    }

    #[tokio::test]
    async fn test_cache_does_not_store_failures() {
        let failing = MockContentProvider::failing();
        let cache = VerseCache::new();
        let now = noon(2025, 9, 14);

        assert!(cache.get_or_fetch(now, New_York, &failing).await.is_err());
        assert!(cache.get(now, New_York).await.is_none());

        let provider = MockContentProvider::sample();
        assert!(cache.get_or_fetch(now, New_York, &provider).await.is_ok());
        assert!(cache.get(now, New_York).await.is_some());
    }

    #[tokio::test]
    async fn test_cache_clear() {
        let provider = MockContentProvider::sample();
        let cache = VerseCache::new();
        let now = noon(2025, 9, 14);

        cache.get_or_fetch(now, New_York, &provider).await.unwrap();
        cache.clear().await;
        assert!(cache.get(now, New_York).await.is_none());
    }

    // ==================== Refresher Tests ====================

    #[tokio::test]
    async fn test_refresher_waits_for_midnight_and_stops_on_shutdown() {
        let provider = MockContentProvider::sample();
        let cache = Arc::new(VerseCache::new());
        let clock = Arc::new(MockClock::new(noon(2025, 9, 14)));

        let refresher = MidnightRefresher::spawn(
            cache.clone(),
            Arc::new(provider.clone()),
            clock,
            New_York,
        );
        tokio::task::yield_now().await;
        assert!(refresher.is_running());

        refresher.shutdown().await;
        assert_eq!(provider.call_count(), 0, "Nothing should be fetched before midnight");
        assert!(cache.get(noon(2025, 9, 14), New_York).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresher_fires_on_new_day() {
        let provider = MockContentProvider::sample();
        let cache = Arc::new(VerseCache::new());
        // 12:00:00.700 EDT; the sub-second part must not wake the task early
        let clock = Arc::new(TimerClock::new(noon(2025, 9, 14) + chrono::Duration::milliseconds(700)));

        let refresher =
            MidnightRefresher::spawn(cache.clone(), Arc::new(provider.clone()), clock, New_York);
        settle().await;

        // Last millisecond of the 14th
        tokio::time::advance(Duration::from_millis(43_199_299)).await;
        settle().await;
        assert_eq!(provider.call_count(), 0, "Woke before local midnight");

        tokio::time::advance(Duration::from_millis(5)).await;
        settle().await;

        let midnight = Utc.with_ymd_and_hms(2025, 9, 15, 4, 0, 0).unwrap();
        let expected = pick_verse_of_day(midnight, New_York, &MockContentProvider::sample())
            .await
            .unwrap();
        assert_eq!(cache.get(midnight, New_York).await, Some(expected));
        assert_eq!(provider.call_count(), 4, "Exactly one refresh");
        assert!(refresher.is_running());

        refresher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresher_survives_failed_refresh() {
        let provider = MockContentProvider::failing();
        let cache = Arc::new(VerseCache::new());
        let clock = Arc::new(TimerClock::new(noon(2025, 9, 14)));

        let refresher =
            MidnightRefresher::spawn(cache.clone(), Arc::new(provider.clone()), clock, New_York);
        settle().await;

        tokio::time::advance(Duration::from_secs(12 * 3600) + Duration::from_millis(5)).await;
        settle().await;
        let after_midnight = Utc.with_ymd_and_hms(2025, 9, 15, 4, 0, 1).unwrap();
        assert_eq!(provider.call_count(), 1);
        assert!(cache.get(after_midnight, New_York).await.is_none());
        assert!(refresher.is_running());

        // Next midnight retries
        tokio::time::advance(Duration::from_secs(24 * 3600)).await;
        settle().await;
        assert_eq!(provider.call_count(), 2);
        assert!(refresher.is_running());

        refresher.shutdown().await;
    }

    #[tokio::test]
    async fn test_refresher_aborted_on_drop() {
        let provider = MockContentProvider::sample();
        let cache = Arc::new(VerseCache::new());
        let clock = Arc::new(MockClock::new(noon(2025, 9, 14)));

        let refresher = MidnightRefresher::spawn(cache, Arc::new(provider.clone()), clock, New_York);
        drop(refresher);
        tokio::task::yield_now().await;

        assert_eq!(provider.call_count(), 0);
    }
}
