//! HTTP surface consumed by the site's pages.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::api::BibleApiClient;
use crate::calendar::{FeaturedEvent, calendar_file_name, to_calendar_file};
use crate::config::AppConfig;
use crate::contact::{ContactOutcome, ContactRelay, ContactSubmission};
use crate::schedule::{SERVICE_RULES, UpcomingDisplay, local_today_start, upcoming_within};
use crate::seed::seconds_until_next_midnight;
use crate::traits::{Clock, ContentProvider, SystemClock};
use crate::verse::{MidnightRefresher, VerseCache, VerseError};

/// Largest `count` accepted by the upcoming-events endpoint.
pub const MAX_UPCOMING: usize = 50;

/// Shared, read-only state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub tz: Tz,
    pub clock: Arc<dyn Clock>,
    /// `None` when the Bible id or key is missing.
    pub provider: Option<Arc<dyn ContentProvider>>,
    pub bible_id: String,
    pub verse_cache: Arc<VerseCache>,
    pub relay: Arc<ContactRelay>,
    pub featured: Arc<Vec<FeaturedEvent>>,
    pub upcoming_count: usize,
    /// Weeks of weekly services expanded per request.
    pub weeks: u32,
}

impl AppState {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let tz = config.site.tz()?;

        let provider: Option<Arc<dyn ContentProvider>> = match (&config.bible.bible_id, &config.bible.api_key) {
            (Some(id), Some(key)) if config.bible.is_complete() => Some(Arc::new(
                BibleApiClient::new(&config.bible.api_url, id.clone(), key.clone(), &config.network)
                    .context("Failed to build Bible API client")?,
            )),
            _ => {
                tracing::warn!("Bible API is not configured; /api/votd will return errors");
                None
            }
        };

        let relay = ContactRelay::from_config(&config.mail, &config.network, &config.site.name)?;

        Ok(Self {
            tz,
            clock: Arc::new(SystemClock),
            provider,
            bible_id: config.bible.bible_id.clone().unwrap_or_default(),
            verse_cache: Arc::new(VerseCache::new()),
            relay: Arc::new(relay),
            featured: Arc::new(config.events.featured.clone()),
            upcoming_count: config.events.upcoming_count,
            weeks: config.events.weeks,
        })
    }
}

// ==================== Error Mapping ====================

/// Failure body shared by the JSON endpoints.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub detail: String,
}

#[derive(Debug)]
pub enum ApiError {
    Verse(VerseError),
    NotConfigured,
    NotFound(String),
    Calendar(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, detail) = match self {
            Self::Verse(VerseError::Upstream(e)) => {
                tracing::error!("Verse of the day upstream failure: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to load verse",
                    "Content provider unavailable".to_string(),
                )
            }
            Self::Verse(e) => {
                tracing::error!("Verse of the day failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to load verse", e.to_string())
            }
            Self::NotConfigured => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load verse",
                "Server configuration incomplete".to_string(),
            ),
            Self::NotFound(what) => (StatusCode::NOT_FOUND, "Not found", what),
            Self::Calendar(detail) => {
                tracing::error!("Calendar export failed: {}", detail);
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to build calendar", detail)
            }
        };

        let body = ErrorBody {
            error: error.to_string(),
            detail,
        };
        (status, Json(body)).into_response()
    }
}

// ==================== Handlers ====================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerseResponse {
    pub reference: String,
    pub text: String,
    pub bible_id: String,
    pub ttl_seconds: u64,
}

/// GET /api/votd
async fn verse_of_the_day(State(state): State<AppState>) -> Result<Response, ApiError> {
    let provider = state.provider.as_ref().ok_or(ApiError::NotConfigured)?;

    let now = state.clock.now_utc();
    let ttl = seconds_until_next_midnight(now, state.tz);
    let selection = state
        .verse_cache
        .get_or_fetch(now, state.tz, provider.as_ref())
        .await
        .map_err(ApiError::Verse)?;

    let mut headers = HeaderMap::new();
    let cache_control = format!("public, s-maxage={ttl}, stale-while-revalidate=60");
    if let Ok(value) = HeaderValue::from_str(&cache_control) {
        headers.insert(header::CACHE_CONTROL, value);
    }

    let body = VerseResponse {
        reference: selection.reference,
        text: selection.text,
        bible_id: state.bible_id.clone(),
        ttl_seconds: ttl,
    };
    Ok((headers, Json(body)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct UpcomingQuery {
    pub count: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct UpcomingItem {
    pub id: String,
    pub title: String,
    pub when: String,
    pub display: UpcomingDisplay,
}

/// GET /api/events/upcoming
async fn upcoming_events(
    State(state): State<AppState>,
    Query(query): Query<UpcomingQuery>,
) -> Json<Vec<UpcomingItem>> {
    let count = query.count.unwrap_or(state.upcoming_count).min(MAX_UPCOMING);
    let anchor = local_today_start(state.clock.now_utc(), state.tz).date();

    let items = upcoming_within(anchor, &SERVICE_RULES, count, state.weeks)
        .into_iter()
        .map(|o| UpcomingItem {
            display: o.display(),
            when: o.when.format("%Y-%m-%dT%H:%M:%S").to_string(),
            id: o.id,
            title: o.title,
        })
        .collect();

    Json(items)
}

/// GET /api/events/featured
async fn featured_events(State(state): State<AppState>) -> Json<Vec<FeaturedEvent>> {
    Json(state.featured.as_ref().clone())
}

/// GET /api/events/featured/{index}/calendar.ics
async fn featured_calendar(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Result<Response, ApiError> {
    let event = state
        .featured
        .get(index)
        .ok_or_else(|| ApiError::NotFound(format!("No featured event at index {index}")))?;

    let uid_base = uuid::Uuid::new_v4().simple().to_string();
    let ics = to_calendar_file(event, state.tz, &uid_base)
        .map_err(|e| ApiError::Calendar(e.to_string()))?;

    let disposition = format!("attachment; filename=\"{}\"", calendar_file_name(&event.title));
    let disposition = HeaderValue::from_str(&disposition)
        .map_err(|e| ApiError::Calendar(format!("Invalid file name: {e}")))?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/calendar; charset=utf-8"),
    );
    headers.insert(header::CONTENT_DISPOSITION, disposition);

    Ok((headers, ics).into_response())
}

/// POST /api/contact
async fn submit_contact(
    State(state): State<AppState>,
    Json(form): Json<ContactSubmission>,
) -> (StatusCode, Json<ContactOutcome>) {
    let outcome = state.relay.submit(&form).await;
    let status = match (outcome.ok, outcome.fields.is_empty()) {
        (true, _) => StatusCode::OK,
        (false, false) => StatusCode::UNPROCESSABLE_ENTITY,
        (false, true) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(outcome))
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// GET /health
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// All routes, without tracing middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/votd", get(verse_of_the_day))
        .route("/api/events/upcoming", get(upcoming_events))
        .route("/api/events/featured", get(featured_events))
        .route("/api/events/featured/{index}/calendar.ics", get(featured_calendar))
        .route("/api/contact", post(submit_contact))
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(config: &AppConfig) -> Result<()> {
    let state = AppState::from_config(config)?;

    let refresher = state.provider.clone().map(|provider| {
        MidnightRefresher::spawn(
            state.verse_cache.clone(),
            provider,
            state.clock.clone(),
            state.tz,
        )
    });

    let app = router(state).layer(TraceLayer::new_for_http());

    let addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await
        .context("Server error")?;

    if let Some(refresher) = refresher {
        refresher.shutdown().await;
    }

    Ok(())
}
