use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::NetworkConfig;
use crate::traits::ContentProvider;

/// Every api.bible response wraps its payload in `data`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// List responses tolerate a missing `data` field as an empty list.
#[derive(Debug, Deserialize)]
struct ListEnvelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    #[serde(default)]
    pub number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerseSummary {
    pub id: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub number: Option<String>,
}

/// Verse record returned with `content-type=text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerseContent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// API client for one Bible version on api.bible.
///
/// The key travels in the `api-key` header and never leaves the server.
#[derive(Clone)]
pub struct BibleApiClient {
    client: reqwest::Client,
    base_url: Url,
    bible_id: String,
    api_key: String,
}

impl std::fmt::Debug for BibleApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BibleApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("bible_id", &self.bible_id)
            .finish_non_exhaustive()
    }
}

impl BibleApiClient {
    /// Create a new API client with configurable timeouts.
    pub fn new(
        base_url: &str,
        bible_id: String,
        api_key: String,
        network_config: &NetworkConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(network_config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(network_config.connect_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid Bible API base URL: {base_url}"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Bible API URL cannot be used as a base: {base_url}");
        }

        Ok(Self {
            client,
            base_url,
            bible_id,
            api_key,
        })
    }

    pub fn bible_id(&self) -> &str {
        &self.bible_id
    }

    /// Build `{base}/bibles/{bible_id}/{segments...}` with each segment escaped.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Bible API URL cannot be used as a base"))?
            .pop_if_empty()
            .push("bibles")
            .push(&self.bible_id)
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        tracing::debug!("GET {}", url.path());

        let response = self
            .client
            .get(url)
            .header("api-key", &self.api_key)
            .send()
            .await
            .context("Failed to send request to Bible API")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            anyhow::bail!("Upstream {}: {}", status.as_u16(), detail.trim());
        }

        response
            .json::<T>()
            .await
            .context("Failed to parse Bible API response")
    }

    async fn get_list<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<Vec<T>> {
        let url = self.endpoint(segments)?;
        let envelope: ListEnvelope<T> = self.get_json(url).await?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl ContentProvider for BibleApiClient {
    async fn list_books(&self) -> Result<Vec<Book>> {
        self.get_list(&["books"]).await
    }

    async fn list_chapters(&self, book_id: &str) -> Result<Vec<Chapter>> {
        self.get_list(&["books", book_id, "chapters"]).await
    }

    async fn list_verses(&self, chapter_id: &str) -> Result<Vec<VerseSummary>> {
        self.get_list(&["chapters", chapter_id, "verses"]).await
    }

    async fn get_verse(&self, verse_id: &str) -> Result<VerseContent> {
        let mut url = self.endpoint(&["verses", verse_id])?;
        url.query_pairs_mut()
            .append_pair("content-type", "text")
            .append_pair("fums-version", "3");

        let envelope: Envelope<VerseContent> = self.get_json(url).await?;
        Ok(envelope.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_client(base: &str) -> BibleApiClient {
        BibleApiClient::new(
            base,
            "592420522e16049f-01".to_string(),
            "secret".to_string(),
            &NetworkConfig::default(),
        )
        .unwrap()
    }

    // ==================== Response Parsing Tests ====================

    #[test]
    fn test_list_envelope_parses_books() {
        let body = r#"{"data":[{"id":"GEN","name":"Génesis","abbreviation":"Gn"},{"id":"EXO"}]}"#;
        let parsed: ListEnvelope<Book> = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data.len(), 2);
        assert_eq!(parsed.data[0].name.as_deref(), Some("Génesis"));
        assert_eq!(parsed.data[1].name, None);
    }

    #[test]
    fn test_list_envelope_missing_data_is_empty() {
        let parsed: ListEnvelope<Chapter> = serde_json::from_str("{}").unwrap();
        assert!(parsed.data.is_empty());
    }

    #[test]
    fn test_list_envelope_null_items_rejected() {
        let result: Result<ListEnvelope<Chapter>, _> = serde_json::from_str(r#"{"data":[{"number":"1"}]}"#);
        assert!(result.is_err(), "Chapter without id must not parse");
    }

    #[test]
    fn test_verse_content_optional_fields() {
        let body = r#"{"data":{"id":"JHN.3.16"}}"#;
        let parsed: Envelope<VerseContent> = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data.id.as_deref(), Some("JHN.3.16"));
        assert!(parsed.data.reference.is_none());
        assert!(parsed.data.content.is_none());
    }

    // ==================== URL Construction Tests ====================

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client = make_client("https://api.scripture.api.bible/v1");
        let url = client.endpoint(&["books"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.scripture.api.bible/v1/bibles/592420522e16049f-01/books"
        );
    }

    #[test]
    fn test_endpoint_handles_trailing_slash() {
        let client = make_client("https://api.scripture.api.bible/v1/");
        let url = client.endpoint(&["chapters", "GEN.1", "verses"]).unwrap();
        assert_eq!(url.path(), "/v1/bibles/592420522e16049f-01/chapters/GEN.1/verses");
    }

    #[test]
    fn test_endpoint_escapes_segments() {
        let client = make_client("https://example.com");
        let url = client.endpoint(&["verses", "a/b c"]).unwrap();
        assert_eq!(url.path(), "/bibles/592420522e16049f-01/verses/a%2Fb%20c");
    }

    // ==================== BibleApiClient Construction Tests ====================

    #[test]
    fn test_api_client_creation() {
        let config = NetworkConfig {
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
        };
        let result = BibleApiClient::new(
            "https://example.com/v1",
            "id".to_string(),
            "key".to_string(),
            &config,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_api_client_rejects_invalid_url() {
        let result = BibleApiClient::new(
            "not a url",
            "id".to_string(),
            "key".to_string(),
            &NetworkConfig::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_debug_output_hides_key() {
        let client = make_client("https://example.com");
        let debug = format!("{:?}", client);
        assert!(debug.contains("BibleApiClient"));
        assert!(!debug.contains("secret"));
    }
}
