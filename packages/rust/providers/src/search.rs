//! Ranked web search over a Serper-compatible API.
//!
//! One call per planner query. Results come back in rank order; hits on
//! blocklisted domains are dropped before candidate selection so rank 3 can
//! move up into the kept window.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use sourcestream_fetcher::Blocklist;
use sourcestream_shared::{Result, SourcestreamError};

/// A single organic search result in rank order.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub snippet: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic: Vec<SearchHit>,
}

/// Client for the ranked-search API.
pub struct SearchClient {
    client: Client,
    base_url: String,
    api_key: String,
    blocklist: Arc<Blocklist>,
}

impl SearchClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
        blocklist: Arc<Blocklist>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourcestreamError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            blocklist,
        })
    }

    /// Run one localized search and return rank-ordered hits with blocklisted
    /// domains already removed.
    ///
    /// `country` is the ISO code passed through as the `gl` localization
    /// parameter.
    #[instrument(skip(self), fields(query = %query, country = %country))]
    pub async fn search(&self, query: &str, country: &str) -> Result<Vec<SearchHit>> {
        let url = format!("{}/search", self.base_url);
        let payload = serde_json::json!({
            "q": query,
            "gl": country,
            "num": 10,
        });

        let response = self
            .client
            .post(&url)
            .header("X-API-KEY", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SourcestreamError::Search(format!("search request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourcestreamError::Search(format!(
                "search API returned {status}"
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| SourcestreamError::Search(format!("undecodable search response: {e}")))?;

        let total = parsed.organic.len();
        let hits: Vec<SearchHit> = parsed
            .organic
            .into_iter()
            .filter(|hit| !self.blocklist.blocks_str(&hit.link))
            .collect();
        debug!(total, kept = hits.len(), "search results filtered");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> SearchClient {
        SearchClient::new(
            server.uri(),
            "test-key",
            Duration::from_secs(5),
            Arc::new(Blocklist::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn sends_query_key_and_localization() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("X-API-KEY", "test-key"))
            .and(body_partial_json(serde_json::json!({
                "q": "solar panel cost 2026",
                "gl": "uk",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "organic": [
                    {"title": "A", "link": "https://a.example/x", "snippet": "sa"},
                    {"title": "B", "link": "https://b.example/y", "snippet": "sb"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let hits = client(&server)
            .search("solar panel cost 2026", "uk")
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].link, "https://a.example/x");
    }

    #[tokio::test]
    async fn filters_blocklisted_domains_preserving_rank_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "organic": [
                    {"title": "Reddit", "link": "https://reddit.com/r/x", "snippet": ""},
                    {"title": "Good", "link": "https://good.example/a", "snippet": ""},
                    {"title": "Quora", "link": "https://www.quora.com/q", "snippet": ""},
                    {"title": "Also good", "link": "https://also.example/b", "snippet": ""}
                ]
            })))
            .mount(&server)
            .await;

        let hits = client(&server).search("anything", "us").await.unwrap();
        let links: Vec<&str> = hits.iter().map(|h| h.link.as_str()).collect();
        assert_eq!(links, vec!["https://good.example/a", "https://also.example/b"]);
    }

    #[tokio::test]
    async fn missing_organic_is_empty_not_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let hits = client(&server).search("anything", "us").await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = client(&server).search("anything", "us").await.unwrap_err();
        assert!(err.to_string().contains("429"));
    }
}
