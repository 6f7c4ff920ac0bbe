use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

use super::ProviderError;

pub const DEFAULT_SEARCH_URL: &str = "https://api.tavily.com/search";

/// Web search returning plain-text snippets.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>, ProviderError>;
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    content: String,
}

/// Tavily search API client.
#[derive(Debug, Clone)]
pub struct TavilySearch {
    client: Client,
    api_key: String,
    endpoint: Url,
}

impl TavilySearch {
    pub fn new(api_key: impl Into<String>, endpoint: Url) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ProviderError::Config {
                message: "TAVILY_API_KEY is empty".to_string(),
            });
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("essay-graph/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Config {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            api_key,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    fn name(&self) -> &str {
        "tavily"
    }

    #[instrument(skip(self), err)]
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>, ProviderError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&TavilyRequest { query, max_results })
            .send()
            .await
            .map_err(|source| ProviderError::Http {
                provider: "tavily",
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "search request rejected");
            return Err(ProviderError::Status {
                provider: "tavily",
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TavilyResponse = response.json().await.map_err(|e| ProviderError::Decode {
            provider: "tavily",
            message: e.to_string(),
        })?;
        let snippets = snippets(parsed, max_results);
        debug!(count = snippets.len(), "search results");
        Ok(snippets)
    }
}

fn snippets(response: TavilyResponse, max_results: usize) -> Vec<String> {
    response
        .results
        .into_iter()
        .map(|r| r.content)
        .filter(|c| !c.trim().is_empty())
        .take(max_results)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_shape() {
        let body = serde_json::to_value(TavilyRequest {
            query: "tea",
            max_results: 2,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"query": "tea", "max_results": 2}));
    }

    #[test]
    fn snippets_read_result_content() {
        let raw = r#"{"query": "tea", "results": [
            {"title": "a", "url": "https://a", "content": "first"},
            {"title": "b", "url": "https://b", "content": ""},
            {"title": "c", "url": "https://c", "content": "second"},
            {"title": "d", "url": "https://d", "content": "third"}
        ]}"#;
        let parsed: TavilyResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(snippets(parsed, 2), vec!["first", "second"]);
    }

    #[test]
    fn missing_results_is_empty() {
        let parsed: TavilyResponse = serde_json::from_str("{}").unwrap();
        assert!(snippets(parsed, 2).is_empty());
    }

    #[test]
    fn empty_key_is_rejected() {
        let url = Url::parse(DEFAULT_SEARCH_URL).unwrap();
        assert!(matches!(
            TavilySearch::new("", url),
            Err(ProviderError::Config { .. })
        ));
    }
}
