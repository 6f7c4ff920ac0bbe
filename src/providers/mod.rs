//! External model and search providers.
//!
//! Nodes only see the [`LanguageModel`] and [`SearchProvider`] traits, so
//! tests can swap in the scripted fakes from `utils::testing`.

pub mod llm;
pub mod search;

pub use llm::{LanguageModel, LlmBackend, RigModel, generate_queries, parse_queries};
pub use search::{DEFAULT_SEARCH_URL, SearchProvider, TavilySearch};

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::message::Message;

#[derive(Debug, Error, Diagnostic)]
pub enum ProviderError {
    #[error("{provider} request failed: {source}")]
    #[diagnostic(
        code(essay_graph::provider::http),
        help("Check network connectivity and the endpoint URL.")
    )]
    Http {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} returned HTTP {status}: {body}")]
    #[diagnostic(
        code(essay_graph::provider::status),
        help("A 401 usually means the API key is missing or invalid.")
    )]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider} response could not be decoded: {message}")]
    #[diagnostic(code(essay_graph::provider::decode))]
    Decode {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} completion failed: {message}")]
    #[diagnostic(code(essay_graph::provider::llm))]
    Llm {
        provider: &'static str,
        message: String,
    },

    #[error("provider configuration error: {message}")]
    #[diagnostic(
        code(essay_graph::provider::config),
        help("Set GROQ_API_KEY / TAVILY_API_KEY or choose another provider.")
    )]
    Config { message: String },
}

/// Stand-in for a provider whose credentials are missing.
///
/// Lets inspection-only commands build the workflow without keys; any step
/// that actually calls it fails with [`ProviderError::Config`].
#[derive(Debug, Clone)]
pub struct Unconfigured {
    reason: String,
}

impl Unconfigured {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn error(&self) -> ProviderError {
        ProviderError::Config {
            message: self.reason.clone(),
        }
    }
}

#[async_trait]
impl LanguageModel for Unconfigured {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn invoke(&self, _messages: &[Message]) -> Result<String, ProviderError> {
        Err(self.error())
    }
}

#[async_trait]
impl SearchProvider for Unconfigured {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<String>, ProviderError> {
        Err(self.error())
    }
}
