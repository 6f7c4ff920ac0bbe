use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::{AssistantContent, CompletionModel};
use rig::providers::{groq, ollama};
use tracing::{debug, instrument};

use super::ProviderError;
use crate::message::{Message, join_role, roles};
use crate::utils::json_ext::{extract_json, string_items};

/// Chat-completion provider used by the step nodes.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    /// Sends the conversation and returns the generated text.
    async fn invoke(&self, messages: &[Message]) -> Result<String, ProviderError>;
}

/// Which hosted backend a [`RigModel`] talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Groq,
    Ollama,
}

impl LlmBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            LlmBackend::Groq => "groq",
            LlmBackend::Ollama => "ollama",
        }
    }
}

impl std::str::FromStr for LlmBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "groq" => Ok(LlmBackend::Groq),
            "ollama" => Ok(LlmBackend::Ollama),
            other => Err(format!("unknown LLM provider `{other}` (expected groq or ollama)")),
        }
    }
}

enum Backend {
    Groq(groq::CompletionModel),
    Ollama(ollama::CompletionModel),
}

/// `rig` completion model with temperature 0.
pub struct RigModel {
    backend: Backend,
    model: String,
}

impl std::fmt::Debug for RigModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RigModel")
            .field("backend", &self.backend_kind().as_str())
            .field("model", &self.model)
            .finish()
    }
}

impl RigModel {
    pub fn groq(api_key: &str, model: impl Into<String>) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::Config {
                message: "GROQ_API_KEY is empty".to_string(),
            });
        }
        let model = model.into();
        let client = groq::Client::new(api_key);
        Ok(Self {
            backend: Backend::Groq(client.completion_model(&model)),
            model,
        })
    }

    /// Local Ollama at its default address.
    pub fn ollama(model: impl Into<String>) -> Self {
        let model = model.into();
        let client = ollama::Client::new();
        Self {
            backend: Backend::Ollama(client.completion_model(&model)),
            model,
        }
    }

    pub fn backend_kind(&self) -> LlmBackend {
        match self.backend {
            Backend::Groq(_) => LlmBackend::Groq,
            Backend::Ollama(_) => LlmBackend::Ollama,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// System turns become the preamble, user turns the prompt.
async fn complete<M: CompletionModel>(
    model: &M,
    provider: &'static str,
    messages: &[Message],
) -> Result<String, ProviderError> {
    let preamble = join_role(messages, roles::SYSTEM);
    let prompt = join_role(messages, roles::USER);
    if prompt.is_empty() {
        return Err(ProviderError::Llm {
            provider,
            message: "no user message to send".to_string(),
        });
    }

    let request = model
        .completion_request(rig::completion::Message::user(prompt))
        .preamble(preamble)
        .temperature(0.0)
        .build();
    let response = model
        .completion(request)
        .await
        .map_err(|e| ProviderError::Llm {
            provider,
            message: e.to_string(),
        })?;

    let text: String = response
        .choice
        .into_iter()
        .filter_map(|content| match content {
            AssistantContent::Text(t) => Some(t.text),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("");
    if text.trim().is_empty() {
        return Err(ProviderError::Decode {
            provider,
            message: "completion contained no text".to_string(),
        });
    }
    Ok(text)
}

#[async_trait]
impl LanguageModel for RigModel {
    fn name(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, messages), fields(model = %self.model), err)]
    async fn invoke(&self, messages: &[Message]) -> Result<String, ProviderError> {
        let text = match &self.backend {
            Backend::Groq(m) => complete(m, "groq", messages).await?,
            Backend::Ollama(m) => complete(m, "ollama", messages).await?,
        };
        debug!(chars = text.len(), "completion received");
        Ok(text)
    }
}

const QUERY_FORMAT_HINT: &str = "Respond only with JSON of the form {\"queries\": [\"...\"]}.";

/// Asks the model for search queries and parses at most `max` of them.
pub async fn generate_queries(
    model: &dyn LanguageModel,
    messages: &[Message],
    max: usize,
) -> Result<Vec<String>, ProviderError> {
    let mut prompt = messages.to_vec();
    prompt.push(Message::system(QUERY_FORMAT_HINT));
    let raw = model.invoke(&prompt).await?;
    Ok(parse_queries(&raw, max))
}

/// Extracts search queries from a model reply.
///
/// Accepted shapes, in order: a JSON object with a `queries` array, a bare
/// JSON array (either possibly inside a code fence or surrounded by prose),
/// and finally one query per non-empty line with list markers stripped.
pub fn parse_queries(raw: &str, max: usize) -> Vec<String> {
    let parsed = match extract_json(raw) {
        Some(value) if value.is_array() => string_items(&value),
        Some(value) => value.get("queries").map(string_items).unwrap_or_default(),
        None => Vec::new(),
    };
    let candidates = if parsed.is_empty() {
        raw.lines().filter_map(clean_line).collect()
    } else {
        parsed
    };

    let mut queries: Vec<String> = Vec::new();
    for q in candidates {
        if queries.len() == max {
            break;
        }
        if !queries.contains(&q) {
            queries.push(q);
        }
    }
    queries
}

fn clean_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with("```") || line.ends_with(':') {
        return None;
    }
    let line = line.trim_start_matches(['-', '*', '•']).trim_start();
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    let line = if digits > 0 && line[digits..].starts_with(['.', ')']) {
        line[digits + 1..].trim_start()
    } else {
        line
    };
    let line = line.trim_matches(|c| c == '"' || c == '\'').trim();
    (!line.is_empty()).then(|| line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_queries_object() {
        let raw = r#"{"queries": ["bee decline causes", "pollination economics", "neonicotinoids", "extra"]}"#;
        assert_eq!(
            parse_queries(raw, 3),
            vec!["bee decline causes", "pollination economics", "neonicotinoids"]
        );
    }

    #[test]
    fn parses_fenced_and_bare_arrays() {
        let fenced = "Here:\n```json\n{\"queries\": [\"a\", \"b\"]}\n```";
        assert_eq!(parse_queries(fenced, 3), vec!["a", "b"]);
        assert_eq!(parse_queries("[\"x\", \"y\", \"z\"]", 2), vec!["x", "y"]);
    }

    #[test]
    fn falls_back_to_lines() {
        let raw = "Search queries:\n1. history of tea\n2) tea trade routes\n- \"green vs black tea\"\n\n";
        assert_eq!(
            parse_queries(raw, 3),
            vec!["history of tea", "tea trade routes", "green vs black tea"]
        );
    }

    #[test]
    fn dedupes_and_respects_zero_max() {
        assert_eq!(parse_queries("[\"a\", \"a\", \"b\"]", 3), vec!["a", "b"]);
        assert!(parse_queries("[\"a\"]", 0).is_empty());
        assert!(parse_queries("   ", 3).is_empty());
    }

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("Groq".parse::<LlmBackend>(), Ok(LlmBackend::Groq));
        assert_eq!("ollama".parse::<LlmBackend>(), Ok(LlmBackend::Ollama));
        assert!("openai".parse::<LlmBackend>().is_err());
    }

    #[test]
    fn groq_requires_key() {
        assert!(matches!(
            RigModel::groq("  ", "llama-3.3-70b-versatile"),
            Err(ProviderError::Config { .. })
        ));
    }

    #[tokio::test]
    async fn generate_queries_appends_format_hint() {
        use crate::utils::testing::ScriptedModel;
        let model = ScriptedModel::new(["{\"queries\": [\"q1\", \"q2\", \"q3\"]}"]);
        let queries = generate_queries(&model, &[Message::user("tea")], 2)
            .await
            .unwrap();
        assert_eq!(queries, vec!["q1", "q2"]);
        let calls = model.calls();
        assert!(calls[0].last().unwrap().content.contains("\"queries\""));
    }
}
