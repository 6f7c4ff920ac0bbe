//! Identifier wrappers used by the runtime layer.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::id_generator::IdGenerator;

/// Identifier of one workflow run (a "thread" of checkpoints).
///
/// ```rust
/// use essay_graph::runtimes::types::SessionId;
///
/// let fixed = SessionId::new("s-1");
/// assert_eq!(fixed.as_str(), "s-1");
/// assert_ne!(SessionId::generate(), SessionId::generate());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn generate() -> Self {
        Self(IdGenerator::new().generate_session_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_plain_string() {
        let id = SessionId::new("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        assert_eq!(id.to_string(), "abc");
    }

    #[test]
    fn generated_ids_use_session_prefix() {
        assert!(SessionId::generate().as_str().starts_with("essay-"));
    }
}
