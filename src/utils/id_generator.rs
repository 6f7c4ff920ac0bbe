//! Identifier generation for sessions and checkpoints.
//!
//! ```rust
//! use essay_graph::utils::id_generator::IdGenerator;
//!
//! let ids = IdGenerator::new();
//! let session = ids.generate_session_id();
//! assert!(session.starts_with("essay-"));
//! assert!(IdGenerator::is_valid_uuid(&ids.generate_checkpoint_id()));
//! ```

use uuid::Uuid;

const SESSION_PREFIX: &str = "essay";

#[derive(Debug, Clone, Default)]
pub struct IdGenerator;

impl IdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate_uuid(&self) -> String {
        Uuid::new_v4().to_string()
    }

    /// `essay-<uuid>`; the form used for workflow run identifiers.
    pub fn generate_session_id(&self) -> String {
        format!("{SESSION_PREFIX}-{}", Uuid::new_v4())
    }

    /// Bare UUID; checkpoint ids carry no prefix.
    pub fn generate_checkpoint_id(&self) -> String {
        self.generate_uuid()
    }

    pub fn is_valid_uuid(id: &str) -> bool {
        Uuid::parse_str(id).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique_and_prefixed() {
        let ids = IdGenerator::new();
        let a = ids.generate_session_id();
        let b = ids.generate_session_id();
        assert_ne!(a, b);
        let uuid_part = a.strip_prefix("essay-").unwrap();
        assert!(IdGenerator::is_valid_uuid(uuid_part));
    }

    #[test]
    fn rejects_non_uuid() {
        assert!(!IdGenerator::is_valid_uuid("essay-123"));
    }
}
