use super::CheckpointerType;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://essay_writer.db";

/// Settings the writer needs to pick and open its backends.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub checkpointer: CheckpointerType,
    pub database_url: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new(CheckpointerType::InMemory, DEFAULT_DATABASE_URL)
    }
}

impl RuntimeConfig {
    pub fn new(checkpointer: CheckpointerType, database_url: impl Into<String>) -> Self {
        Self {
            checkpointer,
            database_url: database_url.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_url_wins() {
        let cfg = RuntimeConfig::new(CheckpointerType::SQLite, "sqlite::memory:");
        assert_eq!(cfg.checkpointer, CheckpointerType::SQLite);
        assert_eq!(cfg.database_url, "sqlite::memory:");
    }

    #[test]
    fn default_is_in_memory() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.checkpointer, CheckpointerType::InMemory);
        assert_eq!(cfg.database_url, DEFAULT_DATABASE_URL);
    }
}
