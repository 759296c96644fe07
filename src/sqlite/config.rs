//! Connection configuration.

use super::transaction::{RandomSavepointNames, SavepointNamer, SequentialSavepointNames};

/// How a connection names the savepoints it creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SavepointNaming {
    /// Random ULID-based names, unique across the process.
    #[default]
    Random,
    /// `sp_1`, `sp_2`, ... counted per connection. Deterministic, for tests.
    Sequential,
}

impl SavepointNaming {
    pub(crate) fn namer(self) -> Box<dyn SavepointNamer> {
        match self {
            SavepointNaming::Random => Box::new(RandomSavepointNames),
            SavepointNaming::Sequential => Box::new(SequentialSavepointNames::default()),
        }
    }
}

/// SQLite connection configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteConfig {
    /// Path to the SQLite database file
    pub db_path: String,
    pub savepoint_naming: SavepointNaming,
    /// Sets `PRAGMA foreign_keys` after opening; `None` keeps the engine default.
    pub foreign_keys: Option<bool>,
}

impl SqliteConfig {
    /// Create a new SQLite config for the database at `db_path`
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            savepoint_naming: SavepointNaming::default(),
            foreign_keys: None,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(":memory:")
    }

    pub fn with_savepoint_naming(mut self, naming: SavepointNaming) -> Self {
        self.savepoint_naming = naming;
        self
    }

    pub fn with_foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = Some(enabled);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SqliteConfig::new("data.db");
        assert_eq!(config.db_path, "data.db");
        assert_eq!(config.savepoint_naming, SavepointNaming::Random);
        assert_eq!(config.foreign_keys, None);
        assert_eq!(SqliteConfig::in_memory().db_path, ":memory:");
    }

    #[test]
    fn test_builder() {
        let config = SqliteConfig::in_memory()
            .with_foreign_keys(false)
            .with_savepoint_naming(SavepointNaming::Sequential);
        assert_eq!(config.foreign_keys, Some(false));
        assert_eq!(config.savepoint_naming, SavepointNaming::Sequential);
    }
}
