//! Open options.

/// Default depth of revision history kept per branch.
pub const DEFAULT_REV_LIMIT: usize = 1000;

/// Options for opening a database.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Database name.
    pub name: String,

    /// Backend factory name.
    pub backend: String,

    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether bulk writes compact obsolete revisions inline.
    pub auto_compaction: bool,

    /// Depth of revision history kept per branch before stemming.
    pub rev_limit: usize,
}

impl OpenOptions {
    /// Creates options for the named database with default values.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend: siltdb_storage::registry::MEMORY_BACKEND.to_string(),
            create_if_missing: true,
            auto_compaction: false,
            rev_limit: DEFAULT_REV_LIMIT,
        }
    }

    /// Sets the backend factory name.
    #[must_use]
    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether bulk writes compact inline.
    #[must_use]
    pub const fn auto_compaction(mut self, value: bool) -> Self {
        self.auto_compaction = value;
        self
    }

    /// Sets the revision depth kept per branch.
    #[must_use]
    pub const fn rev_limit(mut self, limit: usize) -> Self {
        self.rev_limit = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = OpenOptions::new("db");
        assert_eq!(opts.backend, "memory");
        assert!(opts.create_if_missing);
        assert!(!opts.auto_compaction);
        assert_eq!(opts.rev_limit, DEFAULT_REV_LIMIT);
    }

    #[test]
    fn builder_pattern() {
        let opts = OpenOptions::new("db")
            .auto_compaction(true)
            .create_if_missing(false)
            .rev_limit(5);
        assert!(opts.auto_compaction);
        assert!(!opts.create_if_missing);
        assert_eq!(opts.rev_limit, 5);
    }
}
