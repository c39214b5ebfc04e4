// §4.F Subscription Validator: holds the configured {database ->
// {collections}} whitelist. Immutable after initialization, so no
// interior mutability is needed — it is consumed as a plain `Arc` by
// callers.
use crate::models::DatabaseConfig;

#[derive(Debug, Clone)]
pub struct Validator {
    databases: Vec<DatabaseConfig>,
}

impl Validator {
    pub fn new(databases: Vec<DatabaseConfig>) -> Self {
        Self { databases }
    }

    /// True iff some configured database matches `db` and either allows
    /// any collection (empty list) or explicitly lists `coll`.
    pub fn is_allowed(&self, db: &str, coll: &str) -> bool {
        self.databases.iter().any(|cfg| {
            cfg.name == db && (cfg.collections.is_empty() || cfg.collections.iter().any(|c| c == coll))
        })
    }

    pub fn list_configured(&self) -> &[DatabaseConfig] {
        &self.databases
    }
}
