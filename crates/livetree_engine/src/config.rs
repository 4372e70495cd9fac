//! Configuration for the sync engine.

use crate::dispatcher::{Dispatcher, InlineDispatcher};
use livetree_data::DEFAULT_MAX_DEPTH;
use std::sync::Arc;

/// Configuration for an engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Label attached to the engine's log span.
    pub name: String,
    /// Absolute URL of the authority, e.g. `https://demo.livetree.dev`.
    pub host: String,
    /// Transaction settings.
    pub transaction: TransactionConfig,
    /// Maximum nesting depth accepted for written values.
    pub max_depth: usize,
    /// Where listener callbacks run.
    pub dispatcher: Arc<dyn Dispatcher>,
}

impl EngineConfig {
    /// Creates a configuration for the given authority URL.
    pub fn new(host: impl Into<String>) -> Self {
        let host: String = host.into();
        Self {
            name: "default".into(),
            host: host.trim_end_matches('/').to_string(),
            transaction: TransactionConfig::default(),
            max_depth: DEFAULT_MAX_DEPTH,
            dispatcher: Arc::new(InlineDispatcher),
        }
    }

    /// Sets the label used in logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the transaction configuration.
    pub fn with_transaction(mut self, transaction: TransactionConfig) -> Self {
        self.transaction = transaction;
        self
    }

    /// Sets the maximum number of transaction retries.
    pub fn with_max_transaction_retries(mut self, max_retries: u32) -> Self {
        self.transaction.max_retries = max_retries;
        self
    }

    /// Sets the maximum nesting depth of written values.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Sets where listener callbacks run.
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("https://localhost")
    }
}

/// Configuration for transaction retries.
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    /// Conflicts tolerated before a transaction aborts.
    pub max_retries: u32,
}

impl TransactionConfig {
    /// Creates a transaction configuration.
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// A configuration that aborts on the first conflict.
    pub fn no_retry() -> Self {
        Self { max_retries: 0 }
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self::new(25)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_builder() {
        let config = EngineConfig::new("https://demo.livetree.dev/")
            .with_max_transaction_retries(3)
            .with_max_depth(8)
            .with_name("tests");

        assert_eq!(config.host, "https://demo.livetree.dev");
        assert_eq!(config.transaction.max_retries, 3);
        assert_eq!(config.max_depth, 8);
        assert_eq!(config.name, "tests");
    }

    #[test]
    fn transaction_defaults() {
        assert_eq!(TransactionConfig::default().max_retries, 25);
        assert_eq!(TransactionConfig::no_retry().max_retries, 0);
    }
}
