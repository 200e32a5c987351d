//! Provider router: selects the LLM provider named by configuration.

use crate::stub::StubProvider;
use pincer_core::provider::Provider;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Routes model calls to a named provider.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    /// Create a new router with a default provider name.
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get the default provider.
    pub fn default(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// List all registered provider names.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Build providers from configuration.
pub fn build_from_config(config: &pincer_config::AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider);

    let stub_model = if config.default_provider == "stub" {
        config.default_model.clone()
    } else {
        crate::stub::STUB_MODEL.to_string()
    };
    router.register("stub", Arc::new(StubProvider::with_model(stub_model)));

    debug!(
        default = %config.default_provider,
        registered = ?router.list(),
        "Provider router built"
    );
    router
}
