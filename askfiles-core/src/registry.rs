//! Process-wide service registry
//!
//! Holds the [`Assistant`] built for the active API key. Applying a new key
//! builds a fresh assistant and swaps it in as one `Arc`; requests already
//! running keep the assistant they started with. The activation table is
//! shared by every assistant the registry builds, so swapping keys never
//! loses activation state. The model cursor lives in the assistant and
//! starts over with each new key.

use std::sync::{Arc, PoisonError, RwLock};

use crate::activation::ActivationStore;
use crate::assistant::Assistant;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::gemini::{GeminiClient, GenerativeBackend};
use crate::policy::InvocationPolicy;

/// Builds an upstream backend for an API key
pub type BackendFactory =
    Arc<dyn Fn(&str, &Config) -> Result<Arc<dyn GenerativeBackend>> + Send + Sync>;

struct Active {
    api_key: String,
    assistant: Arc<Assistant>,
}

/// Swappable holder for the current assistant
pub struct ServiceRegistry {
    config: Config,
    activation: Arc<ActivationStore>,
    factory: BackendFactory,
    active: RwLock<Option<Active>>,
}

impl ServiceRegistry {
    pub fn new(config: Config, activation: Arc<ActivationStore>, factory: BackendFactory) -> Self {
        Self {
            config,
            activation,
            factory,
            active: RwLock::new(None),
        }
    }

    /// Registry backed by the real Gemini API
    pub fn gemini(config: Config, activation: Arc<ActivationStore>) -> Self {
        let factory: BackendFactory = Arc::new(
            |api_key: &str, config: &Config| -> Result<Arc<dyn GenerativeBackend>> {
                let client = GeminiClient::new(api_key, &config.gemini)?;
                Ok(Arc::new(client))
            },
        );
        Self::new(config, activation, factory)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn activation(&self) -> &Arc<ActivationStore> {
        &self.activation
    }

    /// A backend for `api_key` that is not registered anywhere.
    ///
    /// Used to verify a candidate key before [`ServiceRegistry::apply`].
    pub fn backend_for(&self, api_key: &str) -> Result<Arc<dyn GenerativeBackend>> {
        (self.factory)(api_key, &self.config)
    }

    /// Build services for `api_key` and make them current.
    pub fn apply(&self, api_key: &str) -> Result<Arc<Assistant>> {
        let backend = self.backend_for(api_key)?;
        let policy = InvocationPolicy::from_config(&self.config.gemini, &self.config.retry)?;
        let assistant = Arc::new(Assistant::new(backend, policy, Arc::clone(&self.activation)));

        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Some(Active {
            api_key: api_key.to_string(),
            assistant: Arc::clone(&assistant),
        });
        tracing::info!("Services initialized for new API key");
        Ok(assistant)
    }

    /// The current assistant, if a key has been applied
    pub fn current(&self) -> Option<Arc<Assistant>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|active| Arc::clone(&active.assistant))
    }

    /// The current assistant or [`Error::NotConfigured`]
    pub fn require(&self) -> Result<Arc<Assistant>> {
        self.current().ok_or(Error::NotConfigured)
    }

    pub fn api_key(&self) -> Option<String> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|active| active.api_key.clone())
    }

    /// The model new registries start from
    pub fn default_model(&self) -> &str {
        self.config
            .gemini
            .models
            .first()
            .map(String::as_str)
            .unwrap_or("gemini-2.5-flash")
    }
}

/// Shorten an API key for display: first 10 and last 4 characters.
pub fn mask_api_key(api_key: &str) -> String {
    let chars: Vec<char> = api_key.chars().collect();
    if chars.len() <= 14 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..10].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}
