use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::chat_api::ChatApiProvider;
use super::{MockProvider, Provider, ProviderError, ProviderMetadata};

/// Fixed priority for default-provider resolution. The mock provider is
/// deliberately absent: it is the fallback of last resort, not a default.
const DEFAULT_PRIORITY: &[&str] = &["anthropic", "openai", "azure_openai"];

/// Ordered set of LLM backends built from environment credentials at startup.
/// Unconfigured providers stay registered so their metadata is listable.
pub struct Registry {
    providers: HashMap<String, Arc<dyn Provider>>,
    descriptions: HashMap<String, (String, String, Vec<super::ConfigKey>)>,
}

impl Registry {
    pub fn from_env() -> Self {
        let mut registry = Self {
            providers: HashMap::new(),
            descriptions: HashMap::new(),
        };

        for provider in [
            ChatApiProvider::openai_from_env(),
            ChatApiProvider::anthropic_from_env(),
            ChatApiProvider::azure_openai_from_env(),
        ] {
            info!(
                provider = provider.name(),
                configured = provider.is_configured(),
                "provider initialized"
            );
            registry.descriptions.insert(
                provider.name().to_string(),
                (
                    provider.description.clone(),
                    provider.model_doc_link.clone(),
                    provider.config_keys.clone(),
                ),
            );
            registry
                .providers
                .insert(provider.name().to_string(), Arc::new(provider));
        }

        registry
            .providers
            .insert(MockProvider::NAME.to_string(), Arc::new(MockProvider));

        registry
    }

    #[cfg(test)]
    pub fn mock_only() -> Self {
        let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
        providers.insert(MockProvider::NAME.to_string(), Arc::new(MockProvider));
        Self {
            providers,
            descriptions: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    #[allow(dead_code)]
    pub fn get_configured(&self, name: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        let provider = self
            .get(name)
            .ok_or_else(|| ProviderError::ModelNotFound(format!("provider not found: {}", name)))?;
        if !provider.is_configured() {
            return Err(ProviderError::NotConfigured(format!(
                "provider not configured: {}",
                name
            )));
        }
        Ok(provider)
    }

    /// First configured provider in the fixed priority order.
    pub fn get_default(&self) -> Result<Arc<dyn Provider>, ProviderError> {
        for name in DEFAULT_PRIORITY {
            if let Some(provider) = self.providers.get(*name) {
                if provider.is_configured() {
                    return Ok(provider.clone());
                }
            }
        }
        Err(ProviderError::NotConfigured(
            "no provider is configured".into(),
        ))
    }

    pub fn mock(&self) -> Arc<dyn Provider> {
        self.providers
            .get(MockProvider::NAME)
            .cloned()
            .unwrap_or_else(|| Arc::new(MockProvider))
    }

    pub fn metadata(&self) -> Vec<ProviderMetadata> {
        let mut names: Vec<&String> = self.providers.keys().collect();
        names.sort();

        names
            .into_iter()
            .map(|name| {
                let provider = &self.providers[name];
                let (description, model_doc_link, config_keys) = self
                    .descriptions
                    .get(name)
                    .cloned()
                    .unwrap_or((String::new(), String::new(), Vec::new()));
                ProviderMetadata {
                    name: name.clone(),
                    display_name: provider.display_name().to_string(),
                    description,
                    default_model: provider.default_model(),
                    known_models: provider.models(),
                    config_keys,
                    is_configured: provider.is_configured(),
                    model_doc_link,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_always_contains_the_mock() {
        std::env::remove_var("OPENAI_API_KEY");
        std::env::remove_var("ANTHROPIC_API_KEY");
        let registry = Registry::from_env();
        assert!(registry.get("mock").is_some());
        assert!(registry.get("openai").is_some());
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn unconfigured_providers_are_listed_but_not_default() {
        std::env::remove_var("OPENAI_API_KEY");
        std::env::remove_var("ANTHROPIC_API_KEY");
        std::env::remove_var("AZURE_OPENAI_API_KEY");
        std::env::remove_var("AZURE_OPENAI_ENDPOINT");
        let registry = Registry::from_env();

        let metadata = registry.metadata();
        assert!(metadata.iter().any(|m| m.name == "anthropic"));
        // With no credentials, only the mock is configured and there is no
        // default.
        assert!(registry.get_default().is_err());
        assert!(registry.get_configured("openai").is_err());
        assert!(registry.get_configured("mock").is_ok());
    }
}
