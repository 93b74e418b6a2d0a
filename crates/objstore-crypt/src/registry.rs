//! Named encrypter providers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::encrypter::EncrypterFactory;
use crate::error::{CryptError, CryptResult};
use crate::noop::NoopEncrypterFactory;

/// Provider name always registered, mapping to [`NoopEncrypterFactory`].
pub const NOOP_PROVIDER: &str = "noop";

/// Maps provider names to encrypter factories.
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn EncrypterFactory>>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

impl ProviderRegistry {
    /// Registry holding only the `noop` provider.
    pub fn new() -> Self {
        let mut providers: HashMap<String, Arc<dyn EncrypterFactory>> = HashMap::new();
        providers.insert(NOOP_PROVIDER.to_string(), Arc::new(NoopEncrypterFactory));
        Self {
            providers: RwLock::new(providers),
        }
    }

    /// Registers (or replaces) a provider.
    pub fn register(&self, name: impl Into<String>, factory: Arc<dyn EncrypterFactory>) {
        let name = name.into();
        info!(provider = %name, "encryption provider registered");
        self.providers.write().insert(name, factory);
    }

    /// Looks up a provider.
    pub fn get(&self, name: &str) -> CryptResult<Arc<dyn EncrypterFactory>> {
        self.providers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CryptError::ProviderNotFound {
                name: name.to_string(),
            })
    }

    /// Registered provider names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring::KeyringFactory;

    #[test]
    fn noop_always_present() {
        let registry = ProviderRegistry::new();
        assert!(registry.get(NOOP_PROVIDER).is_ok());
        assert_eq!(registry.names(), vec!["noop"]);
    }

    #[test]
    fn register_and_lookup() {
        let registry = ProviderRegistry::new();
        registry.register("keyring", Arc::new(KeyringFactory::new("k")));
        assert_eq!(registry.get("keyring").unwrap().default_key_id(), "k");
        assert!(matches!(
            registry.get("vault"),
            Err(CryptError::ProviderNotFound { .. })
        ));
    }
}
