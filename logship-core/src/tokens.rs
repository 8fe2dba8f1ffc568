use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::destination::DestinationKey;

/// Last known sequence token per destination.
///
/// Lives for as long as the process (or the owner) keeps it; nothing is persisted, so a cold
/// start always begins without tokens. Cloning shares the same map.
#[derive(Debug, Clone, Default)]
pub struct SequenceTokenStore {
    tokens: Arc<RwLock<HashMap<DestinationKey, String>>>,
}

impl SequenceTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &DestinationKey) -> Option<String> {
        self.tokens.read().get(key).cloned()
    }

    pub fn put(&self, key: &DestinationKey, token: impl Into<String>) {
        self.tokens.write().insert(key.clone(), token.into());
    }

    /// Drops the token, so the next write goes out without one.
    pub fn forget(&self, key: &DestinationKey) {
        self.tokens.write().remove(key);
    }

    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.read().is_empty()
    }
}
