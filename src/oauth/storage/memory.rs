use parking_lot::RwLock;

use super::TokenStore;
use crate::Result;
use crate::oauth::record::TokenRecord;

/// Process-local store with no durability
#[derive(Debug, Default)]
pub struct InMemoryStore {
    slot: RwLock<Option<TokenRecord>>,
}

impl InMemoryStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `record`
    #[must_use]
    pub fn with_record(record: TokenRecord) -> Self {
        Self {
            slot: RwLock::new(Some(record)),
        }
    }
}

impl TokenStore for InMemoryStore {
    fn load(&self) -> Result<Option<TokenRecord>> {
        Ok(self.slot.read().clone())
    }

    fn save(&self, record: &TokenRecord) -> Result<()> {
        *self.slot.write() = Some(record.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot.write() = None;
        Ok(())
    }

    fn describe(&self) -> &'static str {
        "memory"
    }
}
