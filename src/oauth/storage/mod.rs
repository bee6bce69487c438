//! Token persistence
//!
//! [`TokenStore`] is the single capability the OAuth client depends on.
//! Three interchangeable implementations are provided:
//!
//! - [`InMemoryStore`]: process-local slot, used in tests
//! - [`EnvStore`]: read-only view over `FRESHBOOKS_*` variables for CI
//! - [`EncryptedFileStore`]: AES-256-GCM sealed file for normal use

mod env;
mod file;
mod memory;

use std::sync::Arc;

use tracing::info;

pub use env::{
    ENV_ACCESS_TOKEN, ENV_ACCOUNT_ID, ENV_BUSINESS_ID, ENV_EXPIRES_AT, ENV_REFRESH_TOKEN, EnvStore,
};
pub use file::EncryptedFileStore;
pub use memory::InMemoryStore;

use super::crypto::{MachineIdentity, TokenCipher};
use super::record::TokenRecord;
use crate::Result;
use crate::config::{StorageBackend, StorageSettings};

/// Persistence for the single token record of this process.
///
/// Absence is `Ok(None)`, never an error. Read-only stores reject
/// [`save`](TokenStore::save) and [`clear`](TokenStore::clear) with
/// [`Error::UnsupportedOperation`](crate::Error::UnsupportedOperation).
pub trait TokenStore: Send + Sync {
    /// Current record, if any
    fn load(&self) -> Result<Option<TokenRecord>>;

    /// Replace the stored record
    fn save(&self, record: &TokenRecord) -> Result<()>;

    /// Remove the stored record; succeeds when nothing is stored
    fn clear(&self) -> Result<()>;

    /// `true` if `save`/`clear` are rejected
    fn is_read_only(&self) -> bool {
        false
    }

    /// Backend label for logs and status output
    fn describe(&self) -> &'static str;
}

/// Build the store selected by the `storage` configuration section
pub fn from_settings(settings: &StorageSettings) -> Result<Arc<dyn TokenStore>> {
    let store: Arc<dyn TokenStore> = match settings.backend {
        StorageBackend::Memory => Arc::new(InMemoryStore::new()),
        StorageBackend::Env => Arc::new(EnvStore::from_process_env()),
        StorageBackend::File => {
            let path = settings.token_path()?;
            let cipher = TokenCipher::derive(&MachineIdentity::current(&settings.passphrase_env))?;
            Arc::new(EncryptedFileStore::new(path, cipher))
        }
    };
    info!(backend = store.describe(), read_only = store.is_read_only(), "Token store ready");
    Ok(store)
}
