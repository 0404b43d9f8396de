//! Session persistence for the leadgen client.
//!
//! The [`TokenStore`] keeps the access/refresh token pair and, for remembered
//! sessions, the cached user identity. Backends implement [`KeyValueStorage`]:
//! - [`FileStorage`]: JSON file under `~/.leadgen`, survives restarts
//! - [`MemoryStorage`]: process-local, used for non-persistent sessions and tests

mod file;
mod keys;
mod memory;
mod store;
mod traits;

pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use store::{TokenPair, TokenStore, UserId, UserIdentity};
pub use traits::KeyValueStorage;

use leadgen_config::Paths;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Create the default file-backed storage at `~/.leadgen/session.json`.
pub fn create_storage(paths: &Paths) -> Box<dyn KeyValueStorage> {
    Box::new(FileStorage::new(paths.session_file()))
}

/// Create a TokenStore over the default file-backed storage.
pub fn create_token_store(paths: &Paths) -> TokenStore {
    TokenStore::new(create_storage(paths))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_keys_constants() {
        assert_eq!(StorageKeys::ACCESS_TOKEN, "accessToken");
        assert_eq!(StorageKeys::REFRESH_TOKEN, "refreshToken");
        assert_eq!(StorageKeys::USER, "user");

        let unique: std::collections::HashSet<_> = StorageKeys::ALL.iter().collect();
        assert_eq!(unique.len(), StorageKeys::ALL.len(), "Storage keys must be unique");
    }

    #[test]
    fn test_create_token_store_uses_session_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        create_token_store(&paths)
            .save(&TokenPair::new("A1", "R1"), None, false)
            .unwrap();

        assert!(paths.session_file().exists());
    }
}
