//! Session Storage Abstraction
//!
//! Short-lived key/value storage scoped to one browsing session (a tab or a
//! popup window and its children). Values outlive a full-page navigation to
//! the OAuth provider and back, but not the session itself.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Session-scoped key/value store
///
/// Hosts map this onto `sessionStorage` in web views, or onto an in-memory
/// map for desktop shells. Entries written with a `ttl` must be treated as
/// absent once it elapses.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SessionStorage;
/// use std::time::Duration;
///
/// async fn stash(storage: &dyn SessionStorage, token: &str) -> Result<()> {
///     storage
///         .set_item("meditlink_oauth_primary_token", token, Some(Duration::from_secs(600)))
///         .await
/// }
/// ```
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Store a value, replacing any previous value for `key`.
    async fn set_item(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Retrieve a value. Returns `None` when missing or expired.
    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Remove a value. Removing a missing key is not an error.
    async fn remove_item(&self, key: &str) -> Result<()>;

    /// Check whether a live value exists for `key`.
    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get_item(key).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use mockall::mock;

    mock! {
        Storage {}

        #[async_trait]
        impl SessionStorage for Storage {
            async fn set_item(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
            async fn get_item(&self, key: &str) -> Result<Option<String>>;
            async fn remove_item(&self, key: &str) -> Result<()>;
        }
    }

    #[tokio::test]
    async fn test_contains_reads_through_get_item() {
        let mut storage = MockStorage::new();
        storage
            .expect_get_item()
            .times(2)
            .returning(|key| Ok(key.starts_with("meditlink").then(|| "primary-token".to_string())));

        assert!(storage.contains("meditlink_oauth_primary_token").await.unwrap());
        assert!(!storage.contains("3shape_oauth_primary_token").await.unwrap());
    }

    #[tokio::test]
    async fn test_contains_propagates_storage_errors() {
        let mut storage = MockStorage::new();
        storage
            .expect_get_item()
            .returning(|_| Err(BridgeError::OperationFailed("quota exceeded".to_string())));

        let err = storage.contains("meditlink_oauth_primary_token").await.unwrap_err();
        assert!(matches!(err, BridgeError::OperationFailed(_)));
    }
}
