//! Stored mail-account connections
//!
//! Refresh tokens never touch storage in the clear: [`ConnectionManager::store`]
//! seals them with the [`SecretVault`] and [`ConnectionManager::refresh_token`]
//! is the only way back out.

use tracing::{debug, info};

use crate::auth::missing_scopes;
use crate::error::{FootprintError, Result};
use crate::models::{EmailConnection, OwnerId};
use crate::repository::ConnectionRepository;
use crate::vault::SecretVault;

/// Provider name recorded for Gmail connections
pub const GOOGLE_PROVIDER: &str = "google";

pub struct ConnectionManager<R> {
    repo: R,
    vault: SecretVault,
}

impl<R: ConnectionRepository> ConnectionManager<R> {
    pub fn new(repo: R, vault: SecretVault) -> Self {
        Self { repo, vault }
    }

    /// Encrypt and save `refresh_token`, replacing any earlier connection
    ///
    /// `scope` is the space-separated grant returned with the token and must
    /// include read and send access.
    pub async fn store(
        &self,
        owner: OwnerId,
        refresh_token: &str,
        scope: &str,
    ) -> Result<EmailConnection> {
        let refresh_token = refresh_token.trim();
        if refresh_token.is_empty() {
            return Err(FootprintError::Validation(
                "refresh token must not be empty".to_string(),
            ));
        }
        let missing = missing_scopes(scope);
        if !missing.is_empty() {
            return Err(FootprintError::Validation(format!(
                "connection is missing required scopes: {}",
                missing.join(", ")
            )));
        }

        let sealed = self.vault.encrypt_str(refresh_token)?;
        let connection = self
            .repo
            .upsert_connection(owner, GOOGLE_PROVIDER, &sealed, scope)
            .await?;
        info!("Stored {} connection for owner {}", GOOGLE_PROVIDER, owner);
        Ok(connection)
    }

    /// Decrypted refresh token for `owner`
    pub async fn refresh_token(&self, owner: OwnerId) -> Result<String> {
        let connection = self
            .repo
            .get_connection(owner, GOOGLE_PROVIDER)
            .await?
            .ok_or_else(|| FootprintError::NotFound("mail account not connected".to_string()))?;
        debug!("Opening stored credential for owner {}", owner);
        self.vault.decrypt_str(&connection.refresh_token_encrypted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{GMAIL_READONLY_SCOPE, GMAIL_SEND_SCOPE};
    use crate::memory_store::MemoryStore;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn full_scope() -> String {
        format!("{} {}", GMAIL_READONLY_SCOPE, GMAIL_SEND_SCOPE)
    }

    #[tokio::test]
    async fn test_token_is_sealed_at_rest() {
        let store = MemoryStore::new();
        let manager = ConnectionManager::new(store.clone(), SecretVault::new(KEY));

        let connection = manager.store(1, "1//refresh", &full_scope()).await.unwrap();
        assert_ne!(connection.refresh_token_encrypted, "1//refresh");

        let raw = store.get_connection(1, GOOGLE_PROVIDER).await.unwrap().unwrap();
        assert!(!raw.refresh_token_encrypted.contains("refresh"));
        assert_eq!(manager.refresh_token(1).await.unwrap(), "1//refresh");
    }

    #[tokio::test]
    async fn test_unconnected_owner_is_not_found() {
        let manager = ConnectionManager::new(MemoryStore::new(), SecretVault::new(KEY));
        let err = manager.refresh_token(3).await.unwrap_err();
        assert!(matches!(err, FootprintError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_send_scope_rejected() {
        let manager = ConnectionManager::new(MemoryStore::new(), SecretVault::new(KEY));
        let err = manager
            .store(1, "1//refresh", GMAIL_READONLY_SCOPE)
            .await
            .unwrap_err();
        assert!(matches!(err, FootprintError::Validation(_)));
    }

    #[tokio::test]
    async fn test_rotated_key_fails_authentication() {
        let store = MemoryStore::new();
        ConnectionManager::new(store.clone(), SecretVault::new(KEY))
            .store(1, "1//refresh", &full_scope())
            .await
            .unwrap();

        let other_key = "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff";
        let err = ConnectionManager::new(store, SecretVault::new(other_key))
            .refresh_token(1)
            .await
            .unwrap_err();
        assert!(matches!(err, FootprintError::Authentication(_)));
    }
}
