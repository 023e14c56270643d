//! Primary credential capability
//!
//! The primary credential is the application's own session token. This crate
//! only ever reads it: the holder trait has no mutating method and
//! [`PrimaryCredential`] has no setter.
//!
//! A popup or redirect flow may not see the holder's value (for example a
//! fresh window before the primary session is restored), so [`initiate`]
//! stashes the credential in short-lived session storage under
//! `"{slug}_oauth_primary_token"`. Resolution prefers the holder and falls
//! back to the stash.
//!
//! [`initiate`]: crate::status::AuthStatusCache::initiate

use crate::error::{LinkError, Result};
use crate::types::PlatformKind;
use bridge_traits::SessionStorage;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Opaque bearer credential of the primary session.
#[derive(Clone, PartialEq, Eq)]
pub struct PrimaryCredential(Arc<str>);

impl PrimaryCredential {
    /// Wraps a token. Blank tokens are rejected.
    pub fn new(token: impl AsRef<str>) -> Option<Self> {
        let token = token.as_ref().trim();
        if token.is_empty() {
            None
        } else {
            Some(Self(Arc::from(token)))
        }
    }

    /// The raw token, for building the `Authorization` header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PrimaryCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrimaryCredential([REDACTED])")
    }
}

/// Read-only view of the primary session, provided by the host.
pub trait PrimarySessionHolder: Send + Sync {
    /// The current credential, or `None` when signed out.
    fn credential(&self) -> Option<PrimaryCredential>;
}

/// Holder with a fixed value, for hosts that resolve the session up front.
#[derive(Debug, Clone, Default)]
pub struct StaticSessionHolder {
    credential: Option<PrimaryCredential>,
}

impl StaticSessionHolder {
    pub fn signed_in(token: impl AsRef<str>) -> Self {
        Self {
            credential: PrimaryCredential::new(token),
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }
}

impl PrimarySessionHolder for StaticSessionHolder {
    fn credential(&self) -> Option<PrimaryCredential> {
        self.credential.clone()
    }
}

/// Session storage key of the stashed credential for a platform.
pub fn stash_key(platform: PlatformKind) -> String {
    format!("{}_oauth_primary_token", platform.slug())
}

/// Resolves the credential for a platform flow: holder first, then stash.
///
/// # Errors
///
/// Returns [`LinkError::SessionMissing`] when neither source has a value and
/// [`LinkError::Storage`] when the stash cannot be read.
pub async fn resolve_credential(
    holder: &dyn PrimarySessionHolder,
    storage: &dyn SessionStorage,
    platform: PlatformKind,
) -> Result<PrimaryCredential> {
    if let Some(credential) = holder.credential() {
        return Ok(credential);
    }

    let key = stash_key(platform);
    let stashed = storage.get_item(&key).await.map_err(|e| {
        warn!(platform = platform.slug(), error = %e, "Failed to read stashed credential");
        LinkError::storage(e)
    })?;

    match stashed.and_then(PrimaryCredential::new) {
        Some(credential) => {
            debug!(platform = platform.slug(), "Using stashed primary credential");
            Ok(credential)
        }
        None => {
            warn!(platform = platform.slug(), "No primary credential available");
            Err(LinkError::SessionMissing)
        }
    }
}

/// Credential access for one platform: resolution plus stash management.
#[derive(Clone)]
pub struct CredentialSource {
    platform: PlatformKind,
    holder: Arc<dyn PrimarySessionHolder>,
    storage: Arc<dyn SessionStorage>,
    stash_ttl: Duration,
}

impl CredentialSource {
    pub fn new(
        platform: PlatformKind,
        holder: Arc<dyn PrimarySessionHolder>,
        storage: Arc<dyn SessionStorage>,
        stash_ttl: Duration,
    ) -> Self {
        Self {
            platform,
            holder,
            storage,
            stash_ttl,
        }
    }

    pub async fn resolve(&self) -> Result<PrimaryCredential> {
        resolve_credential(self.holder.as_ref(), self.storage.as_ref(), self.platform).await
    }

    /// Stashes the credential for the redirect round-trip.
    pub async fn stash(&self, credential: &PrimaryCredential) -> Result<()> {
        self.storage
            .set_item(
                &stash_key(self.platform),
                credential.expose(),
                Some(self.stash_ttl),
            )
            .await
            .map_err(|e| {
                warn!(platform = self.platform.slug(), error = %e, "Failed to stash credential");
                LinkError::storage(e)
            })?;

        info!(
            platform = self.platform.slug(),
            ttl_secs = self.stash_ttl.as_secs(),
            "Primary credential stashed for authorization"
        );
        Ok(())
    }

    /// Removes the stash. Idempotent.
    pub async fn clear_stash(&self) -> Result<()> {
        self.storage
            .remove_item(&stash_key(self.platform))
            .await
            .map_err(LinkError::storage)?;
        debug!(platform = self.platform.slug(), "Credential stash cleared");
        Ok(())
    }
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSource")
            .field("platform", &self.platform)
            .field("stash_ttl", &self.stash_ttl)
            .finish_non_exhaustive()
    }
}
