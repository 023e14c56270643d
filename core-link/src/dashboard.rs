//! Platforms dashboard
//!
//! One [`AuthStatusCache`] per platform, plus the per-platform actions the
//! dashboard view offers.

use crate::error::{LinkError, Result};
use crate::status::{AuthStatusCache, StatusState};
use crate::types::{AuthStatusSnapshot, PlatformKind};
use std::collections::BTreeMap;
use url::Url;

/// Action a platform card offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformAction {
    Connect,
    Refresh,
    Disconnect,
}

/// One row of the platforms view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformCard {
    pub platform: PlatformKind,
    pub display_name: &'static str,
    pub status: StatusState,
    pub actions: Vec<PlatformAction>,
}

#[derive(Debug, Default)]
pub struct PlatformsDashboard {
    caches: BTreeMap<PlatformKind, AuthStatusCache>,
}

impl PlatformsDashboard {
    pub fn new(caches: impl IntoIterator<Item = AuthStatusCache>) -> Self {
        Self {
            caches: caches
                .into_iter()
                .map(|cache| (cache.platform(), cache))
                .collect(),
        }
    }

    /// Starts every cache. Stops at the first cache that cannot start.
    pub async fn start(&self) -> Result<()> {
        for cache in self.caches.values() {
            cache.start().await?;
        }
        Ok(())
    }

    pub fn stop(&self) {
        for cache in self.caches.values() {
            cache.stop();
        }
    }

    pub fn platforms(&self) -> impl Iterator<Item = PlatformKind> + '_ {
        self.caches.keys().copied()
    }

    pub fn cache(&self, platform: PlatformKind) -> Result<&AuthStatusCache> {
        self.caches
            .get(&platform)
            .ok_or_else(|| LinkError::UnknownPlatform(platform.slug().to_string()))
    }

    pub fn status(&self, platform: PlatformKind) -> Result<AuthStatusSnapshot> {
        Ok(self.cache(platform)?.snapshot())
    }

    pub async fn initiate(&self, platform: PlatformKind) -> Result<Url> {
        self.cache(platform)?.initiate().await
    }

    pub async fn refresh(&self, platform: PlatformKind) -> Result<AuthStatusSnapshot> {
        self.cache(platform)?.refresh().await
    }

    pub async fn unlink(&self, platform: PlatformKind) -> Result<()> {
        self.cache(platform)?.unlink().await
    }

    /// Cards in platform order, built from cached state only.
    pub fn cards(&self) -> Vec<PlatformCard> {
        self.caches
            .iter()
            .map(|(platform, cache)| {
                let status = cache.state();
                let actions = if status.snapshot.authenticated {
                    vec![PlatformAction::Refresh, PlatformAction::Disconnect]
                } else {
                    vec![PlatformAction::Connect]
                };
                PlatformCard {
                    platform: *platform,
                    display_name: platform.display_name(),
                    status,
                    actions,
                }
            })
            .collect()
    }
}
