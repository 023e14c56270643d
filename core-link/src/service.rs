//! Link service
//!
//! Turns a validated [`LinkConfig`] into the per-platform pieces of the
//! subsystem. One API client and one refresh scheduler exist per platform and
//! are shared by every processor and cache the service hands out. The
//! scheduler shares the failure streak; each linked processor still owns its
//! own keep-alive ticker.

use crate::api::PlatformApi;
use crate::callback::CallbackProcessor;
use crate::completion::CompletionRouter;
use crate::credential::{CredentialSource, PrimarySessionHolder};
use crate::dashboard::PlatformsDashboard;
use crate::error::Result;
use crate::refresh::RefreshScheduler;
use crate::routes::CallbackRoute;
use crate::status::{AuthStatusCache, StatusCacheDeps};
use crate::types::{FlowId, PlatformKind};
use core_runtime::events::EventBus;
use core_runtime::LinkConfig;
use std::sync::Arc;
use tracing::{debug, info, instrument};

struct PlatformWiring {
    api: PlatformApi,
    refresh: RefreshScheduler,
}

impl PlatformWiring {
    fn new(platform: PlatformKind, config: &LinkConfig) -> Self {
        let api = PlatformApi::new(
            platform,
            config.api_base_url.clone(),
            Arc::clone(&config.http_client),
            config.timings.request_timeout,
        );
        let refresh = RefreshScheduler::new(
            platform,
            api.clone(),
            config.event_bus.clone(),
            config.timings.refresh_interval,
            config.timings.refresh_failure_threshold,
        );
        Self { api, refresh }
    }
}

pub struct LinkService {
    config: LinkConfig,
    holder: Arc<dyn PrimarySessionHolder>,
    meditlink: PlatformWiring,
    three_shape: PlatformWiring,
}

impl LinkService {
    /// Validates the configuration and wires every supported platform.
    pub fn new(config: LinkConfig, holder: Arc<dyn PrimarySessionHolder>) -> Result<Self> {
        config.validate()?;

        let meditlink = PlatformWiring::new(PlatformKind::MeditLink, &config);
        let three_shape = PlatformWiring::new(PlatformKind::ThreeShape, &config);

        info!(
            api_base_url = %config.api_base_url,
            platforms = PlatformKind::ALL.len(),
            "Link service ready"
        );

        Ok(Self {
            config,
            holder,
            meditlink,
            three_shape,
        })
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.config.event_bus
    }

    fn wiring(&self, platform: PlatformKind) -> &PlatformWiring {
        match platform {
            PlatformKind::MeditLink => &self.meditlink,
            PlatformKind::ThreeShape => &self.three_shape,
        }
    }

    pub fn api(&self, platform: PlatformKind) -> PlatformApi {
        self.wiring(platform).api.clone()
    }

    pub fn refresh_scheduler(&self, platform: PlatformKind) -> RefreshScheduler {
        self.wiring(platform).refresh.clone()
    }

    fn credentials(&self, platform: PlatformKind) -> CredentialSource {
        CredentialSource::new(
            platform,
            Arc::clone(&self.holder),
            Arc::clone(&self.config.session_storage),
            self.config.timings.credential_stash_ttl,
        )
    }

    /// A fresh processor for one callback view.
    pub fn callback_processor(&self, platform: PlatformKind) -> CallbackProcessor {
        let flow_id = FlowId::new();
        let wiring = self.wiring(platform);
        let completion = CompletionRouter::new(
            platform,
            flow_id,
            Arc::clone(&self.config.window_host),
            self.config.event_bus.clone(),
            self.config.dashboard_route_for(platform.slug()),
            self.config.timings.redirect_delay,
        );

        debug!(platform = platform.slug(), flow_id = %flow_id, "Callback processor created");
        CallbackProcessor::new(
            flow_id,
            wiring.api.clone(),
            self.credentials(platform),
            wiring.refresh.clone(),
            completion,
            self.config.event_bus.clone(),
            self.config.timings,
        )
    }

    /// Parses a return redirect and processes it.
    ///
    /// The returned processor owns the flow's timers; keep it alive for as
    /// long as the callback view is shown.
    #[instrument(skip(self, route))]
    pub async fn handle_callback(&self, route: &str) -> Result<CallbackProcessor> {
        let CallbackRoute { platform, params } = CallbackRoute::parse(route)?;
        let processor = self.callback_processor(platform);
        processor.handle_redirect(params).await;
        Ok(processor)
    }

    pub fn status_cache(&self, platform: PlatformKind) -> AuthStatusCache {
        let wiring = self.wiring(platform);
        AuthStatusCache::new(StatusCacheDeps {
            api: wiring.api.clone(),
            credentials: self.credentials(platform),
            refresh: wiring.refresh.clone(),
            window: Arc::clone(&self.config.window_host),
            lifecycle: self.config.lifecycle_observer.clone(),
            clock: Arc::clone(&self.config.clock),
            events: self.config.event_bus.clone(),
            poll_interval: self.config.timings.status_poll_interval,
        })
    }

    pub fn dashboard(&self) -> PlatformsDashboard {
        PlatformsDashboard::new(PlatformKind::ALL.into_iter().map(|p| self.status_cache(p)))
    }
}

impl std::fmt::Debug for LinkService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkService")
            .field("config", &self.config)
            .field("platforms", &PlatformKind::ALL)
            .finish_non_exhaustive()
    }
}
