use std::sync::Arc;

use tracing::info;

use crate::config::AppConfig;

use super::upstream_services::{DynUpstreamService, UpstreamService};

/// everything the handlers need, shared through an Extension layer
/// nothing in here is mutable, requests never see each other
#[derive(Clone)]
pub struct ProxyServices {
    pub upstream: DynUpstreamService,
    pub config: Arc<AppConfig>,
}

impl ProxyServices {
    pub fn new(config: Arc<AppConfig>) -> anyhow::Result<Self> {
        info!("starting proxy services...");

        let identity = config.upstream_identity();
        let upstream = Arc::new(UpstreamService::new(&identity, config.upstream_timeout())?)
            as DynUpstreamService;

        info!(
            "upstream client ok, identifying as '{}'",
            identity.user_agent
        );

        Ok(Self { upstream, config })
    }

    /// lets tests swap the origin client out
    pub fn with_upstream(config: Arc<AppConfig>, upstream: DynUpstreamService) -> Self {
        Self { upstream, config }
    }
}
