use crate::config::Config;
use crate::gateway::StorageClient;
use crate::leadership::LeadershipStatus;
use crate::metrics::GaugeRegistry;
use std::sync::Arc;

/// Shared handles built once at startup and handed to every component.
pub struct AppContext {
    pub config: Config,
    pub clusters: Vec<String>,
    pub storage: StorageClient,
    pub leadership: LeadershipStatus,
    pub registry: Arc<GaugeRegistry>,
}

impl AppContext {
    pub fn new(config: Config, storage: StorageClient, leadership: LeadershipStatus) -> Self {
        let clusters = config.cluster_names();
        Self {
            config,
            clusters,
            storage,
            leadership,
            registry: Arc::new(GaugeRegistry::new()),
        }
    }
}
