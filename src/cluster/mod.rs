//! Per-cluster ingestion clients and the table that starts and stops them.

use crate::config::ClusterConfig;
use crate::error::Result;
use crate::gateway::StorageClient;
use crate::kafka::KafkaClusterClient;
use std::collections::HashMap;
use tracing::{error, info, warn};

/// A source of offset commits and broker offsets for one named cluster.
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    fn name(&self) -> &str;

    /// Begin feeding storage. Fails if the cluster cannot be reached.
    async fn start(&mut self, storage: StorageClient) -> Result<()>;

    async fn stop(&mut self);
}

/// Every configured cluster client, started all-or-nothing and stopped in
/// reverse start order.
pub struct ClusterClients {
    clients: Vec<Box<dyn ClusterClient>>,
    by_name: HashMap<String, usize>,
    started: usize,
}

impl ClusterClients {
    pub fn new(clients: Vec<Box<dyn ClusterClient>>) -> Self {
        let mut by_name = HashMap::with_capacity(clients.len());
        for (index, client) in clients.iter().enumerate() {
            if by_name.insert(client.name().to_string(), index).is_some() {
                warn!(cluster = client.name(), "Duplicate cluster name, lookups see the last one");
            }
        }
        Self {
            clients,
            by_name,
            started: 0,
        }
    }

    pub fn from_config(clusters: &[ClusterConfig]) -> Self {
        Self::new(
            clusters
                .iter()
                .cloned()
                .map(|c| Box::new(KafkaClusterClient::new(c)) as Box<dyn ClusterClient>)
                .collect(),
        )
    }

    pub fn names(&self) -> Vec<&str> {
        self.clients.iter().map(|c| c.name()).collect()
    }

    #[allow(dead_code)] // Lookup for callers that only hold a cluster name
    pub fn get(&self, name: &str) -> Option<&dyn ClusterClient> {
        self.by_name.get(name).map(|&index| self.clients[index].as_ref())
    }

    pub async fn start_all(&mut self, storage: &StorageClient) -> Result<()> {
        for index in self.started..self.clients.len() {
            let client = &mut self.clients[index];
            if let Err(e) = client.start(storage.clone()).await {
                error!(cluster = client.name(), error = %e, "Cluster client failed to start");
                self.stop_all().await;
                return Err(e);
            }
            self.started = index + 1;
        }
        info!(clusters = self.started, "Cluster clients started");
        Ok(())
    }

    pub async fn stop_all(&mut self) {
        for client in self.clients[..self.started].iter_mut().rev() {
            client.stop().await;
        }
        self.started = 0;
    }
}
