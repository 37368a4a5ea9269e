//! Alerting on consumer group status changes.

pub mod dispatcher;
pub mod log;
pub mod webhook;

use crate::config::NotifyConfig;
use crate::error::Result;
use crate::storage::status::{ConsumerGroupStatus, PartitionState, PartitionStatus};
use serde::Serialize;

pub use dispatcher::NotificationDispatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    /// Status differs from the last one sent.
    Transition,
    /// Status unchanged and still at or above threshold.
    Reminder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub cluster: String,
    pub group: String,
    pub status: PartitionState,
    pub previous: Option<PartitionState>,
    pub kind: NotificationKind,
    pub timestamp_ms: i64,
    pub total_lag: i64,
    /// Partitions not in `OK` state.
    pub partitions: Vec<PartitionStatus>,
}

impl Notification {
    pub fn new(
        status: &ConsumerGroupStatus,
        previous: Option<PartitionState>,
        kind: NotificationKind,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            cluster: status.cluster.clone(),
            group: status.group.clone(),
            status: status.status,
            previous,
            kind,
            timestamp_ms,
            total_lag: status.total_lag,
            partitions: status
                .partitions
                .iter()
                .filter(|p| !p.status.is_healthy())
                .cloned()
                .collect(),
        }
    }
}

/// A destination for notifications.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    /// Lowest status this notifier reports.
    fn threshold(&self) -> PartitionState;

    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Build every notifier enabled in the configuration.
pub fn build_notifiers(config: &NotifyConfig) -> Result<Vec<Box<dyn Notifier>>> {
    let mut notifiers: Vec<Box<dyn Notifier>> = Vec::new();
    if config.log.enabled {
        notifiers.push(Box::new(log::LogNotifier::new(config.log.threshold)));
    }
    for webhook in &config.webhooks {
        notifiers.push(Box::new(webhook::WebhookNotifier::new(webhook)?));
    }
    Ok(notifiers)
}
