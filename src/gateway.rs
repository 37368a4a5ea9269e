//! Request/response access to the storage task.
//!
//! Every query carries a oneshot reply channel and is bounded by a timeout, so callers
//! never block on a busy or dead engine. Writes are fire-and-forget.

use crate::storage::status::ConsumerGroupStatus;
use crate::storage::{BrokerOffsetState, HighWaterMark, OffsetCommit, StorageRequest};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{trace, warn};

/// Result of a storage query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome<T> {
    Found(T),
    /// The engine answered: the cluster, group or topic has no data.
    NotFound,
    /// No answer within the request timeout.
    TimedOut,
}

impl<T> QueryOutcome<T> {
    #[cfg(test)]
    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::NotFound | Self::TimedOut => None,
        }
    }

    pub const fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

#[derive(Clone)]
pub struct StorageClient {
    sender: mpsc::UnboundedSender<StorageRequest>,
    timeout: Duration,
}

impl StorageClient {
    pub fn new(sender: mpsc::UnboundedSender<StorageRequest>, timeout: Duration) -> Self {
        Self { sender, timeout }
    }

    pub fn record_offset(&self, commit: OffsetCommit) {
        if self.sender.send(StorageRequest::RecordOffset(commit)).is_err() {
            trace!("Storage stopped, dropping offset commit");
        }
    }

    pub fn record_high_water_mark(&self, hwm: HighWaterMark) {
        if self
            .sender
            .send(StorageRequest::RecordHighWaterMark(hwm))
            .is_err()
        {
            trace!("Storage stopped, dropping high-water mark");
        }
    }

    pub async fn list_consumer_groups(&self, cluster: &str) -> QueryOutcome<Vec<String>> {
        let cluster = cluster.to_string();
        self.query("list_consumer_groups", |reply| {
            StorageRequest::ListConsumerGroups { cluster, reply }
        })
        .await
    }

    pub async fn consumer_group_status(
        &self,
        cluster: &str,
        group: &str,
        show_all: bool,
    ) -> QueryOutcome<ConsumerGroupStatus> {
        let cluster = cluster.to_string();
        let group = group.to_string();
        self.query("consumer_group_status", |reply| {
            StorageRequest::GetConsumerGroupStatus {
                cluster,
                group,
                show_all,
                reply,
            }
        })
        .await
    }

    pub async fn list_topics(&self, cluster: &str) -> QueryOutcome<Vec<String>> {
        let cluster = cluster.to_string();
        self.query("list_topics", |reply| StorageRequest::ListTopics {
            cluster,
            reply,
        })
        .await
    }

    pub async fn topic_offsets(
        &self,
        cluster: &str,
        topic: &str,
    ) -> QueryOutcome<Vec<BrokerOffsetState>> {
        let cluster = cluster.to_string();
        let topic = topic.to_string();
        self.query("topic_offsets", |reply| StorageRequest::GetTopicOffsets {
            cluster,
            topic,
            reply,
        })
        .await
    }

    async fn query<T>(
        &self,
        operation: &'static str,
        build: impl FnOnce(oneshot::Sender<Option<T>>) -> StorageRequest,
    ) -> QueryOutcome<T> {
        let (reply, response) = oneshot::channel();
        if self.sender.send(build(reply)).is_err() {
            warn!(operation, "Storage mailbox closed");
            return QueryOutcome::TimedOut;
        }

        match tokio::time::timeout(self.timeout, response).await {
            Ok(Ok(Some(value))) => QueryOutcome::Found(value),
            Ok(Ok(None)) => QueryOutcome::NotFound,
            Ok(Err(_)) => {
                warn!(operation, "Storage dropped the request without answering");
                QueryOutcome::TimedOut
            }
            Err(_) => {
                warn!(
                    operation,
                    timeout = ?self.timeout,
                    "Storage request timed out"
                );
                QueryOutcome::TimedOut
            }
        }
    }
}
