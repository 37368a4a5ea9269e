//! Offset storage: a single task owns every observation window and every broker
//! offset, and all reads and writes reach it as messages on one mailbox.

pub mod engine;
pub mod evaluator;
pub mod ring;
pub mod status;

use crate::storage::status::ConsumerGroupStatus;
use serde::Serialize;
use tokio::sync::oneshot;

pub use engine::OffsetStorage;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

/// A committed offset reported for a consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetCommit {
    pub cluster: String,
    pub group: String,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp_ms: i64,
}

/// Newest broker-reported end offset for a partition. Overwritten on every poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerOffsetState {
    pub topic: String,
    pub partition: i32,
    pub high_water_mark: i64,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighWaterMark {
    pub cluster: String,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp_ms: i64,
}

/// Messages accepted by the storage task. Queries carry their own reply channel;
/// `None` in a reply means the cluster, group or topic is unknown.
#[derive(Debug)]
pub enum StorageRequest {
    RecordOffset(OffsetCommit),
    RecordHighWaterMark(HighWaterMark),
    ListConsumerGroups {
        cluster: String,
        reply: oneshot::Sender<Option<Vec<String>>>,
    },
    GetConsumerGroupStatus {
        cluster: String,
        group: String,
        show_all: bool,
        reply: oneshot::Sender<Option<ConsumerGroupStatus>>,
    },
    ListTopics {
        cluster: String,
        reply: oneshot::Sender<Option<Vec<String>>>,
    },
    GetTopicOffsets {
        cluster: String,
        topic: String,
        reply: oneshot::Sender<Option<Vec<BrokerOffsetState>>>,
    },
}
