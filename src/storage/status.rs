use serde::{Deserialize, Serialize};
use std::fmt;

/// Health classification of a partition or group, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartitionState {
    /// Fewer than two observations; nothing can be said yet.
    Unknown,
    Ok,
    /// The partition's high-water mark stopped moving (producer idle).
    Stall,
    /// Behind and not catching up, but still committing.
    Warn,
    /// Committed offset stuck while new data keeps arriving.
    Error,
    /// No commits for longer than the stop threshold while lagging.
    Stop,
    /// Committed offset moved backwards inside the window.
    Rewind,
}

impl PartitionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Ok => "OK",
            Self::Stall => "STALL",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Stop => "STOP",
            Self::Rewind => "REWIND",
        }
    }

    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for PartitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionStatus {
    pub topic: String,
    pub partition: i32,
    pub status: PartitionState,
    pub current_lag: i64,
    pub current_offset: i64,
    pub current_high_water_mark: i64,
    /// Broker reported an end offset below the committed offset.
    pub stale_high_water_mark: bool,
    pub last_commit_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerGroupStatus {
    pub cluster: String,
    pub group: String,
    pub status: PartitionState,
    pub total_lag: i64,
    pub partition_count: usize,
    pub max_lag: Option<PartitionStatus>,
    pub partitions: Vec<PartitionStatus>,
}

impl ConsumerGroupStatus {
    /// Aggregate evaluated partitions. Totals cover every partition; `show_all = false`
    /// drops healthy partitions from the returned list only.
    pub fn from_partitions(
        cluster: &str,
        group: &str,
        mut partitions: Vec<PartitionStatus>,
        show_all: bool,
    ) -> Self {
        partitions.sort_by(|a, b| (&a.topic, a.partition).cmp(&(&b.topic, b.partition)));

        let status = partitions
            .iter()
            .map(|p| p.status)
            .max()
            .unwrap_or(PartitionState::Unknown);
        let total_lag = partitions.iter().map(|p| p.current_lag).sum();
        let max_lag = partitions
            .iter()
            .filter(|p| p.current_lag > 0)
            .max_by_key(|p| p.current_lag)
            .cloned();
        let partition_count = partitions.len();

        if !show_all {
            partitions.retain(|p| !p.status.is_healthy());
        }

        Self {
            cluster: cluster.to_string(),
            group: group.to_string(),
            status,
            total_lag,
            partition_count,
            max_lag,
            partitions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition(topic: &str, partition: i32, status: PartitionState, lag: i64) -> PartitionStatus {
        PartitionStatus {
            topic: topic.to_string(),
            partition,
            status,
            current_lag: lag,
            current_offset: 1000,
            current_high_water_mark: 1000 + lag,
            stale_high_water_mark: false,
            last_commit_ms: 0,
        }
    }

    #[test]
    fn test_severity_order() {
        assert!(PartitionState::Unknown < PartitionState::Ok);
        assert!(PartitionState::Ok < PartitionState::Stall);
        assert!(PartitionState::Stall < PartitionState::Warn);
        assert!(PartitionState::Warn < PartitionState::Error);
        assert!(PartitionState::Error < PartitionState::Stop);
        assert!(PartitionState::Stop < PartitionState::Rewind);
    }

    #[test]
    fn test_total_lag_sums_partitions() {
        let status = ConsumerGroupStatus::from_partitions(
            "prod",
            "billing",
            vec![
                partition("orders", 0, PartitionState::Warn, 5),
                partition("orders", 1, PartitionState::Warn, 10),
            ],
            true,
        );
        assert_eq!(status.total_lag, 15);
        assert_eq!(status.status, PartitionState::Warn);
        assert_eq!(status.max_lag.unwrap().partition, 1);
    }

    #[test]
    fn test_worst_partition_dominates() {
        let status = ConsumerGroupStatus::from_partitions(
            "prod",
            "billing",
            vec![
                partition("orders", 0, PartitionState::Ok, 0),
                partition("orders", 1, PartitionState::Rewind, 3),
                partition("orders", 2, PartitionState::Error, 40),
            ],
            true,
        );
        assert_eq!(status.status, PartitionState::Rewind);
    }

    #[test]
    fn test_hide_healthy_keeps_totals() {
        let status = ConsumerGroupStatus::from_partitions(
            "prod",
            "billing",
            vec![
                partition("orders", 0, PartitionState::Ok, 2),
                partition("orders", 1, PartitionState::Error, 40),
            ],
            false,
        );
        assert_eq!(status.partitions.len(), 1);
        assert_eq!(status.partitions[0].partition, 1);
        assert_eq!(status.partition_count, 2);
        assert_eq!(status.total_lag, 42);
    }

    #[test]
    fn test_empty_group_is_unknown() {
        let status = ConsumerGroupStatus::from_partitions("prod", "idle", Vec::new(), true);
        assert_eq!(status.status, PartitionState::Unknown);
        assert_eq!(status.total_lag, 0);
        assert!(status.max_lag.is_none());
    }

    #[test]
    fn test_state_serializes_uppercase() {
        let json = serde_json::to_string(&PartitionState::Rewind).unwrap();
        assert_eq!(json, "\"REWIND\"");
        let parsed: PartitionState = serde_json::from_str("\"STALL\"").unwrap();
        assert_eq!(parsed, PartitionState::Stall);
    }
}
