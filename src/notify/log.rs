use super::{Notification, NotificationKind, Notifier};
use crate::error::Result;
use crate::storage::status::PartitionState;
use tracing::{info, warn};

/// Writes notifications to the process log.
pub struct LogNotifier {
    threshold: PartitionState,
}

impl LogNotifier {
    pub fn new(threshold: PartitionState) -> Self {
        Self { threshold }
    }
}

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn threshold(&self) -> PartitionState {
        self.threshold
    }

    async fn notify(&self, notification: &Notification) -> Result<()> {
        let previous = notification.previous.map_or("NONE", |p| p.as_str());
        let worst = notification
            .partitions
            .iter()
            .max_by_key(|p| (p.status, p.current_lag))
            .map(|p| format!("{}:{}", p.topic, p.partition));

        if notification.status >= self.threshold {
            warn!(
                cluster = %notification.cluster,
                group = %notification.group,
                status = %notification.status,
                previous,
                total_lag = notification.total_lag,
                reminder = notification.kind == NotificationKind::Reminder,
                worst_partition = ?worst,
                "Consumer group unhealthy"
            );
        } else {
            info!(
                cluster = %notification.cluster,
                group = %notification.group,
                status = %notification.status,
                previous,
                total_lag = notification.total_lag,
                "Consumer group recovered"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let notifier = LogNotifier::new(PartitionState::Warn);
        let notification = Notification {
            cluster: "prod".to_string(),
            group: "billing".to_string(),
            status: PartitionState::Ok,
            previous: Some(PartitionState::Error),
            kind: NotificationKind::Transition,
            timestamp_ms: 0,
            total_lag: 0,
            partitions: Vec::new(),
        };
        assert!(notifier.notify(&notification).await.is_ok());
        assert_eq!(notifier.name(), "log");
    }
}
