use crate::gateway::{QueryOutcome, StorageClient};
use crate::lifecycle::shutdown_requested;
use crate::metrics::definitions::{
    GROUP_LABELS, HELP_LAG, HELP_LAG_TOTAL, HELP_OFFSET, METRIC_LAG, METRIC_LAG_TOTAL,
    METRIC_OFFSET, PARTITION_LABELS,
};
use crate::metrics::registry::GaugeRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument};

/// Make a cluster or group name safe as a label value on existing dashboards:
/// `-` becomes `_`, then everything outside `[A-Za-z0-9_]` is dropped.
pub fn sanitize_label(value: &str) -> String {
    value
        .replace('-', "_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Periodically publishes lag and offset gauges for every known group.
pub struct MetricsExporter {
    storage: StorageClient,
    clusters: Vec<String>,
    registry: Arc<GaugeRegistry>,
    interval: Duration,
}

impl MetricsExporter {
    pub fn new(
        storage: StorageClient,
        clusters: Vec<String>,
        registry: Arc<GaugeRegistry>,
        interval: Duration,
    ) -> Self {
        Self {
            storage,
            clusters,
            registry,
            interval,
        }
    }

    #[instrument(skip_all, name = "metrics_exporter")]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval = ?self.interval, "Metrics exporter started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {
                    let groups = self.export_once().await;
                    debug!(groups, gauges = self.registry.len(), "Metrics updated");
                }
            }
        }
    }

    /// Refresh gauges from storage. Returns the number of groups exported.
    pub async fn export_once(&self) -> usize {
        let lag = self.registry.gauge(METRIC_LAG, HELP_LAG, PARTITION_LABELS);
        let lag_total = self
            .registry
            .gauge(METRIC_LAG_TOTAL, HELP_LAG_TOTAL, GROUP_LABELS);
        let offset = self
            .registry
            .gauge(METRIC_OFFSET, HELP_OFFSET, PARTITION_LABELS);

        let mut exported = 0;
        for cluster in &self.clusters {
            let QueryOutcome::Found(groups) = self.storage.list_consumer_groups(cluster).await
            else {
                continue;
            };
            let cluster_label = sanitize_label(cluster);

            for group in groups {
                let QueryOutcome::Found(status) =
                    self.storage.consumer_group_status(cluster, &group, true).await
                else {
                    continue;
                };
                let group_label = sanitize_label(&group);

                lag_total.set(&[&cluster_label, &group_label], status.total_lag as f64);
                for partition in &status.partitions {
                    let partition_label = partition.partition.to_string();
                    let labels = [
                        cluster_label.as_str(),
                        group_label.as_str(),
                        partition_label.as_str(),
                        partition.topic.as_str(),
                    ];
                    lag.set(&labels, partition.current_lag as f64);
                    offset.set(&labels, partition.current_offset as f64);
                }
                exported += 1;
            }
        }
        exported
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::storage::{HighWaterMark, OffsetCommit, OffsetStorage};
    use crate::test_strategies::strategies::{arb_cluster_name, arb_group_id, arb_label_input};
    use proptest::prelude::*;

    #[test]
    fn test_sanitize_label() {
        assert_eq!(sanitize_label("my-cluster!"), "my_cluster");
        assert_eq!(sanitize_label("billing.consumers-v2"), "billingconsumers_v2");
        assert_eq!(sanitize_label("already_clean_01"), "already_clean_01");
        assert_eq!(sanitize_label("ümlaut"), "mlaut");
        assert_eq!(sanitize_label(""), "");
    }

    #[tokio::test]
    async fn test_export_publishes_three_gauges() {
        let config = StorageConfig {
            min_distance: Duration::ZERO,
            stop_threshold: Duration::ZERO,
            ..StorageConfig::default()
        };
        let storage = OffsetStorage::start(&config, &["prod-eu".to_string()]).unwrap();
        let client = storage.client();

        for (partition, hwm) in [(0, 105), (1, 210)] {
            client.record_high_water_mark(HighWaterMark {
                cluster: "prod-eu".to_string(),
                topic: "orders".to_string(),
                partition,
                offset: hwm,
                timestamp_ms: 1,
            });
            client.record_offset(OffsetCommit {
                cluster: "prod-eu".to_string(),
                group: "billing-app".to_string(),
                topic: "orders".to_string(),
                partition,
                offset: hwm - 5 * (partition as i64 + 1),
                timestamp_ms: 1000,
            });
        }

        let registry = Arc::new(GaugeRegistry::new());
        let exporter = MetricsExporter::new(
            client,
            vec!["prod-eu".to_string()],
            Arc::clone(&registry),
            Duration::from_secs(5),
        );
        assert_eq!(exporter.export_once().await, 1);
        // second cycle reuses the registered gauges
        assert_eq!(exporter.export_once().await, 1);
        assert_eq!(registry.len(), 3);

        let total = registry.get(METRIC_LAG_TOTAL).unwrap();
        assert_eq!(total.get(&["prod_eu", "billing_app"]), Some(15.0));

        let lag = registry.get(METRIC_LAG).unwrap();
        assert_eq!(lag.get(&["prod_eu", "billing_app", "1", "orders"]), Some(10.0));

        let offset = registry.get(METRIC_OFFSET).unwrap();
        assert_eq!(offset.get(&["prod_eu", "billing_app", "0", "orders"]), Some(100.0));

        let text = registry.render_prometheus();
        assert!(text.contains(
            "kafka_offset{cluster=\"prod_eu\",consumer_group=\"billing_app\",partition=\"1\",topic=\"orders\"} 200"
        ));

        storage.stop().await;
    }

    proptest! {
        #[test]
        fn prop_sanitize_idempotent(input in arb_label_input()) {
            let once = sanitize_label(&input);
            prop_assert_eq!(sanitize_label(&once), once.clone());
            prop_assert!(once.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        }

        #[test]
        fn prop_sanitize_keeps_valid_names(cluster in arb_cluster_name(), group in arb_group_id()) {
            // only '-' and '.' are rewritten for typical names
            prop_assert_eq!(sanitize_label(&cluster), cluster.replace('-', "_"));
            prop_assert_eq!(sanitize_label(&group), group.replace('-', "_").replace('.', ""));
        }
    }
}
