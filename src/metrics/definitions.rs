pub const METRIC_LAG: &str = "kafka_lag";
pub const METRIC_LAG_TOTAL: &str = "kafka_lag_total";
pub const METRIC_OFFSET: &str = "kafka_offset";

pub const LABEL_CLUSTER: &str = "cluster";
pub const LABEL_CONSUMER_GROUP: &str = "consumer_group";
pub const LABEL_PARTITION: &str = "partition";
pub const LABEL_TOPIC: &str = "topic";

/// Label names of the per-partition gauges, in exposition order.
pub const PARTITION_LABELS: &[&str] = &[
    LABEL_CLUSTER,
    LABEL_CONSUMER_GROUP,
    LABEL_PARTITION,
    LABEL_TOPIC,
];
pub const GROUP_LABELS: &[&str] = &[LABEL_CLUSTER, LABEL_CONSUMER_GROUP];

pub const HELP_LAG: &str =
    "Gauge of lag (messages produced - messages consumed) for a Kafka consumer group";
pub const HELP_LAG_TOTAL: &str =
    "Gauge of total lag (messages produced - messages consumed) for a Kafka consumer group";
pub const HELP_OFFSET: &str = "Gauge of offset for a Kafka consumer group";
