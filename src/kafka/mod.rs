pub mod client;
pub mod offsets_topic;

pub use client::KafkaClusterClient;
