use thiserror::Error;

#[derive(Error, Debug)]
pub enum LagwatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Coordination error: {0}")]
    Coordination(String),

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("HTTP server error: {0}")]
    Http(String),

    #[error("Channel error: {0}")]
    Channel(String),
}

pub type Result<T> = std::result::Result<T, LagwatchError>;
