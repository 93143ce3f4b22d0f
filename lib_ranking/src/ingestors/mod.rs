//! Ingestion of score submissions from external streams.

pub mod queue_kafka;

pub use queue_kafka::ScoreConsumer;
