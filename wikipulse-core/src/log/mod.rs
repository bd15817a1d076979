//! Partitioned log plumbing: the batched producer that decouples
//! ingestion from processing, and the per-detector consumer.

pub mod consumer;
pub mod producer;

pub use consumer::EditConsumer;
pub use producer::{BatchSink, EditProducer, KafkaSink, ProduceOutcome, ProducerTuning};
