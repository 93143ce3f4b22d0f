//! # Kafka score ingestor
//!
//! High-volume ingestion path: JSON score submissions are consumed from one
//! topic, batched, and pushed through the same engine write path as the
//! HTTP API.
//!
//! Offsets are stored as soon as a message has been parsed (valid or not)
//! and committed in the background. Combined with the `latest` starting
//! offset this accepts losing an in-flight batch on a crash instead of ever
//! replaying old traffic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::Message;
use rdkafka::TopicPartitionList;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::configs::KafkaSettings;
use crate::core::LeaderboardService;
use crate::models::{BatchScoreSubmission, ScoreSubmission};

/// Deadline for one engine batch flush.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

struct IngestorContext;

impl ClientContext for IngestorContext {}

impl ConsumerContext for IngestorContext {
    fn pre_rebalance(&self, rebalance: &Rebalance<'_>) {
        log::info!("kafka rebalance starting: {rebalance:?}");
    }

    fn post_rebalance(&self, rebalance: &Rebalance<'_>) {
        log::info!("kafka rebalance completed: {rebalance:?}");
    }

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        if let Err(err) = result {
            log::warn!("kafka offset commit failed: {err}");
        }
    }
}

type IngestorConsumer = StreamConsumer<IngestorContext>;

pub struct ScoreConsumer {
    settings: KafkaSettings,
    service: Arc<LeaderboardService>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl ScoreConsumer {
    pub fn new(settings: KafkaSettings, service: Arc<LeaderboardService>) -> Self {
        Self {
            settings,
            service,
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Start the consumer task. Calling `start` while running is a no-op.
    /// Consumer creation is retried before giving up; a consumer that never
    /// comes up leaves the rest of the service untouched.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }

        log::info!(
            "starting kafka consumer: brokers={:?} topic={} group={}",
            self.settings.brokers,
            self.settings.topic,
            self.settings.group_id
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let settings = self.settings.clone();
        let service = Arc::clone(&self.service);
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::SeqCst);

        let join = tokio::spawn(async move {
            run_consumer(settings, service, stop_rx).await;
            running.store(false, Ordering::SeqCst);
        });

        *task = Some((stop_tx, join));
    }

    /// Stop the consumer, flushing the in-flight batch before returning.
    pub async fn stop(&self) {
        let handle = self.task.lock().await.take();
        if let Some((stop_tx, join)) = handle {
            log::info!("stopping kafka consumer");
            let _ = stop_tx.send(true);
            let _ = join.await;
            log::info!("kafka consumer stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn create_consumer(settings: &KafkaSettings) -> Result<IngestorConsumer, KafkaError> {
    ClientConfig::new()
        .set("group.id", &settings.group_id)
        .set("bootstrap.servers", settings.brokers.join(","))
        .set("auto.offset.reset", "latest")
        .set("enable.auto.commit", "true")
        // Offsets are stored explicitly, per message, once parsed.
        .set("enable.auto.offset.store", "false")
        .set("enable.partition.eof", "false")
        .create_with_context(IngestorContext)
}

async fn run_consumer(
    settings: KafkaSettings,
    service: Arc<LeaderboardService>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let consumer = match connect_with_retries(&settings, &mut stop_rx).await {
        Some(consumer) => consumer,
        None => return,
    };

    if let Err(err) = consumer.subscribe(&[settings.topic.as_str()]) {
        log::error!("failed to subscribe to {}: {err}", settings.topic);
        return;
    }
    log::info!("kafka consumer ready on topic {}", settings.topic);

    let mut batch: Vec<ScoreSubmission> = Vec::with_capacity(settings.batch_size);
    let mut flush_deadline = tokio::time::Instant::now() + settings.batch_timeout;

    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                flush_batch(&service, &mut batch).await;
                break;
            }
            _ = tokio::time::sleep_until(flush_deadline) => {
                flush_batch(&service, &mut batch).await;
                flush_deadline = tokio::time::Instant::now() + settings.batch_timeout;
            }
            result = consumer.recv() => match result {
                Ok(message) => {
                    if let Some(submission) = parse_submission(message.payload()) {
                        batch.push(submission);
                    }
                    // Parsed means consumed, whether or not it was usable.
                    if let Err(err) = consumer.store_offset_from_message(&message) {
                        log::warn!("failed to store offset: {err}");
                    }
                    if batch.len() >= settings.batch_size {
                        flush_batch(&service, &mut batch).await;
                        flush_deadline = tokio::time::Instant::now() + settings.batch_timeout;
                    }
                }
                Err(err) => log::error!("kafka receive error: {err}"),
            }
        }
    }
}

async fn connect_with_retries(
    settings: &KafkaSettings,
    stop_rx: &mut watch::Receiver<bool>,
) -> Option<IngestorConsumer> {
    let attempts = settings.retry_attempts.max(1);
    for attempt in 1..=attempts {
        match create_consumer(settings) {
            Ok(consumer) => return Some(consumer),
            Err(err) if attempt < attempts => {
                log::warn!(
                    "kafka consumer creation failed (attempt {attempt}/{attempts}): {err}"
                );
                tokio::select! {
                    _ = stop_rx.changed() => return None,
                    _ = tokio::time::sleep(settings.retry_delay) => {}
                }
            }
            Err(err) => {
                log::error!("kafka consumer creation failed, giving up: {err}");
                return None;
            }
        }
    }
    None
}

/// Decode one queue message. Anything unusable is logged and dropped; the
/// caller still marks it consumed.
fn parse_submission(payload: Option<&[u8]>) -> Option<ScoreSubmission> {
    let payload = match payload {
        Some(payload) => payload,
        None => {
            log::warn!("dropping queue message with empty payload");
            return None;
        }
    };
    let submission: ScoreSubmission = match serde_json::from_slice(payload) {
        Ok(submission) => submission,
        Err(err) => {
            log::warn!("dropping malformed queue message: {err}");
            return None;
        }
    };
    if !submission.is_valid() {
        log::warn!(
            "dropping queue message with missing ids (player={:?} leaderboard={:?})",
            submission.player_id,
            submission.leaderboard_id
        );
        return None;
    }
    Some(submission)
}

async fn flush_batch(service: &LeaderboardService, batch: &mut Vec<ScoreSubmission>) {
    if batch.is_empty() {
        return;
    }
    let scores = std::mem::take(batch);
    let size = scores.len();

    match tokio::time::timeout(
        FLUSH_TIMEOUT,
        service.submit_batch(BatchScoreSubmission { scores }),
    )
    .await
    {
        Ok(outcome) if outcome.failed > 0 => log::warn!(
            "processed batch of {size}: {} submitted, {} failed",
            outcome.submitted,
            outcome.failed
        ),
        Ok(_) => log::debug!("processed batch of {size}"),
        Err(_) => log::error!("batch of {size} timed out after {FLUSH_TIMEOUT:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_message_parses() {
        let payload = br#"{"player_id":"p1","leaderboard_id":"global","score":1500,"game_id":"m1"}"#;
        let submission = parse_submission(Some(payload)).expect("should parse");
        assert_eq!(submission.player_id, "p1");
        assert_eq!(submission.leaderboard_id, "global");
        assert_eq!(submission.score, 1500);
        assert_eq!(submission.game_id.as_deref(), Some("m1"));
    }

    #[test]
    fn metadata_is_passed_through() {
        let payload = br#"{"player_id":"p1","leaderboard_id":"g","score":1,"metadata":{"map":"dust"}}"#;
        let submission = parse_submission(Some(payload)).unwrap();
        assert_eq!(submission.metadata.unwrap()["map"], "dust");
    }

    #[test]
    fn unusable_messages_are_dropped() {
        assert!(parse_submission(None).is_none());
        assert!(parse_submission(Some(b"not json")).is_none());
        assert!(parse_submission(Some(br#"{"score":1}"#)).is_none());
        // Present but empty ids are as unroutable as missing ones.
        assert!(
            parse_submission(Some(br#"{"player_id":"","leaderboard_id":"g","score":1}"#)).is_none()
        );
        assert!(
            parse_submission(Some(br#"{"player_id":"p","leaderboard_id":"","score":1}"#)).is_none()
        );
    }
}
