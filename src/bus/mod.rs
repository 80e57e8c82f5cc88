//! Bus Adapter: binds to four topic exchanges — `commands` (inbound),
//! `copy_trade_events` (outbound), `notifications` (outbound), `dead_letter`
//! (terminal) — and their durable queues.
//!
//! No AMQP crate is available in this stack, so the exchange/queue/binding
//! model is expressed on top of `rdkafka`: an exchange
//! becomes a topic, a routing key becomes the record key plus a header (so
//! it survives a round trip through `dead_letter`), and a queue becomes an
//! independent consumer group reading the bound topic and filtering locally
//! via `canHandle` — Kafka fans the full topic out to every consumer group
//! the same way a topic exchange fans out to every bound queue.

mod topology;

pub use topology::*;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{AppError, AppResult};

/// One message in flight on the bus. `retry_count` travels in the Kafka
/// header `x-retry-count` so a republish after a failed handler carries it
/// forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub retry_count: u32,
}

/// A capability-dispatched consumer handler. The first registered handler
/// whose `can_handle` returns true is invoked; if none match, the message
/// is acked with a warning to avoid poison-pill redelivery loops.
#[async_trait]
pub trait BusHandler: Send + Sync {
    fn can_handle(&self, message: &BusMessage) -> bool;
    async fn handle(&self, message: &BusMessage) -> AppResult<()>;
}

#[derive(Clone)]
pub struct BusAdapter {
    producer: FutureProducer,
    config: Arc<Config>,
}

impl BusAdapter {
    pub fn connect(config: Arc<Config>) -> AppResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.bus.bootstrap_servers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .set("retries", "3")
            .create()
            .map_err(|e| AppError::BusError(format!("failed to create producer: {e}")))?;

        Ok(Self { producer, config })
    }

    /// Whether a broker address was actually configured, for the health
    /// endpoint's per-component reporting. The producer handle itself is
    /// always constructible offline (librdkafka connects lazily), so this
    /// is a configuration check rather than a live reachability probe.
    pub fn is_configured(&self) -> bool {
        !self.config.bus.bootstrap_servers.is_empty()
    }

    fn topic_name(&self, exchange: &str) -> String {
        self.config.namespaced(exchange)
    }

    /// Publishes one message to the named exchange under `routing_key`.
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &serde_json::Value,
    ) -> AppResult<()> {
        self.publish_with_retry_count(exchange, routing_key, payload, 0).await
    }

    /// Publishes directly to a caller-named queue rather than one of the
    /// four fixed exchanges — used for RPC replies, where the destination
    /// (`replyTo`) is supplied per-request rather than fixed at startup.
    pub async fn publish_direct(&self, queue: &str, key: &str, payload: &serde_json::Value) -> AppResult<()> {
        self.publish_with_retry_count(queue, key, payload, 0).await
    }

    async fn publish_with_retry_count(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &serde_json::Value,
        retry_count: u32,
    ) -> AppResult<()> {
        let topic = self.topic_name(exchange);
        let body = serde_json::to_string(payload)?;

        let record = FutureRecord::to(&topic)
            .key(routing_key)
            .payload(&body)
            .headers(
                rdkafka::message::OwnedHeaders::new()
                    .insert(rdkafka::message::Header {
                        key: "x-routing-key",
                        value: Some(routing_key),
                    })
                    .insert(rdkafka::message::Header {
                        key: "x-retry-count",
                        value: Some(&retry_count.to_string()),
                    }),
            );

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| AppError::BusError(format!("publish to {topic} failed: {e}")))?;

        Ok(())
    }

    /// Publishes a terminal message to the dead-letter exchange with the
    /// catch-all routing key `failed`.
    pub async fn dead_letter(&self, original: &BusMessage) -> AppResult<()> {
        let payload = serde_json::to_value(original)?;
        self.publish(EXCHANGE_DEAD_LETTER, "failed", &payload).await
    }

    /// Runs one queue's consumer loop: subscribes `group_id` to the topic
    /// bound to `exchange`, and for every delivered message walks the
    /// handler list in order, invoking the first whose `can_handle` passes.
    /// Implements the received → routed → handler-invoked → acked /
    /// retry-scheduled / dead-lettered state machine.
    pub async fn consume(
        &self,
        queue: &QueueBinding,
        handlers: Vec<Arc<dyn BusHandler>>,
    ) -> AppResult<()> {
        self.consume_queue(queue.name, queue.exchange, handlers).await
    }

    /// Consumes a queue whose topic isn't one of the four fixed exchanges —
    /// the RPC query surface's reply queue (`config.rpc.queue_name`) is named
    /// at runtime from config rather than fixed in `topology`, so it can't be
    /// expressed as a `&'static QueueBinding`.
    pub async fn consume_direct(
        &self,
        queue_name: &str,
        topic_name: &str,
        handlers: Vec<Arc<dyn BusHandler>>,
    ) -> AppResult<()> {
        self.consume_queue(queue_name, topic_name, handlers).await
    }

    async fn consume_queue(
        &self,
        queue_name: &str,
        exchange_or_topic: &str,
        handlers: Vec<Arc<dyn BusHandler>>,
    ) -> AppResult<()> {
        let mut attempt = 0u32;
        loop {
            match self.run_consumer_once(queue_name, exchange_or_topic, &handlers).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    attempt += 1;
                    if attempt > self.config.bus.reconnect_max_attempts {
                        tracing::error!(
                            queue = queue_name,
                            error = %err,
                            "bus consumer exhausted reconnect attempts, exiting"
                        );
                        return Err(err);
                    }
                    let delay = reconnect_delay(
                        attempt,
                        self.config.bus.reconnect_base_delay_ms,
                        self.config.bus.reconnect_max_delay_ms,
                    );
                    tracing::warn!(queue = queue_name, attempt, delay_ms = delay.as_millis() as u64, error = %err, "bus consumer disconnected, reconnecting");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn run_consumer_once(
        &self,
        queue_name: &str,
        exchange_or_topic: &str,
        handlers: &[Arc<dyn BusHandler>],
    ) -> AppResult<()> {
        use futures::StreamExt;

        let group_id = self.config.namespaced(&format!(
            "{}-{}",
            self.config.bus.consumer_group_id, queue_name
        ));
        let topic = self.topic_name(exchange_or_topic);

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.bus.bootstrap_servers)
            .set("group.id", &group_id)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "latest")
            .create()
            .map_err(|e| AppError::BusError(format!("failed to create consumer: {e}")))?;

        consumer
            .subscribe(&[&topic])
            .map_err(|e| AppError::BusError(format!("subscribe to {topic} failed: {e}")))?;

        let mut stream = consumer.stream();
        while let Some(delivery) = stream.next().await {
            let kafka_message = match delivery {
                Ok(m) => m,
                Err(e) => {
                    tracing::error!(queue = queue_name, error = %e, "bus delivery error");
                    continue;
                }
            };

            let Some(payload) = kafka_message.payload() else {
                continue;
            };
            let routing_key = header_value(&kafka_message, "x-routing-key")
                .unwrap_or_else(|| kafka_message.key_view::<str>().and_then(Result::ok).unwrap_or("").to_string());
            let retry_count: u32 = header_value(&kafka_message, "x-retry-count")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);

            let message = match serde_json::from_slice::<serde_json::Value>(payload) {
                Ok(body) => BusMessage {
                    exchange: exchange_or_topic.to_string(),
                    routing_key,
                    payload: body,
                    retry_count,
                },
                Err(e) => {
                    tracing::error!(queue = queue_name, error = %e, "undeserializable bus payload, dropping");
                    continue;
                }
            };

            self.route_and_handle(queue_name, handlers, message).await;
        }

        Ok(())
    }

    async fn route_and_handle(
        &self,
        queue_name: &str,
        handlers: &[Arc<dyn BusHandler>],
        message: BusMessage,
    ) {
        let Some(handler) = handlers.iter().find(|h| h.can_handle(&message)) else {
            tracing::warn!(queue = queue_name, routing_key = %message.routing_key, "no handler matched, acking to avoid poison-pill redelivery");
            return;
        };

        let timeout = Duration::from_millis(self.config.bus.processing_timeout_ms);
        let outcome = tokio::time::timeout(timeout, handler.handle(&message)).await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => self.on_handler_failure(queue_name, message, err.to_string()).await,
            Err(_) => self.on_handler_failure(queue_name, message, "processing timed out".to_string()).await,
        }
    }

    async fn on_handler_failure(&self, queue_name: &str, message: BusMessage, reason: String) {
        if message.retry_count >= self.config.bus.retry_attempts {
            tracing::error!(queue = queue_name, reason, "retries exhausted, dead-lettering");
            if let Err(err) = self.dead_letter(&message).await {
                tracing::error!(queue = queue_name, error = %err, "failed to publish to dead letter");
            }
            return;
        }

        let delay = Duration::from_millis(
            self.config.bus.retry_base_delay_ms * 2u64.pow(message.retry_count),
        );
        tracing::warn!(queue = queue_name, reason, retry_count = message.retry_count, delay_ms = delay.as_millis() as u64, "scheduling retry");
        tokio::time::sleep(delay).await;

        if let Err(err) = self
            .publish_with_retry_count(
                &message.exchange,
                &message.routing_key,
                &message.payload,
                message.retry_count + 1,
            )
            .await
        {
            tracing::error!(queue = queue_name, error = %err, "failed to republish retry, dead-lettering");
            let _ = self.dead_letter(&message).await;
        }
    }
}

fn header_value(message: &rdkafka::message::BorrowedMessage<'_>, key: &str) -> Option<String> {
    let headers = message.headers()?;
    for i in 0..headers.count() {
        let header = headers.get(i);
        if header.key == key {
            return header.value.map(|v| String::from_utf8_lossy(v).to_string());
        }
    }
    None
}

fn reconnect_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let scaled = base_ms.saturating_mul(1u64 << attempt.min(20));
    Duration::from_millis(scaled.min(max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_is_capped() {
        assert_eq!(reconnect_delay(1, 1000, 30_000), Duration::from_millis(2000));
        assert_eq!(reconnect_delay(10, 1000, 30_000), Duration::from_millis(30_000));
    }
}
