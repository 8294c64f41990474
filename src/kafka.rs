use crate::config::AppConfig;
use crate::directory::TransitDirectory;
use crate::processor::position_processor;
use crate::store::TransitStore;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Backoff before retrying `recv` after a broker error.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Counts consecutive receive failures; once `threshold` is reached the
/// consumer pauses for `cooldown` before trying again.
#[derive(Debug)]
struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    failures: u32,
}

impl CircuitBreaker {
    fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            failures: 0,
        }
    }

    fn record_success(&mut self) {
        self.failures = 0;
    }

    /// Returns true when this failure trips the breaker.
    fn record_failure(&mut self) -> bool {
        self.failures = self.failures.saturating_add(1);
        self.failures >= self.threshold
    }

    async fn cool_down(&mut self) {
        warn!(
            "Circuit breaker tripped after {} consecutive failures, pausing {}s",
            self.failures,
            self.cooldown.as_secs()
        );
        tokio::time::sleep(self.cooldown).await;
        self.failures = 0;
        info!("Circuit breaker reset, resuming consumption");
    }
}

fn consumer_config(config: &AppConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_bootstrap_servers)
        .set("group.id", &config.kafka_group_id)
        .set("auto.offset.reset", &config.kafka_auto_offset_reset)
        .set("security.protocol", &config.kafka_security_protocol);

    if config.kafka_security_protocol.to_uppercase().starts_with("SASL") {
        client_config
            .set("sasl.mechanism", &config.kafka_sasl_mechanism)
            .set("sasl.username", &config.kafka_username)
            .set("sasl.password", &config.kafka_password);
    }
    client_config
}

/// Consumes bus position reports and records each one through `directory`.
pub async fn start_kafka_consumer<S>(
    config: &AppConfig,
    directory: Arc<TransitDirectory<S>>,
) -> anyhow::Result<()>
where
    S: TransitStore + 'static,
{
    info!("Initializing Kafka consumer for topic: {}", config.kafka_topic);

    let consumer: StreamConsumer = consumer_config(config).create()?;
    consumer.subscribe(&[&config.kafka_topic])?;
    info!(
        "Subscribed to topic: {} ({:?} payloads)",
        config.kafka_topic, config.kafka_payload_format
    );

    let format = config.kafka_payload_format;
    let mut breaker = CircuitBreaker::new(
        config.kafka_max_retries,
        Duration::from_secs(config.kafka_circuit_breaker_cooldown),
    );

    loop {
        let message = match consumer.recv().await {
            Ok(m) => m,
            Err(e) => {
                error!("Kafka receive error: {}", e);
                if breaker.record_failure() {
                    breaker.cool_down().await;
                } else {
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                continue;
            }
        };
        breaker.record_success();

        let Some(payload) = message.payload().map(<[u8]>::to_vec) else {
            warn!(
                "Empty payload at {}:{} offset {}",
                message.topic(),
                message.partition(),
                message.offset()
            );
            continue;
        };

        let directory = directory.clone();
        // reports are independent of each other; the receive loop never waits on the store
        tokio::spawn(async move {
            if let Err(e) = position_processor::process_message(&directory, &payload, format).await {
                error!("Error processing position message: {:#}", e);
            }
        });
    }
}
