use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use skyledger_shared::EventEnvelope;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
    topic: String,
}

impl EventProducer {
    pub fn new(brokers: &str, topic: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }

    pub async fn publish(&self, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(&self.topic).key(key).payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                info!(
                    topic = %self.topic,
                    key,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "Event exported"
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!(topic = %self.topic, error = %e, "Failed to export event");
                Err(e)
            }
        }
    }

    /// Forwards envelopes until the bus closes. Events are keyed by instance
    /// so one instance's stream stays ordered within a partition. Export is
    /// best effort: failures are logged and skipped.
    pub async fn forward(self, mut events: broadcast::Receiver<EventEnvelope>) {
        loop {
            match events.recv().await {
                Ok(envelope) => {
                    let payload = match serde_json::to_string(&envelope) {
                        Ok(payload) => payload,
                        Err(e) => {
                            error!(error = %e, "Failed to serialize event");
                            continue;
                        }
                    };
                    let _ = self.publish(envelope.instance.as_str(), &payload).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event exporter lagged behind the bus");
                }
                Err(RecvError::Closed) => {
                    info!("Event bus closed, exporter stopping");
                    break;
                }
            }
        }
    }
}
