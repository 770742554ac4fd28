use crate::errors::{Error, Result};
use crate::metrics::{CHANNEL_FULL_TOTAL, INVALID_SAMPLES_TOTAL, SAMPLES_TOTAL};
use crate::model::TelemetrySample;
use crate::validate::validate;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const TELEMETRY_TOPIC: &str = "telemetry/#";

pub async fn run_mqtt(
    broker: String,
    port: u16,
    client_id: String,
    tx: mpsc::Sender<TelemetrySample>,
) -> Result<()> {
    info!("Connecting to MQTT broker at {}:{}", broker, port);

    let mut mqtt_options = MqttOptions::new(client_id, broker, port);
    mqtt_options.set_keep_alive(std::time::Duration::from_secs(30));
    mqtt_options.set_clean_session(false);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 10000);

    client
        .subscribe(TELEMETRY_TOPIC, QoS::AtLeastOnce)
        .await
        .map_err(Error::Mqtt)?;

    info!("Subscribed to {} with QoS 1", TELEMETRY_TOPIC);

    loop {
        match eventloop.poll().await {
            Ok(notification) => {
                if let Event::Incoming(Packet::Publish(publish)) = notification {
                    debug!(
                        "Received message on topic {}, size: {} bytes",
                        publish.topic,
                        publish.payload.len()
                    );

                    match process_message(&publish.payload, &tx).await {
                        Ok(()) => {}
                        Err(Error::ChannelSend) => {
                            // The ingest worker is gone; nothing downstream can accept samples
                            error!("Ingest channel closed, stopping MQTT intake");
                            return Err(Error::ChannelSend);
                        }
                        Err(e) => warn!("Dropped message on {}: {}", publish.topic, e),
                    }
                }
            }
            Err(e) => {
                error!("MQTT error: {}", e);
                // rumqttc reconnects on the next poll
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}

/// Parses and validates one payload, then hands it to the ingest worker
async fn process_message(payload: &[u8], tx: &mpsc::Sender<TelemetrySample>) -> Result<()> {
    let sample = serde_json::from_slice::<TelemetrySample>(payload)
        .map_err(|e| Error::Validation(format!("JSON parse error: {}", e)))
        .and_then(|sample| validate(&sample).map(|_| sample))
        .map_err(|e| {
            SAMPLES_TOTAL.inc();
            INVALID_SAMPLES_TOTAL.inc();
            e
        })?;

    match tx.try_send(sample) {
        Ok(()) => Ok(()),
        Err(mpsc::error::TrySendError::Full(sample)) => {
            CHANNEL_FULL_TOTAL.inc();
            debug!("Channel full, waiting for ingest worker");
            tx.send(sample).await.map_err(|_| Error::ChannelSend)
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            error!("Channel closed, cannot forward telemetry");
            Err(Error::ChannelSend)
        }
    }
}
