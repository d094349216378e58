use anyhow::{anyhow, Context, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Span};

use super::{route_frame, DeviceLanes};
use crate::config::MqttConfig;
use crate::error::IngestError;
use crate::pipeline::IngestionPipeline;

/// Run the MQTT ingress until shutdown
///
/// Subscribes to `{namespace}/#` and queues every decoded message on its
/// device's lane. Connection errors are retried after `reconnect_delay`.
#[instrument(name = "mqtt_ingress", skip_all, fields(broker_url = %config.url))]
pub async fn run_mqtt_ingress(
    config: MqttConfig,
    pipeline: Arc<IngestionPipeline>,
    shutdown_token: CancellationToken,
) {
    info!(namespace = %config.namespace, "starting MQTT ingress");

    let lanes = DeviceLanes::new(pipeline, config.lane_capacity, config.lane_idle_timeout());
    let mut retry_count: u64 = 0;

    loop {
        if shutdown_token.is_cancelled() {
            debug!("MQTT ingress cancelled before connection");
            break;
        }

        match run_mqtt_connection(&config, &shutdown_token, &lanes).await {
            Ok(()) => {
                debug!("MQTT ingress stopped cleanly");
                break;
            }
            Err(e) => {
                retry_count += 1;
                error!(error = %e, attempt = retry_count, "MQTT connection error");

                tokio::select! {
                    _ = shutdown_token.cancelled() => break,
                    _ = tokio::time::sleep(config.reconnect_delay()) => {}
                }
                warn!(attempt = retry_count, "retrying MQTT connection");
            }
        }
    }

    lanes.close().await;
    info!("MQTT ingress stopped");
}

/// Run a single MQTT connection session
async fn run_mqtt_connection(
    config: &MqttConfig,
    shutdown_token: &CancellationToken,
    lanes: &DeviceLanes,
) -> Result<()> {
    let (host, port) = parse_broker_url(&config.url)?;

    let mut mqtt_options = MqttOptions::new(&config.client_id, host, port);
    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, config.channel_capacity);

    let subscribe_topic = format!("{}/#", config.namespace);
    client
        .subscribe(&subscribe_topic, QoS::AtLeastOnce)
        .await
        .with_context(|| format!("Failed to subscribe to {}", subscribe_topic))?;

    info!(topic = %subscribe_topic, "subscribed to MQTT topic");

    loop {
        tokio::select! {
            _ = shutdown_token.cancelled() => {
                debug!("shutdown signal received");
                let _ = client.disconnect().await;
                return Ok(());
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        handle_mqtt_message(
                            &config.namespace,
                            &publish.topic,
                            &publish.payload,
                            lanes,
                        )
                        .await;
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        debug!("subscription acknowledged");
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("connected to MQTT broker");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(anyhow!("MQTT event loop error: {}", e));
                    }
                }
            }
        }
    }
}

/// Decode one frame and queue it on its device's lane.
///
/// Every message gets a new root span; undecodable frames are dropped here
/// so the event loop never stops on bad input. Waits while the lane is full.
pub(crate) async fn handle_mqtt_message(
    namespace: &str,
    topic: &str,
    payload: &[u8],
    lanes: &DeviceLanes,
) {
    let span = info_span!(
        parent: Span::none(),
        "mqtt_message",
        topic = %topic,
        payload_size = payload.len(),
        device_id = tracing::field::Empty,
    );

    let message = {
        let _entered = span.enter();
        match route_frame(namespace, topic, payload) {
            Ok(message) => {
                span.record("device_id", message.device_id());
                message
            }
            Err(e) => {
                let err = IngestError::from(e);
                warn!(error = %err, "dropping undecodable MQTT message");
                return;
            }
        }
    };

    lanes.dispatch(message, span).await;
}

/// Parse broker URL in format mqtt://host:port or tcp://host:port or host:port
fn parse_broker_url(url: &str) -> Result<(&str, u16)> {
    let url = url.trim_start_matches("mqtt://");
    let url = url.trim_start_matches("tcp://");

    let parts: Vec<&str> = url.split(':').collect();
    match parts.len() {
        1 if !parts[0].is_empty() => Ok((parts[0], 1883)),
        2 => {
            let port = parts[1]
                .parse::<u16>()
                .map_err(|_| anyhow!("Invalid port in broker URL: {}", parts[1]))?;
            Ok((parts[0], port))
        }
        _ => Err(anyhow!("Invalid broker URL format: {}", url)),
    }
}
