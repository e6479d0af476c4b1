//! Broker worker.
//!
//! Owns the MQTT client and a long-lived session with the platform
//! broker. On connect it subscribes to the two device scopes and signals
//! the supervisor with a synthetic `#connect`; inbound traffic is routed
//! by topic (bundle carriers to the bundle slot, everything else to the
//! inbound queue); a 50 ms drain publishes whatever the guest queued.
//! Broker failures never reach the supervisor: reconnection belongs to
//! the client's event loop, and connectivity changes surface only as the
//! synthetic markers.

use eea_core::{
    AgentConfig, BROKER_IN_BUF, BROKER_OUT_BUF, BUNDLE_MAX, Bundle, InboundMessage,
    OutboundMessage, PAYLOAD_MAX, QueueReceiver, QueueSender, SlotSender, TOPIC_MAX,
    is_bundle_topic,
};
use rumqttc::{
    AsyncClient, ConnAck, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions,
    Packet, Publish, QoS,
};
use std::sync::Arc;
use std::time::Duration;

/// Cadence of the outbound drain.
const DRAIN_INTERVAL: Duration = Duration::from_millis(50);

/// Pause after a connection error before polling again, so a dead broker
/// does not spin the task.
const RECONNECT_PAUSE: Duration = Duration::from_secs(1);

/// The broker worker task.
pub struct BrokerWorker {
    config: Arc<AgentConfig>,
    client: AsyncClient,
    eventloop: EventLoop,
    inbound: QueueSender<InboundMessage>,
    bundles: SlotSender<Bundle>,
    outbound: QueueReceiver<OutboundMessage>,
    connected: bool,
}

impl BrokerWorker {
    /// Build the worker and its client. Nothing connects until
    /// [`BrokerWorker::run`] polls the event loop.
    pub fn new(
        config: Arc<AgentConfig>,
        inbound: QueueSender<InboundMessage>,
        bundles: SlotSender<Bundle>,
        outbound: QueueReceiver<OutboundMessage>,
    ) -> Self {
        let mut options = MqttOptions::new(
            config.device_id.clone(),
            config.broker_host.clone(),
            config.broker_port,
        );
        options.set_keep_alive(Duration::from_secs(30));
        options.set_max_packet_size(BROKER_IN_BUF, BROKER_OUT_BUF);
        if !config.access_key.is_empty() {
            options.set_credentials(config.access_key.clone(), config.access_secret.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, 10);
        Self {
            config,
            client,
            eventloop,
            inbound,
            bundles,
            outbound,
            connected: false,
        }
    }

    /// Event loop: broker session events interleaved with the outbound
    /// drain. Runs until the process exits.
    pub async fn run(mut self) {
        let mut drain = tokio::time::interval(DRAIN_INTERVAL);
        loop {
            tokio::select! {
                event = self.eventloop.poll() => self.handle_event(event).await,
                _ = drain.tick() => self.drain_outbound().await,
            }
        }
    }

    async fn handle_event(&mut self, event: Result<Event, ConnectionError>) {
        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => self.on_conn_ack(ack).await,
            Ok(Event::Incoming(Packet::Publish(publish))) => self.route(publish),
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::info!("broker sent disconnect");
                self.on_disconnected();
            }
            Ok(_) => {}
            Err(err) => {
                tracing::error!(error = %err, "broker connection error");
                self.on_disconnected();
                tokio::time::sleep(RECONNECT_PAUSE).await;
            }
        }
    }

    async fn on_conn_ack(&mut self, ack: ConnAck) {
        if ack.code != ConnectReturnCode::Success {
            tracing::error!(code = ?ack.code, "broker refused connection");
            self.on_disconnected();
            return;
        }

        tracing::info!(
            host = %self.config.broker_host,
            port = self.config.broker_port,
            "broker connected"
        );
        for suffix in ["toAgent/#", "command"] {
            let topic = self.config.device_topic(suffix);
            if let Err(err) = self.client.subscribe(topic.as_str(), QoS::AtMostOnce).await {
                tracing::error!(topic = %topic, error = %err, "subscribe failed");
            }
        }

        self.connected = true;
        self.inbound.try_send(InboundMessage::connect());
    }

    /// Signal the supervisor once per connected-to-disconnected edge.
    fn on_disconnected(&mut self) {
        if self.connected {
            self.connected = false;
            self.inbound.try_send(InboundMessage::disconnect());
        }
    }

    /// Route one inbound publish. Bytes are copied into queue-owned
    /// storage here; the client's buffers are released on return.
    fn route(&mut self, publish: Publish) {
        if is_bundle_topic(&publish.topic) {
            if publish.payload.len() > BUNDLE_MAX {
                tracing::error!(
                    topic = %publish.topic,
                    size = publish.payload.len(),
                    max = BUNDLE_MAX,
                    "bundle exceeds maximum size, rejected"
                );
                return;
            }
            tracing::info!(
                topic = %publish.topic,
                size = publish.payload.len(),
                "bundle received"
            );
            self.bundles.replace(Bundle::new(publish.payload.to_vec()));
            return;
        }

        if publish.topic.len() > TOPIC_MAX {
            tracing::warn!(len = publish.topic.len(), "topic exceeds maximum, message dropped");
            return;
        }
        if publish.payload.len() > PAYLOAD_MAX {
            tracing::warn!(
                topic = %publish.topic,
                len = publish.payload.len(),
                max = PAYLOAD_MAX,
                "payload exceeds maximum, message dropped"
            );
            return;
        }

        self.inbound.try_send(InboundMessage::new(
            publish.topic.clone(),
            publish.payload.to_vec(),
        ));
    }

    /// Publish everything the guest queued. Failures are logged and the
    /// message is not requeued; retry policy lives inside the workflow.
    async fn drain_outbound(&mut self) {
        if !self.connected {
            return;
        }
        while let Some(message) = self.outbound.try_recv() {
            let qos = match message.qos {
                0 => QoS::AtMostOnce,
                1 => QoS::AtLeastOnce,
                _ => QoS::ExactlyOnce,
            };
            if let Err(err) = self
                .client
                .publish(message.topic.clone(), qos, false, message.payload)
                .await
            {
                tracing::error!(topic = %message.topic, error = %err, "publish failed");
            }
        }
    }
}
