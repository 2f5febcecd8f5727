mod config;

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, Publish, QoS, SubscribeReasonCode};

use bridge_api::{Broker, BrokerFactory, ConfigError, ConnectionError, RawMessage, parse_config};

pub use config::MqttConfig;

/// Активная сессия: клиент для запросов + event loop, который надо
/// опрашивать, чтобы шли пакеты (в т.ч. keep-alive ping'и).
struct Session {
    client: AsyncClient,
    eventloop: EventLoop,
    /// Publish'и, пришедшие во время ожидания SubAck.
    pending: VecDeque<RawMessage>,
}

// ═══════════════════════════════════════════════════════════════
//  MqttBroker
// ═══════════════════════════════════════════════════════════════

/// MQTT 3.1.1 сессия поверх rumqttc.
///
/// Автоматический reconnect rumqttc не используется: каждая потеря
/// сессии отдаётся супервизору как ошибка, а `connect` строит новый
/// клиент с нуля.
pub struct MqttBroker {
    options: MqttOptions,
    qos: QoS,
    capacity: usize,
    connect_timeout: Duration,
    session: Option<Session>,
}

impl MqttBroker {
    pub fn new(config: &MqttConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            options: config.options()?,
            qos: config.qos()?,
            capacity: config.channel_capacity,
            connect_timeout: config.connect_timeout(),
            session: None,
        })
    }

    fn session(&mut self) -> Result<&mut Session, ConnectionError> {
        self.session.as_mut().ok_or(ConnectionError::Closed)
    }

    async fn handshake(&mut self) -> Result<(), ConnectionError> {
        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), self.capacity);
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(ConnectionError::Refused(format!("{:?}", ack.code)));
                    }
                    tracing::debug!(session_present = ack.session_present, "mqtt connack");
                    self.session = Some(Session {
                        client,
                        eventloop,
                        pending: VecDeque::new(),
                    });
                    return Ok(());
                }
                Ok(_) => continue,
                Err(rumqttc::ConnectionError::ConnectionRefused(code)) => {
                    return Err(ConnectionError::Refused(format!("{code:?}")));
                }
                Err(e) => return Err(ConnectionError::Connect(e.to_string())),
            }
        }
    }
}

/// Publish → RawMessage. Packet id есть только у QoS ≥ 1.
fn raw_message(publish: Publish) -> RawMessage {
    let raw = RawMessage::new(publish.topic, publish.payload.to_vec());
    if publish.pkid != 0 {
        raw.with_broker_seq(u64::from(publish.pkid))
    } else {
        raw
    }
}

impl Broker for MqttBroker {
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<(), ConnectionError>> + Send + '_>> {
        Box::pin(async move {
            self.session = None;
            let (host, port) = self.options.broker_address();
            let timeout = self.connect_timeout;
            match tokio::time::timeout(timeout, self.handshake()).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(ConnectionError::Connect(format!(
                        "{host}:{port}: no CONNACK within {timeout:?}"
                    )));
                }
            }
            tracing::info!(host = %host, port, client_id = %self.options.client_id(), "mqtt connected");
            Ok(())
        })
    }

    fn subscribe(
        &mut self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ConnectionError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let qos = self.qos;
            let failed = |detail: String| ConnectionError::Subscribe {
                topic: topic.clone(),
                detail,
            };
            self.session()?
                .client
                .subscribe(topic.as_str(), qos)
                .await
                .map_err(|e| failed(e.to_string()))?;

            // подписки идут последовательно: первый SubAck наш
            loop {
                let event = self.session()?.eventloop.poll().await;
                match event {
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        if ack.return_codes.iter().any(|c| matches!(c, SubscribeReasonCode::Failure)) {
                            return Err(failed("broker rejected subscription".into()));
                        }
                        return Ok(());
                    }
                    Ok(Event::Incoming(Packet::Publish(p))) => self.session()?.pending.push_back(raw_message(p)),
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        self.session = None;
                        return Err(ConnectionError::Lost("broker sent DISCONNECT".into()));
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        self.session = None;
                        return Err(ConnectionError::Lost(e.to_string()));
                    }
                }
            }
        })
    }

    fn next_message(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Result<RawMessage, ConnectionError>> + Send + '_>> {
        Box::pin(async move {
            if let Some(raw) = self.session()?.pending.pop_front() {
                return Ok(raw);
            }
            loop {
                let event = self.session()?.eventloop.poll().await;
                match event {
                    Ok(Event::Incoming(Packet::Publish(p))) => return Ok(raw_message(p)),
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        self.session = None;
                        return Err(ConnectionError::Lost("broker sent DISCONNECT".into()));
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        self.session = None;
                        return Err(ConnectionError::Lost(e.to_string()));
                    }
                }
            }
        })
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<(), ConnectionError>> + Send + '_>> {
        Box::pin(async move {
            let Some(mut session) = self.session.take() else {
                return Ok(());
            };
            session
                .client
                .disconnect()
                .await
                .map_err(|e| ConnectionError::Lost(e.to_string()))?;
            // DISCONNECT уходит в сеть только через event loop
            let flush = async {
                loop {
                    match session.eventloop.poll().await {
                        Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) | Err(_) => break,
                        Ok(_) => continue,
                    }
                }
            };
            if tokio::time::timeout(Duration::from_secs(1), flush).await.is_err() {
                tracing::debug!("mqtt disconnect not flushed");
            }
            tracing::info!("mqtt disconnected");
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MqttBrokerFactory
// ═══════════════════════════════════════════════════════════════

pub struct MqttBrokerFactory;

impl BrokerFactory for MqttBrokerFactory {
    fn create(&self, config_json: &str) -> Result<Box<dyn Broker>, ConfigError> {
        let config: MqttConfig = parse_config(config_json)?;
        let broker = MqttBroker::new(&config)?;
        tracing::info!(
            host = %config.host,
            port = config.port,
            qos = config.qos,
            keep_alive_secs = config.keep_alive_secs,
            "mqtt broker configured"
        );
        Ok(Box::new(broker))
    }
}
