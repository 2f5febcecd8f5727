use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use bridge_api::{Broker, ConnectionError};

use crate::PipelineError;
use crate::ingest::Ingestor;
use crate::retry::Backoff;

/// Политика переподключения к broker'у.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub backoff: Backoff,
    /// Сессия, прожившая столько, сбрасывает backoff к базовой задержке.
    pub stable_after: Duration,
    /// Сколько неудачных попыток до первой сессии считается startup-ошибкой.
    pub startup_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            backoff: Backoff::new(
                Duration::from_secs(1),
                Duration::from_secs(30),
                Duration::from_millis(500),
            ),
            stable_after: Duration::from_secs(30),
            startup_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    ShuttingDown,
}

// ═══════════════════════════════════════════════════════════════
//  ConnectionSupervisor
// ═══════════════════════════════════════════════════════════════

/// Владеет broker сессией: connect → subscribe → приём сообщений →
/// обнаружение обрыва → backoff → reconnect → resubscribe.
///
/// Сообщения обрабатываются inline (`Ingestor::handle`), поэтому
/// медленный writer через back-pressure тормозит чтение из broker'а.
pub struct ConnectionSupervisor {
    broker: Box<dyn Broker>,
    ingestor: Arc<Ingestor>,
    policy: ReconnectPolicy,
    state: watch::Sender<SupervisorState>,
}

impl ConnectionSupervisor {
    pub fn new(broker: Box<dyn Broker>, ingestor: Arc<Ingestor>, policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(SupervisorState::Disconnected);
        Self {
            broker,
            ingestor,
            policy,
            state,
        }
    }

    /// Наблюдатель за состоянием супервизора.
    pub fn state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    fn transition(&self, to: SupervisorState) {
        let from = *self.state.borrow();
        if from != to {
            tracing::info!(from = ?from, to = ?to, "supervisor state");
            self.state.send_replace(to);
        }
    }

    /// Работает до shutdown. Ошибка только если broker недоступен при старте.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), PipelineError> {
        let topics = self.ingestor.router().filters();
        let mut attempt: u32 = 0;
        let mut startup_failures: u32 = 0;
        let mut ever_subscribed = false;

        loop {
            self.transition(SupervisorState::Connecting);
            let connected = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                r = self.broker.connect() => r,
            };

            let failure = match connected {
                Ok(()) => {
                    self.transition(SupervisorState::Connected);
                    let since = Instant::now();
                    match self.session(&topics, &mut ever_subscribed, &shutdown).await {
                        Some(e) => {
                            if since.elapsed() >= self.policy.stable_after {
                                attempt = 0;
                            }
                            tracing::warn!(error = %e, "connection lost");
                            e
                        }
                        None => break,
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "connect failed");
                    e
                }
            };

            if !ever_subscribed {
                startup_failures += 1;
                if startup_failures >= self.policy.startup_attempts {
                    self.transition(SupervisorState::ShuttingDown);
                    return Err(PipelineError::Startup {
                        attempts: startup_failures,
                        last: failure,
                    });
                }
            }

            self.transition(SupervisorState::Reconnecting);
            let delay = self.policy.backoff.delay(attempt);
            attempt = attempt.saturating_add(1);
            tracing::info!(delay_ms = delay.as_millis() as u64, attempt, "reconnect scheduled");
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.transition(SupervisorState::ShuttingDown);
        if let Err(e) = self.broker.disconnect().await {
            tracing::debug!(error = %e, "broker disconnect");
        }
        tracing::info!("supervisor stopped");
        Ok(())
    }

    /// Подписки + приём сообщений до обрыва. `None` = shutdown.
    async fn session(
        &mut self,
        topics: &[String],
        ever_subscribed: &mut bool,
        shutdown: &CancellationToken,
    ) -> Option<ConnectionError> {
        for topic in topics {
            let subscribed = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                r = self.broker.subscribe(topic) => r,
            };
            if let Err(e) = subscribed {
                return Some(e);
            }
            tracing::info!(topic = %topic, "subscribed");
        }
        *ever_subscribed = true;

        loop {
            let raw = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                r = self.broker.next_message() => match r {
                    Ok(raw) => raw,
                    Err(e) => return Some(e),
                },
            };
            let topic = raw.topic.clone();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::warn!(topic = %topic, "shutdown, message dropped");
                    return None;
                }
                _ = self.ingestor.handle(raw) => {}
            }
        }
    }
}
