use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, error, info, warn};

use crate::bot::{CommandRouter, ReplyAction};
use crate::platform::{IncomingUpdate, ReplySink, Transport, UpdateStream};
use crate::sensor::SensorSource;

/// Delay before reconnecting, both after a failed connect and after the
/// update stream closes.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Sleeps between reconnect attempts.
#[async_trait]
pub trait Backoff: Send + Sync {
    async fn wait(&self, delay: Duration);
}

pub struct TokioBackoff;

#[async_trait]
impl Backoff for TokioBackoff {
    async fn wait(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

pub enum PumpState {
    Connecting,
    Streaming(UpdateStream),
    Reconnecting,
}

impl std::fmt::Debug for PumpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PumpState::Connecting => write!(f, "Connecting"),
            PumpState::Streaming(_) => write!(f, "Streaming"),
            PumpState::Reconnecting => write!(f, "Reconnecting"),
        }
    }
}

/// Pulls updates from the transport one at a time and answers them.
pub struct UpdatePump<T: Transport + ?Sized, S: SensorSource + ?Sized, B: Backoff> {
    transport: Arc<T>,
    router: CommandRouter<S>,
    sink: ReplySink<T>,
    backoff: B,
    /// Log every received message (the `--stdout` debug mode)
    log_messages: bool,
}

impl<T, S, B> UpdatePump<T, S, B>
where
    T: Transport + ?Sized,
    S: SensorSource + ?Sized,
    B: Backoff,
{
    pub fn new(transport: Arc<T>, sensors: Arc<S>, backoff: B, log_messages: bool) -> Self {
        Self {
            sink: ReplySink::new(transport.clone()),
            transport,
            router: CommandRouter::new(sensors),
            backoff,
            log_messages,
        }
    }

    /// Run forever. Every failure past bootstrap is recovered here.
    pub async fn run(&self) {
        let mut state = PumpState::Connecting;
        loop {
            state = self.step(state).await;
        }
    }

    /// Perform a single state transition.
    pub async fn step(&self, state: PumpState) -> PumpState {
        match state {
            PumpState::Connecting => match self.transport.connect().await {
                Ok(stream) => {
                    info!("Entering main update loop");
                    PumpState::Streaming(stream)
                }
                Err(e) => {
                    error!("Can't read from Telegram: {:#}", e);
                    info!("Retrying in {} seconds...", RECONNECT_DELAY.as_secs());
                    self.backoff.wait(RECONNECT_DELAY).await;
                    PumpState::Connecting
                }
            },
            PumpState::Streaming(mut stream) => match stream.next().await {
                Some(update) => {
                    self.process(update).await;
                    PumpState::Streaming(stream)
                }
                None => {
                    warn!(
                        "Update channel closed, reconnecting in {} seconds...",
                        RECONNECT_DELAY.as_secs()
                    );
                    PumpState::Reconnecting
                }
            },
            PumpState::Reconnecting => {
                self.backoff.wait(RECONNECT_DELAY).await;
                PumpState::Connecting
            }
        }
    }

    async fn process(&self, update: IncomingUpdate) {
        let Some(msg) = update.message else {
            debug!("Skipping update {} without a message", update.id);
            return;
        };

        if self.log_messages {
            info!(
                "Received message from chat {} [{}]: {}",
                msg.chat_id, msg.chat_type, msg.text
            );
        }

        match self.router.handle(&msg).await {
            ReplyAction::None => {}
            ReplyAction::SendToChat(chat_id, text) => {
                self.sink.send_to_chat(chat_id, &text).await
            }
            ReplyAction::SendBroadcast(text) => self.sink.send_broadcast(&text).await,
        }
    }
}
