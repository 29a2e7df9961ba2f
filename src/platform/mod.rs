pub mod telegram;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use tracing::error;

/// A message received from the chat platform, reduced to what the
/// command router needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncomingMessage {
    pub chat_id: i64,
    /// Chat kind as reported by the platform ("private", "group", ...)
    pub chat_type: String,
    pub text: String,
    pub sender_username: Option<String>,
    pub sender_first_name: Option<String>,
    pub is_command: bool,
    pub command_name: Option<String>,
    pub command_args: Option<String>,
}

impl IncomingMessage {
    /// Build a message from raw text, splitting out the command name and
    /// arguments when the text is a command.
    pub fn from_text(chat_id: i64, chat_type: &str, text: &str, is_command: bool) -> Self {
        let (command_name, command_args) = if is_command {
            match parse_command(text) {
                Some((name, args)) => (Some(name), Some(args)),
                None => (None, None),
            }
        } else {
            (None, None)
        };

        Self {
            chat_id,
            chat_type: chat_type.to_string(),
            text: text.to_string(),
            sender_username: None,
            sender_first_name: None,
            is_command: is_command && command_name.is_some(),
            command_name,
            command_args,
        }
    }
}

/// One inbound event. Updates that carry no message (edits, callbacks,
/// membership changes) have `message == None`.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingUpdate {
    pub id: u32,
    pub message: Option<IncomingMessage>,
}

pub type UpdateStream = BoxStream<'static, IncomingUpdate>;

/// The messaging platform as seen by the pump.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a live sequence of updates. The sequence ending means the
    /// platform closed the channel.
    async fn connect(&self) -> Result<UpdateStream>;

    async fn send_to(&self, chat_id: i64, text: &str) -> Result<()>;

    /// Send to the bot's configured default channel.
    async fn send_broadcast(&self, text: &str) -> Result<()>;
}

/// Split `/name@bot some args` into `("name", "some args")`.
pub fn parse_command(text: &str) -> Option<(String, String)> {
    let rest = text.strip_prefix('/')?;
    let (head, args) = match rest.find(char::is_whitespace) {
        Some(pos) => (&rest[..pos], rest[pos..].trim()),
        None => (rest, ""),
    };
    let name = head.split('@').next().unwrap_or(head);
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), args.to_string()))
}

/// Best-effort delivery of replies. Send failures are logged and dropped.
pub struct ReplySink<T: Transport + ?Sized> {
    transport: Arc<T>,
}

impl<T: Transport + ?Sized> ReplySink<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    pub async fn send_to_chat(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.transport.send_to(chat_id, text).await {
            error!("Failed to send message to chat {}: {:#}", chat_id, e);
        }
    }

    pub async fn send_broadcast(&self, text: &str) {
        if let Err(e) = self.transport.send_broadcast(text).await {
            error!("Failed to send message to default channel: {:#}", e);
        }
    }
}
