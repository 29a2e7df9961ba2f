use std::collections::VecDeque;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageEntityKind, UpdateKind};
use tracing::{error, info};

use crate::platform::{IncomingMessage, IncomingUpdate, Transport, UpdateStream};

/// Long-poll timeout for getUpdates, kept below the HTTP client timeout.
const POLL_TIMEOUT_SECS: u32 = 10;

/// Telegram transport backed by teloxide.
pub struct TelegramTransport {
    bot: Bot,
    channel_id: ChatId,
    /// Print outgoing messages instead of sending them
    stdout_only: bool,
    /// Next getUpdates offset. Shared with every stream so a reconnect
    /// does not replay updates that were already handed out.
    offset: Arc<AtomicI32>,
}

impl TelegramTransport {
    /// `--telegram-debug` is not a constructor argument: teloxide logs its
    /// requests through `tracing`, so that flag only raises the `teloxide`
    /// log level (see `LogConfig::directives`).
    pub fn new(api_key: &str, channel_id: i64, stdout_only: bool) -> Self {
        Self::from_bot(Bot::new(api_key), channel_id, stdout_only)
    }

    pub fn from_bot(bot: Bot, channel_id: i64, stdout_only: bool) -> Self {
        Self {
            bot,
            channel_id: ChatId(channel_id),
            stdout_only,
            offset: Arc::new(AtomicI32::new(0)),
        }
    }

    /// Verify the token against the Bot API.
    pub async fn init(&self) -> Result<()> {
        let me = self
            .bot
            .get_me()
            .await
            .context("Failed to authenticate with Telegram")?;
        info!(
            "Telegram client initialized as @{}",
            me.user.username.as_deref().unwrap_or("<unknown>")
        );
        Ok(())
    }

    async fn deliver(&self, chat_id: ChatId, text: &str) -> Result<()> {
        if self.stdout_only {
            println!("[{}] {}", chat_id.0, text);
            return Ok(());
        }
        self.bot
            .send_message(chat_id, text.to_string())
            .await
            .with_context(|| format!("Failed to send message to {}", chat_id.0))?;
        Ok(())
    }
}

struct PollState {
    bot: Bot,
    offset: Arc<AtomicI32>,
    pending: VecDeque<Update>,
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn connect(&self) -> Result<UpdateStream> {
        self.bot
            .get_me()
            .await
            .context("Failed to reach the Telegram Bot API")?;

        let state = PollState {
            bot: self.bot.clone(),
            offset: self.offset.clone(),
            pending: VecDeque::new(),
        };

        // Poll lazily: a batch is only requested once the previous one has
        // been consumed. A failed poll ends the stream.
        let stream = futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(update) = state.pending.pop_front() {
                    state
                        .offset
                        .store(update.id.0 as i32 + 1, Ordering::SeqCst);
                    return Some((convert_update(&update), state));
                }
                let offset = state.offset.load(Ordering::SeqCst);
                match state
                    .bot
                    .get_updates()
                    .offset(offset)
                    .timeout(POLL_TIMEOUT_SECS)
                    .await
                {
                    Ok(batch) => state.pending.extend(batch),
                    Err(e) => {
                        error!("Failed to get updates from Telegram: {}", e);
                        return None;
                    }
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn send_to(&self, chat_id: i64, text: &str) -> Result<()> {
        self.deliver(ChatId(chat_id), text).await
    }

    async fn send_broadcast(&self, text: &str) -> Result<()> {
        self.deliver(self.channel_id, text).await
    }
}

fn convert_update(update: &Update) -> IncomingUpdate {
    let message = match &update.kind {
        UpdateKind::Message(msg) => Some(convert_message(msg)),
        _ => None,
    };
    IncomingUpdate {
        id: update.id.0,
        message,
    }
}

fn convert_message(msg: &Message) -> IncomingMessage {
    let text = msg.text().unwrap_or("");

    // Telegram marks commands with a bot_command entity at offset 0.
    let is_command = msg
        .entities()
        .and_then(|entities| entities.first())
        .map(|e| e.offset == 0 && matches!(e.kind, MessageEntityKind::BotCommand))
        .unwrap_or(false);

    let mut incoming =
        IncomingMessage::from_text(msg.chat.id.0, chat_type(&msg.chat), text, is_command);
    if let Some(user) = msg.from.as_ref() {
        incoming.sender_username = user.username.clone();
        incoming.sender_first_name = Some(user.first_name.clone());
    }
    incoming
}

fn chat_type(chat: &teloxide::types::Chat) -> &'static str {
    if chat.is_private() {
        "private"
    } else if chat.is_supergroup() {
        "supergroup"
    } else if chat.is_group() {
        "group"
    } else if chat.is_channel() {
        "channel"
    } else {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;
    use serde_json::json;

    use super::*;

    const TOKEN: &str = "123456:test-token";

    fn parse_update(value: serde_json::Value) -> Update {
        serde_json::from_str(&value.to_string()).unwrap()
    }

    fn text_message(
        chat: serde_json::Value,
        text: &str,
        entities: serde_json::Value,
    ) -> serde_json::Value {
        json!({
            "message_id": 1,
            "date": 1706529600,
            "chat": chat,
            "from": {"id": 7, "is_bot": false, "first_name": "Anna", "username": "anna_b"},
            "text": text,
            "entities": entities
        })
    }

    fn private_chat() -> serde_json::Value {
        json!({"id": 55, "type": "private", "first_name": "Anna"})
    }

    #[test]
    fn test_command_entity_at_start() {
        let update = parse_update(json!({
            "update_id": 100,
            "message": text_message(
                private_chat(),
                "/Bastu@bastu_bot tonight",
                json!([{"type": "bot_command", "offset": 0, "length": 16}])
            )
        }));

        let incoming = convert_update(&update);
        assert_eq!(incoming.id, 100);
        let msg = incoming.message.unwrap();
        assert!(msg.is_command);
        assert_eq!(msg.chat_id, 55);
        assert_eq!(msg.chat_type, "private");
        assert_eq!(msg.command_name.as_deref(), Some("Bastu"));
        assert_eq!(msg.command_args.as_deref(), Some("tonight"));
        assert_eq!(msg.sender_username.as_deref(), Some("anna_b"));
        assert_eq!(msg.sender_first_name.as_deref(), Some("Anna"));
    }

    #[test]
    fn test_command_entity_later_in_text_is_not_a_command() {
        let update = parse_update(json!({
            "update_id": 101,
            "message": text_message(
                json!({"id": -100, "type": "group", "title": "Sauna club"}),
                "try /bastu",
                json!([{"type": "bot_command", "offset": 4, "length": 6}])
            )
        }));

        let msg = convert_update(&update).message.unwrap();
        assert!(!msg.is_command);
        assert_eq!(msg.command_name, None);
        assert_eq!(msg.chat_type, "group");
        assert_eq!(msg.text, "try /bastu");
    }

    #[test]
    fn test_slash_text_without_entities_is_not_a_command() {
        let mut message = text_message(private_chat(), "/bastu", json!([]));
        message.as_object_mut().unwrap().remove("entities");
        let update = parse_update(json!({"update_id": 102, "message": message}));

        let msg = convert_update(&update).message.unwrap();
        assert!(!msg.is_command);
    }

    #[test]
    fn test_edited_message_has_no_message() {
        let mut edited = text_message(
            private_chat(),
            "/bastu",
            json!([{"type": "bot_command", "offset": 0, "length": 6}]),
        );
        edited
            .as_object_mut()
            .unwrap()
            .insert("edit_date".to_string(), json!(1706529700));
        let update = parse_update(json!({"update_id": 103, "edited_message": edited}));

        let incoming = convert_update(&update);
        assert_eq!(incoming.id, 103);
        assert_eq!(incoming.message, None);
    }

    fn mock_bot(server: &mockito::ServerGuard) -> Bot {
        Bot::new(TOKEN).set_api_url(reqwest::Url::parse(&server.url()).unwrap())
    }

    async fn mock_get_me(server: &mut mockito::ServerGuard) -> mockito::Mock {
        server
            .mock("POST", format!("/bot{}/GetMe", TOKEN).as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "ok": true,
                    "result": {"id": 1, "is_bot": true, "first_name": "Bastu", "username": "bastu_bot", "can_join_groups": true, "can_read_all_group_messages": false, "supports_inline_queries": false, "has_main_web_app": false}
                })
                .to_string(),
            )
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_reconnect_resumes_after_last_delivered_update() {
        let mut server = mockito::Server::new_async().await;
        let updates_path = format!("/bot{}/GetUpdates", TOKEN);
        let _get_me = mock_get_me(&mut server).await;

        let first_batch = server
            .mock("POST", updates_path.as_str())
            .match_body(Matcher::PartialJson(json!({"offset": 0})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "ok": true,
                    "result": [{
                        "update_id": 100,
                        "message": text_message(
                            private_chat(),
                            "/bastu",
                            json!([{"type": "bot_command", "offset": 0, "length": 6}])
                        )
                    }]
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        // Every poll after update 100 fails, which closes the stream.
        let failing_poll = server
            .mock("POST", updates_path.as_str())
            .match_body(Matcher::PartialJson(json!({"offset": 101})))
            .with_status(409)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"ok":false,"error_code":409,"description":"Conflict: terminated by other getUpdates request"}"#,
            )
            .expect(2)
            .create_async()
            .await;

        let transport = TelegramTransport::from_bot(mock_bot(&server), -1001, false);

        let mut stream = transport.connect().await.unwrap();
        let first = stream.next().await.unwrap();
        assert_eq!(first.id, 100);
        assert!(stream.next().await.is_none());

        let mut stream = transport.connect().await.unwrap();
        assert!(stream.next().await.is_none());

        first_batch.assert_async().await;
        failing_poll.assert_async().await;
    }

    #[tokio::test]
    async fn test_connect_fails_when_get_me_fails() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", format!("/bot{}/GetMe", TOKEN).as_str())
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#)
            .create_async()
            .await;

        let transport = TelegramTransport::from_bot(mock_bot(&server), -1001, false);
        assert!(transport.connect().await.is_err());
    }
}
