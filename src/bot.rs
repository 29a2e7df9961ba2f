use std::sync::Arc;

use tracing::{debug, info};

use crate::platform::IncomingMessage;
use crate::sensor::{SensorReport, SensorSource};

/// What the pump should do in response to one message.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyAction {
    None,
    SendToChat(i64, String),
    SendBroadcast(String),
}

/// Classifies incoming messages and runs the matching command handler.
pub struct CommandRouter<S: SensorSource + ?Sized> {
    sensors: Arc<S>,
}

impl<S: SensorSource + ?Sized> CommandRouter<S> {
    pub fn new(sensors: Arc<S>) -> Self {
        Self { sensors }
    }

    pub async fn handle(&self, msg: &IncomingMessage) -> ReplyAction {
        if !msg.is_command {
            return ReplyAction::None;
        }

        let command = msg.command_name.as_deref().unwrap_or("").to_lowercase();
        match command.as_str() {
            "bastu" | "sauna" => {
                let text = self.sensor_report(msg).await;
                ReplyAction::SendToChat(msg.chat_id, text)
            }
            _ => {
                info!("Unknown command /{} from chat {}", command, msg.chat_id);
                ReplyAction::SendBroadcast(String::new())
            }
        }
    }

    async fn sensor_report(&self, msg: &IncomingMessage) -> String {
        // Computed for the log only; the reply does not include it.
        let label = fallback_label(msg);
        debug!("Temperature requested by '{}' in chat {}", label, msg.chat_id);

        match self.sensors.fetch_report().await {
            Ok(report) => {
                debug!(
                    "Sensor bridge reported {} sensor(s), replying with sensor {:?}",
                    report.sensor_count,
                    report.primary().map(|r| r.sensor_id)
                );
                format_report(&report)
            }
            Err(e) => e.to_string(),
        }
    }
}

/// Command arguments, else the sender's username, else their first name.
pub fn fallback_label(msg: &IncomingMessage) -> String {
    [
        msg.command_args.as_deref(),
        msg.sender_username.as_deref(),
        msg.sender_first_name.as_deref(),
    ]
    .into_iter()
    .flatten()
    .find(|s| !s.is_empty())
    .unwrap_or("")
    .to_string()
}

/// Render the first reading of a report as the chat reply.
pub fn format_report(report: &SensorReport) -> String {
    match report.primary() {
        Some(reading) => format!(
            "Current BASTU temperature: {:.2}°C\n",
            reading.temperature_celsius
        ),
        None => "Error: no temperature sensors available".to_string(),
    }
}
