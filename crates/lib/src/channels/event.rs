//! Inbound webhook payload: one delivery carries a batch of events.

use serde::Deserialize;

/// Webhook POST body.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookDelivery {
    /// Bot user id the events are addressed to.
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub events: Vec<InboundEvent>,
}

/// One event from the platform. Only message events carry something we can answer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundEvent {
    Message {
        /// Absent for events delivered in standby mode.
        #[serde(rename = "replyToken", default)]
        reply_token: Option<String>,
        message: MessageBody,
    },
    /// follow, unfollow, join, postback, ...
    #[serde(other)]
    Other,
}

/// Message content of a message event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageBody {
    Text { text: String },
    /// image, video, audio, file, location, sticker
    #[serde(other)]
    NonText,
}
