//! LINE channel: reply to webhook events via the Messaging API.

use crate::channels::reply::{ChannelError, ReplyConfirmation, ReplyMessage, ReplySender};
use async_trait::async_trait;
use serde::Serialize;

const LINE_API_BASE: &str = "https://api.line.me";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplyRequest<'a> {
    reply_token: &'a str,
    messages: [&'a ReplyMessage; 1],
}

/// LINE Messaging API client for the reply endpoint.
#[derive(Clone)]
pub struct LineChannel {
    api_base: String,
    channel_access_token: String,
    client: reqwest::Client,
}

impl LineChannel {
    pub fn new(channel_access_token: String, api_base: Option<String>) -> Self {
        let api_base = api_base
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| LINE_API_BASE.to_string());
        Self {
            api_base,
            channel_access_token,
            client: reqwest::Client::new(),
        }
    }

    /// POST /v2/bot/message/reply — send one message for a reply token.
    pub async fn reply_message(
        &self,
        reply_token: &str,
        message: &ReplyMessage,
    ) -> Result<ReplyConfirmation, ChannelError> {
        let url = format!("{}/v2/bot/message/reply", self.api_base);
        let body = ReplyRequest {
            reply_token,
            messages: [message],
        };
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.channel_access_token)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ChannelError::Api(format!("{} {}", status, body)));
        }
        let text = res.text().await?;
        if text.trim().is_empty() {
            return Ok(ReplyConfirmation::default());
        }
        serde_json::from_str(&text)
            .map_err(|e| ChannelError::Api(format!("unexpected reply response: {}", e)))
    }
}

#[async_trait]
impl ReplySender for LineChannel {
    async fn reply(
        &self,
        reply_token: &str,
        message: &ReplyMessage,
    ) -> Result<ReplyConfirmation, ChannelError> {
        LineChannel::reply_message(self, reply_token, message).await
    }
}
