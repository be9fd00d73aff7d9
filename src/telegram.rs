//! Telegram Bot API transport
//!
//! - inbound: long-poll `getUpdates` with `offset`/`timeout`
//! - outbound: `sendMessage` to a chat id
//!
//! The bot token is part of every URL, so request errors are stripped of
//! their URL before they are returned or logged.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument, trace};

use crate::SubscriberId;
use crate::transport::{Cursor, InboundMessage, MessageTransport, Poll, TransportError};

/// Extra time granted on top of the long-poll timeout before the HTTP request
/// itself is abandoned.
const POLL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

pub struct TelegramTransport {
    client: reqwest::Client,
    api_base: String,
    token: String,
    request_timeout: Duration,
}

impl TelegramTransport {
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Http(e.without_url()))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            request_timeout,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }

    async fn call(&self, request: reqwest::RequestBuilder) -> Result<Value, TransportError> {
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Http(e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: ApiResponse<Value> = response
            .json()
            .await
            .map_err(|e| TransportError::Http(e.without_url()))?;
        if !body.ok {
            return Err(TransportError::Api(
                body.description
                    .unwrap_or_else(|| "response without ok flag".to_string()),
            ));
        }
        Ok(body.result.unwrap_or(Value::Null))
    }
}

/// Turn a `getUpdates` result into messages and the next cursor.
///
/// Every update moves the cursor, including ones that carry no text message
/// and ones that fail to decode, so they are never fetched again.
fn decode_updates(result: Value, cursor: Cursor) -> Poll {
    let mut poll = Poll {
        cursor,
        messages: Vec::new(),
    };

    let Value::Array(updates) = result else {
        return poll;
    };

    for raw in updates {
        let Some(update_id) = raw.get("update_id").and_then(Value::as_i64) else {
            trace!("ignoring update without update_id");
            continue;
        };
        poll.cursor.advance(update_id);

        let update = match serde_json::from_value::<Update>(raw) {
            Ok(update) => update,
            Err(e) => {
                debug!("skipping undecodable update {update_id}: {e}");
                continue;
            }
        };
        let Some(Message {
            chat,
            text: Some(text),
        }) = update.message
        else {
            trace!("update {update_id} has no text message");
            continue;
        };

        poll.messages.push(InboundMessage {
            message_id: update.update_id,
            sender_id: chat.id,
            text,
        });
    }

    poll
}

#[async_trait]
impl MessageTransport for TelegramTransport {
    #[instrument(skip(self), fields(offset = ?cursor.offset()))]
    async fn receive(&self, cursor: Cursor, timeout: Duration) -> Result<Poll, TransportError> {
        let mut query = vec![("timeout", timeout.as_secs().to_string())];
        if let Some(offset) = cursor.offset() {
            query.push(("offset", offset.to_string()));
        }

        let request = self
            .client
            .get(self.method_url("getUpdates"))
            .query(&query)
            .timeout(timeout + POLL_GRACE);

        let result = self.call(request).await?;
        let poll = decode_updates(result, cursor);
        trace!(
            "received {} messages, next offset {:?}",
            poll.messages.len(),
            poll.cursor.offset()
        );
        Ok(poll)
    }

    #[instrument(skip(self, text))]
    async fn send(&self, recipient: SubscriberId, text: &str) -> Result<(), TransportError> {
        let request = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&json!({
                "chat_id": recipient,
                "text": text,
                "disable_web_page_preview": true,
            }))
            .timeout(self.request_timeout);

        self.call(request).await?;
        trace!("delivered {} bytes", text.len());
        Ok(())
    }
}
