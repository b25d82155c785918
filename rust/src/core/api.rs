// REST collaborator: history, metadata, and the request/response mutations.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use crate::wire::{
    ConversationResponse, HistoryResponse, MessageEnvelope, RawConversation, RawMessage,
};

#[async_trait]
pub trait ChatApi: Send + Sync + 'static {
    async fn fetch_messages(
        &self,
        conversation_id: &str,
        page: u32,
        limit: u32,
    ) -> anyhow::Result<HistoryResponse>;

    async fn fetch_conversation(&self, conversation_id: &str) -> anyhow::Result<RawConversation>;

    async fn add_reaction(
        &self,
        conversation_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> anyhow::Result<RawMessage>;

    async fn remove_reaction(
        &self,
        conversation_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> anyhow::Result<RawMessage>;

    async fn edit_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        text: &str,
    ) -> anyhow::Result<RawMessage>;

    async fn delete_message(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> anyhow::Result<RawMessage>;

    async fn toggle_pin(
        &self,
        conversation_id: &str,
        message_id: &str,
        pinned: bool,
    ) -> anyhow::Result<RawMessage>;
}

#[derive(Debug)]
pub struct HttpChatApi {
    client: reqwest::Client,
    base_url: Url,
    api_token: Option<String>,
}

impl HttpChatApi {
    pub fn new(
        base_url: &str,
        api_token: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let trimmed = base_url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            anyhow::bail!("api base URL cannot be empty");
        }
        let base_url = Url::parse(trimmed).with_context(|| format!("parse api base URL {trimmed}"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("api base URL {trimmed} cannot carry a path");
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            base_url,
            api_token: api_token.filter(|t| !t.trim().is_empty()),
        })
    }

    /// `{base}/chats/<segments...>` with every segment percent-encoded.
    fn chats_url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("chats").extend(segments);
        }
        url
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        builder: reqwest::RequestBuilder,
        action: &str,
    ) -> anyhow::Result<T> {
        let resp = self
            .request(builder)
            .send()
            .await
            .with_context(|| format!("send {action} request"))?;
        Self::decode_response(resp, action).await
    }

    async fn decode_response<T: for<'de> Deserialize<'de>>(
        resp: reqwest::Response,
        action: &str,
    ) -> anyhow::Result<T> {
        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<T>()
                .await
                .with_context(|| format!("decode {action} response"));
        }

        let body = resp.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            anyhow::bail!("{action} failed: {status} (not found)");
        }
        if body.is_empty() {
            anyhow::bail!("{action} failed: {status}");
        }
        anyhow::bail!("{action} failed: {status} {body}");
    }

    async fn send_message_mutation(
        &self,
        builder: reqwest::RequestBuilder,
        action: &str,
    ) -> anyhow::Result<RawMessage> {
        let envelope: MessageEnvelope = self.send(builder, action).await?;
        Ok(envelope.into_message())
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn fetch_messages(
        &self,
        conversation_id: &str,
        page: u32,
        limit: u32,
    ) -> anyhow::Result<HistoryResponse> {
        let url = self.chats_url(&[conversation_id, "messages"]);
        let builder = self
            .client
            .get(url)
            .query(&[("page", page), ("limit", limit)]);
        self.send(builder, "fetch messages").await
    }

    async fn fetch_conversation(&self, conversation_id: &str) -> anyhow::Result<RawConversation> {
        let url = self.chats_url(&[conversation_id]);
        let resp: ConversationResponse = self.send(self.client.get(url), "fetch conversation").await?;
        Ok(resp.chat)
    }

    async fn add_reaction(
        &self,
        conversation_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> anyhow::Result<RawMessage> {
        let url = self.chats_url(&[conversation_id, "messages", message_id, "reactions"]);
        let builder = self
            .client
            .post(url)
            .json(&serde_json::json!({ "emoji": emoji }));
        self.send_message_mutation(builder, "add reaction").await
    }

    async fn remove_reaction(
        &self,
        conversation_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> anyhow::Result<RawMessage> {
        let url = self.chats_url(&[conversation_id, "messages", message_id, "reactions"]);
        let builder = self
            .client
            .delete(url)
            .json(&serde_json::json!({ "emoji": emoji }));
        self.send_message_mutation(builder, "remove reaction").await
    }

    async fn edit_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        text: &str,
    ) -> anyhow::Result<RawMessage> {
        let url = self.chats_url(&[conversation_id, "messages", message_id]);
        let builder = self
            .client
            .put(url)
            .json(&serde_json::json!({ "text": text }));
        self.send_message_mutation(builder, "edit message").await
    }

    async fn delete_message(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> anyhow::Result<RawMessage> {
        let url = self.chats_url(&[conversation_id, "messages", message_id]);
        self.send_message_mutation(self.client.delete(url), "delete message")
            .await
    }

    async fn toggle_pin(
        &self,
        conversation_id: &str,
        message_id: &str,
        pinned: bool,
    ) -> anyhow::Result<RawMessage> {
        let url = self.chats_url(&[conversation_id, "messages", message_id, "pin"]);
        let builder = self
            .client
            .post(url)
            .json(&serde_json::json!({ "isPinned": pinned }));
        self.send_message_mutation(builder, "toggle pin").await
    }
}

/// Stand-in used when no usable API endpoint is configured: every call fails
/// with the configuration problem, which then shows up as the view's error.
#[derive(Debug)]
pub struct UnavailableChatApi {
    reason: String,
}

impl UnavailableChatApi {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn fail<T>(&self) -> anyhow::Result<T> {
        anyhow::bail!("api unavailable: {}", self.reason)
    }
}

#[async_trait]
impl ChatApi for UnavailableChatApi {
    async fn fetch_messages(&self, _: &str, _: u32, _: u32) -> anyhow::Result<HistoryResponse> {
        self.fail()
    }

    async fn fetch_conversation(&self, _: &str) -> anyhow::Result<RawConversation> {
        self.fail()
    }

    async fn add_reaction(&self, _: &str, _: &str, _: &str) -> anyhow::Result<RawMessage> {
        self.fail()
    }

    async fn remove_reaction(&self, _: &str, _: &str, _: &str) -> anyhow::Result<RawMessage> {
        self.fail()
    }

    async fn edit_message(&self, _: &str, _: &str, _: &str) -> anyhow::Result<RawMessage> {
        self.fail()
    }

    async fn delete_message(&self, _: &str, _: &str) -> anyhow::Result<RawMessage> {
        self.fail()
    }

    async fn toggle_pin(&self, _: &str, _: &str, _: bool) -> anyhow::Result<RawMessage> {
        self.fail()
    }
}
