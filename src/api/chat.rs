//! SellPoint chat REST routes
//!
//! `/chat/conversations`, `/chat/{id}`, `/chat/{id}/messages`,
//! `/chat/{id}/read` and `/chat/message/{id}`.

use anyhow::{Context, Result};
use serde::Deserialize;

use super::client::ApiClient;
use crate::chat::ChatApi;
use crate::models::{Conversation, ListingFilter, Message};

/// List envelope used by the collection endpoints.
#[derive(Debug, Deserialize)]
struct ItemsResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

/// Oldest first. The backend pages newest first; stable so equal
/// timestamps keep their server order relative to each other.
fn into_history(mut messages: Vec<Message>) -> Vec<Message> {
    messages.sort_by_key(|m| m.created_at);
    messages
}

impl ChatApi for ApiClient {
    async fn list_conversations(&self, filter: ListingFilter) -> Result<Vec<Conversation>> {
        let mut url = self.url(&["chat", "conversations"])?;
        url.query_pairs_mut().append_pair("type", filter.as_str());

        let resp = self.get(url).await?;
        let body: ItemsResponse<Conversation> = resp
            .json()
            .await
            .context("Failed to parse conversations response")?;

        tracing::debug!("Fetched {} conversations ({})", body.items.len(), filter);
        Ok(body.items)
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation> {
        let url = self.url(&["chat", conversation_id])?;
        let resp = self.get(url).await?;
        resp.json()
            .await
            .with_context(|| format!("Failed to parse conversation {}", conversation_id))
    }

    async fn fetch_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>> {
        let mut url = self.url(&["chat", conversation_id, "messages"])?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());

        let resp = self.get(url).await?;
        let body: ItemsResponse<Message> = resp
            .json()
            .await
            .context("Failed to parse messages response")?;

        tracing::debug!(
            "Fetched {} messages for {}",
            body.items.len(),
            conversation_id
        );
        Ok(into_history(body.items))
    }

    async fn mark_read(&self, conversation_id: &str) -> Result<()> {
        let url = self.url(&["chat", conversation_id, "read"])?;
        self.post_empty(url).await?;
        Ok(())
    }

    async fn edit_message(&self, message_id: &str, text: &str) -> Result<Message> {
        let url = self.url(&["chat", "message", message_id])?;
        let body = serde_json::json!({ "text": text });
        let resp = self.patch(url, &body).await?;
        resp.json()
            .await
            .context("Failed to parse edited message")
    }

    async fn delete_message(&self, message_id: &str) -> Result<()> {
        let url = self.url(&["chat", "message", message_id])?;
        self.delete(url).await?;
        Ok(())
    }
}
