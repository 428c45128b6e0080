//! PostgREST-style storage backend (`chats` and `messages` tables).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{ChatStorage, StorageError};
use crate::api::SourceRef;
use crate::core::message::{Conversation, ConversationMeta, Message, MessageStatus, Sender};
use crate::utils::url::construct_api_url;

const CHATS_TABLE: &str = "rest/v1/chats";
const MESSAGES_TABLE: &str = "rest/v1/messages";

/// Row ids may be integers or uuids depending on the schema.
fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(id) => Ok(id),
        Value::Number(id) => Ok(id.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "unsupported row id: {other}"
        ))),
    }
}

#[derive(Serialize)]
struct NewChatRow<'a> {
    user_id: &'a str,
    name: &'a str,
    agent: &'a str,
    model: &'a str,
}

#[derive(Deserialize)]
struct ChatRow {
    #[serde(deserialize_with = "id_as_string")]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    agent: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl From<ChatRow> for Conversation {
    fn from(row: ChatRow) -> Self {
        Conversation {
            remote_id: Some(row.id),
            name: row.name,
            agent: row.agent,
            model: row.model,
            created_at: row.created_at.unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Serialize)]
struct NewMessageRow<'a> {
    chat_id: &'a str,
    message: &'a str,
    message_type: &'a str,
    /// Only bot rows carry citations; the column may not exist otherwise.
    #[serde(skip_serializing_if = "no_sources")]
    sources: &'a [SourceRef],
}

fn no_sources(sources: &&[SourceRef]) -> bool {
    sources.is_empty()
}

#[derive(Deserialize)]
struct MessageRow {
    #[serde(deserialize_with = "id_as_string")]
    id: String,
    #[serde(deserialize_with = "id_as_string")]
    chat_id: String,
    message: String,
    message_type: Sender,
    #[serde(default)]
    sources: Option<Vec<SourceRef>>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            local_id: 0,
            remote_id: Some(row.id),
            conversation_id: Some(row.chat_id),
            sender: row.message_type,
            text: row.message,
            status: MessageStatus::Success,
            sources: row.sources.unwrap_or_default(),
            is_streaming: false,
            created_at: row.created_at.unwrap_or_else(Utc::now),
        }
    }
}

pub struct RestChatStorage {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestChatStorage {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn request(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        let url = construct_api_url(&self.base_url, table);
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StorageError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Inserts return the created rows; take the first.
    async fn single_row<T>(response: reqwest::Response) -> Result<T, StorageError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let rows: Vec<T> = Self::check(response).await?.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StorageError::Decode("insert returned no rows".into()))
    }
}

#[async_trait]
impl ChatStorage for RestChatStorage {
    async fn create_conversation(
        &self,
        owner_id: &str,
        meta: &ConversationMeta,
    ) -> Result<Conversation, StorageError> {
        debug!(name = %meta.name, "creating chat row");
        let response = self
            .request(reqwest::Method::POST, CHATS_TABLE)
            .header("Prefer", "return=representation")
            .json(&NewChatRow {
                user_id: owner_id,
                name: &meta.name,
                agent: &meta.agent,
                model: &meta.model,
            })
            .send()
            .await?;
        let row: ChatRow = Self::single_row(response).await?;
        Ok(row.into())
    }

    async fn insert_message(
        &self,
        conversation_id: &str,
        text: &str,
        sender: Sender,
        sources: &[SourceRef],
    ) -> Result<Message, StorageError> {
        let response = self
            .request(reqwest::Method::POST, MESSAGES_TABLE)
            .header("Prefer", "return=representation")
            .json(&NewMessageRow {
                chat_id: conversation_id,
                message: text,
                message_type: sender.as_str(),
                sources,
            })
            .send()
            .await?;
        let row: MessageRow = Self::single_row(response).await?;
        Ok(row.into())
    }

    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StorageError> {
        let chat_filter = format!("eq.{conversation_id}");
        let response = self
            .request(reqwest::Method::GET, MESSAGES_TABLE)
            .query(&[
                ("select", "*"),
                ("chat_id", chat_filter.as_str()),
                ("order", "created_at.asc,id.asc"),
            ])
            .send()
            .await?;
        let rows: Vec<MessageRow> = Self::check(response).await?.json().await?;
        Ok(rows.into_iter().map(Message::from).collect())
    }

    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>, StorageError> {
        let owner_filter = format!("eq.{owner_id}");
        let response = self
            .request(reqwest::Method::GET, CHATS_TABLE)
            .query(&[
                ("select", "*"),
                ("user_id", owner_filter.as_str()),
                ("order", "created_at.desc"),
            ])
            .send()
            .await?;
        let rows: Vec<ChatRow> = Self::check(response).await?.json().await?;
        Ok(rows.into_iter().map(Conversation::from).collect())
    }

    async fn delete_messages(&self, conversation_id: &str) -> Result<(), StorageError> {
        let chat_filter = format!("eq.{conversation_id}");
        let response = self
            .request(reqwest::Method::DELETE, MESSAGES_TABLE)
            .query(&[("chat_id", chat_filter.as_str())])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_conversation_record(&self, conversation_id: &str) -> Result<(), StorageError> {
        let id_filter = format!("eq.{conversation_id}");
        let response = self
            .request(reqwest::Method::DELETE, CHATS_TABLE)
            .query(&[("id", id_filter.as_str())])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::{serve_http, serve_once, CannedResponse};

    fn storage(base_url: String) -> RestChatStorage {
        RestChatStorage::new(reqwest::Client::new(), base_url, "anon-key")
    }

    #[tokio::test]
    async fn create_conversation_posts_chat_row() {
        let (base_url, server) = serve_once(CannedResponse::status(
            "201 Created",
            r#"[{"id":42,"user_id":"u1","name":"What is X?","agent":"nextjs","model":"llama3","created_at":"2024-05-01T10:00:00+00:00"}]"#,
        ))
        .await;

        let meta = ConversationMeta::from_first_query("What is X?", "nextjs", "llama3");
        let conversation = storage(base_url)
            .create_conversation("u1", &meta)
            .await
            .expect("created");
        assert_eq!(conversation.remote_id.as_deref(), Some("42"));
        assert_eq!(conversation.name, "What is X?");

        let request = server.await.expect("server");
        assert!(request.starts_with("POST /rest/v1/chats HTTP/1.1"));
        let lower = request.to_ascii_lowercase();
        assert!(lower.contains("apikey: anon-key"));
        assert!(lower.contains("prefer: return=representation"));
        assert!(request.contains(r#""user_id":"u1""#));
    }

    #[tokio::test]
    async fn insert_message_sends_sources_with_the_row() {
        let (base_url, server) = serve_once(CannedResponse::status(
            "201 Created",
            r#"[{"id":"m-1","chat_id":"c-1","message":"Answer","message_type":"bot","sources":[{"url":"u","title":"t","content_preview":"p"}]}]"#,
        ))
        .await;

        let sources = vec![SourceRef::new("u", "t", "p")];
        let message = storage(base_url)
            .insert_message("c-1", "Answer", Sender::Bot, &sources)
            .await
            .expect("inserted");
        assert_eq!(message.remote_id.as_deref(), Some("m-1"));
        assert_eq!(message.sources, sources);

        let request = server.await.expect("server");
        assert!(request.contains(r#""message_type":"bot""#));
        assert!(request.contains(r#""sources":[{"#));
    }

    #[tokio::test]
    async fn user_message_row_has_no_sources_column() {
        let (base_url, server) = serve_once(CannedResponse::status(
            "201 Created",
            r#"[{"id":7,"chat_id":"c-1","message":"Question","message_type":"user"}]"#,
        ))
        .await;

        let message = storage(base_url)
            .insert_message("c-1", "Question", Sender::User, &[])
            .await
            .expect("inserted");
        assert_eq!(message.remote_id.as_deref(), Some("7"));
        assert!(message.sources.is_empty());

        let request = server.await.expect("server");
        assert!(request.contains(r#""message_type":"user""#));
        assert!(!request.contains("sources"));
    }

    #[tokio::test]
    async fn history_is_ordered_by_time_then_id() {
        let (base_url, server) = serve_once(CannedResponse::ok("[]")).await;

        let history = storage(base_url)
            .fetch_messages("c-1")
            .await
            .expect("history");
        assert!(history.is_empty());

        let request = server.await.expect("server");
        assert!(request.starts_with("GET /rest/v1/messages?"));
        assert!(request.contains("chat_id=eq.c-1"));
        assert!(request.contains("order=created_at.asc%2Cid.asc"));
    }

    #[tokio::test]
    async fn delete_issues_two_requests_in_order() {
        let (base_url, server) = serve_http(vec![
            CannedResponse::status("204 No Content", ""),
            CannedResponse::status("204 No Content", ""),
        ])
        .await;
        let backend = storage(base_url);

        backend.delete_messages("c-1").await.expect("messages");
        backend.delete_conversation_record("c-1").await.expect("chat");

        let requests = server.await.expect("server");
        assert!(requests[0].starts_with("DELETE /rest/v1/messages?chat_id=eq.c-1 "));
        assert!(requests[1].starts_with("DELETE /rest/v1/chats?id=eq.c-1 "));
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let (base_url, _server) =
            serve_once(CannedResponse::status("401 Unauthorized", r#"{"message":"JWT"}"#)).await;
        let err = storage(base_url)
            .list_conversations("u1")
            .await
            .expect_err("unauthorized");
        assert!(matches!(err, StorageError::Status { status: 401, .. }));
    }
}
