use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;

use crate::common::Message;
use crate::error::ApiError;

/// REST collaborators the session depends on.
#[async_trait]
pub trait ChatApi: Send + Sync + 'static {
    /// The initial page of a conversation, oldest first.
    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError>;
    /// Persist a new message and return the server's copy.
    async fn send_message(&self, conversation_id: &str, content: &str) -> Result<Message, ApiError>;
    async fn delete_message(&self, message_id: &str) -> Result<(), ApiError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewMessage<'a> {
    content: &'a str,
    chat_id: &'a str,
}

/// `ChatApi` over the server's `/api/message` routes with a bearer token.
#[derive(Clone)]
pub struct HttpChatApi {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpChatApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn messages_url(&self) -> String {
        format!("{}/api/message", self.base_url)
    }

    pub fn message_url(&self, id: &str) -> String {
        format!("{}/api/message/{id}", self.base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.token)
    }
}

async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError> {
        let request = self.client.get(self.message_url(conversation_id));
        let response = check(self.authorized(request).send().await?).await?;
        let messages: Vec<Message> = response.json().await?;
        log::debug!("Fetched {} messages for chat {conversation_id}", messages.len());
        Ok(messages)
    }

    async fn send_message(&self, conversation_id: &str, content: &str) -> Result<Message, ApiError> {
        let body = NewMessage {
            content,
            chat_id: conversation_id,
        };
        let request = self.client.post(self.messages_url()).json(&body);
        let response = check(self.authorized(request).send().await?).await?;
        Ok(response.json().await?)
    }

    async fn delete_message(&self, message_id: &str) -> Result<(), ApiError> {
        let request = self.client.delete(self.message_url(message_id));
        check(self.authorized(request).send().await?).await?;
        Ok(())
    }
}
