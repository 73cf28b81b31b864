//! HTTP API client for the conversation endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use dealflow_shared::{
    ApiError, Conversation, ConversationDetail, ConversationId, Listing, Message,
    SendMessageRequest, UnreadCount,
};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::auth_session::TokenSource;

/// Request/response calls the messaging core depends on.
#[async_trait]
pub trait MessagingApi: Send + Sync + 'static {
    /// `GET /conversations/?search=<term>`
    async fn list_conversations(&self, search: &str) -> Result<Vec<Conversation>, ApiError>;

    /// `GET /conversations/{id}/`
    async fn get_conversation(&self, id: &ConversationId) -> Result<ConversationDetail, ApiError>;

    /// `POST /conversations/{id}/mark_as_read/`
    async fn mark_as_read(&self, id: &ConversationId) -> Result<(), ApiError>;

    /// `GET /conversations/unread_count/`
    async fn unread_count(&self) -> Result<u32, ApiError>;

    /// `POST /messages/`
    async fn send_message(&self, request: &SendMessageRequest) -> Result<Message, ApiError>;
}

/// HTTP client making bearer-authenticated requests to the backend.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            tokens,
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let token = self.tokens.token().ok_or(ApiError::NotAuthenticated)?;
        Ok(self
            .client
            .request(method, self.url(path))
            .bearer_auth(token)
            .header("Accept", "application/json"))
    }

    async fn execute(rb: RequestBuilder) -> Result<String, ApiError> {
        let resp = rb.send().await.map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();

        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(ApiError::Http { status, body: text });
        }

        Ok(text)
    }

    /// Make an authenticated GET request
    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let text = Self::execute(self.request(Method::GET, path)?).await?;
        serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }

    /// Make an authenticated POST request with JSON body
    pub async fn post_json<TReq: Serialize + ?Sized, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let body_bytes =
            serde_json::to_vec(body).map_err(|e| ApiError::Deserialize(e.to_string()))?;

        let rb = self
            .request(Method::POST, path)?
            .body(body_bytes)
            .header("Content-Type", "application/json");
        let text = Self::execute(rb).await?;

        if text.is_empty() {
            serde_json::from_str("null").map_err(|e| ApiError::Deserialize(e.to_string()))
        } else {
            serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
        }
    }
}

#[async_trait]
impl MessagingApi for ApiClient {
    async fn list_conversations(&self, search: &str) -> Result<Vec<Conversation>, ApiError> {
        let search = search.trim();
        let path = if search.is_empty() {
            "/conversations/".to_string()
        } else {
            format!("/conversations/?search={}", urlencoding::encode(search))
        };
        let listing: Listing<Conversation> = self.get_json(&path).await?;
        Ok(listing.into_vec())
    }

    async fn get_conversation(&self, id: &ConversationId) -> Result<ConversationDetail, ApiError> {
        self.get_json(&format!(
            "/conversations/{}/",
            urlencoding::encode(id.as_str())
        ))
        .await
    }

    async fn mark_as_read(&self, id: &ConversationId) -> Result<(), ApiError> {
        // The response body carries nothing we need.
        let _: serde_json::Value = self
            .post_json(
                &format!(
                    "/conversations/{}/mark_as_read/",
                    urlencoding::encode(id.as_str())
                ),
                &serde_json::json!({}),
            )
            .await?;
        Ok(())
    }

    async fn unread_count(&self) -> Result<u32, ApiError> {
        let count: UnreadCount = self.get_json("/conversations/unread_count/").await?;
        Ok(count.unread_count)
    }

    async fn send_message(&self, request: &SendMessageRequest) -> Result<Message, ApiError> {
        self.post_json("/messages/", request).await
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
