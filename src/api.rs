//! REST access to the Reelio backend.
//!
//! Each concern the client needs from the backend has its own trait so the
//! state holders can be driven by in-memory fakes in tests. [`ApiClient`]
//! implements all of them over HTTP.
//!
//! Unless a method says otherwise, it fails with [`ClientError::Http`] on a
//! non-2xx answer and with the transport or decode error otherwise.

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::models::{Comment, Conversation, Message, Post, Reel, SearchResults, Story, User};
use crate::optimistic::ToggleTarget;

#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTicket {
    pub signature: String,
    pub timestamp: i64,
    pub api_key: String,
    pub cloud_name: String,
    #[serde(default)]
    pub folder: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Deserialize)]
struct MeResponse {
    user: User,
}

#[derive(Deserialize)]
struct ReelsPage {
    #[serde(default)]
    reels: Vec<Reel>,
}

/// List responses arrive either bare or wrapped in a named field.
#[derive(Deserialize)]
#[serde(untagged)]
enum PostsPage {
    Wrapped { posts: Vec<Post> },
    Bare(Vec<Post>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoriesList {
    Wrapped { stories: Vec<Story> },
    Bare(Vec<Story>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CommentResponse {
    Wrapped { comment: Comment },
    Bare(Comment),
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct TextBody<'a> {
    text: &'a str,
}

#[async_trait]
pub trait AuthApi: Send + Sync {
    /// # Errors
    ///
    /// [`ClientError::Validation`] for missing credentials, otherwise an HTTP, transport or decode failure.
    async fn login(&self, email: &str, password: &str) -> Result<AuthResponse>;
    /// Validates `token` and returns the user it belongs to.
    ///
    /// # Errors
    ///
    /// An unauthorized HTTP error when the token is no longer valid.
    async fn me(&self, token: &str) -> Result<User>;
    /// Token to attach to subsequent authenticated calls.
    async fn use_token(&self, _token: Option<&str>) {}
}

#[async_trait]
pub trait ChatApi: Send + Sync {
    /// # Errors
    ///
    /// HTTP, transport or decode failure.
    async fn conversations(&self) -> Result<Vec<Conversation>>;
    /// # Errors
    ///
    /// Fails with the HTTP status when the conversation cannot be read.
    async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>>;
    /// # Errors
    ///
    /// HTTP, transport or decode failure.
    async fn edit_message(&self, message_id: &str, text: &str) -> Result<Message>;
    /// # Errors
    ///
    /// Fails when the backend refuses the delete; nothing local changes.
    async fn delete_message(&self, message_id: &str) -> Result<()>;
}

#[async_trait]
pub trait ToggleApi: Send + Sync {
    /// # Errors
    ///
    /// The backend error; callers roll their optimistic state back on it.
    async fn set_toggle(&self, target: &ToggleTarget, active: bool) -> Result<()>;
}

#[async_trait]
pub trait FeedApi: Send + Sync {
    /// # Errors
    ///
    /// HTTP, transport or decode failure.
    async fn reels_page(&self, page: u32, exclude: &[String]) -> Result<Vec<Reel>>;
}

/// Where a comment is posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentTarget {
    Post(String),
    Reel(String),
}

impl CommentTarget {
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            CommentTarget::Post(id) => format!("posts/{id}/comments"),
            CommentTarget::Reel(id) => format!("reels/{id}/comments"),
        }
    }
}

#[async_trait]
pub trait PostsApi: Send + Sync {
    /// # Errors
    ///
    /// HTTP, transport or decode failure.
    async fn posts_page(&self, page: u32) -> Result<Vec<Post>>;
    /// # Errors
    ///
    /// HTTP, transport or decode failure.
    async fn stories(&self) -> Result<Vec<Story>>;
    /// # Errors
    ///
    /// HTTP error carrying the backend's `message`, e.g. for an empty comment.
    async fn add_comment(&self, target: &CommentTarget, text: &str) -> Result<Comment>;
}

#[async_trait]
pub trait UploadApi: Send + Sync {
    /// # Errors
    ///
    /// Fails when the backend will not sign uploads for `folder`.
    async fn upload_ticket(&self, folder: &str) -> Result<UploadTicket>;
}

pub struct ApiClient {
    http: Client,
    config: ClientConfig,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be built, e.g. without a TLS backend.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(ApiClient {
            http,
            config,
            token: RwLock::new(None),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    pub async fn set_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }

    pub async fn has_token(&self) -> bool {
        self.token.read().await.is_some()
    }

    async fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = self.config.endpoint(path);
        debug!("{method} {url}");
        let builder = self.http.request(method, url);
        match self.token.read().await.as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let builder = self.request(Method::GET, path).await.query(query);
        read_json(builder.send().await?).await
    }

    pub(crate) async fn send_json<B, T>(&self, method: Method, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let builder = self.request(method, path).await.json(body);
        read_json(builder.send().await?).await
    }

    pub(crate) async fn send_empty(&self, method: Method, path: &str) -> Result<()> {
        check(self.request(method, path).await.send().await?).await?;
        Ok(())
    }

    /// # Errors
    ///
    /// [`ClientError::Validation`] for a blank query.
    pub async fn search(&self, query: &str) -> Result<SearchResults> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ClientError::validation("Search query cannot be empty"));
        }
        self.get_json("search", &[("q", query.to_string())]).await
    }
}

#[async_trait]
impl AuthApi for ApiClient {
    async fn login(&self, email: &str, password: &str) -> Result<AuthResponse> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(ClientError::validation("Email and password are required"));
        }
        self.send_json(Method::POST, "auth/login", &Credentials { email: email.trim(), password })
            .await
    }

    async fn me(&self, token: &str) -> Result<User> {
        let response = self
            .http
            .get(self.config.endpoint("auth/me"))
            .bearer_auth(token)
            .timeout(self.config.validate_timeout)
            .send()
            .await?;
        let me: MeResponse = read_json(response).await?;
        Ok(me.user)
    }

    async fn use_token(&self, token: Option<&str>) {
        self.set_token(token.map(str::to_string)).await;
    }
}

#[async_trait]
impl ChatApi for ApiClient {
    async fn conversations(&self) -> Result<Vec<Conversation>> {
        self.get_json("messages/conversations", &[]).await
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.get_json(&format!("messages/{conversation_id}"), &[]).await
    }

    async fn edit_message(&self, message_id: &str, text: &str) -> Result<Message> {
        self.send_json(Method::PUT, &format!("messages/{message_id}"), &TextBody { text })
            .await
    }

    async fn delete_message(&self, message_id: &str) -> Result<()> {
        self.send_empty(Method::DELETE, &format!("messages/{message_id}")).await
    }
}

#[async_trait]
impl ToggleApi for ApiClient {
    async fn set_toggle(&self, target: &ToggleTarget, active: bool) -> Result<()> {
        let method = if active { Method::POST } else { Method::DELETE };
        self.send_empty(method, &target.path()).await
    }
}

#[async_trait]
impl FeedApi for ApiClient {
    async fn reels_page(&self, page: u32, exclude: &[String]) -> Result<Vec<Reel>> {
        let page: ReelsPage = self.get_json("reels", &reels_query(page, exclude)).await?;
        Ok(page.reels)
    }
}

#[async_trait]
impl PostsApi for ApiClient {
    async fn posts_page(&self, page: u32) -> Result<Vec<Post>> {
        let page: PostsPage = self.get_json("posts", &[("page", page.to_string())]).await?;
        Ok(match page {
            PostsPage::Wrapped { posts } | PostsPage::Bare(posts) => posts,
        })
    }

    async fn stories(&self) -> Result<Vec<Story>> {
        let list: StoriesList = self.get_json("stories", &[]).await?;
        Ok(match list {
            StoriesList::Wrapped { stories } | StoriesList::Bare(stories) => stories,
        })
    }

    async fn add_comment(&self, target: &CommentTarget, text: &str) -> Result<Comment> {
        let response: CommentResponse = self.send_json(Method::POST, &target.path(), &TextBody { text }).await?;
        Ok(match response {
            CommentResponse::Wrapped { comment } | CommentResponse::Bare(comment) => comment,
        })
    }
}

#[async_trait]
impl UploadApi for ApiClient {
    async fn upload_ticket(&self, folder: &str) -> Result<UploadTicket> {
        self.get_json("upload/signature", &[("folder", folder.to_string())]).await
    }
}

pub(crate) fn reels_query(page: u32, exclude: &[String]) -> Vec<(&'static str, String)> {
    let mut query = vec![("page", page.to_string()), ("random", "true".to_string())];
    if !exclude.is_empty() {
        query.push(("exclude", exclude.join(",")));
    }
    query
}

pub(crate) async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let err = error_from_body(status, &body);
    warn!("{} -> {err}", status.as_u16());
    Err(err)
}

pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let response = check(response).await?;
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn error_from_body(status: StatusCode, body: &str) -> ClientError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Request failed").to_string());
    ClientError::Http {
        status: status.as_u16(),
        message,
    }
}
