//! [`ChatBackend`] over the hosted backend's REST API and realtime websocket.
//!
//! Tables are reached through the PostgREST-style `/rest/v1` endpoints, auth
//! through `/auth/v1`, and realtime inserts through the Phoenix channel at
//! `/realtime/v1/websocket`. Every request carries the project's anon key; once
//! signed in, requests also carry the session's bearer token.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod realtime;
mod records;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use campus_backend_traits::{
    AuthSession, BackendError, BackendResult, ChatBackend, ConversationScope, MessageFilter,
    MessageRow, NewMessage, Subscription, UserDisplayInfo,
};
use parking_lot::RwLock;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::{Notify, mpsc};

use records::{AuthUser, MessageRecord, NewMessageRecord, ProfileRecord, TokenResponse};

/// Phoenix drops channels that stay silent for longer than ~30s.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Connection settings for one backend project
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Project base url, e.g. `https://abc.example.co`
    pub url: String,
    /// Public anon key sent as `apikey`
    pub anon_key: String,
    /// Realtime heartbeat period
    pub heartbeat_interval: Duration,
}

impl RestConfig {
    /// Settings with the default heartbeat
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        let mut url = url.into().trim().to_string();
        while url.ends_with('/') {
            url.pop();
        }
        Self {
            url,
            anon_key: anon_key.into().trim().to_string(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// REST + websocket backend
#[derive(Debug)]
pub struct RestBackend {
    client: reqwest::Client,
    config: RestConfig,
    realtime_url: String,
    session: Arc<RwLock<Option<AuthSession>>>,
    next_channel_id: AtomicU64,
}

impl RestBackend {
    /// Validate `config` and build the HTTP client
    pub fn new(config: RestConfig) -> BackendResult<Self> {
        if config.anon_key.is_empty() {
            return Err(BackendError::Transport("anon key is empty".to_string()));
        }
        let realtime_url = realtime::realtime_url(&config.url, &config.anon_key)?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| BackendError::Transport(format!("http client: {e}")))?;
        Ok(Self {
            client,
            config,
            realtime_url,
            session: Arc::new(RwLock::new(None)),
            next_channel_id: AtomicU64::new(1),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.config.url)
    }

    fn access_token(&self) -> BackendResult<String> {
        self.session
            .read()
            .as_ref()
            .map(|s| s.access_token.clone())
            .ok_or(BackendError::Unauthenticated)
    }

    /// Attach `apikey` and the bearer token (the anon key when signed out).
    fn authorize(&self, req: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        let bearer = token.unwrap_or(&self.config.anon_key);
        req.header("apikey", &self.config.anon_key)
            .bearer_auth(bearer)
    }

    async fn fetch_user(&self, access_token: &str) -> BackendResult<AuthUser> {
        let req = self.client.get(self.endpoint("/auth/v1/user"));
        let resp = send(self.authorize(req, Some(access_token))).await?;
        decode(resp).await
    }
}

async fn send(req: RequestBuilder) -> BackendResult<Response> {
    let resp = req.send().await.map_err(|e| {
        if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else {
            BackendError::Transport(e.to_string())
        }
    })?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    Err(status_error(status, text))
}

fn status_error(status: StatusCode, text: String) -> BackendError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Unauthenticated,
        StatusCode::NOT_FOUND => BackendError::NotFound(text),
        _ => BackendError::Rejected {
            status: status.as_u16(),
            message: text,
        },
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> BackendResult<T> {
    resp.json::<T>()
        .await
        .map_err(|e| BackendError::Decode(e.to_string()))
}

/// PostgREST query parameters for a history filter.
fn filter_params(filter: &MessageFilter) -> Vec<(&'static str, String)> {
    let mut params = vec![("select", "*".to_string())];
    match filter {
        MessageFilter::Direct {
            sender_id,
            recipient_id,
        } => {
            params.push(("sender_id", format!("eq.{sender_id}")));
            params.push(("receiver_id", format!("eq.{recipient_id}")));
            params.push(("club_id", "is.null".to_string()));
        }
        MessageFilter::Club { club_id } => {
            params.push(("club_id", format!("eq.{club_id}")));
            params.push(("order", "created_at.desc".to_string()));
        }
    }
    params
}

#[async_trait]
impl ChatBackend for RestBackend {
    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<AuthSession> {
        let req = self
            .client
            .post(self.endpoint("/auth/v1/token"))
            .query(&[("grant_type", "password")])
            .json(&serde_json::json!({ "email": email, "password": password }));
        let resp = send(self.authorize(req, None)).await?;
        let session: AuthSession = decode::<TokenResponse>(resp).await?.into();
        tracing::info!(user_id = %session.user_id, "signed in");
        *self.session.write() = Some(session.clone());
        Ok(session)
    }

    async fn restore_session(&self, access_token: &str) -> BackendResult<AuthSession> {
        let user = self.fetch_user(access_token).await?;
        let session = AuthSession {
            user_id: user.id,
            access_token: access_token.to_string(),
            refresh_token: None,
        };
        *self.session.write() = Some(session.clone());
        Ok(session)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        let taken = self.session.write().take();
        let Some(session) = taken else {
            return Ok(());
        };
        let req = self.client.post(self.endpoint("/auth/v1/logout"));
        send(self.authorize(req, Some(&session.access_token))).await?;
        Ok(())
    }

    async fn current_user(&self) -> BackendResult<String> {
        let token = self.access_token()?;
        Ok(self.fetch_user(&token).await?.id)
    }

    async fn query_messages(&self, filter: &MessageFilter) -> BackendResult<Vec<MessageRow>> {
        let token = self.access_token()?;
        let req = self
            .client
            .get(self.endpoint("/rest/v1/messages"))
            .query(&filter_params(filter));
        let resp = send(self.authorize(req, Some(&token))).await?;
        let records: Vec<MessageRecord> = decode(resp).await?;
        Ok(records.into_iter().map(MessageRow::from).collect())
    }

    async fn insert_message(&self, message: NewMessage) -> BackendResult<MessageRow> {
        let token = self.access_token()?;
        let req = self
            .client
            .post(self.endpoint("/rest/v1/messages"))
            .header("Prefer", "return=representation")
            .json(&NewMessageRecord::from(&message));
        let resp = send(self.authorize(req, Some(&token))).await?;
        let mut records: Vec<MessageRecord> = decode(resp).await?;
        let record = records
            .pop()
            .ok_or_else(|| BackendError::Decode("insert returned no row".to_string()))?;
        Ok(record.into())
    }

    async fn subscribe(&self, scope: &ConversationScope) -> BackendResult<Subscription> {
        let token = self.access_token()?;
        let ws = realtime::open_channel(&self.realtime_url, scope, &token).await?;
        let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!(id, topic = %realtime::topic(scope), "realtime channel joined");

        let (tx, rx) = mpsc::unbounded_channel();
        let stop = Arc::new(Notify::new());
        tokio::spawn(realtime::run_channel(
            ws,
            scope.clone(),
            tx,
            stop.clone(),
            self.config.heartbeat_interval,
        ));
        Ok(Subscription::new(id, rx, move || stop.notify_one()))
    }

    async fn resolve_user_display_info(&self, user_id: &str) -> BackendResult<UserDisplayInfo> {
        let token = self.access_token()?;
        let req = self
            .client
            .get(self.endpoint("/rest/v1/profiles"))
            .query(&[
                ("select", "full_name,avatar_url".to_string()),
                ("id", format!("eq.{user_id}")),
            ]);
        let resp = send(self.authorize(req, Some(&token))).await?;
        let mut profiles: Vec<ProfileRecord> = decode(resp).await?;
        profiles
            .pop()
            .map(UserDisplayInfo::from)
            .ok_or_else(|| BackendError::NotFound(format!("profile {user_id}")))
    }
}
