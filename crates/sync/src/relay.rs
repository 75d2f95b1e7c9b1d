// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Client side of the local relay service.
//!
//! The relay persists queued mutations when no remote store is configured and
//! fans notifications and SMS out to the clinic's roles.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use reqwest::{Client, Url};
use serde::{de::DeserializeOwned, Serialize};
use tm_core::config::RelayConfig;
use tm_core::protocol::{
    LoginRequest, NotifyRequest, QueueAccepted, QueueListing, SmsRequest,
};
use tm_core::{Consultation, Mutation, OutboxItem, RecordSnapshot};

/// Error type for relay operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RelayError {
    /// The relay could not be reached.
    #[error("relay unreachable: {0}")]
    Unreachable(String),

    /// The relay answered with a non-2xx status.
    #[error("relay returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The relay's response could not be decoded.
    #[error("invalid relay response: {0}")]
    Decode(String),
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// Relay endpoints used by the clinic contexts.
pub trait Relay: Send + Sync {
    /// `POST /queue`: hands over pending outbox items in one batch.
    fn post_queue(
        &self,
        items: Vec<OutboxItem>,
    ) -> Pin<Box<dyn Future<Output = RelayResult<QueueAccepted>> + Send + '_>>;

    /// `GET /queue`: consultations the relay holds.
    fn get_queue(
        &self,
    ) -> Pin<Box<dyn Future<Output = RelayResult<Vec<Consultation>>> + Send + '_>>;

    /// `POST /notify`.
    fn notify(
        &self,
        req: NotifyRequest,
    ) -> Pin<Box<dyn Future<Output = RelayResult<()>> + Send + '_>>;

    /// `POST /sms`.
    fn sms(&self, req: SmsRequest) -> Pin<Box<dyn Future<Output = RelayResult<()>> + Send + '_>>;

    /// `POST /login`: records a sign-in for the admin audit list.
    fn login(
        &self,
        req: LoginRequest,
    ) -> Pin<Box<dyn Future<Output = RelayResult<()>> + Send + '_>>;
}

/// HTTP relay client.
pub struct HttpRelay {
    client: Client,
    base: Url,
}

impl HttpRelay {
    pub fn new(config: &RelayConfig) -> crate::Result<Self> {
        let mut base = Url::parse(&config.url)
            .map_err(|e| crate::Error::InvalidInput(format!("relay url: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(HttpRelay { client, base })
    }

    fn url(&self, route: &str) -> RelayResult<Url> {
        self.base
            .join(route)
            .map_err(|e| RelayError::Decode(format!("bad relay route {route}: {e}")))
    }

    async fn post<B: Serialize + Sync>(&self, route: &str, body: &B) -> RelayResult<Vec<u8>> {
        let response = self
            .client
            .post(self.url(route)?)
            .json(body)
            .send()
            .await
            .map_err(|e| RelayError::Unreachable(e.to_string()))?;
        read_body(response).await
    }

    async fn get<T: DeserializeOwned>(&self, route: &str) -> RelayResult<T> {
        let response = self
            .client
            .get(self.url(route)?)
            .send()
            .await
            .map_err(|e| RelayError::Unreachable(e.to_string()))?;
        decode(&read_body(response).await?)
    }
}

async fn read_body(response: reqwest::Response) -> RelayResult<Vec<u8>> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| RelayError::Unreachable(e.to_string()))?;
    if !status.is_success() {
        return Err(RelayError::Status {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&body).into_owned(),
        });
    }
    Ok(body.to_vec())
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> RelayResult<T> {
    serde_json::from_slice(body).map_err(|e| RelayError::Decode(e.to_string()))
}

impl Relay for HttpRelay {
    fn post_queue(
        &self,
        items: Vec<OutboxItem>,
    ) -> Pin<Box<dyn Future<Output = RelayResult<QueueAccepted>> + Send + '_>> {
        Box::pin(async move { decode(&self.post("queue", &items).await?) })
    }

    fn get_queue(
        &self,
    ) -> Pin<Box<dyn Future<Output = RelayResult<Vec<Consultation>>> + Send + '_>> {
        Box::pin(async move {
            let listing: QueueListing = self.get("queue").await?;
            Ok(listing.items)
        })
    }

    fn notify(
        &self,
        req: NotifyRequest,
    ) -> Pin<Box<dyn Future<Output = RelayResult<()>> + Send + '_>> {
        Box::pin(async move {
            self.post("notify", &req).await?;
            Ok(())
        })
    }

    fn sms(&self, req: SmsRequest) -> Pin<Box<dyn Future<Output = RelayResult<()>> + Send + '_>> {
        Box::pin(async move {
            self.post("sms", &req).await?;
            Ok(())
        })
    }

    fn login(
        &self,
        req: LoginRequest,
    ) -> Pin<Box<dyn Future<Output = RelayResult<()>> + Send + '_>> {
        Box::pin(async move {
            self.post("login", &req).await?;
            Ok(())
        })
    }
}

/// In-process relay recording everything it receives.
///
/// Clones share state.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    inner: Arc<Mutex<MemoryRelayState>>,
}

#[derive(Default)]
struct MemoryRelayState {
    offline: bool,
    queue: Vec<OutboxItem>,
    notifications: Vec<NotifyRequest>,
    sms: Vec<SmsRequest>,
    logins: Vec<LoginRequest>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryRelayState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state().offline = !reachable;
    }

    /// Items received through `POST /queue`.
    pub fn queued(&self) -> Vec<OutboxItem> {
        self.state().queue.clone()
    }

    pub fn notifications(&self) -> Vec<NotifyRequest> {
        self.state().notifications.clone()
    }

    pub fn sms_sent(&self) -> Vec<SmsRequest> {
        self.state().sms.clone()
    }

    pub fn logins(&self) -> Vec<LoginRequest> {
        self.state().logins.clone()
    }

    fn online(&self) -> RelayResult<MutexGuard<'_, MemoryRelayState>> {
        let state = self.state();
        if state.offline {
            return Err(RelayError::Unreachable("relay offline".into()));
        }
        Ok(state)
    }
}

impl Relay for MemoryRelay {
    fn post_queue(
        &self,
        items: Vec<OutboxItem>,
    ) -> Pin<Box<dyn Future<Output = RelayResult<QueueAccepted>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.online()?;
            let accepted = items.len();
            state.queue.extend(items);
            Ok(QueueAccepted { ok: true, accepted })
        })
    }

    fn get_queue(
        &self,
    ) -> Pin<Box<dyn Future<Output = RelayResult<Vec<Consultation>>> + Send + '_>> {
        Box::pin(async move {
            let state = self.online()?;
            Ok(state
                .queue
                .iter()
                .filter_map(|item| match &item.mutation {
                    Mutation::Create {
                        record: RecordSnapshot::Consultations(c),
                    } => Some(c.clone()),
                    _ => None,
                })
                .collect())
        })
    }

    fn notify(
        &self,
        req: NotifyRequest,
    ) -> Pin<Box<dyn Future<Output = RelayResult<()>> + Send + '_>> {
        Box::pin(async move {
            self.online()?.notifications.push(req);
            Ok(())
        })
    }

    fn sms(&self, req: SmsRequest) -> Pin<Box<dyn Future<Output = RelayResult<()>> + Send + '_>> {
        Box::pin(async move {
            self.online()?.sms.push(req);
            Ok(())
        })
    }

    fn login(
        &self,
        req: LoginRequest,
    ) -> Pin<Box<dyn Future<Output = RelayResult<()>> + Send + '_>> {
        Box::pin(async move {
            self.online()?.logins.push(req);
            Ok(())
        })
    }
}

#[cfg(test)]
#[path = "relay_tests.rs"]
mod tests;
