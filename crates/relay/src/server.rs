// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP server implementation.
//!
//! Every response body carries `ok`; failures answer with
//! `{"ok": false, "error": "..."}` and a matching status code.

use std::net::SocketAddr;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use tm_core::protocol::{
    ConsultationRequest, Created, DataList, ErrorBody, LoginList, LoginRequest, MessageRequest,
    NotifyRequest, QueueAccepted, QueueListing, QueueRequest, ScheduleRequest, SmsRequest,
};
use tm_core::Role;

use crate::error::Error;
use crate::state::{MessageFilter, RelayState};

/// Run the relay on the given address until the process exits.
pub async fn run(addr: SocketAddr, state: RelayState) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on: {}", listener.local_addr()?);
    serve(listener, state).await?;
    Ok(())
}

/// Serve requests on an already bound listener.
pub async fn serve(listener: TcpListener, state: RelayState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}

/// All relay routes.
pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/queue", get(list_queue).post(post_queue))
        .route("/notify", post(notify))
        .route("/notifications", get(list_notifications))
        .route("/sms", post(sms))
        .route("/login", post(login))
        .route("/admin/logins", get(list_logins))
        .route("/consultation", post(create_consultation))
        .route("/consultations", get(list_consultations))
        .route("/message", post(post_message))
        .route("/messages", get(list_messages))
        .route("/schedule", post(schedule))
        .with_state(state)
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("request failed: {}", self);
        }
        (status, Json(ErrorBody::new(self.to_string()))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, Error>;

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

async fn post_queue(
    State(state): State<RelayState>,
    Json(items): Json<QueueRequest>,
) -> ApiResult<QueueAccepted> {
    let received = items.len();
    let accepted = state.apply_queue(items).await?;
    debug!(received, accepted, "queue applied");
    Ok(Json(QueueAccepted { ok: true, accepted }))
}

async fn list_queue(State(state): State<RelayState>) -> ApiResult<QueueListing> {
    let items = state.consultations().await?;
    Ok(Json(QueueListing { ok: true, items }))
}

async fn notify(
    State(state): State<RelayState>,
    Json(req): Json<NotifyRequest>,
) -> ApiResult<Created> {
    let role = req.role;
    let id = state.notify(req).await?;
    debug!(id, %role, "notification stored");
    Ok(Json(Created::new(id)))
}

#[derive(Debug, Deserialize)]
struct RoleQuery {
    role: Option<Role>,
}

async fn list_notifications(
    State(state): State<RelayState>,
    Query(query): Query<RoleQuery>,
) -> ApiResult<DataList<tm_core::protocol::NotificationRecord>> {
    let data = state.notifications(query.role).await?;
    Ok(Json(DataList { ok: true, data }))
}

async fn sms(State(state): State<RelayState>, Json(req): Json<SmsRequest>) -> ApiResult<Created> {
    // No SMS gateway is wired in; the message is recorded for delivery.
    let id = state.sms(req).await?;
    debug!(id, "sms queued");
    Ok(Json(Created::new(id)))
}

async fn login(
    State(state): State<RelayState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Created> {
    let id = state.record_login(req).await?;
    Ok(Json(Created::new(id)))
}

async fn list_logins(State(state): State<RelayState>) -> ApiResult<LoginList> {
    let rows = state.logins().await?;
    Ok(Json(LoginList { ok: true, rows }))
}

async fn create_consultation(
    State(state): State<RelayState>,
    Json(req): Json<ConsultationRequest>,
) -> ApiResult<Created> {
    let (id, c) = state.create_consultation(req).await?;
    info!(id, code = %c.consultation_code, "consultation stored");
    Ok(Json(Created {
        consultation_code: Some(c.consultation_code.to_string()),
        ..Created::new(id)
    }))
}

async fn list_consultations(
    State(state): State<RelayState>,
) -> ApiResult<DataList<tm_core::Consultation>> {
    let data = state.consultations().await?;
    Ok(Json(DataList { ok: true, data }))
}

async fn post_message(
    State(state): State<RelayState>,
    Json(req): Json<MessageRequest>,
) -> ApiResult<Created> {
    let (id, ts) = state.post_message(req).await?;
    Ok(Json(Created {
        ts: Some(ts),
        ..Created::new(id)
    }))
}

async fn list_messages(
    State(state): State<RelayState>,
    Query(filter): Query<MessageFilter>,
) -> ApiResult<DataList<tm_core::protocol::ChatMessage>> {
    let data = state.messages(filter).await?;
    Ok(Json(DataList { ok: true, data }))
}

async fn schedule(
    State(state): State<RelayState>,
    Json(req): Json<ScheduleRequest>,
) -> ApiResult<Created> {
    let targets = req.targets.len();
    let id = state.schedule(req).await?;
    info!(id, targets, "schedule stored");
    Ok(Json(Created::new(id)))
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
