//! HTTP and WebSocket handlers for the control surface.

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use intercom_core::audio::decode_pcm16;
use intercom_core::ids::{ChannelId, ContentId, GroupId, SessionId, SpeakerId};
use intercom_core::playlist::PlaylistKind;
use intercom_engine::{OpenRequest, VolumeDirective};

use crate::api::{ok, ApiError, ApiResult};
use crate::client;
use crate::server::AppState;

// ─── Request bodies ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSessionBody {
    pub channel_id: ChannelId,
    #[serde(default)]
    pub speaker_ids: Vec<SpeakerId>,
    #[serde(default)]
    pub group_ids: Vec<GroupId>,
    #[serde(default)]
    pub loop_playback: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBody {
    pub session_id: SessionId,
}

/// `mediaIds` on the media player, `ttsIds` on the TTS player.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayBody {
    pub session_id: SessionId,
    #[serde(default, alias = "mediaIds", alias = "ttsIds")]
    pub items: Vec<ContentId>,
    #[serde(default)]
    pub shuffle: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeekBody {
    pub session_id: SessionId,
    pub seconds: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopBody {
    pub session_id: SessionId,
    pub enabled: bool,
}

// ─── Sessions ────────────────────────────────────────────────────────────

pub async fn open_session(
    State(state): State<AppState>,
    payload: Result<Json<OpenSessionBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = payload?;
    let opened = state
        .manager
        .open(OpenRequest {
            channel_id: body.channel_id,
            speaker_ids: body.speaker_ids,
            group_ids: body.group_ids,
            loop_playback: body.loop_playback,
        })
        .await?;
    ok(opened)
}

pub async fn close_session(
    State(state): State<AppState>,
    payload: Result<Json<SessionBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = payload?;
    let closed = state.manager.close(&body.session_id).await?;
    ok(json!({ "sessionId": body.session_id, "closed": closed }))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> ApiResult {
    ok(state.manager.summary(&session_id)?)
}

pub async fn list_sessions(State(state): State<AppState>) -> ApiResult {
    ok(json!({ "sessions": state.manager.list() }))
}

// ─── Volume ──────────────────────────────────────────────────────────────

pub async fn set_volume(
    State(state): State<AppState>,
    payload: Result<Json<VolumeDirective>, JsonRejection>,
) -> ApiResult {
    let Json(directive) = payload?;
    ok(state.volume.set_volume(directive).await?)
}

// ─── Players ─────────────────────────────────────────────────────────────

pub async fn play(
    State(state): State<AppState>,
    Extension(kind): Extension<PlaylistKind>,
    payload: Result<Json<PlayBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = payload?;
    let outcome = state
        .manager
        .play(&body.session_id, kind, body.items, body.shuffle)
        .await?;
    ok(outcome)
}

pub async fn stop(
    State(state): State<AppState>,
    Extension(kind): Extension<PlaylistKind>,
    payload: Result<Json<SessionBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = payload?;
    state.manager.stop(&body.session_id, kind).await?;
    ok(json!({ "message": format!("{kind} stopped") }))
}

pub async fn pause(
    State(state): State<AppState>,
    Extension(kind): Extension<PlaylistKind>,
    payload: Result<Json<SessionBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = payload?;
    state.manager.pause(&body.session_id, kind).await?;
    ok(())
}

pub async fn resume(
    State(state): State<AppState>,
    Extension(kind): Extension<PlaylistKind>,
    payload: Result<Json<SessionBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = payload?;
    state.manager.resume(&body.session_id, kind).await?;
    ok(())
}

pub async fn seek(
    State(state): State<AppState>,
    Extension(kind): Extension<PlaylistKind>,
    payload: Result<Json<SeekBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = payload?;
    let position = state.manager.seek(&body.session_id, kind, body.seconds).await?;
    ok(json!({ "currentPosition": position }))
}

pub async fn next(
    State(state): State<AppState>,
    Extension(kind): Extension<PlaylistKind>,
    payload: Result<Json<SessionBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = payload?;
    let item = state.manager.skip_next(&body.session_id, kind).await?;
    ok(json!({ "itemId": item }))
}

pub async fn set_loop(
    State(state): State<AppState>,
    payload: Result<Json<LoopBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = payload?;
    state.manager.set_loop(&body.session_id, body.enabled)?;
    ok(json!({ "loopPlayback": body.enabled }))
}

pub async fn now_playing(
    State(state): State<AppState>,
    Extension(kind): Extension<PlaylistKind>,
    Path(session_id): Path<SessionId>,
) -> ApiResult {
    ok(state.manager.now_playing(&session_id, kind)?)
}

// ─── Health ──────────────────────────────────────────────────────────────

pub async fn health(State(state): State<AppState>) -> ApiResult {
    ok(json!({
        "status": "healthy",
        "openSessions": state.manager.list().len(),
        "clients": state.registry.count(),
        "metrics": state.manager.metrics().snapshot(),
    }))
}

// ─── WebSockets ──────────────────────────────────────────────────────────

pub async fn events_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let (client_id, rx) = state.registry.register();
        tracing::info!(client_id = %client_id, "event client connected");
        client::handle_ws_connection(socket, client_id, rx, state.registry).await;
    })
}

/// Reject before upgrading when the session is not open, so the caller gets
/// an ordinary error response.
pub async fn microphone_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> Response {
    match state.manager.microphone_sender(&session_id) {
        Ok((sender, _format)) => ws
            .on_upgrade(move |socket| pump_microphone(socket, session_id, sender))
            .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

async fn pump_microphone(mut socket: WebSocket, session_id: SessionId, sender: mpsc::Sender<Vec<f32>>) {
    tracing::info!(session_id = %session_id, "microphone connected");
    let mut dropped = 0u64;
    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            WsMessage::Binary(bytes) => {
                let samples = decode_pcm16(&bytes);
                if samples.is_empty() {
                    continue;
                }
                match sender.try_send(samples) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => dropped += 1,
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }
    tracing::info!(session_id = %session_id, dropped, "microphone disconnected");
}
