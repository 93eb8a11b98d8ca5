//! DESIGN
//!
//! One websocket per client. The socket is upgraded unauthenticated; the
//! only syscall accepted before `session:login` is the login itself.
//! Inbound frames are dispatched to pure-ish handlers that return an
//! [`Outcome`]: the reply for the requesting client plus any pushes for
//! other clients. Delivery happens in one place so the handlers stay
//! testable without a socket.
//!
//! Outbound frames travel through a bounded per-connection channel drained
//! by a dedicated writer task. Broadcasts use `try_send` and drop frames
//! for clients that cannot keep up; replies and snapshot pushes to the
//! requesting client use `send` and apply backpressure instead.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use frames::{Data, ErrorCode, Frame, FRAME_MESSAGE, Status, Viewport};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::services::object::ObjectError;
use crate::services::room::RoomError;
use crate::services::user::UserError;
use crate::services::{object, room, user};
use crate::state::{AppState, SessionUser};

const CLIENT_CHANNEL_CAPACITY: usize = 256;

// ===== Errors =====

#[derive(Debug, Error)]
pub enum WsError {
    #[error(transparent)]
    User(#[from] UserError),
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error(transparent)]
    Object(#[from] ObjectError),
    #[error("{0}")]
    BadRequest(String),
}

impl ErrorCode for WsError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::User(err) => err.error_code(),
            Self::Room(err) => err.error_code(),
            Self::Object(err) => err.error_code(),
            Self::BadRequest(_) => "E_BAD_REQUEST",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::User(err) => err.retryable(),
            Self::Room(err) => err.retryable(),
            Self::Object(err) => err.retryable(),
            Self::BadRequest(_) => false,
        }
    }
}

// ===== Outcome =====

enum PushTarget {
    /// Every client in `room_id`, minus the sender when `exclude_sender`.
    Room { exclude_sender: bool },
    /// The requesting connection only.
    Sender,
    /// The connection owning a user hash.
    Hash(String),
}

struct Push {
    target: PushTarget,
    syscall: &'static str,
    room_id: String,
    data: Data,
    from: Option<String>,
}

enum Reply {
    Done,
    Data(Data),
    Error(WsError),
}

struct Outcome {
    reply: Reply,
    pushes: Vec<Push>,
}

impl Outcome {
    fn done() -> Self {
        Self { reply: Reply::Done, pushes: Vec::new() }
    }

    fn data(data: Data) -> Self {
        Self { reply: Reply::Data(data), pushes: Vec::new() }
    }

    fn error(err: WsError) -> Self {
        Self { reply: Reply::Error(err), pushes: Vec::new() }
    }

    fn push(mut self, push: Push) -> Self {
        self.pushes.push(push);
        self
    }
}

// ===== Socket lifecycle =====

pub async fn handle_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

async fn run_ws(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Frame>(CLIENT_CHANNEL_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    user::register(&state, conn_id, tx.clone()).await;
    let mut welcome = Data::new();
    welcome.insert("clientId".into(), json!(conn_id.to_string()));
    let _ = tx.send(Frame::request("session:connected", welcome)).await;
    info!(%conn_id, "client connected");

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let replies = process_inbound_text(&state, conn_id, text.as_str()).await;
                for frame in replies {
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(%conn_id, error = %err, "websocket error");
                break;
            }
        }
    }

    // Announce the departure and run the eviction path for every room this
    // connection was still showing.
    let (departed, rooms) = user::disconnect(&state, conn_id).await;
    for (_viewport, room_id) in rooms {
        if let Some(user) = &departed {
            let frame = presence_frame(&room_id, user, false);
            room::broadcast(&state, &room_id, &frame, Some(conn_id)).await;
        }
        room::leave(&state, conn_id, &room_id).await;
    }
    drop(tx);
    let _ = writer.await;
    info!(%conn_id, "client disconnected");
}

/// Parse one wire message and produce the reply frames for the sender.
/// Pushes to other clients are delivered as a side effect.
async fn process_inbound_text(state: &AppState, conn_id: Uuid, text: &str) -> Vec<Frame> {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(%conn_id, error = %err, "dropping malformed frame");
            return Vec::new();
        }
    };
    if frame.status != Status::Request {
        debug!(%conn_id, syscall = %frame.syscall, "ignoring non-request frame");
        return Vec::new();
    }
    process_frame(state, conn_id, &frame).await
}

pub async fn process_frame(state: &AppState, conn_id: Uuid, frame: &Frame) -> Vec<Frame> {
    let outcome = match dispatch(state, conn_id, frame).await {
        Ok(outcome) => outcome,
        Err(err) => Outcome::error(err),
    };

    for push in outcome.pushes {
        deliver(state, conn_id, push).await;
    }
    match outcome.reply {
        Reply::Done => vec![frame.done()],
        Reply::Data(data) => vec![frame.done_with(data)],
        Reply::Error(err) => {
            debug!(%conn_id, syscall = %frame.syscall, error = %err, "request failed");
            vec![frame.error_from(&err)]
        }
    }
}

async fn deliver(state: &AppState, conn_id: Uuid, push: Push) {
    let mut frame = Frame::request(push.syscall, push.data);
    if !push.room_id.is_empty() {
        frame = frame.with_room_id(&push.room_id);
    }
    if let Some(from) = push.from {
        frame = frame.with_from(from);
    }
    match push.target {
        PushTarget::Room { exclude_sender } => {
            let exclude = if exclude_sender { Some(conn_id) } else { None };
            room::broadcast(state, &push.room_id, &frame, exclude).await;
        }
        PushTarget::Sender => {
            let tx = {
                let table = state.connections.read().await;
                table.entries.get(&conn_id).map(|conn| conn.tx.clone())
            };
            if let Some(tx) = tx {
                let _ = tx.send(frame).await;
            }
        }
        PushTarget::Hash(hash) => {
            if let Some(tx) = user::tx_by_hash(state, &hash).await {
                if tx.try_send(frame).is_err() {
                    warn!(hash, "directed push dropped, channel full");
                }
            }
        }
    }
}

// ===== Dispatch =====

async fn dispatch(state: &AppState, conn_id: Uuid, frame: &Frame) -> Result<Outcome, WsError> {
    if frame.syscall == "session:login" {
        return handle_login(state, conn_id, frame).await;
    }
    let user = user::current_user(state, conn_id).await.map_err(WsError::from)?;

    match frame.syscall.as_str() {
        "room:subscribe" => handle_subscribe(state, conn_id, frame).await,
        "room:unsubscribe" => handle_unsubscribe(state, conn_id, frame).await,
        "room:enter" => handle_enter(state, conn_id, &user, frame).await,
        "room:leave" => handle_leave(state, conn_id, &user, frame).await,
        "object:create" => handle_create(state, frame).await,
        "object:set" => handle_set(state, frame).await,
        "object:delete" => handle_delete(state, frame).await,
        "object:detach" => handle_detach(state, frame).await,
        "object:duplicate" => handle_duplicate(state, frame).await,
        "object:content" => handle_content(state, frame).await,
        "chat:inform" => handle_chat(&user, frame),
        "report:bug" => handle_report(&user, frame),
        other => Err(WsError::BadRequest(format!("unknown syscall {other}"))),
    }
}

fn room_of(frame: &Frame) -> Result<String, WsError> {
    frame
        .room_id
        .clone()
        .ok_or_else(|| WsError::BadRequest(format!("{} requires a room id", frame.syscall)))
}

fn required<'a>(frame: &'a Frame, key: &str) -> Result<&'a str, WsError> {
    frame
        .str_field(key)
        .ok_or_else(|| WsError::BadRequest(format!("{} requires {key}", frame.syscall)))
}

fn presence_frame(room_id: &str, user: &SessionUser, present: bool) -> Frame {
    let mut data = Data::new();
    data.insert("present".into(), json!(present));
    Frame::request("chat:inform", data)
        .with_room_id(room_id)
        .with_from(user.username.clone())
}

// ===== Session =====

async fn handle_login(
    state: &AppState,
    conn_id: Uuid,
    frame: &Frame,
) -> Result<Outcome, WsError> {
    let username = required(frame, "username")?;
    let password = required(frame, "password")?;
    match user::login(state, conn_id, username, password).await {
        Ok(user) => {
            info!(%conn_id, username = %user.username, "login");
            let mut data = Data::new();
            data.insert("username".into(), json!(user.username));
            data.insert("home".into(), json!(user.home));
            data.insert("hash".into(), json!(user.hash));
            data.insert("color".into(), json!(user.color));
            Ok(Outcome::done().push(Push {
                target: PushTarget::Sender,
                syscall: "session:logged_in",
                room_id: String::new(),
                data,
                from: None,
            }))
        }
        Err(err) => {
            let mut data = Data::new();
            data.insert(FRAME_MESSAGE.into(), json!(err.to_string()));
            Ok(Outcome::error(err.into()).push(Push {
                target: PushTarget::Sender,
                syscall: "session:login_failed",
                room_id: String::new(),
                data,
                from: None,
            }))
        }
    }
}

// ===== Rooms =====

async fn handle_subscribe(
    state: &AppState,
    conn_id: Uuid,
    frame: &Frame,
) -> Result<Outcome, WsError> {
    let room_id = room_of(frame)?;
    room::may_subscribe(state, conn_id, &room_id).await?;
    let mut data = Data::new();
    data.insert("room".into(), json!(room_id));
    Ok(Outcome::data(data))
}

async fn handle_unsubscribe(
    state: &AppState,
    conn_id: Uuid,
    frame: &Frame,
) -> Result<Outcome, WsError> {
    let room_id = room_of(frame)?;
    room::leave(state, conn_id, &room_id).await;
    Ok(Outcome::done())
}

async fn handle_enter(
    state: &AppState,
    conn_id: Uuid,
    user: &SessionUser,
    frame: &Frame,
) -> Result<Outcome, WsError> {
    let room_id = room_of(frame)?;
    let viewport = frame.viewport();
    let snapshot = room::enter(state, conn_id, &room_id).await?;

    // A viewport shows one room at a time; switching leaves the old one.
    let previous = user::set_viewport_room(state, conn_id, viewport, &room_id).await;
    if let Some(previous) = previous {
        if previous != room_id && !shown_elsewhere(state, conn_id, viewport, &previous).await {
            let departure = presence_frame(&previous, user, false);
            room::broadcast(state, &previous, &departure, Some(conn_id)).await;
            room::leave(state, conn_id, &previous).await;
        }
    }

    let count = snapshot.len();
    let mut outcome = Outcome::done();
    for data in snapshot {
        outcome = outcome.push(Push {
            target: PushTarget::Sender,
            syscall: "object:update",
            room_id: room_id.clone(),
            data,
            from: None,
        });
    }
    let mut entered = Data::new();
    entered.insert("objects".into(), json!(count.saturating_sub(1)));
    outcome = outcome.push(Push {
        target: PushTarget::Sender,
        syscall: "room:entered",
        room_id: room_id.clone(),
        data: entered,
        from: None,
    });

    let mut presence = Data::new();
    presence.insert("present".into(), json!(true));
    Ok(outcome.push(Push {
        target: PushTarget::Room { exclude_sender: true },
        syscall: "chat:inform",
        room_id,
        data: presence,
        from: Some(user.username.clone()),
    }))
}

/// Whether the other viewport of this connection still shows `room_id`.
/// Coupled viewports may point both sides at the same room.
async fn shown_elsewhere(
    state: &AppState,
    conn_id: Uuid,
    viewport: Viewport,
    room_id: &str,
) -> bool {
    let table = state.connections.read().await;
    table.entries.get(&conn_id).is_some_and(|conn| {
        conn.rooms.get(&viewport.other()).is_some_and(|other| other == room_id)
    })
}

async fn handle_leave(
    state: &AppState,
    conn_id: Uuid,
    user: &SessionUser,
    frame: &Frame,
) -> Result<Outcome, WsError> {
    let room_id = room_of(frame)?;
    let viewport = frame.viewport();
    user::clear_viewport_room(state, conn_id, viewport).await;
    if !shown_elsewhere(state, conn_id, viewport, &room_id).await {
        let departure = presence_frame(&room_id, user, false);
        room::broadcast(state, &room_id, &departure, Some(conn_id)).await;
        room::leave(state, conn_id, &room_id).await;
    }
    Ok(Outcome::done())
}

// ===== Objects =====

async fn handle_create(state: &AppState, frame: &Frame) -> Result<Outcome, WsError> {
    let room_id = room_of(frame)?;
    let type_tag = required(frame, "type")?;
    let attributes: Data = match frame.data.get("attributes") {
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        _ => Data::new(),
    };
    let content = frame.str_field("content");

    let data = object::create(state, &room_id, type_tag, &attributes, content).await?;
    let id = data.get("id").cloned().unwrap_or_default();

    let mut reply = Data::new();
    reply.insert("id".into(), id);
    Ok(Outcome::data(reply).push(Push {
        target: PushTarget::Room { exclude_sender: false },
        syscall: "object:update",
        room_id,
        data,
        from: None,
    }))
}

async fn handle_set(state: &AppState, frame: &Frame) -> Result<Outcome, WsError> {
    let room_id = room_of(frame)?;
    let id = required(frame, "id")?;
    let attribute = required(frame, "attribute")?;
    let value = frame.data.get("value").cloned().unwrap_or(Value::Null);

    match object::set(state, &room_id, id, attribute, value).await? {
        Some(applied) => {
            let mut data = Data::new();
            data.insert("id".into(), json!(id));
            data.insert(attribute.to_string(), applied);
            // The originator gets the echo too; its reconciliation treats
            // an identical value as a no-op.
            Ok(Outcome::done().push(Push {
                target: PushTarget::Room { exclude_sender: false },
                syscall: "object:update",
                room_id,
                data,
                from: None,
            }))
        }
        None => Ok(Outcome::done()),
    }
}

async fn handle_delete(state: &AppState, frame: &Frame) -> Result<Outcome, WsError> {
    let room_id = room_of(frame)?;
    let id = required(frame, "id")?;
    object::delete(state, &room_id, id).await?;

    let mut data = Data::new();
    data.insert("id".into(), json!(id));
    if let Some(transaction) = frame.str_field("transaction") {
        data.insert("transaction".into(), json!(transaction));
    }
    Ok(Outcome::done().push(Push {
        target: PushTarget::Room { exclude_sender: false },
        syscall: "object:delete",
        room_id,
        data,
        from: None,
    }))
}

async fn handle_detach(state: &AppState, frame: &Frame) -> Result<Outcome, WsError> {
    let room_id = room_of(frame)?;
    let id = required(frame, "id")?;
    let updates = object::detach(state, &room_id, id).await?;

    let mut outcome = Outcome::done();
    for data in updates {
        outcome = outcome.push(Push {
            target: PushTarget::Room { exclude_sender: false },
            syscall: "object:update",
            room_id: room_id.clone(),
            data,
            from: None,
        });
    }
    Ok(outcome)
}

async fn handle_duplicate(state: &AppState, frame: &Frame) -> Result<Outcome, WsError> {
    let target_room = room_of(frame)?;
    let source_room = frame.str_field("sourceRoom").unwrap_or(&target_room).to_string();
    let ids: Vec<String> = match frame.data.get("objects") {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };
    if ids.is_empty() {
        return Err(WsError::BadRequest("object:duplicate requires objects".into()));
    }
    let cut = frame.data.get("cut").and_then(Value::as_bool).unwrap_or(false);
    let position = match frame.data.get("attributes") {
        Some(Value::Object(attrs)) => {
            match (attrs.get("x").and_then(Value::as_i64), attrs.get("y").and_then(Value::as_i64)) {
                (Some(x), Some(y)) => Some((x, y)),
                _ => None,
            }
        }
        _ => None,
    };

    let outcome =
        object::duplicate(state, &source_room, &target_room, &ids, cut, position).await?;

    let mut reply = Data::new();
    reply.insert("ids".into(), json!(outcome.new_ids));
    let mut result = Outcome::data(reply);
    for id in outcome.deleted {
        let mut data = Data::new();
        data.insert("id".into(), json!(id));
        if let Some(transaction) = frame.str_field("transaction") {
            data.insert("transaction".into(), json!(transaction));
        }
        result = result.push(Push {
            target: PushTarget::Room { exclude_sender: false },
            syscall: "object:delete",
            room_id: source_room.clone(),
            data,
            from: None,
        });
    }
    for data in outcome.created {
        result = result.push(Push {
            target: PushTarget::Room { exclude_sender: false },
            syscall: "object:update",
            room_id: target_room.clone(),
            data,
            from: None,
        });
    }
    Ok(result)
}

async fn handle_content(state: &AppState, frame: &Frame) -> Result<Outcome, WsError> {
    let room_id = room_of(frame)?;
    let id = required(frame, "id")?;
    let content = required(frame, "content")?;
    object::set_content(state, &room_id, id, content).await?;

    let mut data = Data::new();
    data.insert("id".into(), json!(id));
    data.insert("content".into(), json!(content));
    Ok(Outcome::done().push(Push {
        target: PushTarget::Room { exclude_sender: false },
        syscall: "object:content",
        room_id,
        data,
        from: None,
    }))
}

// ===== Chat =====

fn handle_chat(user: &SessionUser, frame: &Frame) -> Result<Outcome, WsError> {
    let mut data = frame.data.clone();
    let target = match data.remove("to").as_ref().and_then(Value::as_str) {
        Some(hash) => PushTarget::Hash(hash.to_string()),
        None => PushTarget::Room { exclude_sender: true },
    };
    let room_id = frame.room_id.clone().unwrap_or_default();
    if matches!(target, PushTarget::Room { .. }) && room_id.is_empty() {
        return Err(WsError::BadRequest("chat:inform requires a room id".into()));
    }
    Ok(Outcome::done().push(Push {
        target,
        syscall: "chat:inform",
        room_id,
        data,
        from: Some(user.hash.clone()),
    }))
}

fn handle_report(user: &SessionUser, frame: &Frame) -> Result<Outcome, WsError> {
    let text = frame.str_field("text").unwrap_or_default();
    let room = frame.str_field("room").unwrap_or_default();
    warn!(username = %user.username, room, text, "bug report");
    Ok(Outcome::done())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
