use super::*;
use crate::services::user;
use crate::state::test_helpers::test_app_state;
use crate::state::{LiveObject, RoomState};
use frames::FRAME_CODE;
use objects::DomainObject;
use serde_json::json;

async fn connect(state: &AppState) -> (Uuid, mpsc::Receiver<Frame>) {
    let conn_id = Uuid::new_v4();
    let (tx, rx) = mpsc::channel(64);
    user::register(state, conn_id, tx).await;
    (conn_id, rx)
}

async fn login(state: &AppState, conn_id: Uuid, username: &str) {
    let mut data = Data::new();
    data.insert("username".into(), json!(username));
    data.insert("password".into(), json!("secret"));
    let frame = Frame::request("session:login", data);
    let replies = process_frame(state, conn_id, &frame).await;
    assert_eq!(replies[0].status, Status::Done);
}

async fn seed_room(state: &AppState, room_id: &str) {
    let room = RoomState::new(DomainObject::new(room_id, "Room"));
    state.rooms.write().await.insert(room_id.to_string(), room);
}

async fn seed_object(state: &AppState, room_id: &str, id: &str) {
    let mut object = DomainObject::new(id, "Rectangle");
    object.data.insert("inRoom".into(), json!(room_id));
    object.data.insert("x".into(), json!(10));
    object.data.insert("y".into(), json!(10));
    object.data.insert("layer".into(), json!(1));
    let mut rooms = state.rooms.write().await;
    rooms
        .get_mut(room_id)
        .unwrap()
        .objects
        .insert(id.into(), LiveObject { object, rev: 0 });
}

async fn enter_on(state: &AppState, conn_id: Uuid, room_id: &str, index: &str) {
    let frame = Frame::request("room:enter", Data::new())
        .with_room_id(room_id)
        .with_data(frames::FRAME_INDEX, index);
    let replies = process_frame(state, conn_id, &frame).await;
    assert_eq!(replies[0].status, Status::Done);
}

async fn enter(state: &AppState, conn_id: Uuid, room_id: &str) {
    enter_on(state, conn_id, room_id, "left").await;
}

fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

#[tokio::test]
async fn only_login_is_accepted_before_authentication() {
    let state = test_app_state();
    let (conn_id, _rx) = connect(&state).await;

    let frame = Frame::request("object:set", Data::new()).with_room_id("public");
    let replies = process_frame(&state, conn_id, &frame).await;
    assert_eq!(replies[0].status, Status::Error);
    assert_eq!(replies[0].data.get(FRAME_CODE), Some(&json!("E_NOT_AUTHENTICATED")));
}

#[tokio::test]
async fn successful_login_pushes_the_session_identity() {
    let state = test_app_state();
    let (conn_id, mut rx) = connect(&state).await;
    login(&state, conn_id, "ada").await;

    let pushed = rx.try_recv().unwrap();
    assert_eq!(pushed.syscall, "session:logged_in");
    assert_eq!(pushed.str_field("username"), Some("ada"));
    assert_eq!(pushed.str_field("home"), Some("ada-home"));
    assert_eq!(pushed.str_field("hash").unwrap().len(), 16);
}

#[tokio::test]
async fn failed_login_replies_with_an_error_and_a_push() {
    let state = test_app_state();
    let (conn_id, mut rx) = connect(&state).await;

    let mut data = Data::new();
    data.insert("username".into(), json!("ada"));
    data.insert("password".into(), json!("wrong"));
    let frame = Frame::request("session:login", data);
    let replies = process_frame(&state, conn_id, &frame).await;

    assert_eq!(replies[0].status, Status::Error);
    assert_eq!(replies[0].data.get(FRAME_CODE), Some(&json!("E_BAD_CREDENTIALS")));
    assert_eq!(rx.try_recv().unwrap().syscall, "session:login_failed");
}

#[tokio::test]
async fn entering_a_room_streams_the_snapshot_to_the_sender() {
    let state = test_app_state();
    seed_room(&state, "public").await;
    seed_object(&state, "public", "r1").await;
    let (conn_id, mut rx) = connect(&state).await;
    login(&state, conn_id, "ada").await;
    drain(&mut rx);

    enter(&state, conn_id, "public").await;

    let pushed = drain(&mut rx);
    assert_eq!(pushed.len(), 3);
    assert_eq!(pushed[0].syscall, "object:update");
    assert_eq!(pushed[0].str_field("id"), Some("public"));
    assert_eq!(pushed[1].str_field("id"), Some("r1"));
    assert_eq!(pushed[2].syscall, "room:entered");
    assert_eq!(pushed[2].data.get("objects"), Some(&json!(1)));
}

#[tokio::test]
async fn subscribe_replies_with_the_canonical_room_id() {
    let state = test_app_state();
    let (conn_id, _rx) = connect(&state).await;
    login(&state, conn_id, "ada").await;

    let frame = Frame::request("room:subscribe", Data::new()).with_room_id("workshop");
    let replies = process_frame(&state, conn_id, &frame).await;
    assert_eq!(replies[0].status, Status::Done);
    assert_eq!(replies[0].str_field("room"), Some("workshop"));
}

#[tokio::test]
async fn entering_a_private_room_is_forbidden() {
    let state = test_app_state();
    seed_room(&state, "private-lab").await;
    let (conn_id, _rx) = connect(&state).await;
    login(&state, conn_id, "ada").await;

    let frame = Frame::request("room:enter", Data::new()).with_room_id("private-lab");
    let replies = process_frame(&state, conn_id, &frame).await;
    assert_eq!(replies[0].status, Status::Error);
    assert_eq!(replies[0].data.get(FRAME_CODE), Some(&json!("E_FORBIDDEN")));
}

#[tokio::test]
async fn entering_announces_presence_to_the_other_clients() {
    let state = test_app_state();
    seed_room(&state, "public").await;
    let (first, mut rx_first) = connect(&state).await;
    login(&state, first, "ada").await;
    enter(&state, first, "public").await;
    drain(&mut rx_first);

    let (second, _rx_second) = connect(&state).await;
    login(&state, second, "grace").await;
    enter(&state, second, "public").await;

    let pushed = drain(&mut rx_first);
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].syscall, "chat:inform");
    assert_eq!(pushed[0].from.as_deref(), Some("grace"));
    assert_eq!(pushed[0].data.get("present"), Some(&json!(true)));
}

#[tokio::test]
async fn switching_rooms_in_a_viewport_leaves_the_previous_one() {
    let state = test_app_state();
    seed_room(&state, "public").await;
    seed_room(&state, "workshop").await;
    let (conn_id, _rx) = connect(&state).await;
    login(&state, conn_id, "ada").await;
    enter(&state, conn_id, "public").await;

    enter(&state, conn_id, "workshop").await;

    // Sole client left, so the clean room got evicted.
    let rooms = state.rooms.read().await;
    assert!(!rooms.contains_key("public"));
    assert!(rooms.get("workshop").unwrap().clients.contains_key(&conn_id));
}

#[tokio::test]
async fn create_replies_with_the_id_and_broadcasts_the_object() {
    let state = test_app_state();
    seed_room(&state, "public").await;
    let (conn_id, mut rx) = connect(&state).await;
    login(&state, conn_id, "ada").await;
    enter(&state, conn_id, "public").await;
    drain(&mut rx);

    let mut data = Data::new();
    data.insert("type".into(), json!("Rectangle"));
    data.insert("attributes".into(), json!({"x": 40, "y": 30}));
    let frame = Frame::request("object:create", data).with_room_id("public");
    let replies = process_frame(&state, conn_id, &frame).await;

    let id = replies[0].str_field("id").unwrap().to_string();
    let pushed = drain(&mut rx);
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].syscall, "object:update");
    assert_eq!(pushed[0].str_field("id"), Some(id.as_str()));
    assert_eq!(pushed[0].data.get("x"), Some(&json!(40)));
}

#[tokio::test]
async fn set_broadcasts_the_coerced_value_to_everyone_including_the_sender() {
    let state = test_app_state();
    seed_room(&state, "public").await;
    seed_object(&state, "public", "r1").await;
    let (first, mut rx_first) = connect(&state).await;
    login(&state, first, "ada").await;
    enter(&state, first, "public").await;
    let (second, mut rx_second) = connect(&state).await;
    login(&state, second, "grace").await;
    enter(&state, second, "public").await;
    drain(&mut rx_first);
    drain(&mut rx_second);

    let mut data = Data::new();
    data.insert("id".into(), json!("r1"));
    data.insert("attribute".into(), json!("x"));
    data.insert("value".into(), json!("250px"));
    let frame = Frame::request("object:set", data).with_room_id("public");
    let replies = process_frame(&state, first, &frame).await;
    assert_eq!(replies[0].status, Status::Done);

    let echoed = drain(&mut rx_first);
    assert_eq!(echoed.len(), 1);
    assert_eq!(echoed[0].data.get("x"), Some(&json!(250)));
    let pushed = drain(&mut rx_second);
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].data.get("x"), Some(&json!(250)));
}

#[tokio::test]
async fn set_on_a_readonly_attribute_fails_with_a_code() {
    let state = test_app_state();
    seed_room(&state, "public").await;
    seed_object(&state, "public", "r1").await;
    let (conn_id, _rx) = connect(&state).await;
    login(&state, conn_id, "ada").await;
    enter(&state, conn_id, "public").await;

    let mut data = Data::new();
    data.insert("id".into(), json!("r1"));
    data.insert("attribute".into(), json!("type"));
    data.insert("value".into(), json!("Ellipse"));
    let frame = Frame::request("object:set", data).with_room_id("public");
    let replies = process_frame(&state, conn_id, &frame).await;
    assert_eq!(replies[0].status, Status::Error);
    assert_eq!(replies[0].data.get(FRAME_CODE), Some(&json!("E_READONLY")));
}

#[tokio::test]
async fn delete_broadcasts_to_everyone_including_the_sender() {
    let state = test_app_state();
    seed_room(&state, "public").await;
    seed_object(&state, "public", "r1").await;
    let (conn_id, mut rx) = connect(&state).await;
    login(&state, conn_id, "ada").await;
    enter(&state, conn_id, "public").await;
    drain(&mut rx);

    let mut data = Data::new();
    data.insert("id".into(), json!("r1"));
    data.insert("transaction".into(), json!("abcd1234:1"));
    let frame = Frame::request("object:delete", data).with_room_id("public");
    process_frame(&state, conn_id, &frame).await;

    let pushed = drain(&mut rx);
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].syscall, "object:delete");
    assert_eq!(pushed[0].str_field("transaction"), Some("abcd1234:1"));
}

#[tokio::test]
async fn detach_pushes_the_shrunk_link_arrays() {
    let state = test_app_state();
    seed_room(&state, "public").await;
    seed_object(&state, "public", "r1").await;
    seed_object(&state, "public", "r2").await;
    {
        let mut rooms = state.rooms.write().await;
        let room = rooms.get_mut("public").unwrap();
        let live = room.objects.get_mut("r2").unwrap();
        live.object.data.insert("link".into(), json!(["r1"]));
    }
    let (conn_id, mut rx) = connect(&state).await;
    login(&state, conn_id, "ada").await;
    enter(&state, conn_id, "public").await;
    drain(&mut rx);

    let mut data = Data::new();
    data.insert("id".into(), json!("r1"));
    let frame = Frame::request("object:detach", data).with_room_id("public");
    process_frame(&state, conn_id, &frame).await;

    let pushed = drain(&mut rx);
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].str_field("id"), Some("r2"));
    assert_eq!(pushed[0].data.get("link"), Some(&json!([])));
}

#[tokio::test]
async fn duplicate_into_another_room_moves_objects_on_cut() {
    let state = test_app_state();
    seed_room(&state, "public").await;
    seed_room(&state, "workshop").await;
    seed_object(&state, "public", "r1").await;
    let (conn_id, mut rx) = connect(&state).await;
    login(&state, conn_id, "ada").await;
    enter(&state, conn_id, "public").await;
    enter_on(&state, conn_id, "workshop", "right").await;
    drain(&mut rx);

    let mut data = Data::new();
    data.insert("objects".into(), json!(["r1"]));
    data.insert("cut".into(), json!(true));
    data.insert("sourceRoom".into(), json!("public"));
    let frame = Frame::request("object:duplicate", data).with_room_id("workshop");
    let replies = process_frame(&state, conn_id, &frame).await;

    let ids = replies[0].data.get("ids").unwrap().as_array().unwrap();
    assert_eq!(ids.len(), 1);

    let pushed = drain(&mut rx);
    let deletes: Vec<_> = pushed.iter().filter(|f| f.syscall == "object:delete").collect();
    let updates: Vec<_> = pushed.iter().filter(|f| f.syscall == "object:update").collect();
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].room_id.as_deref(), Some("public"));
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].data.get("inRoom"), Some(&json!("workshop")));
}

#[tokio::test]
async fn chat_text_goes_to_the_room_from_the_sender_hash() {
    let state = test_app_state();
    seed_room(&state, "public").await;
    let (first, mut rx_first) = connect(&state).await;
    login(&state, first, "ada").await;
    enter(&state, first, "public").await;
    let (second, mut rx_second) = connect(&state).await;
    login(&state, second, "grace").await;
    enter(&state, second, "public").await;
    drain(&mut rx_first);
    drain(&mut rx_second);

    let hash = user::current_user(&state, first).await.unwrap().hash;
    let mut data = Data::new();
    data.insert("text".into(), json!("hello"));
    let frame = Frame::request("chat:inform", data).with_room_id("public");
    process_frame(&state, first, &frame).await;

    assert!(drain(&mut rx_first).is_empty());
    let pushed = drain(&mut rx_second);
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].from.as_deref(), Some(hash.as_str()));
    assert_eq!(pushed[0].str_field("text"), Some("hello"));
}

#[tokio::test]
async fn directed_chat_reaches_only_the_addressed_user() {
    let state = test_app_state();
    seed_room(&state, "public").await;
    let (first, mut rx_first) = connect(&state).await;
    login(&state, first, "ada").await;
    enter(&state, first, "public").await;
    let (second, mut rx_second) = connect(&state).await;
    login(&state, second, "grace").await;
    enter(&state, second, "public").await;
    let (third, mut rx_third) = connect(&state).await;
    login(&state, third, "lin").await;
    enter(&state, third, "public").await;
    drain(&mut rx_first);
    drain(&mut rx_second);
    drain(&mut rx_third);

    let target = user::current_user(&state, second).await.unwrap().hash;
    let mut data = Data::new();
    data.insert("text".into(), json!("psst"));
    data.insert("to".into(), json!(target));
    let frame = Frame::request("chat:inform", data).with_room_id("public");
    process_frame(&state, first, &frame).await;

    assert!(drain(&mut rx_first).is_empty());
    assert!(drain(&mut rx_third).is_empty());
    let pushed = drain(&mut rx_second);
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].str_field("text"), Some("psst"));
    assert!(pushed[0].data.get("to").is_none());
}

#[tokio::test]
async fn unknown_syscalls_are_rejected() {
    let state = test_app_state();
    let (conn_id, _rx) = connect(&state).await;
    login(&state, conn_id, "ada").await;

    let frame = Frame::request("gateway:reboot", Data::new());
    let replies = process_frame(&state, conn_id, &frame).await;
    assert_eq!(replies[0].status, Status::Error);
    assert_eq!(replies[0].data.get(FRAME_CODE), Some(&json!("E_BAD_REQUEST")));
}
