use std::time::Duration;

use serde_json::{Value, json};

use super::*;
use crate::test_support::{MockDispatcher, RecordingBridge};

fn setup() -> (std::sync::Arc<MockDispatcher>, RecordingBridge, Session) {
    let dispatcher = MockDispatcher::new();
    let bridge = RecordingBridge::new();
    let session = Session::new(dispatcher.clone() as Arc<dyn Dispatcher>, Box::new(bridge.clone()));
    (dispatcher, bridge, session)
}

#[tokio::test(start_paused = true)]
async fn login_sends_credentials() {
    let (dispatcher, _, session) = setup();
    dispatcher.push_response(|req| req.done());

    session.login("ada", "secret").await.expect("login");
    let queries = dispatcher.queries.lock().expect("lock").clone();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].syscall, "session:login");
    assert_eq!(queries[0].data.get("username"), Some(&json!("ada")));
}

#[tokio::test(start_paused = true)]
async fn server_error_replies_become_typed_errors() {
    let (dispatcher, _, session) = setup();
    dispatcher.push_response(|req| req.error("room is private"));

    let err = session.load_room(Viewport::Left, "vault", false).await.expect_err("rejected");
    match err {
        ClientError::Server { syscall, message, .. } => {
            assert_eq!(syscall, "room:enter");
            assert_eq!(message, "room is private");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn dropped_reply_is_a_connection_error() {
    let (_, _, session) = setup();
    let err = session.login("ada", "secret").await.expect_err("closed");
    assert!(matches!(err, ClientError::ConnectionClosed(_)));
}

#[tokio::test(start_paused = true)]
async fn load_room_installs_the_room_and_settles() {
    let (dispatcher, bridge, session) = setup();
    dispatcher.push_response(|req| req.done());

    session.load_room(Viewport::Left, "workshop", false).await.expect("load");
    assert_eq!(session.manager().lock().await.view(Viewport::Left).room_id, "workshop");

    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert!(bridge.recorded().iter().any(|e| e == "settled left"));
}

#[tokio::test(start_paused = true)]
async fn create_object_awaits_materialization() {
    let (dispatcher, bridge, session) = setup();
    dispatcher.push_response(|req| req.done());
    session.load_room(Viewport::Left, "public", false).await.expect("load");

    // The push path delivers the object before the create reply is handled.
    session.manager().lock().await.materialize_board().notify("n1");
    dispatcher.push_response(|req| {
        let mut data = frames::Data::new();
        data.insert("id".to_string(), json!("n1"));
        req.done_with(data)
    });

    let id = session
        .create_object(Viewport::Left, "Rectangle", serde_json::Map::new(), None)
        .await
        .expect("create");
    assert_eq!(id, "n1");
    assert!(bridge.recorded().iter().any(|e| e == "created left n1"));
}

#[tokio::test(start_paused = true)]
async fn create_object_times_out_when_nothing_materializes() {
    let (dispatcher, _, session) = setup();
    dispatcher.push_response(|req| req.done());
    session.load_room(Viewport::Left, "public", false).await.expect("load");

    dispatcher.push_response(|req| {
        let mut data = frames::Data::new();
        data.insert("id".to_string(), json!("ghost"));
        req.done_with(data)
    });

    let err = session
        .create_object(Viewport::Left, "Rectangle", serde_json::Map::new(), None)
        .await
        .expect_err("timeout");
    match err {
        ClientError::Materialize(timeout) => assert_eq!(timeout.id, "ghost"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn paste_waits_for_every_new_object() {
    let (dispatcher, _, session) = setup();
    dispatcher.push_response(|req| req.done());
    session.load_room(Viewport::Left, "public", false).await.expect("load");

    {
        let manager = session.manager();
        let mut manager = manager.lock().await;
        manager.object_update(object_data("a", "public"));
        manager.copy_objects(Viewport::Left, &["a".to_string()]);
        // Simulate the duplicate landing on the push path already.
        manager.object_update(object_data("a2", "public"));
    }
    dispatcher.push_response(|req| {
        let mut data = frames::Data::new();
        data.insert("ids".to_string(), json!(["a2"]));
        req.done_with(data)
    });

    let new_ids = session.paste(Viewport::Left, None).await.expect("paste");
    assert_eq!(new_ids, vec!["a2".to_string()]);

    let manager = session.manager();
    let manager = manager.lock().await;
    assert_eq!(manager.selected(), vec![(Viewport::Left, "a2".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn duplicate_action_routes_through_the_batch_path() {
    let (dispatcher, _, session) = setup();
    dispatcher.push_response(|req| req.done());
    session.load_room(Viewport::Left, "public", false).await.expect("load");

    {
        let manager = session.manager();
        let mut manager = manager.lock().await;
        manager.object_update(object_data("a", "public"));
        manager.select_object(Viewport::Left, "a");
        manager.object_update(object_data("a2", "public"));
    }
    dispatcher.push_response(|req| {
        let mut data = frames::Data::new();
        data.insert("ids".to_string(), json!(["a2"]));
        req.done_with(data)
    });

    session.perform_action_for_selected("Duplicate").await.expect("duplicate");
    let queries = dispatcher.queries.lock().expect("lock").clone();
    assert!(queries.iter().any(|f| f.syscall == "object:duplicate"));
}

fn object_data(id: &str, room: &str) -> serde_json::Map<String, Value> {
    match json!({"id": id, "type": "Rectangle", "inRoom": room}) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}
