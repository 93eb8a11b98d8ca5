use super::*;
use crate::state::RoomState;
use crate::state::test_helpers::test_app_state;
use objects::DomainObject;

#[tokio::test]
async fn flushing_an_unloaded_room_is_a_no_op() {
    let state = test_app_state();
    assert!(flush_room(&state, "nowhere").await.is_ok());
}

#[tokio::test]
async fn flushing_a_clean_room_skips_the_database() {
    // The test pool cannot connect, so reaching the database would error.
    let state = test_app_state();
    let room = RoomState::new(DomainObject::new("public", "Room"));
    state.rooms.write().await.insert("public".into(), room);

    assert!(flush_room(&state, "public").await.is_ok());
    assert!(flush_all(&state).await.is_ok());
}

#[test]
fn flush_config_defaults_to_a_short_interval() {
    let config = FlushConfig::from_env();
    assert_eq!(config.interval, Duration::from_millis(100));
}
