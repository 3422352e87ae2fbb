//! Location reconciliation: movement detection, known places, supersede

mod common;

use common::harness;
use scrobd_common::clock::Clock;
use scrobd_common::db::media::create_place;
use scrobd_common::db::records;
use scrobd_common::db::users::anonymous_user_id;
use scrobd_server::normalize::gpslogger::{self, GpsLoggerPayload};
use serde_json::json;

fn fix(lat: f64, lon: f64) -> GpsLoggerPayload {
    serde_json::from_value(json!({ "lat": lat, "lon": lon, "acc": 8.0 })).unwrap()
}

#[tokio::test]
async fn jitter_within_epsilon_keeps_one_record() {
    let h = harness().await;
    let user = anonymous_user_id();

    let event = gpslogger::normalize(&fix(52.3700, 4.8900), h.clock.now()).unwrap();
    let first = h.engine.ingest(user, &event).await.unwrap();
    assert!(first.in_progress);

    // ~11 m wobble: same place as far as the tracker is concerned
    h.clock.advance_secs(60);
    let event = gpslogger::normalize(&fix(52.3701, 4.8900), h.clock.now()).unwrap();
    let second = h.engine.ingest(user, &event).await.unwrap();

    assert_eq!(first.guid, second.guid);
    let all = records::recent(h.engine.db(), None, 10).await.unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn real_movement_closes_and_opens() {
    let h = harness().await;
    let user = anonymous_user_id();

    let event = gpslogger::normalize(&fix(52.3700, 4.8900), h.clock.now()).unwrap();
    let first = h.engine.ingest(user, &event).await.unwrap();

    // ~1.1 km away: a genuinely new location
    h.clock.advance_secs(600);
    let event = gpslogger::normalize(&fix(52.3800, 4.8900), h.clock.now()).unwrap();
    let second = h.engine.ingest(user, &event).await.unwrap();

    assert_ne!(first.guid, second.guid);
    assert!(second.in_progress);

    let old = records::get(h.engine.db(), first.guid).await.unwrap();
    assert!(!old.in_progress);
}

#[tokio::test]
async fn wandering_near_a_named_place_stays_one_session() {
    let h = harness().await;
    let user = anonymous_user_id();
    create_place(h.engine.db(), "office", 52.0200, 4.0000, None)
        .await
        .unwrap();

    let event = gpslogger::normalize(&fix(52.0201, 4.0000), h.clock.now()).unwrap();
    let first = h.engine.ingest(user, &event).await.unwrap();

    // Moved past the jitter epsilon but still within the office radius
    h.clock.advance_secs(300);
    let event = gpslogger::normalize(&fix(52.0215, 4.0000), h.clock.now()).unwrap();
    let second = h.engine.ingest(user, &event).await.unwrap();

    assert_eq!(first.guid, second.guid);
    let annotated = records::get(h.engine.db(), first.guid).await.unwrap();
    let log = annotated.log.as_array().expect("log array");
    assert!(log
        .iter()
        .any(|entry| entry.get("near_place").and_then(|v| v.as_str()) == Some("office")));
}

#[tokio::test]
async fn repeated_fix_round_trips_to_same_record() {
    let h = harness().await;
    let user = anonymous_user_id();

    let event = gpslogger::normalize(&fix(48.8584, 2.2945), h.clock.now()).unwrap();
    let first = h.engine.ingest(user, &event).await.unwrap();
    let second = h.engine.ingest(user, &event).await.unwrap();
    assert_eq!(first.guid, second.guid);
}

#[tokio::test]
async fn fixes_carry_into_the_record_log() {
    let h = harness().await;
    let user = anonymous_user_id();

    let event = gpslogger::normalize(&fix(52.3700, 4.8900), h.clock.now()).unwrap();
    let record = h.engine.ingest(user, &event).await.unwrap();
    h.clock.advance_secs(60);
    let event = gpslogger::normalize(&fix(52.3700, 4.8901), h.clock.now()).unwrap();
    h.engine.ingest(user, &event).await.unwrap();

    let record = records::get(h.engine.db(), record.guid).await.unwrap();
    let log = record.log.as_array().expect("log array");
    // Both raw fixes are preserved
    assert_eq!(log.len(), 2);
    assert_eq!(log[0]["lat"].as_f64(), Some(52.3700));
    assert_eq!(log[1]["lon"].as_f64(), Some(4.8901));
}
