//! Scénarios de bout en bout sur le cœur du bridge, sans broker ni base réels.

use bridge_devkit::test_utils::{TEST_COLLECTION, TEST_PERIOD, TEST_TOPIC};
use bridge_devkit::TestHarness;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use telemetry_bridge::broker::{BrokerError, LinkStatus};
use telemetry_bridge::ingestion::IngestionError;
use telemetry_bridge::shutdown;
use telemetry_bridge::simulation::protocol::{
    SessionEvent, MSG_BROKER_DISCONNECTED, MSG_CONNECTED, MSG_INVALID_PAYLOAD, MSG_NO_STATIONS, MSG_STARTED,
    MSG_STOPPED, MSG_UNKNOWN_ACTION,
};

const SLACK: Duration = Duration::from_millis(10);

fn log_messages(events: &[SessionEvent]) -> Vec<String> {
    events
        .iter()
        .filter(|e| matches!(e, SessionEvent::Log { .. }))
        .map(|e| e.message().to_string())
        .collect()
}

// --- BrokerConnection ---

#[tokio::test]
async fn broker_client_is_shared_until_it_fails() {
    let h = TestHarness::new();

    let a = h.broker.get_client();
    let b = h.broker.get_client();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(h.broker_connector.clients_created(), 1);
    assert_eq!(h.broker.status(), LinkStatus::Connecting);

    let first = h.broker_connector.last_client().unwrap();
    h.broker_connector.fail_last("connection refused");
    assert_eq!(h.broker.status(), LinkStatus::Failed);
    assert_eq!(h.broker.last_error().as_deref(), Some("connection refused"));

    let c = h.broker.get_client();
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(h.broker_connector.clients_created(), 2);

    h.settle().await;
    assert!(first.is_disconnected());
}

#[tokio::test]
async fn late_events_from_replaced_client_are_ignored() {
    let h = TestHarness::new();
    h.broker.get_client();
    let stale = h.broker_connector.link(0).unwrap();

    h.broker_connector.fail_last("timeout");
    h.connect_broker();
    assert_eq!(h.broker.status(), LinkStatus::Connected);

    stale.closed();
    stale.error("late failure");
    assert_eq!(h.broker.status(), LinkStatus::Connected);
    assert_eq!(h.broker_connector.clients_created(), 2);
}

// --- IngestionPipeline ---

#[tokio::test]
async fn malformed_payload_is_skipped_and_ingestion_continues() {
    let h = TestHarness::new();
    h.start_ingestion().await.unwrap();
    h.connect_broker();

    h.broker_connector.deliver(TEST_TOPIC, "not json{");
    h.broker_connector.deliver(TEST_TOPIC, r#"{"temp":21.5}"#);
    h.settle().await;

    let docs = h.memory_store().documents_in(TEST_COLLECTION);
    assert_eq!(docs.len(), 1);
    assert_eq!(Value::Object(docs[0].clone()), json!({"temp": 21.5, "topic": "readings"}));

    let counters = h.pipeline.stats().snapshot();
    assert_eq!(counters.received, 2);
    assert_eq!(counters.malformed, 1);
    assert_eq!(counters.stored, 1);
}

#[tokio::test]
async fn insert_failure_does_not_stop_ingestion() {
    let h = TestHarness::new();
    h.start_ingestion().await.unwrap();
    h.connect_broker();

    h.memory_store().set_fail_inserts(true);
    h.broker_connector.deliver(TEST_TOPIC, r#"{"hum":40}"#);
    h.settle().await;

    h.memory_store().set_fail_inserts(false);
    h.broker_connector.deliver(TEST_TOPIC, r#"{"hum":41}"#);
    h.settle().await;

    let docs = h.memory_store().documents_in(TEST_COLLECTION);
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["hum"], 41);
    assert_eq!(h.pipeline.stats().snapshot().failed, 1);
}

#[tokio::test]
async fn unreachable_store_is_fatal_before_subscribing() {
    let h = TestHarness::new();
    h.store_connector.set_fail_connect(true);

    let result = h.start_ingestion().await;
    assert!(matches!(result, Err(IngestionError::Store(_))));
    assert_eq!(h.broker_connector.clients_created(), 0);
}

#[tokio::test]
async fn rejected_subscription_is_fatal_at_startup() {
    let h = TestHarness::new();
    h.broker_connector.set_reject_subscriptions(true);

    let result = h.start_ingestion().await;
    assert!(matches!(
        result,
        Err(IngestionError::Subscribe { ref topic, source: BrokerError::SubscriptionRejected { .. } }) if topic == TEST_TOPIC
    ));
    assert!(h.broker_connector.last_client().unwrap().subscriptions().is_empty());
}

#[tokio::test]
async fn ingestion_survives_client_replacement() {
    let h = TestHarness::new();
    h.start_ingestion().await.unwrap();
    h.connect_broker();

    h.broker_connector.fail_last("network down");
    h.broker.get_client();
    h.settle().await;

    let replacement = h.broker_connector.last_client().unwrap();
    assert_eq!(replacement.subscriptions(), vec![TEST_TOPIC.to_string()]);

    h.broker_connector.connect_last();
    h.broker_connector.deliver(TEST_TOPIC, r#"{"co2":412}"#);
    h.settle().await;
    assert_eq!(h.memory_store().documents_in(TEST_COLLECTION).len(), 1);
}

// --- Sessions et simulation ---

#[tokio::test(start_paused = true)]
async fn empty_station_list_starts_nothing() {
    let h = TestHarness::new();
    h.connect_broker();
    let mut s = h.open_session();

    h.start_stations(&s, &[], json!({"temp": 20}));
    assert_eq!(
        s.drain(),
        vec![SessionEvent::info(MSG_CONNECTED), SessionEvent::status(MSG_NO_STATIONS)]
    );

    h.advance(TEST_PERIOD * 3).await;
    assert!(h.broker_connector.published().is_empty());
    assert!(h.registry.active_job(s.id).is_none());
    assert!(s.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn start_publishes_one_reading_per_station_each_period() {
    let h = TestHarness::new();
    h.connect_broker();
    let mut s = h.open_session();

    h.start_stations(&s, &["A1"], json!({"plu": "5"}));
    assert_eq!(
        s.drain(),
        vec![SessionEvent::info(MSG_CONNECTED), SessionEvent::status(MSG_STARTED)]
    );

    // premier tick après une période complète
    h.advance(TEST_PERIOD - SLACK).await;
    assert!(h.broker_connector.published().is_empty());

    h.advance(SLACK * 2).await;
    let published = h.broker_connector.published_on(TEST_TOPIC);
    assert_eq!(published.len(), 1);

    let reading = published[0].json().unwrap();
    assert_eq!(reading["plu"], json!(5));
    assert_eq!(reading["stationIdentifier"], "A1");
    assert!(reading["currentUnixTimeSeconds"].is_i64());
    assert_eq!(reading.as_object().unwrap().len(), 3);

    let serialized = String::from_utf8(published[0].payload.clone()).unwrap();
    assert_eq!(s.drain(), vec![SessionEvent::log(format!("[readings] {serialized}"))]);

    h.advance(TEST_PERIOD).await;
    assert_eq!(h.broker_connector.published().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn stations_are_published_in_order() {
    let h = TestHarness::new();
    h.connect_broker();
    let mut s = h.open_session();

    h.start_stations(&s, &["A1", "B2", "C3"], json!({}));
    h.advance(TEST_PERIOD + SLACK).await;

    let stations: Vec<Value> = h
        .broker_connector
        .published()
        .iter()
        .map(|m| m.json().unwrap()["stationIdentifier"].clone())
        .collect();
    assert_eq!(stations, vec![json!("A1"), json!("B2"), json!("C3")]);
    assert_eq!(log_messages(&s.drain()).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn params_are_sanitized_before_publishing() {
    let h = TestHarness::new();
    h.connect_broker();
    let s = h.open_session();

    h.start_stations(
        &s,
        &["A1"],
        json!({"a": " 3.5 ", "b": "", "c": true, "d": "abc", "e": 7, "f": null, "g": {"x": 1}}),
    );
    h.advance(TEST_PERIOD + SLACK).await;

    let reading = h.broker_connector.published()[0].json().unwrap();
    let reading = reading.as_object().unwrap();
    assert_eq!(reading["a"], json!(3.5));
    assert_eq!(reading["b"], json!(0));
    assert_eq!(reading["c"], json!(1));
    assert_eq!(reading["e"], json!(7));
    // champ numérique vidé sur la page : NaN côté navigateur, null sur le fil
    assert_eq!(reading["f"], json!(0));
    for discarded in ["d", "g"] {
        assert!(!reading.contains_key(discarded), "{discarded} should be dropped");
    }
}

#[tokio::test(start_paused = true)]
async fn restarting_replaces_the_running_job() {
    let h = TestHarness::new();
    h.connect_broker();
    let mut s = h.open_session();

    h.start_stations(&s, &["A1"], json!({}));
    h.advance(TEST_PERIOD / 2).await;
    h.start_stations(&s, &["B2"], json!({}));
    assert_eq!(h.registry.running_count(), 1);

    // l'ancien job aurait tické ici
    h.advance(TEST_PERIOD / 2 + SLACK).await;
    assert!(h.broker_connector.published().is_empty());

    h.advance(TEST_PERIOD / 2).await;
    let published = h.broker_connector.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].json().unwrap()["stationIdentifier"], "B2");

    let events = s.drain();
    assert_eq!(
        events[..3],
        [
            SessionEvent::info(MSG_CONNECTED),
            SessionEvent::status(MSG_STARTED),
            SessionEvent::status(MSG_STARTED),
        ]
    );
    assert_eq!(log_messages(&events).len(), 1);
}

#[tokio::test]
async fn stop_while_idle_only_reports_stopped() {
    let h = TestHarness::new();
    let mut s = h.open_session();

    h.stop(&s);
    assert_eq!(
        s.drain(),
        vec![SessionEvent::info(MSG_CONNECTED), SessionEvent::status(MSG_STOPPED)]
    );
    assert_eq!(h.broker_connector.clients_created(), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_the_running_job() {
    let h = TestHarness::new();
    h.connect_broker();
    let mut s = h.open_session();

    h.start_stations(&s, &["A1"], json!({}));
    h.stop(&s);
    h.advance(TEST_PERIOD * 2).await;

    assert!(h.broker_connector.published().is_empty());
    assert_eq!(
        s.drain(),
        vec![
            SessionEvent::info(MSG_CONNECTED),
            SessionEvent::status(MSG_STARTED),
            SessionEvent::status(MSG_STOPPED),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn tick_without_connected_broker_cancels_the_job() {
    let h = TestHarness::new();
    let mut s = h.open_session();

    h.start_stations(&s, &["A1"], json!({}));
    // le start crée le client, qui ne se connecte jamais
    assert_eq!(h.broker_connector.clients_created(), 1);

    h.advance(TEST_PERIOD + SLACK).await;
    assert_eq!(
        s.drain(),
        vec![
            SessionEvent::info(MSG_CONNECTED),
            SessionEvent::status(MSG_STARTED),
            SessionEvent::status(MSG_BROKER_DISCONNECTED),
        ]
    );
    assert!(h.registry.active_job(s.id).is_none());

    h.advance(TEST_PERIOD * 2).await;
    assert!(s.drain().is_empty());
    assert!(h.broker_connector.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn broker_loss_mid_run_stops_the_simulation() {
    let h = TestHarness::new();
    h.connect_broker();
    let mut s = h.open_session();

    h.start_stations(&s, &["A1"], json!({}));
    h.advance(TEST_PERIOD + SLACK).await;
    assert_eq!(h.broker_connector.published().len(), 1);

    h.broker_connector.close_last();
    h.advance(TEST_PERIOD).await;

    let events = s.drain();
    assert_eq!(events.last(), Some(&SessionEvent::status(MSG_BROKER_DISCONNECTED)));
    assert_eq!(h.broker_connector.published().len(), 1);
    assert_eq!(h.registry.running_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn publish_failure_skips_the_log_but_keeps_running() {
    let h = TestHarness::new();
    h.connect_broker();
    let mut s = h.open_session();

    h.start_stations(&s, &["A1", "B2"], json!({}));
    h.broker_connector.set_fail_publish(true);
    h.advance(TEST_PERIOD + SLACK).await;
    assert!(log_messages(&s.drain()).is_empty());
    assert!(h.registry.active_job(s.id).is_some());

    h.broker_connector.set_fail_publish(false);
    h.advance(TEST_PERIOD).await;
    assert_eq!(log_messages(&s.drain()).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn stop_during_publish_sends_no_late_log() {
    let h = TestHarness::new();
    h.connect_broker();
    let mut s = h.open_session();

    h.start_stations(&s, &["A1", "B2"], json!({}));
    h.broker_connector.set_publish_delay(Some(Duration::from_secs(1)));

    // le tick démarre, la publication de A1 est en cours
    h.advance(TEST_PERIOD + SLACK).await;
    h.stop(&s);
    h.advance(Duration::from_secs(3)).await;

    let published = h.broker_connector.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].json().unwrap()["stationIdentifier"], "A1");
    assert_eq!(
        s.drain(),
        vec![
            SessionEvent::info(MSG_CONNECTED),
            SessionEvent::status(MSG_STARTED),
            SessionEvent::status(MSG_STOPPED),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn restart_during_publish_keeps_old_logs_out() {
    let h = TestHarness::new();
    h.connect_broker();
    let mut s = h.open_session();

    h.start_stations(&s, &["A1"], json!({}));
    h.broker_connector.set_publish_delay(Some(Duration::from_secs(1)));
    h.advance(TEST_PERIOD + SLACK).await;
    h.start_stations(&s, &["B2"], json!({}));
    h.advance(Duration::from_secs(2)).await;

    assert_eq!(
        s.drain(),
        vec![
            SessionEvent::info(MSG_CONNECTED),
            SessionEvent::status(MSG_STARTED),
            SessionEvent::status(MSG_STARTED),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn closing_a_session_cancels_its_job() {
    let h = TestHarness::new();
    h.connect_broker();
    let s = h.open_session();

    h.start_stations(&s, &["A1"], json!({}));
    h.scheduler.close_session(s.id);
    h.advance(TEST_PERIOD * 2).await;

    assert!(h.broker_connector.published().is_empty());
    assert_eq!(h.registry.session_count(), 0);
    assert_eq!(h.registry.running_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn sessions_are_independent() {
    let h = TestHarness::new();
    h.connect_broker();
    let mut first = h.open_session();
    let mut second = h.open_session();

    h.start_stations(&first, &["A1"], json!({}));
    h.start_stations(&second, &["B2"], json!({}));
    h.stop(&first);
    h.advance(TEST_PERIOD + SLACK).await;

    let published = h.broker_connector.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].json().unwrap()["stationIdentifier"], "B2");
    assert!(log_messages(&first.drain()).is_empty());
    assert_eq!(log_messages(&second.drain()).len(), 1);
}

#[tokio::test]
async fn invalid_and_unknown_messages_are_reported() {
    let h = TestHarness::new();
    let mut s = h.open_session();

    h.send(&s, "definitely not json");
    h.send(&s, r#"{"action":"dance"}"#);
    h.send(&s, r#"{"stations":["A1"]}"#);
    h.send(&s, "null");

    assert_eq!(
        s.drain(),
        vec![
            SessionEvent::info(MSG_CONNECTED),
            SessionEvent::status(MSG_INVALID_PAYLOAD),
            SessionEvent::status(MSG_UNKNOWN_ACTION),
            SessionEvent::status(MSG_UNKNOWN_ACTION),
            SessionEvent::status(MSG_INVALID_PAYLOAD),
        ]
    );
}

// --- Health et arrêt ---

#[tokio::test(start_paused = true)]
async fn health_reports_connections_and_sessions() {
    let h = TestHarness::new();
    h.start_ingestion().await.unwrap();
    h.connect_broker();
    let s = h.open_session();
    h.start_stations(&s, &["A1"], json!({}));
    h.broker_connector.deliver(TEST_TOPIC, r#"{"temp":19}"#);
    h.settle().await;

    let health = h.health.get_health();
    assert_eq!(health.broker_status, LinkStatus::Connected);
    assert_eq!(health.broker_clients_created, 1);
    assert!(health.store_connected);
    assert_eq!(health.sessions_open, 1);
    assert_eq!(health.simulations_running, 1);
    assert_eq!(health.ingestion.stored, 1);

    let json = serde_json::to_value(&health).unwrap();
    assert_eq!(json["broker_status"], "connected");
}

#[tokio::test]
async fn release_closes_store_and_broker_once() {
    let h = TestHarness::new();
    h.start_ingestion().await.unwrap();
    h.connect_broker();
    let client = h.broker_connector.last_client().unwrap();

    shutdown::release(&h.store, &h.broker).await;
    shutdown::release(&h.store, &h.broker).await;

    assert_eq!(h.memory_store().close_count(), 1);
    assert!(!h.store.is_connected());
    assert!(client.is_disconnected());
    assert_eq!(h.broker.status(), LinkStatus::Absent);
}

#[tokio::test(start_paused = true)]
async fn auto_connecting_broker_serves_both_paths() {
    let h = TestHarness::auto_connecting();
    h.start_ingestion().await.unwrap();
    h.settle().await;
    assert_eq!(h.broker.status(), LinkStatus::Connected);

    let mut s = h.open_session();
    h.start_stations(&s, &["A1"], json!({"temp": 18}));
    h.advance(TEST_PERIOD + SLACK).await;

    // la lecture publiée revient par la souscription d'ingestion
    let published = h.broker_connector.published_on(TEST_TOPIC);
    h.broker_connector.deliver(TEST_TOPIC, published[0].payload.clone());
    h.settle().await;

    let docs = h.memory_store().documents_in(TEST_COLLECTION);
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["stationIdentifier"], "A1");
    assert_eq!(docs[0]["topic"], "readings");
    assert_eq!(log_messages(&s.drain()).len(), 1);
    assert_eq!(h.broker_connector.clients_created(), 1);
}
