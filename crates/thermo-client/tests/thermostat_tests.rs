//! Thermostat client against a fake device over TCP

use serde_json::json;
use std::time::Duration;
use thermo_client::prelude::*;
use thermo_client::{ChangeOrigin, ModelEvent};
use thermo_core::ErrorCode;
use thermo_test_utils::{wait_until, Collector, FakeThermostat, Reply, DEFAULT_TIMEOUT};

fn builder(address: &str) -> ThermostatBuilder {
    Thermostat::builder(address)
        .call_timeout(Duration::from_millis(300))
        .reconnect_delay(Duration::from_millis(50), Duration::from_millis(200))
}

/// Open a client and wait for the first state poll to land
async fn connect(fake: &FakeThermostat) -> Thermostat {
    let thermostat = builder(&fake.address())
        .open()
        .await
        .expect("Failed to open thermostat");

    thermostat
        .wait_connected(DEFAULT_TIMEOUT)
        .await
        .expect("Thermostat did not connect");
    assert!(wait_until(|| thermostat.is_connected(), DEFAULT_TIMEOUT).await);
    assert!(
        wait_until(
            || thermostat.get("insideTemp").ok() == Some(PropertyValue::Float(21.5)),
            DEFAULT_TIMEOUT
        )
        .await,
        "initial state poll was not applied"
    );
    thermostat
}

#[tokio::test]
async fn test_measured_temp() {
    let fake = FakeThermostat::start().await;
    let thermostat = connect(&fake).await;

    let temp = thermostat
        .proxy()
        .get_measured_temp()
        .await
        .expect("getMeasuredTemp failed");
    assert_eq!(temp, 21.5);

    let requests = fake.requests_for("getMeasuredTemp");
    assert_eq!(requests.len(), 1);
    assert!(requests[0].params.is_none());
    assert!(requests[0].id >= 1);
}

#[tokio::test]
async fn test_heartbeat_mirrors_device_state() {
    let fake = FakeThermostat::start().await;
    let thermostat = connect(&fake).await;

    assert_eq!(
        thermostat.get("systemMode").unwrap(),
        PropertyValue::from("heat")
    );
    assert_eq!(thermostat.get("fanPresent").unwrap(), PropertyValue::Bool(true));
    assert_eq!(thermostat.get("version").unwrap(), PropertyValue::from("1.0.0-fake"));
    assert_eq!(thermostat.get("status").unwrap(), PropertyValue::from("Connected"));

    // Applying the poll must not echo anything back
    assert!(fake.requests_for("setState").is_empty());
}

#[tokio::test]
async fn test_set_confirmed() {
    let fake = FakeThermostat::start().await;
    let thermostat = connect(&fake).await;

    let outcome = thermostat.set("desiredTemp", 25.0).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Confirmed);
    assert_eq!(thermostat.get("desiredTemp").unwrap(), PropertyValue::Float(25.0));

    let sets = fake.requests_for("setState");
    assert_eq!(sets.len(), 1);
    assert_eq!(
        sets[0].params.clone().map(|p| p.into_value()),
        Some(json!({"desiredTemp": 25.0}))
    );
    assert_eq!(fake.property("desiredTemp"), Some(json!(25.0)));
}

#[tokio::test]
async fn test_set_to_current_value_sends_nothing() {
    let fake = FakeThermostat::start().await;
    let thermostat = connect(&fake).await;

    let outcome = thermostat.set("desiredTemp", 24.0).await.unwrap();
    assert_eq!(outcome, SyncOutcome::LocalOnly);
    assert!(fake.requests_for("setState").is_empty());
}

#[tokio::test]
async fn test_set_rolled_back_when_device_disagrees() {
    let fake = FakeThermostat::start().await;
    fake.pin("desiredTemp", json!(24.0));
    let thermostat = connect(&fake).await;

    let changes = Collector::new();
    let collector = changes.clone();
    let _sub = thermostat.subscribe(move |change: &PropertyChange| {
        if change.name == "desiredTemp" {
            collector.push(change.clone());
        }
    });

    let outcome = thermostat.set("desiredTemp", 25.0).await.unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::RolledBack {
            echoed: Some(PropertyValue::Float(24.0))
        }
    );
    assert_eq!(thermostat.get("desiredTemp").unwrap(), PropertyValue::Float(24.0));

    let origins: Vec<ChangeOrigin> = changes.values().iter().map(|c| c.origin).collect();
    assert_eq!(origins, vec![ChangeOrigin::Local, ChangeOrigin::Rollback]);
}

#[tokio::test]
async fn test_float_echo_tolerance() {
    let fake = FakeThermostat::start().await;
    fake.pin("desiredTemp", json!(1.000000000002));
    let thermostat = connect(&fake).await;

    // Equal at 12 significant digits
    let outcome = thermostat.set("desiredTemp", 1.000000000001).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Confirmed);
    assert_eq!(
        thermostat.get("desiredTemp").unwrap(),
        PropertyValue::Float(1.000000000001)
    );

    fake.pin("desiredTemp", json!(2.0));
    let outcome = thermostat.set("desiredTemp", 3.0).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::RolledBack { .. }));
    assert_eq!(
        thermostat.get("desiredTemp").unwrap(),
        PropertyValue::Float(1.000000000001)
    );
}

#[tokio::test]
async fn test_failed_set_rolls_back() {
    let fake = FakeThermostat::start().await;
    let thermostat = connect(&fake).await;
    fake.reply("setState", Reply::Silent);

    let outcome = thermostat.set("fanMode", "off").await.unwrap();
    assert_eq!(outcome, SyncOutcome::RolledBack { echoed: None });
    assert_eq!(thermostat.get("fanMode").unwrap(), PropertyValue::from("auto"));
}

#[tokio::test]
async fn test_pushed_updates_apply_without_echo() {
    let fake = FakeThermostat::start().await;
    let thermostat = connect(&fake).await;

    // Split every write to exercise reassembly on the client
    fake.set_chunk_size(Some(3));
    fake.push_update("desiredTemp", json!(26.5)).await;

    assert!(
        wait_until(
            || thermostat.get("desiredTemp").ok() == Some(PropertyValue::Float(26.5)),
            DEFAULT_TIMEOUT
        )
        .await
    );
    assert!(fake.requests_for("setState").is_empty());
}

#[tokio::test]
async fn test_nan_update_is_ignored() {
    let fake = FakeThermostat::start().await;
    let thermostat = connect(&fake).await;

    fake.push_raw(br#"{"type":"update","name":"insideTemp","value":NaN}"#)
        .await;
    // Sent after the NaN, so once it lands the NaN has been handled
    fake.push_update("outsideTemp", json!(3.5)).await;

    assert!(
        wait_until(
            || thermostat.get("outsideTemp").ok() == Some(PropertyValue::Float(3.5)),
            DEFAULT_TIMEOUT
        )
        .await
    );
    assert_eq!(thermostat.get("insideTemp").unwrap(), PropertyValue::Float(21.5));
}

#[tokio::test]
async fn test_listener_sees_notifications() {
    let fake = FakeThermostat::start().await;
    let thermostat = connect(&fake).await;

    let events = Collector::new();
    let collector = events.clone();
    thermostat.set_listener(move |event: &ModelEvent| collector.push(event.clone()));

    fake.push_raw(br#"{"method":"log","params":["boot"]}"#).await;
    assert!(events.wait_for_count(1, DEFAULT_TIMEOUT).await);

    match events.last() {
        Some(ModelEvent::Notification(note)) => assert_eq!(note.method(), Some("log")),
        other => panic!("Expected notification, got {:?}", other),
    }

    thermostat.clear_listener();
}

#[tokio::test]
async fn test_unknown_method_is_remote_error() {
    let fake = FakeThermostat::start().await;
    let thermostat = connect(&fake).await;

    let err = thermostat
        .call("reboot", CallArgs::None)
        .await
        .expect_err("reboot is not implemented by the device");
    assert!(matches!(err, ClientError::Remote(_)));
    assert_eq!(err.remote_code(), Some(ErrorCode::MethodNotFound));
}

#[tokio::test]
async fn test_reserved_names_are_not_sent() {
    let fake = FakeThermostat::start().await;
    let thermostat = connect(&fake).await;
    let before = fake.requests().len();

    for name in ["get_state", "_secret", "invoke"] {
        let err = thermostat.call(name, CallArgs::None).await.unwrap_err();
        assert!(matches!(err, ClientError::ReservedName(_)), "{}", name);
    }
    assert_eq!(fake.requests().len(), before);
}

#[tokio::test]
async fn test_toggle_led() {
    let fake = FakeThermostat::start().await;
    let thermostat = connect(&fake).await;

    thermostat.proxy().toggle_led(true).await.unwrap();
    assert_eq!(fake.property("ledActive"), Some(json!(true)));

    let toggles = fake.requests_for("toggleLed");
    assert_eq!(
        toggles[0].params.clone().map(|p| p.into_value()),
        Some(json!({"status": true}))
    );
}

#[tokio::test]
async fn test_call_times_out() {
    let fake = FakeThermostat::start().await;
    let thermostat = connect(&fake).await;
    fake.reply("getMeasuredTemp", Reply::Silent);

    let err = thermostat.proxy().get_measured_temp().await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout));

    // The connection survives a timeout
    fake.clear_reply("getMeasuredTemp");
    assert_eq!(thermostat.proxy().get_measured_temp().await.unwrap(), 21.5);
    assert_eq!(fake.connections(), 1);
}

#[tokio::test]
async fn test_uncorrelated_response_resolves_latest_call() {
    let fake = FakeThermostat::start().await;
    let thermostat = connect(&fake).await;
    fake.reply("getMeasuredTemp", Reply::WrongId(999, json!(19.0)));

    assert_eq!(thermostat.proxy().get_measured_temp().await.unwrap(), 19.0);
}

#[tokio::test]
async fn test_local_validation() {
    let fake = FakeThermostat::start().await;
    let thermostat = connect(&fake).await;

    assert!(matches!(
        thermostat.set("insideTemp", 30.0).await,
        Err(ClientError::InvalidValue { .. })
    ));
    assert!(matches!(
        thermostat.set("hysteresisTemp", 11.0).await,
        Err(ClientError::InvalidValue { .. })
    ));
    assert!(matches!(
        thermostat.set("systemMode", "turbo").await,
        Err(ClientError::InvalidValue { .. })
    ));
    assert!(matches!(
        thermostat.set("nope", 1).await,
        Err(ClientError::UnknownProperty(_))
    ));
    assert!(fake.requests_for("setState").is_empty());
}

#[tokio::test]
async fn test_reconnects_after_drop() {
    let fake = FakeThermostat::start().await;
    let thermostat = connect(&fake).await;

    let statuses = Collector::new();
    let collector = statuses.clone();
    let _sub = thermostat.subscribe(move |change: &PropertyChange| {
        if change.name == "status" {
            collector.push(change.value.to_string());
        }
    });

    fake.drop_connections().await;

    assert!(fake.wait_connection(2, DEFAULT_TIMEOUT).await);
    assert!(
        wait_until(
            || statuses.values().iter().any(|s| s == "Connected"),
            DEFAULT_TIMEOUT
        )
        .await
    );

    let seen = statuses.values();
    assert!(
        seen[0].starts_with("Connection lost. Reason:"),
        "unexpected status sequence {:?}",
        seen
    );
    thermostat.wait_connected(DEFAULT_TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_heartbeat_failure_forces_reconnect() {
    let fake = FakeThermostat::start().await;
    fake.reply("getState", Reply::Silent);

    let thermostat = builder(&fake.address()).open().await.unwrap();

    // First poll times out, the connection is dropped and reopened
    assert!(fake.wait_requests("getState", 1, DEFAULT_TIMEOUT).await);
    assert!(fake.wait_connection(2, DEFAULT_TIMEOUT).await);

    thermostat.close().await;
}

#[tokio::test]
async fn test_connection_failed_status() {
    let address = {
        let fake = FakeThermostat::start().await;
        fake.address()
    };

    let thermostat = builder(&address).open().await.unwrap();
    assert!(
        wait_until(
            || match thermostat.get("status") {
                Ok(PropertyValue::Text(status)) => status.starts_with("Connection failed. Reason:"),
                _ => false,
            },
            DEFAULT_TIMEOUT
        )
        .await
    );
    assert!(!thermostat.is_connected());

    // Offline writes stay local
    let outcome = thermostat.set("desiredTemp", 20.0).await.unwrap();
    assert_eq!(outcome, SyncOutcome::LocalOnly);

    thermostat.close().await;
}

#[tokio::test]
async fn test_close() {
    let fake = FakeThermostat::start().await;
    let thermostat = connect(&fake).await;

    let states = Collector::new();
    let collector = states.clone();
    let _sub = thermostat.on_connection_state_changed(move |state| collector.push(state));

    thermostat.close().await;

    assert_eq!(thermostat.state(), ConnectionState::Disconnected);
    assert!(!thermostat.is_connected());
    assert_eq!(
        thermostat.get("status").unwrap(),
        PropertyValue::from("Connection lost. Reason: Connection was closed cleanly.")
    );
    assert_eq!(states.values(), vec![ConnectionState::Disconnected]);

    // No reconnect after close
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(fake.connections(), 1);
}

#[tokio::test]
async fn test_set_address_switches_device() {
    let first = FakeThermostat::start().await;
    let second = FakeThermostat::start().await;
    second.set_property("insideTemp", json!(18.0));

    let thermostat = connect(&first).await;

    let changes = Collector::new();
    let collector = changes.clone();
    let _sub = thermostat.subscribe(move |change: &PropertyChange| {
        if change.name == "insideTemp" {
            collector.push(change.value.clone());
        }
    });

    thermostat.set_address(&second.address()).await;
    assert_eq!(thermostat.address(), second.address());

    // Subscriptions carry over to the new model
    assert!(
        wait_until(
            || changes.last() == Some(PropertyValue::Float(18.0)),
            DEFAULT_TIMEOUT
        )
        .await
    );
    assert_eq!(thermostat.get("insideTemp").unwrap(), PropertyValue::Float(18.0));
    assert_eq!(second.connections(), 1);
}
