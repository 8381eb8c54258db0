//! Reconnecting session over the in-process transport, with a paused clock

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thermo_client::connection::ConnectionOptions;
use thermo_client::session::{DisconnectKind, SessionObserver, SessionOptions};
use thermo_client::{ConnectionState, ReconnectingSession, RpcConnection};
use thermo_core::{FrameReassembler, Message, Notification};
use thermo_transport::{MemoryConnector, TransportEvent, TransportReceiver, TransportSender};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Connected,
    Lost(String),
    Failed,
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<(Instant, Event)>>,
    states: Mutex<Vec<ConnectionState>>,
}

impl Recorder {
    fn events(&self) -> Vec<(Instant, Event)> {
        self.events.lock().clone()
    }
}

impl SessionObserver for Recorder {
    fn on_connect(&self, _connection: Arc<RpcConnection>) {
        self.events.lock().push((Instant::now(), Event::Connected));
    }

    fn on_disconnect(&self, kind: DisconnectKind, reason: &str) {
        let event = match kind {
            DisconnectKind::Lost => Event::Lost(reason.to_string()),
            DisconnectKind::Failed => Event::Failed,
        };
        self.events.lock().push((Instant::now(), event));
    }

    fn on_state_changed(&self, state: ConnectionState) {
        self.states.lock().push(state);
    }
}

fn session(connector: Arc<MemoryConnector>, recorder: Arc<Recorder>) -> ReconnectingSession {
    ReconnectingSession::new(
        "memory",
        connector,
        SessionOptions {
            connection: ConnectionOptions {
                call_timeout: Duration::from_secs(3),
                ..Default::default()
            },
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(5),
        },
        recorder,
        Arc::new(|_: Notification| {}),
    )
}

#[tokio::test(start_paused = true)]
async fn test_retry_delay_bounded_by_max() {
    let (connector, _accepted) = MemoryConnector::new();
    let connector = Arc::new(connector);
    connector.set_refusing(true);
    let recorder = Arc::new(Recorder::default());

    let session = session(connector.clone(), recorder.clone());
    session.start();
    tokio::time::sleep(Duration::from_secs(40)).await;
    session.close().await;

    let failures: Vec<Instant> = recorder
        .events()
        .into_iter()
        .filter(|(_, event)| *event == Event::Failed)
        .map(|(at, _)| at)
        .collect();
    assert!(failures.len() >= 6, "only {} attempts", failures.len());
    assert_eq!(connector.attempts(), failures.len());

    for gap in failures.windows(2).map(|w| w[1] - w[0]) {
        assert!(gap <= Duration::from_millis(5001), "gap {:?} over max", gap);
        assert!(gap >= Duration::from_millis(879), "gap {:?} under min", gap);
    }
}

#[tokio::test(start_paused = true)]
async fn test_backoff_resets_after_connect() {
    let (connector, mut accepted) = MemoryConnector::new();
    let connector = Arc::new(connector);
    connector.set_refusing(true);
    let recorder = Arc::new(Recorder::default());

    let session = session(connector.clone(), recorder.clone());
    session.start();

    // Long enough for the delay to reach its maximum
    tokio::time::sleep(Duration::from_secs(20)).await;
    connector.set_refusing(false);

    let (_, (device_tx, _device_rx)) = accepted.recv().await.expect("no connection");
    assert_eq!(session.state(), ConnectionState::Connected);

    device_tx.close().await.unwrap();

    // The next connection comes after the initial delay, not the maximum
    let (_, _second) = accepted.recv().await.expect("no reconnection");

    let events = recorder.events();
    let lost_at = events
        .iter()
        .find(|(_, e)| matches!(e, Event::Lost(_)))
        .map(|(at, _)| *at)
        .expect("no lost event");
    let reconnected_at = events
        .iter()
        .filter(|(_, e)| *e == Event::Connected)
        .map(|(at, _)| *at)
        .nth(1)
        .expect("no second connect");

    let gap = reconnected_at - lost_at;
    assert!(
        gap >= Duration::from_millis(879) && gap <= Duration::from_millis(1121),
        "gap {:?}",
        gap
    );

    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_requests_route_through_live_connection() {
    let (connector, mut accepted) = MemoryConnector::new();
    let recorder = Arc::new(Recorder::default());
    let session = Arc::new(session(Arc::new(connector), recorder.clone()));

    assert!(matches!(
        session.send_request("getState", None).await,
        Err(thermo_client::ClientError::NotConnected)
    ));

    session.start();
    let (_, (device_tx, mut device_rx)) = accepted.recv().await.expect("no connection");

    // Device: answer the first request
    let device = tokio::spawn(async move {
        let mut reassembler = FrameReassembler::new();
        while let Some(event) = device_rx.recv().await {
            let TransportEvent::Data(data) = event else {
                continue;
            };
            for message in reassembler.feed(&data).unwrap() {
                if let Message::Request(request) = message {
                    let reply = json!({"jsonrpc": "2.0", "id": request.id, "result": {"desiredTemp": 24.0}});
                    device_tx
                        .send(Bytes::from(reply.to_string()))
                        .await
                        .unwrap();
                    return request;
                }
            }
        }
        panic!("device stream ended");
    });

    let response = session.send_request("getState", None).await.unwrap();
    assert_eq!(response.into_result(), Ok(json!({"desiredTemp": 24.0})));

    let request = device.await.unwrap();
    assert_eq!(request.method, "getState");
    assert_eq!(request.id, 1);

    session.close().await;
    assert_eq!(
        recorder.events().last().map(|(_, e)| e.clone()),
        Some(Event::Lost("Connection was closed cleanly.".into()))
    );
    assert_eq!(
        recorder.states.lock().clone(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected
        ]
    );
}
