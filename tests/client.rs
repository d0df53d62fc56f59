#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Client integration tests against a mock TV
//!
//! These tests verify:
//! - Pairing and client key persistence
//! - Request correlation and subscription ordering
//! - Dependent subscriptions and the state snapshot
//! - Teardown on keepalive failure, power off and disconnect

mod mock_tv;

use futures_util::future::join_all;
use mock_tv::{eventually, MockTv};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use webos_tv::{
    endpoints, state_observer, subscription_handler, ConnectionPhase, CredentialStore,
    DeviceState, MemoryStore, WebOsClient, WebOsError, LIVE_TV_APP_ID,
};

// =============================================================================
// Test utilities
// =============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn client_for(tv: &MockTv) -> (WebOsClient, Arc<MemoryStore>) {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let client = WebOsClient::with_config(tv.host(), tv.config(), store.clone());
    (client, store)
}

// =============================================================================
// Pairing
// =============================================================================

#[tokio::test]
async fn first_connect_pairs_and_stores_key() {
    let tv = MockTv::start().await;
    let (client, store) = client_for(&tv);

    client.connect().await.unwrap();

    assert!(client.is_paired());
    assert_eq!(store.get(&tv.host()).await.unwrap().as_deref(), Some("abc"));
    let first = tv.with(|s| s.registrations[0].clone());
    assert!(first.get("client-key").is_none());
    assert_eq!(first["pairingType"], "PROMPT");

    client.disconnect().await;
    assert!(!client.is_paired());

    client.connect().await.unwrap();
    let second = tv.with(|s| s.registrations[1].clone());
    assert_eq!(second["client-key"], "abc");

    client.disconnect().await;
    tv.stop();
}

#[tokio::test]
async fn hello_probe_fills_hello_info() {
    let tv = MockTv::start().await;
    init_tracing();
    let client = WebOsClient::with_config(
        tv.host(),
        tv.config().with_hello_probe(true),
        Arc::new(MemoryStore::new()),
    );

    client.connect().await.unwrap();
    assert_eq!(client.hello_info().unwrap()["deviceOS"], "webOS");

    client.disconnect().await;
    tv.stop();
}

#[tokio::test]
async fn unreachable_tv_fails_connect() {
    init_tracing();
    let client = WebOsClient::with_config(
        "127.0.0.1",
        webos_tv::ClientConfig::default()
            .with_port(1)
            .with_connect_timeout(Duration::from_millis(500)),
        Arc::new(MemoryStore::new()),
    );

    let err = client.connect().await.unwrap_err();
    assert!(err.is_transport(), "unexpected error: {err:?}");
    assert_eq!(client.connection_phase(), ConnectionPhase::Idle);
    assert!(client.last_error().is_some());
}

// =============================================================================
// Correlation and dispatch
// =============================================================================

#[tokio::test]
async fn concurrent_requests_get_their_own_responses() {
    let tv = MockTv::start().await;
    let (client, _) = client_for(&tv);
    client.connect().await.unwrap();

    // Later requests are answered first
    let requests = (0..20u64).map(|n| {
        let client = &client;
        async move {
            let payload = json!({"n": n, "delayMs": (20 - n) * 5});
            (n, client.request("test/echo", Some(payload)).await.unwrap())
        }
    });
    for (n, response) in join_all(requests).await {
        assert_eq!(response["echo"]["n"], n);
    }
    assert_eq!(client.outstanding().0, 0);

    client.disconnect().await;
    tv.stop();
}

#[tokio::test]
async fn subscription_handler_sees_frames_in_arrival_order() {
    let tv = MockTv::start().await;
    let (client, _) = client_for(&tv);
    client.connect().await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let sub = client
        .subscribe(
            "test/stream",
            Some(json!({"count": 50})),
            subscription_handler(move |payload: Value| {
                let sink = sink.clone();
                async move {
                    tokio::task::yield_now().await;
                    sink.lock().unwrap().push(payload["seq"].as_u64().unwrap());
                }
            }),
        )
        .await
        .unwrap();
    assert_eq!(sub.initial["seq"], 0);

    eventually("all stream frames", || seen.lock().unwrap().len() == 51).await;
    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen, (0..=50).collect::<Vec<u64>>());

    client.unsubscribe(sub.id).await.unwrap();
    eventually("unsubscribe frame", || {
        tv.with(|s| {
            s.received
                .iter()
                .any(|r| r.frame_type == "unsubscribe" && r.id == json!(sub.id))
        })
    })
    .await;
    assert!(matches!(
        client.unsubscribe(sub.id).await,
        Err(WebOsError::InvalidArgument(_))
    ));

    client.disconnect().await;
    tv.stop();
}

#[tokio::test]
async fn service_not_found_leaves_connection_alive() {
    let tv = MockTv::start().await;
    tv.with(|s| s.not_found.insert("test/missing".to_string()));
    let (client, _) = client_for(&tv);
    client.connect().await.unwrap();

    let err = client.request("test/missing", None).await.unwrap_err();
    assert!(matches!(err, WebOsError::ServiceNotFound(_)), "got {err:?}");

    assert!(client.is_connected());
    let echo = client
        .request("test/echo", Some(json!({"still": "here"})))
        .await
        .unwrap();
    assert_eq!(echo["echo"]["still"], "here");

    client.disconnect().await;
    tv.stop();
}

#[tokio::test]
async fn requests_without_connection_fail() {
    init_tracing();
    let client = WebOsClient::with_config(
        "127.0.0.1",
        Default::default(),
        Arc::new(MemoryStore::new()),
    );
    assert!(matches!(
        client.request("test/echo", None).await,
        Err(WebOsError::NotConnected)
    ));
    assert_eq!(client.state(), DeviceState::default());
}

// =============================================================================
// State snapshot
// =============================================================================

#[tokio::test]
async fn bootstrap_fills_snapshot() {
    let tv = MockTv::start().await;
    let (client, _) = client_for(&tv);
    client.connect().await.unwrap();

    assert_eq!(client.power_state().unwrap().state, "Active");
    assert!(client.is_on());
    assert_eq!(client.current_app_id().as_deref(), Some("netflix"));
    assert_eq!(client.muted(), Some(false));
    assert_eq!(client.volume(), Some(10));
    assert_eq!(client.apps().len(), 2);
    assert_eq!(client.inputs()["com.webos.app.hdmi1"]["label"], "HDMI 1");
    assert_eq!(client.sound_output().as_deref(), Some("tv_speaker"));
    assert_eq!(client.picture_settings().unwrap()["contrast"], "80");
    assert_eq!(client.system_info().unwrap()["modelName"], "OLED55C1");
    assert!(client.software_info().is_some());
    assert!(client.channels().is_none());

    client.disconnect().await;
    tv.stop();
}

#[tokio::test]
async fn unsupported_channels_are_skipped_but_malformed_ones_fail() {
    let tv = MockTv::start().await;
    tv.with(|s| {
        s.not_found
            .insert("com.webos.service.apiadapter/audio/getSoundOutput".to_string())
    });
    let (client, _) = client_for(&tv);

    client.connect().await.unwrap();
    assert_eq!(client.sound_output(), None);
    assert_eq!(client.volume(), Some(10));
    client.disconnect().await;

    tv.with(|s| s.malformed.insert("audio/getVolume".to_string()));
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, WebOsError::MalformedResponse(_)), "got {err:?}");
    assert_eq!(client.connection_phase(), ConnectionPhase::Idle);

    tv.stop();
}

#[tokio::test]
async fn live_tv_issues_dependent_subscriptions_once() {
    let tv = MockTv::start().await;
    let (client, _) = client_for(&tv);
    client.connect().await.unwrap();

    assert_eq!(tv.subscribe_count(endpoints::GET_TV_CHANNELS), 0);
    assert_eq!(tv.subscribe_count(endpoints::GET_CURRENT_CHANNEL), 0);

    assert!(tv.push(endpoints::GET_CURRENT_APP_INFO, json!({"appId": LIVE_TV_APP_ID})));
    eventually("channel info", || client.channel_info().is_some()).await;
    assert_eq!(client.channels().unwrap()[0]["channelId"], "1_1");
    assert_eq!(client.current_channel().unwrap()["channelNumber"], "1");

    for _ in 0..2 {
        assert!(tv.push(endpoints::GET_CURRENT_APP_INFO, json!({"appId": LIVE_TV_APP_ID})));
    }
    tv.push(endpoints::GET_CURRENT_APP_INFO, json!({"appId": "netflix"}));
    eventually("app switch", || client.current_app_id().as_deref() == Some("netflix")).await;

    assert_eq!(tv.subscribe_count(endpoints::GET_TV_CHANNELS), 1);
    assert_eq!(tv.subscribe_count(endpoints::GET_CURRENT_CHANNEL), 1);
    assert_eq!(tv.subscribe_count(endpoints::GET_CHANNEL_INFO), 1);

    let list = &tv.frames("subscribe", endpoints::GET_TV_CHANNELS)[0];
    let current = &tv.frames("subscribe", endpoints::GET_CURRENT_CHANNEL)[0];
    assert!(list.id.as_u64() < current.id.as_u64());

    client.disconnect().await;
    tv.stop();
}

#[tokio::test]
async fn observers_see_updates_and_one_reset() {
    let tv = MockTv::start().await;
    let (client, _) = client_for(&tv);

    let states = Arc::new(Mutex::new(Vec::<DeviceState>::new()));
    let sink = states.clone();
    client
        .register_observer(state_observer(move |state| {
            let sink = sink.clone();
            async move { sink.lock().unwrap().push(state) }
        }))
        .await;

    client.connect().await.unwrap();
    assert_eq!(states.lock().unwrap().len(), 1);
    assert_eq!(states.lock().unwrap()[0].volume, Some(10));

    tv.push(endpoints::GET_VOLUME, json!({"volumeStatus": {"volume": 15}}));
    eventually("volume update", || {
        states.lock().unwrap().last().and_then(|s| s.volume) == Some(15)
    })
    .await;

    // Registering while live calls the observer straight away
    let late = Arc::new(Mutex::new(0usize));
    let counter = late.clone();
    client
        .register_observer(state_observer(move |_| {
            let counter = counter.clone();
            async move { *counter.lock().unwrap() += 1 }
        }))
        .await;
    assert_eq!(*late.lock().unwrap(), 1);

    client.disconnect().await;
    let resets = states
        .lock()
        .unwrap()
        .iter()
        .filter(|s| **s == DeviceState::default())
        .count();
    assert_eq!(resets, 1);
    assert_eq!(states.lock().unwrap().last(), Some(&DeviceState::default()));
    assert_eq!(client.state(), DeviceState::default());

    // Observers do not carry over to the next connection
    let before = states.lock().unwrap().len();
    client.connect().await.unwrap();
    assert_eq!(states.lock().unwrap().len(), before);

    client.disconnect().await;
    tv.stop();
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test]
async fn disconnect_is_idempotent() {
    let tv = MockTv::start().await;
    let (client, _) = client_for(&tv);

    client.disconnect().await;
    assert_eq!(client.connection_phase(), ConnectionPhase::Idle);

    client.connect().await.unwrap();
    client.connect().await.unwrap();
    assert_eq!(tv.with(|s| s.connections), 1);

    client.disconnect().await;
    client.disconnect().await;
    assert!(!client.is_connected());
    assert_eq!(client.connection_phase(), ConnectionPhase::Idle);
    assert!(client.last_error().is_none());

    tv.stop();
}

#[tokio::test]
async fn keepalive_timeout_tears_down_and_reconnect_is_clean() {
    let tv = MockTv::start().await;
    init_tracing();
    let client = WebOsClient::with_config(
        tv.host(),
        tv.config()
            .with_keepalive(Some(Duration::from_millis(50)), Some(Duration::from_millis(200))),
        Arc::new(MemoryStore::new()),
    );
    client.connect().await.unwrap();
    assert!(client.is_connected());

    tv.freeze();
    eventually("teardown", || client.connection_phase() == ConnectionPhase::Idle).await;
    assert!(matches!(client.last_error(), Some(WebOsError::KeepaliveTimeout)));
    assert_eq!(client.state(), DeviceState::default());

    client.connect().await.unwrap();
    assert_eq!(tv.with(|s| s.connections), 2);
    assert_eq!(client.volume(), Some(10));
    assert!(client.last_error().is_none());

    client.disconnect().await;
    tv.stop();
}

#[tokio::test]
async fn power_off_report_disconnects() {
    let tv = MockTv::start().await;
    let (client, _) = client_for(&tv);
    client.connect().await.unwrap();

    assert!(tv.push(endpoints::GET_POWER_STATE, json!({"state": "Suspend"})));
    eventually("teardown", || client.connection_phase() == ConnectionPhase::Idle).await;
    assert!(client.last_error().is_none());
    assert!(!client.is_on());

    tv.stop();
}

#[tokio::test]
async fn power_off_is_skipped_when_tv_is_off() {
    let tv = MockTv::start().await;
    let (client, _) = client_for(&tv);
    client.connect().await.unwrap();

    tv.with(|s| s.power = "Active Standby".to_string());
    client.power_off().await.unwrap();
    tv.with(|s| s.power = "Active".to_string());
    client.power_off().await.unwrap();

    eventually("power off command", || {
        !tv.frames("request", endpoints::POWER_OFF).is_empty()
    })
    .await;
    assert_eq!(tv.frames("request", endpoints::POWER_OFF).len(), 1);

    client.disconnect().await;
    tv.stop();
}

// =============================================================================
// Commands
// =============================================================================

#[tokio::test]
async fn volume_steps_are_spaced_on_delayed_outputs() {
    let tv = MockTv::start().await;
    tv.with(|s| s.sound_output = "external_arc".to_string());
    init_tracing();
    let client = WebOsClient::with_config(
        tv.host(),
        tv.config()
            .with_volume_step_delay(Some(Duration::from_millis(150))),
        Arc::new(MemoryStore::new()),
    );
    client.connect().await.unwrap();

    let (first, second) = tokio::join!(client.volume_up(), client.volume_up());
    first.unwrap();
    second.unwrap();

    let steps = tv.frames("request", endpoints::VOLUME_UP);
    assert_eq!(steps.len(), 2);
    assert!(steps[1].at - steps[0].at >= Duration::from_millis(150));

    client.disconnect().await;
    tv.stop();
}

#[tokio::test]
async fn buttons_go_over_the_input_socket() {
    let tv = MockTv::start().await;
    let (client, _) = client_for(&tv);
    client.connect().await.unwrap();

    client.button("HOME", true).await.unwrap();
    client.move_pointer(5, -3, false).await.unwrap();
    assert!(matches!(
        client.button("NOT_A_BUTTON", true).await,
        Err(WebOsError::InvalidArgument(_))
    ));

    eventually("input messages", || tv.with(|s| s.input_messages.len()) == 2).await;
    let messages = tv.with(|s| s.input_messages.clone());
    assert_eq!(messages[0], "type:button\nname:HOME\n\n");
    assert_eq!(messages[1], "type:move\ndx:5\ndy:-3\ndown:0\n\n");
    assert_eq!(
        tv.frames("request", endpoints::INPUT_SOCKET).len(),
        1,
        "socket path is requested once"
    );

    client.disconnect().await;
    tv.stop();
}

#[tokio::test]
async fn luna_requests_open_and_close_an_alert() {
    let tv = MockTv::start().await;
    let (client, _) = client_for(&tv);
    client.connect().await.unwrap();

    client.input_button().await.unwrap();

    let alert = &tv.frames("request", endpoints::CREATE_ALERT)[0];
    assert_eq!(
        alert.payload["onclose"]["uri"],
        "luna://com.webos.surfacemanager/showInputPicker"
    );
    let close = &tv.frames("request", endpoints::CLOSE_ALERT)[0];
    assert_eq!(close.payload["alertId"], "alert-1");

    client.disconnect().await;
    tv.stop();
}

// =============================================================================
// Connect and teardown guarantees
// =============================================================================

#[tokio::test]
async fn concurrent_connects_share_one_attempt() {
    let tv = MockTv::start().await;
    let (client, _) = client_for(&tv);

    let (first, second) = tokio::join!(client.connect(), client.connect());
    first.unwrap();
    second.unwrap();

    assert_eq!(tv.with(|s| s.connections), 1);
    assert_eq!(tv.with(|s| s.registrations.len()), 1);

    client.disconnect().await;
    tv.stop();
}

#[tokio::test]
async fn off_report_during_bootstrap_cancels_connect() {
    let tv = MockTv::start().await;
    tv.with(|s| s.power = "Suspend".to_string());
    let (client, _) = client_for(&tv);

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, WebOsError::Cancelled), "got {err:?}");
    assert_eq!(client.connection_phase(), ConnectionPhase::Idle);
    assert!(!client.is_paired());

    tv.with(|s| s.power = "Active".to_string());
    client.connect().await.unwrap();
    client.disconnect().await;
    tv.stop();
}

#[tokio::test]
async fn pending_request_is_cancelled_by_disconnect() {
    let tv = MockTv::start().await;
    let (client, _) = client_for(&tv);
    client.connect().await.unwrap();

    let (answer, ()) = tokio::join!(
        client.request("test/echo", Some(json!({"delayMs": 5000}))),
        async {
            eventually("echo request on the wire", || {
                !tv.frames("request", "test/echo").is_empty()
            })
            .await;
            assert_eq!(client.outstanding().0, 1);
            client.disconnect().await;
        }
    );

    assert!(matches!(answer, Err(WebOsError::Cancelled)), "got {answer:?}");
    assert_eq!(client.connection_phase(), ConnectionPhase::Idle);
    tv.stop();
}

#[tokio::test]
async fn abandoned_request_leaves_nothing_behind() {
    let tv = MockTv::start().await;
    let (client, _) = client_for(&tv);
    client.connect().await.unwrap();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        client.request("test/echo", Some(json!({"delayMs": 200}))),
    )
    .await;
    assert!(abandoned.is_err());
    assert!(client.is_connected());
    assert_eq!(client.outstanding().0, 0);

    // The late answer arrives and is dropped
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(client.is_connected());
    assert_eq!(client.outstanding().0, 0);

    let echo = client
        .request("test/echo", Some(json!({"n": 2})))
        .await
        .unwrap();
    assert_eq!(echo["echo"]["n"], 2);

    client.disconnect().await;
    tv.stop();
}

#[tokio::test]
async fn disconnect_completes_while_input_lookup_is_unanswered() {
    let tv = MockTv::start().await;
    let (client, _) = client_for(&tv);
    client.connect().await.unwrap();

    tv.freeze();
    let (sent, finished) = tokio::join!(client.button("HOME", true), async {
        eventually("socket path lookup", || client.outstanding().0 == 1).await;
        tokio::time::timeout(Duration::from_secs(8), client.disconnect())
            .await
            .is_ok()
    });

    assert!(finished, "disconnect did not finish");
    assert!(matches!(sent, Err(WebOsError::Cancelled)), "got {sent:?}");
    assert_eq!(client.connection_phase(), ConnectionPhase::Idle);
    tv.stop();
}

#[tokio::test]
async fn input_open_failure_settles_pending_connect() {
    let tv = MockTv::start().await;
    tv.with(|s| s.input_socket_path = Some("ws://127.0.0.1:1".to_string()));
    init_tracing();
    let client = Arc::new(WebOsClient::with_config(
        tv.host(),
        tv.config().with_connect_timeout(Duration::from_millis(500)),
        Arc::new(MemoryStore::new()),
    ));

    // Press a button from the first notification, before connect has settled
    let pressed = Arc::new(AtomicBool::new(false));
    let button_result = Arc::new(Mutex::new(None));
    let (remote, flag, result) = (client.clone(), pressed.clone(), button_result.clone());
    client
        .register_observer(state_observer(move |_| {
            let (remote, flag, result) = (remote.clone(), flag.clone(), result.clone());
            async move {
                if !flag.swap(true, Ordering::SeqCst) {
                    let sent = remote.button("HOME", true).await;
                    *result.lock().unwrap() = Some(sent);
                }
            }
        }))
        .await;

    let err = client.connect().await.unwrap_err();
    assert!(err.is_transport(), "unexpected error: {err:?}");
    eventually("button result", || button_result.lock().unwrap().is_some()).await;
    let sent = button_result.lock().unwrap().take().unwrap();
    assert!(sent.unwrap_err().is_transport());

    client.disconnect().await;
    tv.stop();
}
