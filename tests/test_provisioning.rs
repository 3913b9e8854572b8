//! Provisioning handshake integration tests
//!
//! Drives the registration state machine end to end against the scripted
//! broker: connect, register, poll on 202, and resolve the assigned hub.
//! Paused tokio time makes the retry-after sleeps complete instantly.

use device_simulator::identity::DeviceIdentity;
use device_simulator::provision::{provision, ProvisionError, DPS_HOST, DPS_PORT};
use device_simulator::testing::{BrokerHandle, MockConnection, MockTransport};
use device_simulator::transport::ConnectionEvent;
use serde_json::json;

fn test_identity() -> DeviceIdentity {
    DeviceIdentity {
        device_id: "my-device".to_string(),
        id_scope: "0ne000ABCDE".to_string(),
        private_key: b"key".to_vec(),
        client_cert: b"cert".to_vec(),
        ca_cert: b"ca".to_vec(),
    }
}

fn message(topic: &str, payload: serde_json::Value) -> ConnectionEvent {
    ConnectionEvent::Message {
        topic: topic.to_string(),
        payload: serde_json::to_vec(&payload).unwrap(),
    }
}

/// Script the happy path: register -> 202 -> poll -> 200 assigned.
async fn script_assignment(handle: &BrokerHandle) {
    handle
        .respond_to_next_publish(vec![message(
            "$dps/registrations/res/202/?$rid=r1&retry-after=3",
            json!({ "operationId": "4.op-1", "status": "assigning" }),
        )])
        .await;
    handle
        .respond_to_next_publish(vec![message(
            "$dps/registrations/res/200/?$rid=r2",
            json!({
                "status": "assigned",
                "registrationState": {
                    "assignedHub": "hub.azure-devices.net",
                    "deviceId": "my-device",
                    "status": "assigned",
                },
            }),
        )])
        .await;
}

#[tokio::test(start_paused = true)]
async fn assignment_resolves_after_one_poll() {
    let (conn, handle) = MockConnection::connected();
    script_assignment(&handle).await;
    let transport = MockTransport::new(conn);

    let registration = provision(&transport, &test_identity()).await.unwrap();
    assert_eq!(registration.assigned_hub, "hub.azure-devices.net");
    assert_eq!(registration.device_id.as_deref(), Some("my-device"));

    // One register request, one operation-status poll
    let topics = handle.published_topics().await;
    assert_eq!(topics.len(), 2);
    assert!(topics[0].starts_with("$dps/registrations/PUT/iotdps-register/?$rid="));
    assert!(topics[1].starts_with("$dps/registrations/GET/iotdps-get-operationstatus/?$rid="));
    assert!(topics[1].ends_with("&operationId=4.op-1"));

    // Responses were subscribed before the register request went out
    assert_eq!(handle.subscriptions().await, vec!["$dps/registrations/res/#"]);
    assert!(handle.is_closed().await);
}

#[tokio::test(start_paused = true)]
async fn connects_to_the_global_endpoint_with_the_dps_username() {
    let (conn, handle) = MockConnection::connected();
    script_assignment(&handle).await;
    let transport = MockTransport::new(conn);

    provision(&transport, &test_identity()).await.unwrap();

    let connects = transport.connects().await;
    assert_eq!(connects.len(), 1);
    assert_eq!(connects[0].0.host, DPS_HOST);
    assert_eq!(connects[0].0.port, DPS_PORT);
    assert_eq!(
        connects[0].1,
        "0ne000ABCDE/registrations/my-device/api-version=2019-03-31"
    );
}

#[tokio::test(start_paused = true)]
async fn register_payload_carries_the_registration_id() {
    let (conn, handle) = MockConnection::connected();
    script_assignment(&handle).await;
    let transport = MockTransport::new(conn);

    provision(&transport, &test_identity()).await.unwrap();

    let published = handle.published().await;
    let body: serde_json::Value = serde_json::from_slice(&published[0].1).unwrap();
    assert_eq!(body, json!({ "registrationId": "my-device" }));
    // Polls carry an empty payload
    assert!(published[1].1.is_empty());
}

#[tokio::test(start_paused = true)]
async fn repeated_202s_keep_polling_until_assigned() {
    let (conn, handle) = MockConnection::connected();
    for _ in 0..3 {
        handle
            .respond_to_next_publish(vec![message(
                "$dps/registrations/res/202/?$rid=r&retry-after=1",
                json!({ "operationId": "4.op-1", "status": "assigning" }),
            )])
            .await;
    }
    handle
        .respond_to_next_publish(vec![message(
            "$dps/registrations/res/200/?$rid=r",
            json!({
                "status": "assigned",
                "registrationState": { "assignedHub": "hub.azure-devices.net" },
            }),
        )])
        .await;
    let transport = MockTransport::new(conn);

    let registration = provision(&transport, &test_identity()).await.unwrap();
    assert_eq!(registration.assigned_hub, "hub.azure-devices.net");
    assert_eq!(handle.published_topics().await.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn rejected_credentials_fail_without_polling() {
    let (conn, handle) = MockConnection::connected();
    handle
        .respond_to_next_publish(vec![message(
            "$dps/registrations/res/401/?$rid=r1",
            json!({ "message": "Unauthorized" }),
        )])
        .await;
    let transport = MockTransport::new(conn);

    let err = provision(&transport, &test_identity()).await.unwrap_err();
    match err {
        ProvisionError::Rejected { message } => assert_eq!(message, "Unauthorized"),
        other => panic!("expected rejection, got {other:?}"),
    }

    // Only the register request went out, and the session was closed
    assert_eq!(handle.published_topics().await.len(), 1);
    assert!(handle.is_closed().await);
}

#[tokio::test(start_paused = true)]
async fn unrecognized_status_is_a_protocol_error() {
    let (conn, handle) = MockConnection::connected();
    handle
        .respond_to_next_publish(vec![message(
            "$dps/registrations/res/429/?$rid=r1",
            json!({}),
        )])
        .await;
    let transport = MockTransport::new(conn);

    let err = provision(&transport, &test_identity()).await.unwrap_err();
    assert!(matches!(err, ProvisionError::UnexpectedTopic { ref topic }
        if topic.starts_with("$dps/registrations/res/429/")));
    assert!(handle.is_closed().await);
}

#[tokio::test(start_paused = true)]
async fn connection_errors_abort_and_close_the_session() {
    let (conn, handle) = MockConnection::connected();
    handle
        .respond_to_next_publish(vec![ConnectionEvent::Error("broker went away".to_string())])
        .await;
    let transport = MockTransport::new(conn);

    let err = provision(&transport, &test_identity()).await.unwrap_err();
    assert!(matches!(err, ProvisionError::Transport(_)));
    assert!(handle.is_closed().await);
}

#[tokio::test]
async fn connect_failure_surfaces_as_a_transport_error() {
    let transport = MockTransport::with_failure();
    let err = provision(&transport, &test_identity()).await.unwrap_err();
    assert!(matches!(err, ProvisionError::Transport(_)));
}
