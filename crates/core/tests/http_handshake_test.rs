//! Handshake and provisioning against a mocked RTVI HTTP server.

use rtvi_core::{
    ClientConfig, ClientOptions, SessionClient, SessionError, TransportState,
    transport::MockTransport,
};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn pipeline_config() -> ClientConfig {
    ClientConfig::from_value(json!({
        "llm": {"model": "llama3-70b-8192"},
        "tts": {"voice": "79a125e8-cd45-4c13-8a67-188112f4dd22"}
    }))
    .unwrap()
}

fn client_for(server: &MockServer, options: ClientOptions) -> (SessionClient, MockTransport) {
    let transport = MockTransport::new();
    let options = ClientOptions {
        base_url: server.uri(),
        ..options
    };
    let client = SessionClient::with_transport(options, Box::new(transport.clone()));
    (client, transport)
}

#[tokio::test]
async fn test_start_authenticates_provisions_and_connects() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/authenticate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"room": "https://rooms.example/r1", "token": "tok"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/start_bot"))
        .and(body_json(json!({
            "room": "https://rooms.example/r1",
            "config": {
                "llm": {"model": "llama3-70b-8192"},
                "tts": {"voice": "79a125e8-cd45-4c13-8a67-188112f4dd22"}
            }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (client, transport) =
        client_for(&server, ClientOptions::default().with_config(pipeline_config()));

    client.start().await.expect("start should succeed");

    assert_eq!(client.state(), TransportState::Connected);
    let connects = transport.connects();
    assert_eq!(connects.len(), 1);
    assert_eq!(connects[0].url, "https://rooms.example/r1");
    assert_eq!(connects[0].token, "tok");
}

#[tokio::test]
async fn test_missing_room_is_capacity_and_bot_is_not_started() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/authenticate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "tok"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/start_bot"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (client, transport) = client_for(&server, ClientOptions::default());
    let mut states = client.events().transport_state_changed.listen();

    let err = client.start().await.unwrap_err();

    assert!(matches!(err, SessionError::Capacity), "got {err:?}");
    assert!(transport.connects().is_empty());
    while let Ok(state) = states.try_recv() {
        assert_ne!(state, TransportState::Connecting);
    }
}

#[tokio::test]
async fn test_refused_authentication_is_capacity() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/authenticate"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let (client, _transport) = client_for(&server, ClientOptions::default());

    let err = client.start().await.unwrap_err();

    assert!(matches!(err, SessionError::Capacity), "got {err:?}");
}

#[tokio::test]
async fn test_failed_start_bot_is_provisioning_error_naming_room() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/authenticate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"room": "https://rooms.example/r2", "token": "tok"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/start_bot"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (client, transport) = client_for(&server, ClientOptions::default());

    let err = client.start().await.unwrap_err();

    match err {
        SessionError::Provisioning { room, .. } => assert_eq!(room, "https://rooms.example/r2"),
        other => panic!("expected provisioning error, got {other:?}"),
    }
    assert!(transport.connects().is_empty());
    assert_eq!(client.state(), TransportState::Error);
}

#[tokio::test]
async fn test_start_headers_and_params_are_forwarded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/authenticate"))
        .and(header("x-api-key", "secret"))
        .and(body_json(json!({"services": {"llm": "groq"}})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"room": "https://rooms.example/r3", "token": "tok"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/start_bot"))
        .and(header("x-api-key", "secret"))
        .and(body_json(json!({
            "room": "https://rooms.example/r3",
            "config": {},
            "services": {"llm": "groq"}
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let options = ClientOptions::default()
        .with_header("x-api-key", "secret")
        .with_param("services", json!({"llm": "groq"}));
    let (client, _transport) = client_for(&server, options);

    client.start().await.expect("start should succeed");
}

#[tokio::test]
async fn test_slow_authentication_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/authenticate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"room": "https://rooms.example/r4", "token": "tok"}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let options = ClientOptions::default().with_timeout(Duration::from_millis(100));
    let (client, transport) = client_for(&server, options);

    let err = client.start().await.unwrap_err();

    assert!(matches!(err, SessionError::Timeout), "got {err:?}");
    assert_eq!(client.state(), TransportState::Error);
    assert!(transport.connects().is_empty());
}
