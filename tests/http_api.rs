mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use http_body_util::BodyExt;
use tower::ServiceExt;

use live_relay::http::router;
use live_relay::{CodecDescriptor, CodecFamily};

async fn send(state: live_relay::AppState, request: Request<Body>) -> (StatusCode, Bytes) {
    let response = router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn form(uri: &str, body: String) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_codec_query_filters_to_peer_connection() {
    let codecs = vec![
        CodecDescriptor::new(0, CodecFamily::H264, common::avcc()),
        CodecDescriptor::bare(1, CodecFamily::Aac),
        CodecDescriptor::bare(2, CodecFamily::PcmAlaw),
    ];
    let state = common::state_with(Some(codecs), common::server_config()).await;

    let (status, body) = send(state, get("/stream/codec/cam")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], br#"[{"type":"video"},{"type":"audio"}]"#);
}

#[tokio::test]
async fn test_codec_query_unknown_stream() {
    let state = common::state().await;
    let (status, body) = send(state.clone(), get("/stream/codec/nope")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.is_empty());
    // The codec query never creates streams
    assert!(!state.registry.exists("nope").await);
}

#[tokio::test]
async fn test_codec_query_not_ready() {
    let state = common::state_with(None, common::server_config()).await;
    let (status, body) = send(state, get("/stream/codec/cam")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_receiver_unknown_stream() {
    let state = common::state().await;
    let data = STANDARD.encode("v=0\r\n");
    let (status, body) = send(
        state.clone(),
        form("/stream/receiver/nope", format!("suuid=nope&data={}", data)),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.is_empty());
    assert!(!state.registry.exists("nope").await);
    assert_eq!(state.registry.hub().stats().attached, 0);
}

#[tokio::test]
async fn test_receiver_rejects_bad_offer() {
    let state = common::state().await;

    let (status, _) = send(
        state.clone(),
        form("/stream/receiver/cam", "suuid=cam&data=%%%".to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let garbage = STANDARD.encode("definitely not sdp");
    let (status, body) = send(
        state.clone(),
        form("/stream/receiver/cam", format!("suuid=cam&data={}", garbage)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.is_empty());

    // Nothing was attached for either request
    assert_eq!(state.registry.hub().stats().attached, 0);
}

#[tokio::test]
async fn test_session_limit() {
    let state = common::state_with(Some(common::h264_aac()), common::server_config().max_sessions(1))
        .await;
    let _held = state.acquire_session().unwrap();

    let data = STANDARD.encode("v=0\r\n");
    let (status, _) = send(
        state,
        form("/stream/receiver/cam", format!("suuid=cam&data={}", data)),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_preflight_allows_any_origin() {
    let state = common::state().await;
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/stream/receiver/cam")
        .header(header::ORIGIN, "http://viewer.example")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();

    let response = router(state).oneshot(request).await.unwrap();
    assert!(response.status().is_success());
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_stream_list() {
    let state = common::state().await;
    let (status, body) = send(state, get("/stream/list")).await;

    assert_eq!(status, StatusCode::OK);
    let list: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(list[0]["id"], "cam");
    assert_eq!(list[0]["on_demand"], true);
    assert_eq!(list[0]["viewers"], 0);
}

#[tokio::test]
async fn test_server_serves_and_shuts_down() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let server = live_relay::RelayServer::with_ingest(
        common::server_config(),
        std::sync::Arc::new(common::StaticIngest {
            codecs: Some(common::h264_aac()),
        }),
    );
    server
        .add_stream(
            "cam",
            live_relay::StreamConfig::new("tcp://127.0.0.1:9000").on_demand(true),
        )
        .await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let serving = tokio::spawn(async move {
        server
            .serve(listener, async {
                stop_rx.await.ok();
            })
            .await
    });

    let mut socket = tokio::net::TcpStream::connect(addr).await.unwrap();
    socket
        .write_all(b"GET /stream/codec/cam HTTP/1.1\r\nHost: relay\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    socket.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.ends_with(r#"[{"type":"video"}]"#));

    stop_tx.send(()).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), serving)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
