use std::time::Duration;

use ray_llm::{
    ChatRequest, ChatTransport, ChunkEvent, ChunkStream, ERROR_BODY_LIMIT, FrameDecoder,
    HttpTransport, HttpTransportConfig, Role, StreamEvent, TransportError, TransportErrorKind,
    WireFormat, WireMessage,
};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DATA_STREAM_BODY: &str = "f:{\"messageId\":\"msg-1\"}\n0:\"Hi\"\n0:\" there\"\nd:{\"finishReason\":\"stop\"}\n";

fn chat_request(server: &MockServer) -> ChatRequest {
    ChatRequest::new(
        format!("{}/api/chat", server.uri()),
        "gpt-4o-mini",
        vec![WireMessage::new("m1", Role::User, "Hello")],
    )
    .with_turn_id(1)
    .with_conversation_id("conversation-1")
    .with_web_search(true)
}

fn transport(config: HttpTransportConfig) -> HttpTransport {
    HttpTransport::new(config).expect("http client builds")
}

/// Drains the stream and returns the body bytes plus the terminal event.
async fn drain(mut stream: ChunkStream) -> (Vec<u8>, Option<ChunkEvent>) {
    let mut body = Vec::new();
    while let Some(event) = stream.recv().await {
        match event {
            ChunkEvent::Data(bytes) => body.extend_from_slice(&bytes),
            terminal => return (body, Some(terminal)),
        }
    }
    (body, None)
}

async fn run(transport: &HttpTransport, request: ChatRequest) -> (Vec<u8>, Option<ChunkEvent>) {
    let handle = transport.open(request).expect("request opens");
    let worker = tokio::spawn(handle.worker);
    let drained = tokio::time::timeout(Duration::from_secs(5), drain(handle.stream))
        .await
        .expect("stream finishes");
    worker.await.expect("worker completes");
    drained
}

/// Serves one connection: writes `response` verbatim, then holds the socket
/// open without sending anything else.
async fn stalling_endpoint(response: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener binds");
    let address = listener.local_addr().expect("listener has an address");

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("client connects");
        let mut request = vec![0u8; 16 * 1024];
        let _ = socket.read(&mut request).await;
        socket
            .write_all(response.as_bytes())
            .await
            .expect("response written");
        socket.flush().await.expect("response flushed");
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    format!("http://{address}/api/chat")
}

fn short_timeouts() -> HttpTransportConfig {
    HttpTransportConfig::default()
        .with_response_timeout(Duration::from_millis(200))
        .with_idle_timeout(Duration::from_millis(200))
}

fn failure(event: Option<ChunkEvent>) -> TransportError {
    match event {
        Some(ChunkEvent::Failed(error)) => error,
        other => panic!("expected a transport failure, got {other:?}"),
    }
}

#[tokio::test]
async fn posts_transcript_and_streams_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "id": "conversation-1",
            "model": "gpt-4o-mini",
            "webSearch": true,
            "messages": [{"id": "m1", "role": "user", "content": "Hello"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(DATA_STREAM_BODY))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport(HttpTransportConfig::default());
    assert_eq!(transport.wire_format(), WireFormat::DataStream);

    let (body, terminal) = run(&transport, chat_request(&server)).await;
    assert!(matches!(terminal, Some(ChunkEvent::End)));

    let mut decoder = FrameDecoder::new(transport.wire_format());
    let mut events = decoder.feed(&body);
    events.extend(decoder.finish());
    assert_eq!(
        events,
        vec![
            StreamEvent::RoleAnnounce(Role::Assistant),
            StreamEvent::ContentDelta("Hi".to_string()),
            StreamEvent::ContentDelta(" there".to_string()),
            StreamEvent::Done,
        ]
    );
}

#[tokio::test]
async fn error_status_is_a_connection_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let transport = transport(HttpTransportConfig::default());
    let (body, terminal) = run(&transport, chat_request(&server)).await;
    let error = failure(terminal);

    assert!(body.is_empty());
    assert_eq!(error.kind(), TransportErrorKind::Connection);
    assert!(matches!(
        &error,
        TransportError::HttpStatus { status: 500, body, .. } if body == "upstream exploded"
    ));
}

#[tokio::test]
async fn error_status_with_stalled_body_still_fails_the_request() {
    let endpoint = stalling_endpoint(
        "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 100\r\n\r\npartial",
    )
    .await;
    let request = ChatRequest::new(endpoint, "gpt-4o-mini", Vec::new());

    let (body, terminal) = run(&transport(short_timeouts()), request).await;
    let error = failure(terminal);

    assert!(body.is_empty());
    assert_eq!(error.kind(), TransportErrorKind::Connection);
    assert!(matches!(
        &error,
        TransportError::HttpStatus { status: 500, body, .. } if body.is_empty()
    ));
}

#[tokio::test]
async fn error_status_body_is_capped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(503).set_body_string("x".repeat(ERROR_BODY_LIMIT * 4)),
        )
        .mount(&server)
        .await;

    let (_, terminal) = run(&transport(HttpTransportConfig::default()), chat_request(&server)).await;

    assert!(matches!(
        failure(terminal),
        TransportError::HttpStatus { status: 503, body, .. } if body.len() == ERROR_BODY_LIMIT
    ));
}

#[tokio::test]
async fn idle_body_times_out_after_delivering_received_bytes() {
    let endpoint = stalling_endpoint(
        "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 100\r\n\r\n0:\"Hi\"\n",
    )
    .await;
    let request = ChatRequest::new(endpoint, "gpt-4o-mini", Vec::new());

    let (body, terminal) = run(&transport(short_timeouts()), request).await;
    let error = failure(terminal);

    assert_eq!(body, b"0:\"Hi\"\n");
    assert_eq!(error.kind(), TransportErrorKind::Timeout);
    assert_eq!(error.stage(), "await-body-chunk");
}

#[tokio::test]
async fn empty_body_is_reported_distinctly() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let transport = transport(HttpTransportConfig::default());
    let (_, terminal) = run(&transport, chat_request(&server)).await;

    assert_eq!(failure(terminal).kind(), TransportErrorKind::EmptyBody);
}

#[tokio::test]
async fn slow_response_headers_time_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(DATA_STREAM_BODY)
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let config = HttpTransportConfig::default().with_response_timeout(Duration::from_millis(100));
    let transport = transport(config);
    let (_, terminal) = run(&transport, chat_request(&server)).await;

    assert_eq!(failure(terminal).kind(), TransportErrorKind::Timeout);
}

#[tokio::test]
async fn refused_connection_is_a_connection_failure() {
    let request = ChatRequest::new("http://127.0.0.1:1/api/chat", "gpt-4o-mini", Vec::new());
    let transport = transport(HttpTransportConfig::default());
    let (_, terminal) = run(&transport, request).await;

    assert_eq!(failure(terminal).kind(), TransportErrorKind::Connection);
}

#[tokio::test]
async fn cancel_stops_worker_without_events() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(DATA_STREAM_BODY)
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let transport = transport(HttpTransportConfig::default());
    let mut handle = transport.open(chat_request(&server)).expect("request opens");
    let worker = tokio::spawn(handle.worker);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(handle.stream.cancel());

    tokio::time::timeout(Duration::from_secs(1), worker)
        .await
        .expect("worker stops promptly after cancel")
        .expect("worker completes");
    assert!(handle.stream.recv().await.is_none());
}
