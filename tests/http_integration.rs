//! End-to-end smoke test: start the real reactor-driven server on a
//! background thread and drive it with a plain `tokio` TCP client,
//! exercising the wire protocol the unit tests never touch directly.

use std::time::Duration;

use grow_httpd::config::ServerConfig;
use grow_httpd::http::{Method, Response};
use grow_httpd::router::Router;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

fn test_config(port: u16) -> ServerConfig {
    ServerConfig {
        listen: format!("127.0.0.1:{port}"),
        thread_count: 1,
        ring_size: 64,
        redirect_head_to_get: true,
        connection_allowed_size: 1024 * 1024,
        idle_timeout: Duration::from_secs(5),
        shutdown_poll_interval: Duration::from_millis(50),
        log_level: "error".to_string(),
    }
}

fn spawn_server(port: u16) {
    std::thread::spawn(move || {
        let mut router = Router::new();
        router.route(
            Method::Get,
            "/ping",
            std::sync::Arc::new(|_req| {
                let mut response = Response::new(200);
                response.set_body(b"pong".to_vec());
                response
            }),
        );
        let _ = grow_httpd::server::run(test_config(port), router);
    });
}

async fn wait_for_port(port: u16) {
    for _ in 0..100 {
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server never started listening on port {port}");
}

#[tokio::test]
async fn get_request_receives_routed_response() {
    let port = 18080;
    spawn_server(port);
    wait_for_port(port).await;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream
        .write_all(b"GET /ping HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();

    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 200"), "unexpected status line: {text}");
    assert!(text.contains("pong"), "body missing from response: {text}");
}

#[tokio::test]
async fn unknown_route_receives_404() {
    let port = 18081;
    spawn_server(port);
    wait_for_port(port).await;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream
        .write_all(b"GET /missing HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();

    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 404"), "unexpected status line: {text}");
}
