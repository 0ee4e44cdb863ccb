//! Menu client against a one-shot local HTTP responder.

use arda_core::FetchError;
use arda_shell::{MenuClient, ReorderItem, ReorderRequest, ShellConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

fn client_for(base_url: &str) -> MenuClient {
    let config = ShellConfig::from_toml(&format!(
        r#"
        api_base_url = "{base_url}"
        request_timeout_ms = 2000
        default_role = "ADMIN"

        [persistence]
        buster = "v1.0.0"

        [storage]
        medium = "memory"
        "#
    ))
    .unwrap();
    MenuClient::new(&config).unwrap()
}

fn header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = header_end(&buf) {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Answer one request with `status` and `body`; the handle yields the raw request.
async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
        request
    });
    (format!("http://{addr}"), handle)
}

const TREE: &str = r#"[{"id":1,"parentId":null,"order":0,"label":"Dashboard","path":"/dashboard","roles":["ADMIN"],"children":[]}]"#;

#[tokio::test]
async fn menu_tree_is_fetched_by_role() {
    let (base, server) = serve_once("200 OK", TREE).await;
    let client = client_for(&format!("{base}/"));

    let tree = client.get_menu_tree("ADMIN").await.unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].label, "Dashboard");

    let request = server.await.unwrap();
    assert!(request.starts_with("GET /menus/tree?role=ADMIN HTTP/1.1"), "{request}");
}

#[tokio::test]
async fn server_error_maps_to_status() {
    let (base, server) = serve_once("500 Internal Server Error", r#"{"message":"boom"}"#).await;
    let err = client_for(&base).get_menu_tree("ADMIN").await.unwrap_err();
    server.await.unwrap();

    match err {
        FetchError::Status { status, message } => {
            assert_eq!(status, 500);
            assert!(message.contains("boom"));
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_error_body_uses_reason_phrase() {
    let (base, server) = serve_once("404 Not Found", "").await;
    let err = client_for(&base).get_menu_tree("GUEST").await.unwrap_err();
    server.await.unwrap();

    assert_eq!(err, FetchError::status(404, "Not Found"));
    assert!(err.is_client_error());
}

#[tokio::test]
async fn malformed_body_maps_to_decode() {
    let (base, server) = serve_once("200 OK", "not json").await;
    let err = client_for(&base).get_menu_tree("ADMIN").await.unwrap_err();
    server.await.unwrap();

    assert!(matches!(err, FetchError::Decode { .. }), "{err:?}");
}

#[tokio::test]
async fn reorder_sends_patch_with_items() {
    let (base, server) = serve_once("200 OK", "{}").await;
    let request = ReorderRequest {
        items: vec![ReorderItem {
            id: 3,
            parent_id: None,
            order: 1,
        }],
    };
    client_for(&base).reorder_menus(&request).await.unwrap();

    let raw = server.await.unwrap();
    assert!(raw.starts_with("PATCH /menus/reorder HTTP/1.1"), "{raw}");
    assert!(raw.contains(r#"{"items":[{"id":3,"parentId":null,"order":1}]}"#), "{raw}");
}

#[tokio::test]
async fn refused_connection_maps_to_network() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client_for(&format!("http://{addr}"))
        .get_menu_tree("ADMIN")
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Network { .. }), "{err:?}");
}
