use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use wsbridge::session::BridgeSession;

/// Masks a client->server payload with `mask`, the way a real browser
/// client would, and assembles the full masked frame.
fn client_frame(opcode: u8, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
    let mut frame = vec![0x80 | opcode];
    let len = payload.len();
    if len < 126 {
        frame.push(0x80 | len as u8);
    } else if len <= 0xFFFF {
        frame.push(0x80 | 126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(0x80 | 127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }
    frame.extend_from_slice(&mask);
    frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
    frame
}

fn handshake_request() -> Vec<u8> {
    b"GET / HTTP/1.1\r\n\
      Host: localhost\r\n\
      Upgrade: websocket\r\n\
      Connection: Upgrade\r\n\
      Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
      Sec-WebSocket-Version: 13\r\n\r\n"
        .to_vec()
}

/// Spawns a bridge session against a loopback upstream, returning the
/// connected client-side socket once the 101 response has been read.
async fn spawn_session_with_upstream(upstream_addr: std::net::SocketAddr) -> TcpStream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listen_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (client_sock, _) = listener.accept().await.unwrap();
        let alive = Arc::new(AtomicBool::new(true));
        let session = BridgeSession::new(
            client_sock,
            upstream_addr.ip().to_string(),
            upstream_addr.port(),
            alive,
        );
        session.run().await;
    });

    let mut client = TcpStream::connect(listen_addr).await.unwrap();
    client.write_all(&handshake_request()).await.unwrap();

    let mut buf = [0u8; 4096];
    let n = client.read(&mut buf).await.unwrap();
    let response = String::from_utf8_lossy(&buf[..n]);
    assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));

    client
}

#[tokio::test]
async fn happy_echo_round_trip() {
    let upstream_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream_listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut upstream_sock, _) = upstream_listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let n = upstream_sock.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
        upstream_sock.write_all(&buf[..n]).await.unwrap();
    });

    let mut client = spawn_session_with_upstream(upstream_addr).await;

    client
        .write_all(&client_frame(0x1, b"hello", [0x01, 0x02, 0x03, 0x04]))
        .await
        .unwrap();

    let mut buf = [0u8; 1024];
    let _n = client.read(&mut buf).await.unwrap();

    // FIN + Text opcode, unmasked, 6-byte payload ("hello" + trailing NUL).
    assert_eq!(buf[0], 0x81);
    assert_eq!(buf[1], 6);
    assert_eq!(&buf[2..8], b"hello\0");
}

#[tokio::test]
async fn missing_key_is_rejected_with_401() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listen_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (client_sock, _) = listener.accept().await.unwrap();
        let alive = Arc::new(AtomicBool::new(true));
        let session = BridgeSession::new(client_sock, "127.0.0.1".to_string(), 1, alive);
        session.run().await;
    });

    let mut client = TcpStream::connect(listen_addr).await.unwrap();
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    let mut buf = [0u8; 1024];
    let n = client.read(&mut buf).await.unwrap();
    let response = String::from_utf8_lossy(&buf[..n]);
    assert!(response.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
    assert!(response.contains("WWW-Authenticate: Basic realm=\"Use a valid message\""));
}

#[tokio::test]
async fn close_frame_tears_down_session() {
    let upstream_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream_listener.local_addr().unwrap();
    let (upstream_keepalive_tx, upstream_keepalive_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        let sock = upstream_listener.accept().await.unwrap().0;
        let _ = upstream_keepalive_rx.await;
        drop(sock);
    });

    let mut client = spawn_session_with_upstream(upstream_addr).await;

    client.write_all(&client_frame(0x8, &[], [1, 2, 3, 4])).await.unwrap();

    let mut buf = [0u8; 1024];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(buf[0], 0x88); // FIN + Close
    assert_eq!(buf[1], 0);

    // The server gently closes after the close frame: the stream should
    // observe EOF, not an error.
    let n = client.read(&mut buf[n..]).await.unwrap();
    assert_eq!(n, 0);

    let _ = upstream_keepalive_tx.send(());
}

#[tokio::test]
async fn ping_gets_empty_pong() {
    let upstream_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream_listener.local_addr().unwrap();
    let (upstream_keepalive_tx, upstream_keepalive_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        let sock = upstream_listener.accept().await.unwrap().0;
        let _ = upstream_keepalive_rx.await;
        drop(sock);
    });

    let mut client = spawn_session_with_upstream(upstream_addr).await;

    client.write_all(&client_frame(0x9, &[], [5, 6, 7, 8])).await.unwrap();

    let mut buf = [0u8; 1024];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], &[0x8A, 0x00]); // FIN + Pong, zero-length

    let _ = upstream_keepalive_tx.send(());
}

#[tokio::test]
async fn oversized_frame_uses_64_bit_length_and_forwards_all_bytes() {
    let upstream_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream_listener.local_addr().unwrap();

    let payload = vec![0x42u8; 70_000];
    let expected = payload.clone();

    tokio::spawn(async move {
        let (mut upstream_sock, _) = upstream_listener.accept().await.unwrap();
        let mut received = Vec::new();
        while received.len() < expected.len() {
            let mut buf = [0u8; 8192];
            let n = upstream_sock.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(received, expected);
    });

    let mut client = spawn_session_with_upstream(upstream_addr).await;
    client
        .write_all(&client_frame(0x2, &payload, [9, 8, 7, 6]))
        .await
        .unwrap();

    // Give the upstream task a chance to assert before the test exits.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
}
