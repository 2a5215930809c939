use base64::{Engine as _, engine::general_purpose};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const MAGIC_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const KEY_HEADER: &str = "Sec-WebSocket-Key: ";

const RESPONSE_401: &[u8] = b"HTTP/1.1 401 Unauthorized\r\n\
WWW-Authenticate: Basic realm=\"Use a valid message\"\r\n\r\n";

#[derive(thiserror::Error, Debug)]
pub enum HandshakeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,
}

/// Performs the one-shot RFC 6455 opening handshake on an accepted client
/// socket: reads the request, extracts the key, and writes the `101`
/// response on success. On `HandshakeError::MissingKey` the caller is
/// responsible for sending the `401` response instead.
pub async fn perform(stream: &mut TcpStream) -> Result<(), HandshakeError> {
    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf).await?;

    let key = extract_key(&buf[..n]).ok_or(HandshakeError::MissingKey)?;
    let accept_key = compute_accept_key(&key);

    stream.write_all(&build_101_response(&accept_key)).await?;
    Ok(())
}

pub async fn send_unauthorized(stream: &mut TcpStream) -> std::io::Result<()> {
    stream.write_all(RESPONSE_401).await
}

/// Scans the raw request bytes for a `Sec-WebSocket-Key: ` line, returning
/// the bytes between the colon-space and the next `\r`. This mirrors the
/// original bridge's byte-by-byte scan rather than a general header parser:
/// origin, version, subprotocol and extension headers are never looked at.
fn extract_key(request: &[u8]) -> Option<String> {
    let needle = KEY_HEADER.as_bytes();
    let pos = request
        .windows(needle.len())
        .position(|window| window == needle)?;
    let value_start = pos + needle.len();
    let value_end = request[value_start..]
        .iter()
        .position(|&b| b == b'\r')
        .map(|i| value_start + i)?;
    String::from_utf8(request[value_start..value_end].to_vec()).ok()
}

fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(MAGIC_GUID.as_bytes());
    let digest = hasher.finalize();
    general_purpose::STANDARD.encode(digest)
}

fn build_101_response(accept_key: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept_key}\r\n\r\n"
    )
    .into_bytes()
}
