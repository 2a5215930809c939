use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{error, info, warn};

use crate::frame::{self, OpCode};
use crate::handshake;

const READ_CHUNK: usize = 4096;

/// One live pairing of a WebSocket client socket with one upstream TCP
/// socket, plus the worker task driving them through handshake, upstream
/// connect, relay, and teardown.
pub struct BridgeSession {
    client_sock: TcpStream,
    upstream_sock: Option<TcpStream>,
    upstream_host: String,
    upstream_port: u16,
    alive: Arc<AtomicBool>,
    peer: Option<std::net::SocketAddr>,
}

enum Outcome {
    Continue,
    Terminate,
}

impl BridgeSession {
    pub fn new(
        client_sock: TcpStream,
        upstream_host: String,
        upstream_port: u16,
        alive: Arc<AtomicBool>,
    ) -> Self {
        let peer = client_sock.peer_addr().ok();
        Self {
            client_sock,
            upstream_sock: None,
            upstream_host,
            upstream_port,
            alive,
            peer,
        }
    }

    /// Drives the full `Handshaking -> Connecting -> Relaying -> Closing ->
    /// Dead` lifecycle. Never returns an error: every failure is logged and
    /// resolved into an orderly teardown, since nothing above this worker
    /// can react to a session-local failure.
    pub async fn run(mut self) {
        if let Err(e) = self.handshake().await {
            warn!(peer = ?self.peer, error = %e, "handshake failed, rejecting client");
            let _ = handshake::send_unauthorized(&mut self.client_sock).await;
            self.alive.store(false, Ordering::Relaxed);
            self.close().await;
            return;
        }
        info!(peer = ?self.peer, "WebSocket handshake complete");

        if let Err(e) = self.connect_upstream().await {
            error!(peer = ?self.peer, error = %e, "unable to connect upstream");
            self.alive.store(false, Ordering::Relaxed);
            self.close().await;
            return;
        }
        info!(peer = ?self.peer, host = %self.upstream_host, port = self.upstream_port, "upstream connected");

        self.relay().await;
        self.close().await;
        info!(peer = ?self.peer, "session closed");
    }

    async fn handshake(&mut self) -> Result<(), handshake::HandshakeError> {
        handshake::perform(&mut self.client_sock).await
    }

    async fn connect_upstream(&mut self) -> std::io::Result<()> {
        let addr = format!("{}:{}", self.upstream_host, self.upstream_port);
        let stream = TcpStream::connect(addr).await?;
        self.upstream_sock = Some(stream);
        Ok(())
    }

    /// The relay loop: `tokio::select!` waits on whichever socket becomes
    /// readable first and acts on it, looping until `alive` is cleared.
    async fn relay(&mut self) {
        let mut client_buf = BytesMut::with_capacity(READ_CHUNK);
        let mut client_tmp = [0u8; READ_CHUNK];
        let mut upstream_tmp = [0u8; READ_CHUNK];

        let upstream_sock = self
            .upstream_sock
            .as_mut()
            .expect("relay entered without a connected upstream socket");

        while self.alive.load(Ordering::Relaxed) {
            tokio::select! {
                result = self.client_sock.read(&mut client_tmp) => {
                    match result {
                        Ok(0) => {
                            info!(peer = ?self.peer, "client closed connection");
                            self.alive.store(false, Ordering::Relaxed);
                        }
                        Ok(n) => {
                            client_buf.extend_from_slice(&client_tmp[..n]);
                            if let Outcome::Terminate =
                                Self::drain_client_frames(&mut client_buf, &mut self.client_sock, &mut *upstream_sock, &self.alive, self.peer).await
                            {
                                self.alive.store(false, Ordering::Relaxed);
                            }
                        }
                        Err(e) => {
                            error!(peer = ?self.peer, error = %e, "client read failed");
                            self.alive.store(false, Ordering::Relaxed);
                        }
                    }
                }
                result = upstream_sock.read(&mut upstream_tmp) => {
                    match result {
                        Ok(0) => {
                            info!(peer = ?self.peer, "upstream closed connection");
                            self.alive.store(false, Ordering::Relaxed);
                        }
                        Ok(n) => {
                            // The forwarded payload carries n + 1 bytes: a
                            // trailing NUL byte is appended after the data read
                            // from upstream.
                            let mut payload = Vec::with_capacity(n + 1);
                            payload.extend_from_slice(&upstream_tmp[..n]);
                            payload.push(0);
                            let wire = frame::encode_data(&payload);
                            if let Err(e) = self.client_sock.write_all(&wire).await {
                                error!(peer = ?self.peer, error = %e, "failed to forward upstream data to client");
                                self.alive.store(false, Ordering::Relaxed);
                            }
                        }
                        Err(e) => {
                            error!(peer = ?self.peer, error = %e, "upstream read failed");
                            self.alive.store(false, Ordering::Relaxed);
                        }
                    }
                }
            }
        }
    }

    /// Pulls every complete frame currently buffered from the client and
    /// acts on it (forward data to upstream, answer pings, note closes).
    /// Returns `Outcome::Terminate` on any protocol error or I/O failure.
    async fn drain_client_frames(
        buf: &mut BytesMut,
        client_sock: &mut TcpStream,
        upstream_sock: &mut TcpStream,
        alive: &Arc<AtomicBool>,
        peer: Option<std::net::SocketAddr>,
    ) -> Outcome {
        loop {
            match frame::try_parse_buffered(buf) {
                None => return Outcome::Continue,
                Some(Err(e)) => {
                    warn!(?peer, error = %e, "rejecting client frame");
                    return Outcome::Terminate;
                }
                Some(Ok((frame, consumed))) => {
                    buf.advance(consumed);
                    match frame.opcode {
                        OpCode::Close => {
                            info!(?peer, "received close frame");
                            alive.store(false, Ordering::Relaxed);
                            return Outcome::Continue;
                        }
                        OpCode::Ping => {
                            let pong = frame::encode_control(OpCode::Pong, &[]);
                            if let Err(e) = client_sock.write_all(&pong).await {
                                error!(?peer, error = %e, "failed to send pong");
                                return Outcome::Terminate;
                            }
                        }
                        OpCode::Pong => {}
                        OpCode::Text | OpCode::Binary => {
                            if let Err(e) = upstream_sock.write_all(&frame.payload).await {
                                error!(?peer, error = %e, "failed to forward client data upstream");
                                return Outcome::Terminate;
                            }
                        }
                        OpCode::Continuation => unreachable!("rejected at decode"),
                    }
                }
            }
        }
    }

    /// Best-effort `Close` frame, then gently closes both sockets (shut
    /// down the write half to send an orderly FIN, drain any remaining
    /// inbound bytes, then drop), and clears `alive`.
    async fn close(&mut self) {
        let close_frame = frame::encode_control(OpCode::Close, &[]);
        let _ = self.client_sock.write_all(&close_frame).await;

        Self::gently_close(&mut self.client_sock).await;
        if let Some(mut upstream) = self.upstream_sock.take() {
            Self::gently_close(&mut upstream).await;
        }

        self.alive.store(false, Ordering::Relaxed);
    }

    async fn gently_close(stream: &mut TcpStream) {
        let _ = stream.shutdown().await;
        let mut scratch = [0u8; READ_CHUNK];
        loop {
            match stream.read(&mut scratch).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    }
}
