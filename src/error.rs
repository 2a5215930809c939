use thiserror::Error;

use crate::frame::FrameError;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid WebSocket frame: {0}")]
    Frame(#[from] FrameError),

    #[error("WebSocket handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("no free session slot")]
    RegistryFull,

    #[error("{0}")]
    Usage(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
