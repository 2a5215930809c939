pub mod cli;
pub mod config;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod registry;
pub mod session;
