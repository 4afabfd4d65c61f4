//! Acknowledgment session protocol.
//!
//! A session is the lifetime of one accepted connection. The client sends
//! arbitrary bytes; the server answers every successful read with a fixed
//! acknowledgment payload. There is no framing and no request parsing.
//!
//! ## Read Modes
//!
//! - `byte`: one byte per read. Byte 36 (`$`) is the terminator: it is
//!   logged as a distinct event, acknowledged like any other byte, and then
//!   ends the acknowledgment loop. Anything the peer sends afterwards is
//!   discarded until it closes its side.
//! - `chunk`: up to 1024 bytes per read, one acknowledgment per read.
//!
//! ## Wire Examples
//!
//! ```text
//! byte mode:   client "hi$"    -> server "alohaalohaaloha"
//! chunk mode:  client "hello"  -> server "Ok!"
//! ```

pub mod error;
pub mod handler;

pub use error::SessionError;
pub use handler::handle_session;

use bytes::Bytes;
use clap::ValueEnum;
use serde::Deserialize;
use std::time::Duration;

/// Byte value that ends the acknowledgment loop in byte mode (`$`).
pub const TERMINATOR: u8 = 36;

/// Maximum number of bytes consumed by a single read in chunk mode.
pub const CHUNK_SIZE: usize = 1024;

/// How many bytes the session loop consumes per read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    /// One byte per read, with terminator handling.
    #[default]
    Byte,
    /// Up to `CHUNK_SIZE` bytes per read.
    Chunk,
}

impl ReadMode {
    /// Acknowledgment used when none is configured.
    pub fn default_ack(self) -> &'static str {
        match self {
            ReadMode::Byte => "aloha",
            ReadMode::Chunk => "Ok!",
        }
    }
}

/// Parameters shared by every session the server runs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub mode: ReadMode,
    pub ack: Bytes,
    /// Upper bound on a single blocking read. `None` blocks forever.
    pub idle_timeout: Option<Duration>,
}

impl SessionConfig {
    pub fn new(mode: ReadMode) -> Self {
        Self {
            mode,
            ack: Bytes::from_static(mode.default_ack().as_bytes()),
            idle_timeout: None,
        }
    }
}

/// Why a session ended cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed its write side.
    PeerClosed,
    /// The terminator was received and the peer has since closed.
    Terminator,
}

/// Outcome of a session that ended without an I/O error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub end: SessionEnd,
    /// Bytes that were acknowledged. Input discarded after the terminator
    /// is not counted.
    pub bytes_read: usize,
    pub acks_sent: usize,
}
