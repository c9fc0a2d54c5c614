//! Contracts between the connection-processing engine and a wire protocol.
//!
//! The engine never looks inside a message. A protocol plugs in through a
//! [`ProtocolFactory`], which hands out one reader and one writer per
//! connection and a single shared processor per server:
//!
//! ```text
//!  socket bytes ──► ConnectionReader ──► Request ──► ProtocolProcessor
//!                                                          │ (worker pool)
//!  socket bytes ◄── ConnectionWriter ◄── Response ◄────────┘
//! ```
//!
//! Readers and writers live on the I/O thread that owns their connection
//! and are discarded with it. The processor runs on worker threads.

use std::io;

use thiserror::Error;

use crate::config::Config;
use crate::server::connection::Connection;

/// Why a read cycle ended a connection.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The peer closed its side of the socket. An orderly close.
    #[error("end of stream")]
    EndOfStream,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The peer sent bytes that can never form a message.
    #[error("malformed input: {0}")]
    Malformed(String),
}

/// Turns raw bytes from one connection into protocol messages.
pub trait ConnectionReader: Send {
    type Message: Send + 'static;

    /// Reads everything the socket has buffered and returns the byte count.
    ///
    /// Returns `Ok(0)` when the socket had nothing to offer and
    /// [`ReadError::EndOfStream`] once the peer has closed.
    fn read(&mut self, conn: &mut Connection) -> Result<usize, ReadError>;

    fn has_next(&self) -> bool;

    /// Pops the oldest complete message, or `None` if there is none yet.
    fn next(&mut self) -> Option<Self::Message>;
}

/// Turns protocol responses into raw bytes for one connection.
pub trait ConnectionWriter: Send {
    type Message: Send + 'static;

    /// Queues a response behind any that are already waiting.
    fn add(&mut self, message: Self::Message);

    /// Puts as many pending bytes on the wire as the socket accepts.
    ///
    /// Returns `Ok(0)` when nothing could be written, either because nothing
    /// is pending or because the socket would block.
    fn write(&mut self, conn: &mut Connection) -> io::Result<usize>;

    /// Whether queued responses or undrained bytes remain.
    fn has_pending(&self) -> bool;
}

/// Computes one response for one request. Runs off the I/O threads, so it
/// may block (file I/O and the like).
pub trait ProtocolProcessor: Send + Sync + 'static {
    type Request: Send + 'static;
    type Response: Send + 'static;

    fn process(&self, request: Self::Request) -> anyhow::Result<Self::Response>;
}

/// Creates the per-connection codec pair and the per-server processor.
pub trait ProtocolFactory: Send + Sync + 'static {
    type Processor: ProtocolProcessor;
    type Reader: ConnectionReader<Message = <Self::Processor as ProtocolProcessor>::Request>;
    type Writer: ConnectionWriter<Message = <Self::Processor as ProtocolProcessor>::Response>;

    fn new_reader(&self, config: &Config) -> Self::Reader;

    fn new_writer(&self, config: &Config) -> Self::Writer;

    fn new_processor(&self, config: &Config) -> anyhow::Result<Self::Processor>;
}
