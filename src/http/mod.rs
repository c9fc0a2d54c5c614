//! HTTP/1.x protocol plugin.
//!
//! This module plugs HTTP into the connection-processing engine through
//! [`HttpProtocol`].
//!
//! # Architecture
//!
//! - **`parser`**: Frames and parses requests from the accumulated bytes
//! - **`reader`**: Per-connection byte accumulation and request queue
//! - **`writer`**: Response serialization and partial-write draining
//! - **`processor`**: Static resource lookup under the configured root
//! - **`request`** / **`response`** / **`headers`**: The message model
//! - **`mime`**: MIME type detection based on file extensions
//!
//! # Request flow
//!
//! ```text
//!  bytes ──► HttpConnectionReader ──► Result<Request, ParseError>
//!                                           │
//!                                           ▼  (worker pool)
//!                                StaticResourceProcessor
//!                                           │
//!  bytes ◄── HttpConnectionWriter ◄── Response
//! ```
//!
//! # Example
//!
//! ```no_run
//! use srs::config::Config;
//! use srs::http::HttpProtocol;
//! use srs::server::Server;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut server = Server::new(Config::load()?, HttpProtocol);
//!     server.start()?;
//!     // ...
//!     server.stop();
//!     Ok(())
//! }
//! ```

pub mod headers;
pub mod mime;
pub mod parser;
pub mod processor;
pub mod reader;
pub mod request;
pub mod response;
pub mod writer;

use crate::config::Config;
use crate::protocol::ProtocolFactory;

use self::processor::StaticResourceProcessor;
use self::reader::HttpConnectionReader;
use self::writer::HttpConnectionWriter;

/// Factory for the HTTP codec pair and the static resource processor.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpProtocol;

impl ProtocolFactory for HttpProtocol {
    type Processor = StaticResourceProcessor;
    type Reader = HttpConnectionReader;
    type Writer = HttpConnectionWriter;

    fn new_reader(&self, config: &Config) -> HttpConnectionReader {
        HttpConnectionReader::new(config.engine.max_request_head_bytes)
    }

    fn new_writer(&self, _config: &Config) -> HttpConnectionWriter {
        HttpConnectionWriter::new()
    }

    fn new_processor(&self, config: &Config) -> anyhow::Result<StaticResourceProcessor> {
        StaticResourceProcessor::new(&config.server)
    }
}
