use std::collections::VecDeque;
use std::io::{self, Read};

use bytes::BytesMut;

use crate::http::parser::{self, ParseError};
use crate::http::request::Request;
use crate::protocol::{ConnectionReader, ReadError};
use crate::server::connection::Connection;

const READ_CHUNK: usize = 2048;

/// Accumulates bytes from one connection and splits them into requests.
///
/// Each complete frame is queued as `Ok(Request)`, or as `Err(ParseError)`
/// when its bytes do not form a valid request; the processor answers the
/// latter with 400 Bad Request.
pub struct HttpConnectionReader {
    buffer: BytesMut,
    requests: VecDeque<Result<Request, ParseError>>,
    max_head_bytes: usize,
}

impl HttpConnectionReader {
    pub fn new(max_head_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(READ_CHUNK),
            requests: VecDeque::new(),
            max_head_bytes,
        }
    }

    /// Bytes received but not yet part of a complete request.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn read_from<R: Read>(&mut self, src: &mut R) -> Result<usize, ReadError> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut total = 0;

        loop {
            match src.read(&mut chunk) {
                Ok(0) => return Err(ReadError::EndOfStream),
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if total > 0 {
            self.split_requests()?;
        }
        Ok(total)
    }

    fn split_requests(&mut self) -> Result<(), ReadError> {
        while let Some(end) = parser::find_next_end_of_request(&self.buffer) {
            let frame = self.buffer.split_to(end);
            let parsed = parser::parse_request(&frame);

            match &parsed {
                Ok(request) => tracing::debug!(
                    method = %request.method,
                    uri = %request.uri,
                    "Request enqueued"
                ),
                Err(e) => tracing::debug!(error = %e, "Malformed request enqueued"),
            }
            self.requests.push_back(parsed);
        }

        if self.buffer.len() > self.max_head_bytes && !head_complete(&self.buffer) {
            return Err(ReadError::Malformed(format!(
                "request head exceeds {} bytes",
                self.max_head_bytes
            )));
        }
        Ok(())
    }
}

fn head_complete(buf: &[u8]) -> bool {
    buf.windows(4).any(|w| w == b"\r\n\r\n")
}

impl ConnectionReader for HttpConnectionReader {
    type Message = Result<Request, ParseError>;

    fn read(&mut self, conn: &mut Connection) -> Result<usize, ReadError> {
        self.read_from(conn)
    }

    fn has_next(&self) -> bool {
        !self.requests.is_empty()
    }

    fn next(&mut self) -> Option<Self::Message> {
        self.requests.pop_front()
    }
}
