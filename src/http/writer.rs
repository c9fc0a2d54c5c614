use std::collections::VecDeque;
use std::io::{self, Write};

use bytes::{Buf, BytesMut};

use crate::http::response::Response;
use crate::protocol::ConnectionWriter;
use crate::server::connection::Connection;

/// Serializes a response: status line, one `Name: value` line per header
/// value, blank line, body.
pub fn serialize_response(resp: &Response) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128 + resp.body.len());

    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        resp.version,
        resp.status.as_u16(),
        resp.status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    // Headers
    for (name, value) in resp.headers.iter() {
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    // Body
    buf.extend_from_slice(&resp.body);

    buf
}

/// Drains responses for one connection.
///
/// Only one response is on its way to the wire at a time. A client that
/// sends a new request before the previous response has drained has given
/// up on it, so when a newer response is taken up the undrained bytes of
/// the old one are dropped.
#[derive(Default)]
pub struct HttpConnectionWriter {
    responses: VecDeque<Response>,
    buffer: BytesMut,
}

impl HttpConnectionWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_to<W: Write>(&mut self, dst: &mut W) -> io::Result<usize> {
        while let Some(response) = self.responses.pop_front() {
            if !self.buffer.is_empty() {
                tracing::debug!(
                    dropped = self.buffer.len(),
                    "Discarding undrained response bytes"
                );
                self.buffer.clear();
            }
            self.buffer.extend_from_slice(&serialize_response(&response));

            tracing::info!(
                status = response.status.as_u16(),
                reason = response.status.reason_phrase(),
                "Response enqueued"
            );
        }

        let mut written = 0;
        while !self.buffer.is_empty() {
            match dst.write(&self.buffer) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.buffer.advance(n);
                    written += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(written)
    }
}

impl ConnectionWriter for HttpConnectionWriter {
    type Message = Response;

    fn add(&mut self, response: Response) {
        self.responses.push_back(response);
    }

    fn write(&mut self, conn: &mut Connection) -> io::Result<usize> {
        let n = self.write_to(conn)?;
        if n > 0 {
            tracing::debug!(conn = conn.id(), bytes = n, "Bytes written");
        }
        Ok(n)
    }

    fn has_pending(&self) -> bool {
        !self.responses.is_empty() || !self.buffer.is_empty()
    }
}
