//! HTTP/1.x request framing and parsing.
//!
//! Framing and parsing are separate steps. [`find_next_end_of_request`]
//! only answers "does the buffer hold a whole request yet, and how long is
//! it"; the reader calls it again every time more bytes arrive. Once a frame
//! is complete, [`parse_request`] turns exactly those bytes into a
//! [`Request`].

use thiserror::Error;
use url::Url;

use crate::http::headers::HttpHeaders;
use crate::http::request::{Method, Request};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("request is incomplete")]
    Incomplete,
    #[error("malformed request line")]
    InvalidRequest,
    #[error("invalid method token")]
    InvalidMethod,
    #[error("invalid request URI")]
    InvalidUri,
    #[error("invalid HTTP version")]
    InvalidVersion,
    #[error("malformed header line")]
    InvalidHeader,
}

/// Length of the first complete request in `buf`, or `None` while bytes are
/// still missing.
///
/// A request is complete once its head (request line, headers, blank line)
/// has arrived and, when a numeric `Content-Length` is present, that many
/// body bytes follow it. Calling this repeatedly on a growing buffer is
/// safe; nothing is consumed.
pub fn find_next_end_of_request(buf: &[u8]) -> Option<usize> {
    find_end_of_line(buf, 0)?;
    let head_end = find_headers_end(buf)?;
    let content_length = content_length_of(&buf[..head_end]);

    let request_end = head_end.checked_add(content_length)?;
    (buf.len() >= request_end).then_some(request_end)
}

/// Parses one request. `buf` should start at a request boundary; bytes
/// beyond the declared body are ignored.
pub fn parse_request(buf: &[u8]) -> Result<Request, ParseError> {
    let head_end = find_headers_end(buf).ok_or(ParseError::Incomplete)?;
    let head = std::str::from_utf8(&buf[..head_end - 4]).map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = head.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split(' ');
    let (Some(method), Some(uri), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::InvalidRequest);
    };

    let method = parse_method(method)?;
    if !is_valid_version(version) {
        return Err(ParseError::InvalidVersion);
    }

    // Headers
    let mut headers = HttpHeaders::new();
    for line in lines {
        let (name, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        if name.is_empty() || name.bytes().any(|b| b.is_ascii_whitespace()) {
            return Err(ParseError::InvalidHeader);
        }
        headers.add(name, value.trim());
    }

    let uri = normalize_uri(uri, &mut headers)?;

    // Body
    let content_length = headers
        .get("Content-Length")
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let body = buf
        .get(head_end..head_end + content_length)
        .ok_or(ParseError::Incomplete)?
        .to_vec();

    Ok(Request {
        method,
        uri,
        version: version.to_string(),
        headers,
        body,
    })
}

fn parse_method(token: &str) -> Result<Method, ParseError> {
    if let Some(method) = Method::registered(token) {
        return Ok(method);
    }
    if !token.is_empty() && token.bytes().all(is_token_byte) {
        Ok(Method::Extension(token.to_string()))
    } else {
        Err(ParseError::InvalidMethod)
    }
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

fn is_valid_version(version: &str) -> bool {
    let Some(number) = version.strip_prefix("HTTP/") else {
        return false;
    };
    let mut digits = number.split('.');
    matches!(
        (digits.next(), digits.next(), digits.next()),
        (Some(major), Some(minor), None)
            if !major.is_empty() && !minor.is_empty()
                && major.bytes().all(|b| b.is_ascii_digit())
                && minor.bytes().all(|b| b.is_ascii_digit())
    )
}

/// Rewrites an absolute-form target (`http://example.com/a.txt`) to
/// origin-form (`/a.txt`) and adds a `Host` header from its authority when
/// the request has none.
fn normalize_uri(uri: &str, headers: &mut HttpHeaders) -> Result<String, ParseError> {
    if uri.starts_with('/') || uri == "*" {
        return Ok(uri.to_string());
    }

    let url = Url::parse(uri).map_err(|_| ParseError::InvalidUri)?;
    let host = url.host_str().ok_or(ParseError::InvalidUri)?;

    if !headers.contains("Host") {
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        headers.add("Host", authority);
    }

    let mut origin_form = url.path().to_string();
    if let Some(query) = url.query() {
        origin_form.push('?');
        origin_form.push_str(query);
    }
    Ok(origin_form)
}

fn find_end_of_line(buf: &[u8], start: usize) -> Option<usize> {
    buf.get(start..)?
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|pos| start + pos + 2)
}

/// Position just past the blank line that ends the head.
fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

/// Scans header lines for a numeric `Content-Length`; anything else counts
/// as no body.
fn content_length_of(head: &[u8]) -> usize {
    head.split(|&b| b == b'\n')
        .skip(1)
        .filter_map(|line| {
            let colon = line.iter().position(|&b| b == b':')?;
            let (name, value) = line.split_at(colon);
            if !name.eq_ignore_ascii_case(b"content-length") {
                return None;
            }
            std::str::from_utf8(&value[1..]).ok()?.trim().parse::<usize>().ok()
        })
        .next()
        .unwrap_or(0)
}
