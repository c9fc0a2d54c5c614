use std::fmt;

use crate::http::headers::HttpHeaders;

/// Request method token.
///
/// Parsing accepts any syntactically valid token; only `OPTIONS`, `GET` and
/// `HEAD` are served and the rest are answered with 405.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
pub enum Method {
    GET,
    HEAD,
    OPTIONS,
    POST,
    PUT,
    DELETE,
    PATCH,
    TRACE,
    CONNECT,
    Extension(String),
}

const REGISTERED: [Method; 9] = [
    Method::GET,
    Method::HEAD,
    Method::OPTIONS,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::PATCH,
    Method::TRACE,
    Method::CONNECT,
];

impl Method {
    /// Looks up a registered method. Matching is case-sensitive.
    ///
    /// ```
    /// # use srs::http::request::Method;
    /// assert_eq!(Method::registered("HEAD"), Some(Method::HEAD));
    /// assert_eq!(Method::registered("head"), None);
    /// assert_eq!(Method::registered("BREW"), None);
    /// ```
    pub fn registered(token: &str) -> Option<Self> {
        REGISTERED.iter().find(|m| m.as_str() == token).cloned()
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::PATCH => "PATCH",
            Method::TRACE => "TRACE",
            Method::CONNECT => "CONNECT",
            Method::Extension(token) => token,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed request.
///
/// Absolute-form targets (`http://host/path`) were already rewritten to
/// origin-form by the parser, so `uri` starts with `/` unless it is `*`.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Origin-form target including any query, e.g. "/index.html?lang=en"
    pub uri: String,
    /// e.g. "HTTP/1.1"; echoed on the response status line
    pub version: String,
    pub headers: HttpHeaders,
    /// Exactly `Content-Length` bytes
    pub body: Vec<u8>,
}

impl Request {
    /// First value of a header; names match case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Declared body length. Missing or non-numeric counts as 0, the same
    /// rule the framer applies.
    pub fn content_length(&self) -> usize {
        self.header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// Assembles a [`Request`] by hand, mostly for tests and tools.
#[derive(Default)]
pub struct RequestBuilder {
    method: Option<Method>,
    uri: Option<String>,
    version: Option<String>,
    headers: HttpHeaders,
    body: Vec<u8>,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(self, method: Method) -> Self {
        Self { method: Some(method), ..self }
    }

    pub fn uri(self, uri: impl Into<String>) -> Self {
        Self { uri: Some(uri.into()), ..self }
    }

    /// Defaults to `HTTP/1.1` when never called.
    pub fn version(self, version: impl Into<String>) -> Self {
        Self { version: Some(version.into()), ..self }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    pub fn body(self, body: impl Into<Vec<u8>>) -> Self {
        Self { body: body.into(), ..self }
    }

    pub fn build(self) -> Result<Request, &'static str> {
        let method = self.method.ok_or("request method not set")?;
        let uri = self.uri.ok_or("request uri not set")?;

        Ok(Request {
            method,
            uri,
            version: self.version.unwrap_or_else(|| "HTTP/1.1".into()),
            headers: self.headers,
            body: self.body,
        })
    }
}
