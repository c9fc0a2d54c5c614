use crate::http::headers::HttpHeaders;

/// Statuses the static resource processor can answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    /// Malformed request, or a request URI that cannot name a file.
    BadRequest,
    NotFound,
    MethodNotAllowed,
    /// The file exists but could not be read.
    InternalServerError,
}

impl StatusCode {
    fn parts(self) -> (u16, &'static str) {
        match self {
            StatusCode::Ok => (200, "OK"),
            StatusCode::BadRequest => (400, "Bad Request"),
            StatusCode::NotFound => (404, "Not Found"),
            StatusCode::MethodNotAllowed => (405, "Method Not Allowed"),
            StatusCode::InternalServerError => (500, "Internal Server Error"),
        }
    }

    /// ```
    /// # use srs::http::response::StatusCode;
    /// assert_eq!(StatusCode::MethodNotAllowed.as_u16(), 405);
    /// ```
    pub fn as_u16(&self) -> u16 {
        self.parts().0
    }

    pub fn reason_phrase(&self) -> &'static str {
        self.parts().1
    }
}

/// A response as handed to the connection writer.
#[derive(Debug, Clone)]
pub struct Response {
    /// Status-line version, echoed from the request
    pub version: String,
    pub status: StatusCode,
    pub headers: HttpHeaders,
    /// Empty for HEAD even when `Content-Length` is not 0
    pub body: Vec<u8>,
}

impl Response {
    /// 200 with `body` and its length.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        ResponseBuilder::new(StatusCode::Ok).body(body).build()
    }

    /// No body and `Content-Length: 0`.
    pub fn empty(status: StatusCode) -> Self {
        ResponseBuilder::new(status).build()
    }
}

/// ```
/// # use srs::http::response::{ResponseBuilder, StatusCode};
/// let response = ResponseBuilder::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(b"{}".to_vec())
///     .build();
/// assert_eq!(response.headers.get("content-length"), Some("2"));
/// ```
pub struct ResponseBuilder {
    response: Response,
}

impl ResponseBuilder {
    /// Starts an `HTTP/1.1` response with no headers and no body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            response: Response {
                version: "HTTP/1.1".to_string(),
                status,
                headers: HttpHeaders::new(),
                body: Vec::new(),
            },
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.response.version = version.into();
        self
    }

    /// Adds a header value. Repeated names keep every value.
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.response.headers.add(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.response.body = body.into();
        self
    }

    /// Finishes the response, adding a `Content-Length` that matches the
    /// body unless one was set explicitly.
    pub fn build(self) -> Response {
        let mut response = self.response;
        if !response.headers.contains("Content-Length") {
            let length = response.body.len().to_string();
            response.headers.add("Content-Length", length);
        }
        response
    }
}
