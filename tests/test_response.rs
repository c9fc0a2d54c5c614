use srs::http::response::{Response, ResponseBuilder, StatusCode};
use srs::http::writer::serialize_response;

#[test]
fn test_status_lines() {
    let expected = [
        (StatusCode::Ok, 200, "OK"),
        (StatusCode::BadRequest, 400, "Bad Request"),
        (StatusCode::NotFound, 404, "Not Found"),
        (StatusCode::MethodNotAllowed, 405, "Method Not Allowed"),
        (StatusCode::InternalServerError, 500, "Internal Server Error"),
    ];

    for (status, code, reason) in expected {
        assert_eq!(status.as_u16(), code);
        assert_eq!(status.reason_phrase(), reason);
    }
}

#[test]
fn test_response_builder_basic() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .body(b"Hello, World!".to_vec())
        .build();

    assert_eq!(response.status, StatusCode::Ok);
    assert_eq!(response.version, "HTTP/1.1");
    assert_eq!(response.body, b"Hello, World!".to_vec());
}

#[test]
fn test_response_builder_with_headers() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Type", "text/plain")
        .header("X-Custom", "value")
        .body(b"test".to_vec())
        .build();

    assert_eq!(response.headers.get("Content-Type").unwrap(), "text/plain");
    assert_eq!(response.headers.get("x-custom").unwrap(), "value");
}

#[test]
fn test_response_builder_auto_content_length() {
    let body = b"This is the body".to_vec();
    let response = ResponseBuilder::new(StatusCode::Ok)
        .body(body.clone())
        .build();

    let content_length = response.headers.get("Content-Length").unwrap();
    assert_eq!(content_length, body.len().to_string());
}

#[test]
fn test_response_builder_preserves_custom_content_length() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Length", "999")
        .build();

    // HEAD responses report the length of a body they do not carry
    assert_eq!(response.headers.get_all("Content-Length"), ["999"]);
    assert!(response.body.is_empty());
}

#[test]
fn test_response_builder_multiple_headers() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Type", "application/json")
        .header("Cache-Control", "no-cache")
        .header("X-Frame-Options", "DENY")
        .body(b"{}".to_vec())
        .build();

    assert_eq!(response.headers.len(), 4); // 3 custom + 1 auto (Content-Length)
    assert_eq!(response.headers.get("Cache-Control").unwrap(), "no-cache");
    assert_eq!(response.headers.get("X-Frame-Options").unwrap(), "DENY");
}

#[test]
fn test_response_empty_helper() {
    let response = Response::empty(StatusCode::NotFound);

    assert_eq!(response.status, StatusCode::NotFound);
    assert!(response.body.is_empty());
    assert_eq!(response.headers.get("Content-Length").unwrap(), "0");
}

#[test]
fn test_response_ok_helper() {
    let response = Response::ok(b"test content".to_vec());

    assert_eq!(response.status, StatusCode::Ok);
    assert_eq!(response.body, b"test content".to_vec());
}

#[test]
fn test_serialize_response_layout() {
    let response = ResponseBuilder::new(StatusCode::NotFound)
        .version("HTTP/1.0")
        .header("x-custom", "a")
        .header("X-CUSTOM", "b")
        .build();

    let bytes = serialize_response(&response);
    assert_eq!(
        String::from_utf8(bytes).unwrap(),
        "HTTP/1.0 404 Not Found\r\nX-Custom: a\r\nX-Custom: b\r\nContent-Length: 0\r\n\r\n"
    );
}

#[test]
fn test_serialize_response_appends_body() {
    let response = Response::ok(b"hi".to_vec());
    let bytes = serialize_response(&response);

    assert!(bytes.starts_with(b"HTTP/1.1 200 OK\r\n"));
    assert!(bytes.ends_with(b"Content-Length: 2\r\n\r\nhi"));
}
