use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::{Component, PathBuf};
use std::time::SystemTime;

use anyhow::Context;
use url::Url;

use crate::config::ServerConfig;
use crate::http::mime;
use crate::http::parser::ParseError;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::protocol::ProtocolProcessor;

pub const ALLOWED_METHODS: &str = "OPTIONS, GET, HEAD";

/// Tried in order when a request resolves to a directory.
pub const WELCOME_FILES: [&str; 2] = ["index.html", "index.htm"];

/// Serves files below a root directory for `GET` and `HEAD`, answers
/// `OPTIONS`, and rejects everything else with 405.
///
/// Every response gets `Date`, `Server` and `Content-Length` headers.
#[derive(Debug, Clone)]
pub struct StaticResourceProcessor {
    root: PathBuf,
    server_name: String,
    charset: String,
}

/// The request URI cannot name a file.
struct BadUri;

impl StaticResourceProcessor {
    pub fn new(config: &ServerConfig) -> anyhow::Result<Self> {
        let root = config.root_directory.canonicalize().with_context(|| {
            format!(
                "cannot resolve root directory {}",
                config.root_directory.display()
            )
        })?;

        Ok(Self {
            root,
            server_name: config.name.clone(),
            charset: config.default_charset.clone(),
        })
    }

    fn respond(&self, request: &Request) -> ResponseBuilder {
        let builder = match request.method {
            Method::GET | Method::HEAD => self.serve_file(request),
            Method::OPTIONS => ResponseBuilder::new(StatusCode::Ok).header("Allow", ALLOWED_METHODS),
            _ => ResponseBuilder::new(StatusCode::MethodNotAllowed).header("Allow", ALLOWED_METHODS),
        };
        builder.version(request.version.clone())
    }

    fn serve_file(&self, request: &Request) -> ResponseBuilder {
        let path = match self.resolve(&request.uri) {
            Ok(Some(path)) => path,
            Ok(None) => return ResponseBuilder::new(StatusCode::NotFound),
            Err(BadUri) => return ResponseBuilder::new(StatusCode::BadRequest),
        };

        // GET frames the bytes it actually read; HEAD reports the size on disk.
        let loaded = match request.method {
            Method::GET => fs::read(&path).map(|body| (body.len() as u64, body)),
            _ => fs::metadata(&path).map(|metadata| (metadata.len(), Vec::new())),
        };

        match loaded {
            Ok((length, body)) => {
                let mut builder = ResponseBuilder::new(StatusCode::Ok)
                    .header("Content-Length", length.to_string());
                if let Some(content_type) = mime::content_type(&path, &self.charset) {
                    builder = builder.header("Content-Type", content_type);
                }
                builder.body(body)
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to read local file");
                ResponseBuilder::new(StatusCode::InternalServerError)
            }
        }
    }

    /// Maps a request URI to an existing file below the root.
    ///
    /// Query and fragment are ignored, percent-escapes are decoded and dot
    /// segments are resolved, so the result never leaves the root.
    fn resolve(&self, uri: &str) -> Result<Option<PathBuf>, BadUri> {
        if !uri.starts_with('/') {
            return Err(BadUri);
        }

        let url = Url::parse("file:///")
            .and_then(|base| base.join(uri))
            .map_err(|_| BadUri)?;
        let decoded = url.to_file_path().map_err(|_| BadUri)?;
        if decoded.as_os_str().as_bytes().contains(&0) {
            return Err(BadUri);
        }
        let relative = decoded.strip_prefix("/").map_err(|_| BadUri)?;
        // An escaped slash decodes inside a segment, so `..` can reappear here.
        if !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            return Err(BadUri);
        }
        let path = self.root.join(relative);

        if path.is_dir() {
            Ok(WELCOME_FILES
                .iter()
                .map(|name| path.join(name))
                .find(|candidate| candidate.is_file()))
        } else if path.exists() {
            Ok(Some(path))
        } else {
            Ok(None)
        }
    }

    fn finish(&self, builder: ResponseBuilder) -> Response {
        let mut response = builder.build();
        response
            .headers
            .set("Date", httpdate::fmt_http_date(SystemTime::now()));
        response.headers.set("Server", self.server_name.clone());
        response
    }
}

impl ProtocolProcessor for StaticResourceProcessor {
    type Request = Result<Request, ParseError>;
    type Response = Response;

    fn process(&self, request: Self::Request) -> anyhow::Result<Response> {
        let builder = match request {
            Ok(request) => self.respond(&request),
            Err(e) => {
                tracing::debug!(error = %e, "Answering malformed request");
                ResponseBuilder::new(StatusCode::BadRequest)
            }
        };

        Ok(self.finish(builder))
    }
}
