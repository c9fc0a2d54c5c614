//! srs - Static Resource Server
//!
//! A thread-per-role connection engine with pluggable protocols, and an
//! HTTP/1.x plugin that serves files from a directory.

pub mod config;
pub mod http;
pub mod protocol;
pub mod server;
